//! Periodic deletion of expired artifacts.
//!
//! The sweep looks only at filesystem modification times. Job records are
//! pruned separately (when enabled) using each job's completion time.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::Utc;
use serde::Serialize;
use tokio::fs;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::StorageConfig;
use crate::job::JobRegistry;
use crate::metrics;

/// Outcome of a single sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub deleted: usize,
    pub kept: usize,
    /// Files that could not be inspected or removed.
    pub errors: usize,
    pub records_pruned: usize,
}

/// Deletes files in the output directory once they outlive the retention window.
pub struct FileRetentionManager {
    output_dir: PathBuf,
    retention: Duration,
    interval: Duration,
    registry: Option<Arc<dyn JobRegistry>>,
    running: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
}

impl FileRetentionManager {
    pub fn new(output_dir: impl Into<PathBuf>, retention: Duration, interval: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            output_dir: output_dir.into(),
            retention,
            interval,
            registry: None,
            running: AtomicBool::new(false),
            shutdown_tx,
        }
    }

    /// Build from storage config; attaches the registry if record pruning is enabled.
    pub fn from_config(config: &StorageConfig, registry: Arc<dyn JobRegistry>) -> Self {
        let manager = Self::new(
            config.output_dir.clone(),
            config.retention(),
            config.sweep_interval(),
        );
        if config.prune_job_records {
            manager.with_registry(registry)
        } else {
            manager
        }
    }

    /// Also prune terminal job records older than the retention window.
    pub fn with_registry(mut self, registry: Arc<dyn JobRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Run one pass over the output directory.
    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let now = SystemTime::now();

        let mut entries = match fs::read_dir(&self.output_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Output directory {} does not exist yet", self.output_dir.display());
                report.records_pruned = self.prune_records();
                return report;
            }
            Err(e) => {
                warn!("Cannot read {}: {}", self.output_dir.display(), e);
                report.errors += 1;
                report.records_pruned = self.prune_records();
                return report;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!("Error while listing {}: {}", self.output_dir.display(), e);
                    report.errors += 1;
                    break;
                }
            };

            let path = entry.path();
            let modified = match entry.metadata().await.and_then(|m| {
                if m.is_file() {
                    m.modified().map(Some)
                } else {
                    Ok(None)
                }
            }) {
                Ok(Some(modified)) => modified,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Cannot stat {}: {}", path.display(), e);
                    report.errors += 1;
                    continue;
                }
            };

            report.scanned += 1;
            // Future mtimes count as fresh.
            let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
            if age <= self.retention {
                report.kept += 1;
                continue;
            }

            match fs::remove_file(&path).await {
                Ok(()) => {
                    debug!("Deleted expired {} (age {}s)", path.display(), age.as_secs());
                    report.deleted += 1;
                }
                Err(e) => {
                    warn!("Failed to delete {}: {}", path.display(), e);
                    report.errors += 1;
                }
            }
        }

        report.records_pruned = self.prune_records();
        metrics::FILES_SWEPT.inc_by(report.deleted as u64);

        if report.deleted > 0 || report.records_pruned > 0 || report.errors > 0 {
            info!(
                "Retention sweep: {} deleted, {} kept, {} errors, {} job records pruned",
                report.deleted, report.kept, report.errors, report.records_pruned
            );
        }
        report
    }

    fn prune_records(&self) -> usize {
        let Some(registry) = &self.registry else {
            return 0;
        };
        let window = chrono::Duration::from_std(self.retention)
            .unwrap_or_else(|_| chrono::Duration::days(36_500));
        match registry.prune_terminal_before(Utc::now() - window) {
            Ok(pruned) => {
                metrics::JOB_RECORDS_PRUNED.inc_by(pruned as u64);
                pruned
            }
            Err(e) => {
                warn!("Failed to prune job records: {}", e);
                0
            }
        }
    }

    /// Start the periodic sweep (first pass runs immediately).
    pub fn start(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Retention manager already running");
            return None;
        }

        let this = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        Some(tokio::spawn(async move {
            info!(
                "Retention loop started: {} every {}s, window {}s",
                this.output_dir.display(),
                this.interval.as_secs(),
                this.retention.as_secs()
            );
            // `interval` panics on a zero period.
            let period = this.interval.max(Duration::from_millis(1));
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Retention loop received shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        if !this.running.load(Ordering::Relaxed) {
                            break;
                        }
                        this.sweep().await;
                    }
                }
            }
            info!("Retention loop stopped");
        }))
    }

    /// Signal the periodic sweep to stop.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(());
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failure::ErrorType;
    use crate::job::{InMemoryJobRegistry, Job, MediaFormat};
    use filetime::{set_file_mtime, FileTime};
    use tempfile::TempDir;

    fn write_aged(dir: &Path, name: &str, age: Duration) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"data").unwrap();
        let mtime = SystemTime::now() - age;
        set_file_mtime(&path, FileTime::from_system_time(mtime)).unwrap();
        path
    }

    fn manager(dir: &Path, retention_secs: u64) -> FileRetentionManager {
        FileRetentionManager::new(
            dir,
            Duration::from_secs(retention_secs),
            Duration::from_secs(1800),
        )
    }

    #[tokio::test]
    async fn test_deletes_only_expired_files() {
        let dir = TempDir::new().unwrap();
        let old = write_aged(dir.path(), "a_video.mp4", Duration::from_secs(7200));
        let older = write_aged(dir.path(), "b_audio.mp3", Duration::from_secs(86_400));
        let fresh = write_aged(dir.path(), "c_video.mp4", Duration::from_secs(60));
        let edge = write_aged(dir.path(), "d_video.mp4", Duration::from_secs(3000));

        let report = manager(dir.path(), 3600).sweep().await;

        assert_eq!(report.scanned, 4);
        assert_eq!(report.deleted, 2);
        assert_eq!(report.kept, 2);
        assert_eq!(report.errors, 0);
        assert!(!old.exists());
        assert!(!older.exists());
        assert!(fresh.exists());
        assert!(edge.exists());
    }

    #[tokio::test]
    async fn test_skips_directories() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("nested");
        std::fs::create_dir(&sub).unwrap();
        set_file_mtime(
            &sub,
            FileTime::from_system_time(SystemTime::now() - Duration::from_secs(86_400)),
        )
        .unwrap();

        let report = manager(dir.path(), 60).sweep().await;
        assert_eq!(report.scanned, 0);
        assert!(sub.exists());
    }

    #[tokio::test]
    async fn test_missing_directory_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let report = manager(&dir.path().join("missing"), 60).sweep().await;
        assert_eq!(report, SweepReport::default());
    }

    #[tokio::test]
    async fn test_prunes_terminal_records_when_enabled() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(InMemoryJobRegistry::new());
        let job = Job::new(
            "https://youtu.be/dQw4w9WgXcQ",
            [MediaFormat::Video].into_iter().collect(),
            "127.0.0.1",
            None,
        );
        let id = job.id;
        registry.insert(job).unwrap();
        registry
            .update(&id, &mut |j| {
                j.start()?;
                j.fail(ErrorType::GeneralError, "boom")
            })
            .unwrap();

        // Zero window: anything already finished is expired.
        let manager = FileRetentionManager::new(dir.path(), Duration::ZERO, Duration::from_secs(60))
            .with_registry(registry.clone());
        tokio::time::sleep(Duration::from_millis(10)).await;
        let report = manager.sweep().await;

        assert_eq!(report.records_pruned, 1);
        assert!(registry.get(&id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_from_config_respects_prune_toggle() {
        let dir = TempDir::new().unwrap();
        let registry: Arc<dyn JobRegistry> = Arc::new(InMemoryJobRegistry::new());
        let mut config = StorageConfig {
            output_dir: dir.path().to_path_buf(),
            ..Default::default()
        };

        config.prune_job_records = false;
        assert!(FileRetentionManager::from_config(&config, registry.clone())
            .registry
            .is_none());

        config.prune_job_records = true;
        assert!(FileRetentionManager::from_config(&config, registry)
            .registry
            .is_some());
    }

    #[tokio::test]
    async fn test_loop_sweeps_and_stops() {
        let dir = TempDir::new().unwrap();
        let old = write_aged(dir.path(), "x_video.mp4", Duration::from_secs(7200));

        let manager = Arc::new(FileRetentionManager::new(
            dir.path(),
            Duration::from_secs(3600),
            Duration::from_millis(20),
        ));
        let handle = manager.start().unwrap();
        assert!(manager.start().is_none());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!old.exists());

        manager.stop();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("loop should stop")
            .unwrap();
        assert!(!manager.is_running());
    }
}
