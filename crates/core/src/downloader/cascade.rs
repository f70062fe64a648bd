//! Ordered strategy fallback for a single artifact.

use rand::Rng;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::artifact::{artifact_stem, find_artifact, output_template, purge_stem};
use super::config::ExtractorConfig;
use super::strategy::Strategy;
use crate::failure::{classify_output, ErrorType};
use crate::job::{FormatFailure, MediaFormat};
use crate::metrics;
use crate::process::{CommandRunner, Invocation};
use crate::proxy::ProxyRotator;

/// Randomized delay applied between strategy attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub jitter: Duration,
}

impl Backoff {
    pub fn new(base: Duration, jitter: Duration) -> Self {
        Self { base, jitter }
    }

    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    /// Delay before the attempt following `failed` failures.
    ///
    /// The base doubles per failure (capped at 2^5) and a uniform jitter of up
    /// to `jitter` is added on top.
    pub fn delay_for(&self, failed: u32) -> Duration {
        let exponent = failed.saturating_sub(1).min(5);
        let scaled = self.base.saturating_mul(1 << exponent);
        scaled + random_jitter(self.jitter)
    }
}

/// Uniform random duration in `[0, max]`.
pub fn random_jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}

/// Result of running a cascade to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CascadeOutcome {
    /// A strategy produced the artifact.
    Produced {
        path: PathBuf,
        strategy: String,
        attempts: usize,
    },
    /// Every strategy failed. `failure` describes the last attempt.
    Exhausted {
        failure: FormatFailure,
        attempts: usize,
    },
}

/// Runs an ordered strategy list through the extractor until one yields an artifact.
pub struct StrategyCascade {
    runner: Arc<dyn CommandRunner>,
    proxies: Arc<ProxyRotator>,
    config: ExtractorConfig,
    backoff: Backoff,
}

impl StrategyCascade {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        proxies: Arc<ProxyRotator>,
        config: ExtractorConfig,
        backoff: Backoff,
    ) -> Self {
        Self {
            runner,
            proxies,
            config,
            backoff,
        }
    }

    /// Acquire `format` for `job_id` into `output_dir`.
    ///
    /// Before every attempt any file under the artifact's stem is removed, so
    /// an artifact found afterwards can only come from the attempt that just ran.
    pub async fn acquire(
        &self,
        job_id: Uuid,
        url: &str,
        format: MediaFormat,
        strategies: &[Strategy],
        output_dir: &Path,
    ) -> CascadeOutcome {
        let stem = artifact_stem(&job_id, format);
        let template = output_template(output_dir, &stem);
        let mut last_failure = None;

        for (index, strategy) in strategies.iter().enumerate() {
            if index > 0 {
                let delay = self.backoff.delay_for(index as u32);
                debug!(
                    "Job {} {}: waiting {}ms before strategy {}",
                    job_id,
                    format,
                    delay.as_millis(),
                    strategy.name
                );
                tokio::time::sleep(delay).await;
            }

            if let Err(e) = purge_stem(output_dir, &stem).await {
                warn!("Job {}: failed to clear leftovers for {}: {}", job_id, stem, e);
            }

            info!(
                "Job {} {}: attempt {}/{} with strategy {}",
                job_id,
                format,
                index + 1,
                strategies.len(),
                strategy.name
            );

            match self.attempt(url, strategy, &template, output_dir, &stem).await {
                Ok(path) => {
                    metrics::STRATEGY_ATTEMPTS
                        .with_label_values(&[format.as_str(), strategy.name.as_str(), "success"])
                        .inc();
                    info!(
                        "Job {} {}: strategy {} produced {}",
                        job_id,
                        format,
                        strategy.name,
                        path.display()
                    );
                    return CascadeOutcome::Produced {
                        path,
                        strategy: strategy.name.clone(),
                        attempts: index + 1,
                    };
                }
                Err(failure) => {
                    metrics::STRATEGY_ATTEMPTS
                        .with_label_values(&[format.as_str(), strategy.name.as_str(), "failure"])
                        .inc();
                    warn!(
                        "Job {} {}: strategy {} failed ({}): {}",
                        job_id, format, strategy.name, failure.error_type, failure.message
                    );
                    last_failure = Some(failure);
                }
            }
        }

        if let Err(e) = purge_stem(output_dir, &stem).await {
            warn!("Job {}: failed to clear leftovers for {}: {}", job_id, stem, e);
        }

        CascadeOutcome::Exhausted {
            failure: last_failure.unwrap_or_else(|| {
                FormatFailure::new(
                    ErrorType::GeneralError,
                    format!("no strategies configured for {}", format),
                )
            }),
            attempts: strategies.len(),
        }
    }

    async fn attempt(
        &self,
        url: &str,
        strategy: &Strategy,
        template: &str,
        output_dir: &Path,
        stem: &str,
    ) -> Result<PathBuf, FormatFailure> {
        let proxy = self.proxies.next_proxy();
        let invocation = Invocation::new(
            self.config.binary.clone(),
            strategy.build_args(url, template, proxy.as_deref(), &self.config),
            strategy.timeout_or(&self.config),
        );

        let output = self
            .runner
            .run(&invocation)
            .await
            .map_err(|e| FormatFailure::new(ErrorType::GeneralError, e.to_string()))?;

        if !output.success() {
            return Err(FormatFailure::new(
                classify_output(&output.combined()),
                output.summary(),
            ));
        }

        match find_artifact(output_dir, stem, &strategy.extensions).await {
            Ok(Some(path)) => Ok(path),
            Ok(None) => Err(FormatFailure::new(
                ErrorType::ExtractionError,
                format!(
                    "extractor exited successfully but no {}.{{{}}} was produced",
                    stem,
                    strategy.extensions.join(",")
                ),
            )),
            Err(e) => Err(FormatFailure::new(
                ErrorType::GeneralError,
                format!("failed to inspect output directory: {}", e),
            )),
        }
    }
}
