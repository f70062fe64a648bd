//! Scripted subprocess runner for testing.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::process::{CommandRunner, Invocation, ProcessError, ProcessOutput};

/// What a scripted invocation does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedOutcome {
    /// Exit 0 and write the artifact. `extension` overrides the inferred one.
    Success { extension: Option<String> },
    /// Exit 0 without writing anything.
    SuccessWithoutArtifact,
    /// Non-zero exit with the given stderr.
    Failure { exit_code: i32, stderr: String },
    /// Report a timeout.
    Timeout,
    /// Panic inside the runner.
    Panic(String),
}

#[derive(Debug)]
struct Rule {
    program: String,
    arg_contains: Option<String>,
    outcomes: VecDeque<ScriptedOutcome>,
}

impl Rule {
    fn matches(&self, invocation: &Invocation) -> bool {
        program_matches(&invocation.program, &self.program)
            && self
                .arg_contains
                .as_ref()
                .is_none_or(|needle| invocation.args.iter().any(|a| a.contains(needle.as_str())))
    }
}

fn program_matches(program: &Path, key: &str) -> bool {
    program == Path::new(key)
        || program
            .file_name()
            .is_some_and(|name| name.to_string_lossy() == key)
}

/// Mock implementation of [`CommandRunner`].
///
/// Replays scripted outcomes per program and, on success, materializes the
/// file the real engine would have written: the `-o` template with `%(ext)s`
/// filled in for the extractor, or the trailing output path for the
/// transcoder. Unscripted invocations succeed.
///
/// # Example
///
/// ```rust,ignore
/// let runner = Arc::new(ScriptedRunner::new());
/// runner.script_failure("yt-dlp", 1, "HTTP Error 429: Too Many Requests").await;
/// // next yt-dlp call fails, the one after succeeds
/// ```
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    rules: Arc<RwLock<Vec<Rule>>>,
    calls: Arc<RwLock<Vec<Invocation>>>,
    started_at: Arc<RwLock<Vec<Instant>>>,
    delay: Arc<RwLock<Duration>>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an outcome for the next matching call of `program`.
    pub async fn script(&self, program: &str, outcome: ScriptedOutcome) {
        self.push_rule(program, None, outcome).await;
    }

    /// Queue an outcome for calls of `program` with an argument containing `needle`.
    pub async fn script_when(&self, program: &str, needle: &str, outcome: ScriptedOutcome) {
        self.push_rule(program, Some(needle.to_string()), outcome)
            .await;
    }

    /// Queue a non-zero exit for `program`.
    pub async fn script_failure(&self, program: &str, exit_code: i32, stderr: &str) {
        self.script(
            program,
            ScriptedOutcome::Failure {
                exit_code,
                stderr: stderr.to_string(),
            },
        )
        .await;
    }

    async fn push_rule(&self, program: &str, needle: Option<String>, outcome: ScriptedOutcome) {
        let mut rules = self.rules.write().await;
        if let Some(rule) = rules
            .iter_mut()
            .find(|r| r.program == program && r.arg_contains == needle)
        {
            rule.outcomes.push_back(outcome);
            return;
        }
        rules.push(Rule {
            program: program.to_string(),
            arg_contains: needle,
            outcomes: VecDeque::from([outcome]),
        });
    }

    /// Simulated run time of every invocation.
    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = delay;
    }

    /// All invocations so far, in order.
    pub async fn calls(&self) -> Vec<Invocation> {
        self.calls.read().await.clone()
    }

    /// When each invocation started, parallel to [`calls`](Self::calls).
    pub async fn call_instants(&self) -> Vec<Instant> {
        self.started_at.read().await.clone()
    }

    /// Invocations of `program`.
    pub async fn calls_for(&self, program: &str) -> Vec<Invocation> {
        self.calls
            .read()
            .await
            .iter()
            .filter(|inv| program_matches(&inv.program, program))
            .cloned()
            .collect()
    }

    /// Highest number of simultaneous invocations observed.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    async fn next_outcome(&self, invocation: &Invocation) -> ScriptedOutcome {
        let mut rules = self.rules.write().await;
        // Filtered rules take precedence over plain per-program ones.
        let position = rules
            .iter()
            .position(|r| r.arg_contains.is_some() && !r.outcomes.is_empty() && r.matches(invocation))
            .or_else(|| {
                rules
                    .iter()
                    .position(|r| !r.outcomes.is_empty() && r.matches(invocation))
            });

        position
            .and_then(|i| rules[i].outcomes.pop_front())
            .unwrap_or(ScriptedOutcome::Success { extension: None })
    }
}

/// Path the engine would write for this invocation.
fn artifact_path(invocation: &Invocation, extension: Option<&str>) -> Option<PathBuf> {
    if let Some(template) = invocation.arg_value("-o") {
        let ext = extension
            .or_else(|| invocation.arg_value("--audio-format"))
            .or_else(|| invocation.arg_value("--merge-output-format"))
            .unwrap_or("mp4");
        return Some(PathBuf::from(template.replace("%(ext)s", ext)));
    }
    invocation.args.last().map(PathBuf::from)
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput, ProcessError> {
        self.calls.write().await.push(invocation.clone());
        self.started_at.write().await.push(Instant::now());
        let outcome = self.next_outcome(invocation).await;

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);
        let delay = *self.delay.read().await;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match outcome {
            ScriptedOutcome::Success { extension } => {
                if let Some(path) = artifact_path(invocation, extension.as_deref()) {
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent).map_err(|source| ProcessError::Io {
                            program: invocation.program.clone(),
                            source,
                        })?;
                    }
                    std::fs::write(&path, b"scripted artifact").map_err(|source| {
                        ProcessError::Io {
                            program: invocation.program.clone(),
                            source,
                        }
                    })?;
                }
                Ok(ProcessOutput {
                    exit_code: Some(0),
                    ..Default::default()
                })
            }
            ScriptedOutcome::SuccessWithoutArtifact => Ok(ProcessOutput {
                exit_code: Some(0),
                ..Default::default()
            }),
            ScriptedOutcome::Failure { exit_code, stderr } => Ok(ProcessOutput {
                exit_code: Some(exit_code),
                stdout: String::new(),
                stderr,
            }),
            ScriptedOutcome::Timeout => Err(ProcessError::Timeout {
                program: invocation.program.clone(),
                timeout_secs: invocation.timeout.as_secs(),
            }),
            ScriptedOutcome::Panic(message) => panic!("{}", message),
        }
    }
}
