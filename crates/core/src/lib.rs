pub mod admission;
pub mod config;
pub mod downloader;
pub mod failure;
pub mod job;
pub mod metrics;
pub mod orchestrator;
pub mod process;
pub mod proxy;
pub mod rate_limit;
pub mod retention;
pub mod testing;

pub use admission::{AdmissionController, AdmissionPermit};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use downloader::{
    CascadeOutcome, ExtractorConfig, Strategy, StrategyCascade, StrategySet, TranscoderConfig,
};
pub use failure::{classify_output, ErrorType};
pub use job::{
    CreateJobRequest, FormatFailure, InMemoryJobRegistry, Job, JobFilter, JobRegistry, JobStats,
    JobStatus, MediaFormat, RegistryError,
};
pub use orchestrator::{
    JobOrchestrator, OrchestratorError, OrchestratorStatus, PacingConfig, SubmitError,
};
pub use process::{CommandRunner, Invocation, ProcessError, ProcessOutput, TokioCommandRunner};
pub use proxy::{redact_proxy_url, ProxyRotator, ProxyStatus};
pub use rate_limit::RateLimiter;
pub use retention::{FileRetentionManager, SweepReport};
