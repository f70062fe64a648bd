//! Media acquisition through the external extraction and transcoding engines.

mod artifact;
mod cascade;
mod config;
mod strategy;
mod transcoder;

pub use artifact::{artifact_stem, file_name_of, find_artifact, output_template, purge_stem};
pub use cascade::{random_jitter, Backoff, CascadeOutcome, StrategyCascade};
pub use config::{ExtractorConfig, TranscoderConfig};
pub use strategy::{Strategy, StrategySet};
pub use transcoder::{TranscodeError, TranscodeOp, Transcoder};
