use regex_lite::Regex;

use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Admission cap, retention window and sweep interval are positive
/// - Engine binaries are set
/// - The URL pattern compiles
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    if config.admission.max_active_jobs == 0 {
        return Err(ConfigError::ValidationError(
            "admission.max_active_jobs must be at least 1".to_string(),
        ));
    }

    if config.storage.retention_secs == 0 {
        return Err(ConfigError::ValidationError(
            "storage.retention_secs cannot be 0".to_string(),
        ));
    }

    if config.storage.sweep_interval_secs == 0 {
        return Err(ConfigError::ValidationError(
            "storage.sweep_interval_secs cannot be 0".to_string(),
        ));
    }

    if config.extractor.binary.as_os_str().is_empty() {
        return Err(ConfigError::ValidationError(
            "extractor.binary cannot be empty".to_string(),
        ));
    }

    if config.transcoder.binary.as_os_str().is_empty() {
        return Err(ConfigError::ValidationError(
            "transcoder.binary cannot be empty".to_string(),
        ));
    }

    Regex::new(&config.extractor.url_pattern).map_err(|e| {
        ConfigError::ValidationError(format!("extractor.url_pattern is invalid: {}", e))
    })?;

    Ok(())
}
