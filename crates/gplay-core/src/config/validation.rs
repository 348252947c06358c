//! Configuration validation

use tracing::debug;

use crate::error::{ConfigError, Result};

use super::types::Config;

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    debug!("validating configuration");
    if let Some(package) = &config.package_name {
        validate_package_name(package)?;
    }
    if let Some(track) = &config.default_track {
        if track.trim().is_empty() {
            return Err(ConfigError::invalid("default_track", "track cannot be empty"));
        }
    }
    validate_edits(config)?;
    debug!("configuration validation passed");
    Ok(())
}

fn validate_edits(config: &Config) -> Result<()> {
    if config.edits.max_age_secs == 0 {
        return Err(ConfigError::invalid(
            "edits.max_age_secs",
            "must be greater than zero",
        ));
    }

    if config.edits.lock_stale_secs == 0 {
        return Err(ConfigError::invalid(
            "edits.lock_stale_secs",
            "must be greater than zero",
        ));
    }

    Ok(())
}

/// Check that a package name is a dotted Java-style identifier
pub fn validate_package_name(package: &str) -> Result<()> {
    let segments: Vec<&str> = package.split('.').collect();
    if segments.len() < 2 {
        return Err(ConfigError::invalid(
            "package_name",
            format!("'{}' must contain at least one '.'", package),
        ));
    }

    for segment in segments {
        let mut chars = segment.chars();
        let valid_start = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
        let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid_start || !valid_rest {
            return Err(ConfigError::invalid(
                "package_name",
                format!("'{}' has an invalid segment '{}'", package, segment),
            ));
        }
    }

    Ok(())
}
