//! Loading a run specification from YAML

use super::schema::TrainSpec;
use super::validate::validate_config;
use crate::error::{Error, Result};
use std::fs;
use std::path::Path;

/// Parse a run specification without validating it
///
/// CLI overrides are applied between parsing and validation, so a config
/// with e.g. a missing csvpath can still be completed from flags.
pub fn parse_config<P: AsRef<Path>>(config_path: P) -> Result<TrainSpec> {
    let yaml_content = fs::read_to_string(config_path.as_ref()).map_err(|e| {
        Error::ConfigError(format!(
            "Failed to read config file {}: {}",
            config_path.as_ref().display(),
            e
        ))
    })?;

    serde_yaml::from_str(&yaml_content)
        .map_err(|e| Error::ConfigError(format!("Failed to parse YAML config: {e}")))
}

/// Load and validate a run specification
pub fn load_config<P: AsRef<Path>>(config_path: P) -> Result<TrainSpec> {
    let spec = parse_config(config_path)?;
    validate_config(&spec).map_err(|e| Error::ConfigError(format!("Invalid config: {e}")))?;
    Ok(spec)
}
