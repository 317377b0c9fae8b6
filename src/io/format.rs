//! Checkpoint file formats

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Supported checkpoint serialization formats
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointFormat {
    /// Human-readable, largest files
    Json,

    Yaml,

    /// Binary tensors, metadata in the header
    #[default]
    SafeTensors,
}

impl CheckpointFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            CheckpointFormat::Json => "json",
            CheckpointFormat::Yaml => "yaml",
            CheckpointFormat::SafeTensors => "safetensors",
        }
    }

    /// Detect format from file extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "json" => Some(CheckpointFormat::Json),
            "yaml" | "yml" => Some(CheckpointFormat::Yaml),
            "safetensors" => Some(CheckpointFormat::SafeTensors),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|s| s.to_str())
            .and_then(Self::from_extension)
    }
}

impl FromStr for CheckpointFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_extension(s)
            .ok_or_else(|| format!("Unknown checkpoint format: {s}. Valid: json, yaml, safetensors"))
    }
}

/// Options for writing a checkpoint
#[derive(Debug, Clone)]
pub struct SaveConfig {
    pub format: CheckpointFormat,

    /// Pretty-print text formats
    pub pretty: bool,
}

impl SaveConfig {
    pub fn new(format: CheckpointFormat) -> Self {
        Self {
            format,
            pretty: true,
        }
    }

    pub fn with_pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }
}

impl Default for SaveConfig {
    fn default() -> Self {
        Self::new(CheckpointFormat::default())
    }
}
