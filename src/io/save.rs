//! Checkpoint saving

use super::format::{CheckpointFormat, SaveConfig};
use super::model::Checkpoint;
use crate::{Error, Result};
use safetensors::tensor::{Dtype, TensorView};
use std::collections::HashMap;
use std::path::Path;

/// Header key holding the JSON-encoded [`CheckpointMetadata`](super::CheckpointMetadata)
pub(crate) const METADATA_KEY: &str = "nervus.checkpoint";

/// Write a checkpoint in the configured format
///
/// The caller picks the path; its extension is not checked against
/// `config.format`, but [`load_checkpoint`](super::load_checkpoint) relies on it.
pub fn save_checkpoint(
    checkpoint: &Checkpoint,
    path: impl AsRef<Path>,
    config: &SaveConfig,
) -> Result<()> {
    let path = path.as_ref();

    let text = match config.format {
        CheckpointFormat::SafeTensors => return save_safetensors(checkpoint, path),
        CheckpointFormat::Json => {
            let state = checkpoint.to_state();
            if config.pretty {
                serde_json::to_string_pretty(&state)
            } else {
                serde_json::to_string(&state)
            }
            .map_err(|e| Error::Serialization(format!("JSON serialization failed: {e}")))?
        }
        CheckpointFormat::Yaml => serde_yaml::to_string(&checkpoint.to_state())
            .map_err(|e| Error::Serialization(format!("YAML serialization failed: {e}")))?,
    };

    std::fs::write(path, text)?;
    tracing::debug!(path = %path.display(), "checkpoint written");
    Ok(())
}

fn save_safetensors(checkpoint: &Checkpoint, path: &Path) -> Result<()> {
    let tensor_data: Vec<(&str, Vec<u8>, Vec<usize>)> = checkpoint
        .parameters
        .iter()
        .map(|(name, tensor)| {
            let values: Vec<f32> = tensor.data().iter().copied().collect();
            let bytes = bytemuck::cast_slice::<f32, u8>(&values).to_vec();
            (name.as_str(), bytes, vec![tensor.len()])
        })
        .collect();

    let views = tensor_data
        .iter()
        .map(|(name, bytes, shape)| {
            TensorView::new(Dtype::F32, shape.clone(), bytes)
                .map(|view| (*name, view))
                .map_err(|e| Error::Serialization(format!("Invalid tensor '{name}': {e}")))
        })
        .collect::<Result<Vec<_>>>()?;

    let encoded = serde_json::to_string(&checkpoint.metadata)
        .map_err(|e| Error::Serialization(format!("Checkpoint metadata: {e}")))?;
    let mut metadata = HashMap::new();
    metadata.insert(METADATA_KEY.to_string(), encoded);

    let bytes = safetensors::serialize(views, &Some(metadata))
        .map_err(|e| Error::Serialization(format!("SafeTensors serialization failed: {e}")))?;
    std::fs::write(path, bytes)?;
    tracing::debug!(path = %path.display(), "checkpoint written");
    Ok(())
}
