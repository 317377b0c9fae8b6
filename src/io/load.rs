//! Checkpoint loading

use super::format::CheckpointFormat;
use super::model::{Checkpoint, CheckpointMetadata, CheckpointState};
use super::save::METADATA_KEY;
use crate::{Error, Result, Tensor};
use safetensors::tensor::Dtype;
use std::path::Path;

/// Load a checkpoint, detecting the format from the file extension
///
/// ```no_run
/// use nervus::io::load_checkpoint;
///
/// let checkpoint = load_checkpoint("results/run/weights/weight_best.safetensors")?;
/// let model = checkpoint.into_model()?;
/// # Ok::<(), nervus::Error>(())
/// ```
pub fn load_checkpoint(path: impl AsRef<Path>) -> Result<Checkpoint> {
    let path = path.as_ref();
    let format = CheckpointFormat::from_path(path).ok_or_else(|| {
        Error::Serialization(format!("Unsupported checkpoint file: {}", path.display()))
    })?;

    let state: CheckpointState = match format {
        CheckpointFormat::SafeTensors => return load_safetensors(path),
        CheckpointFormat::Json => serde_json::from_str(&std::fs::read_to_string(path)?)
            .map_err(|e| Error::Serialization(format!("JSON deserialization failed: {e}")))?,
        CheckpointFormat::Yaml => serde_yaml::from_str(&std::fs::read_to_string(path)?)
            .map_err(|e| Error::Serialization(format!("YAML deserialization failed: {e}")))?,
    };

    Checkpoint::from_state(state)
}

fn load_safetensors(path: &Path) -> Result<Checkpoint> {
    let data = std::fs::read(path)?;

    let (_, header) = safetensors::SafeTensors::read_metadata(&data)
        .map_err(|e| Error::Serialization(format!("SafeTensors parsing failed: {e}")))?;
    let encoded = header
        .metadata()
        .as_ref()
        .and_then(|m| m.get(METADATA_KEY))
        .ok_or_else(|| {
            Error::Serialization(format!(
                "{} has no '{METADATA_KEY}' header entry",
                path.display()
            ))
        })?;
    let metadata: CheckpointMetadata = serde_json::from_str(encoded)
        .map_err(|e| Error::Serialization(format!("Checkpoint metadata: {e}")))?;

    let tensors = safetensors::SafeTensors::deserialize(&data)
        .map_err(|e| Error::Serialization(format!("SafeTensors parsing failed: {e}")))?;

    let parameters = tensors
        .tensors()
        .into_iter()
        .map(|(name, view)| {
            if view.dtype() != Dtype::F32 {
                return Err(Error::Serialization(format!(
                    "Tensor '{name}' has dtype {:?}, expected F32",
                    view.dtype()
                )));
            }
            let values: Vec<f32> = view
                .data()
                .chunks_exact(4)
                .map(bytemuck::pod_read_unaligned::<f32>)
                .collect();
            Ok((name, Tensor::from_vec(values, false)))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Checkpoint::new(metadata, parameters))
}
