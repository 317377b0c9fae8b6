//! Checkpoint structure for serialization

use crate::network::{ArchitectureSpec, ComposedModel};
use crate::{Error, Result, Tensor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What a checkpoint records besides the weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Crate version that wrote the file
    pub version: String,

    /// Rebuilds the model without the run configuration
    pub architecture: ArchitectureSpec,

    /// Criterion name the run optimised
    pub criterion: String,

    /// 1-based epoch the weights were taken after
    pub epoch: usize,

    pub train_loss: f32,

    pub val_loss: f32,

    /// Free-form fields, e.g. optimizer or device
    #[serde(default)]
    pub custom: BTreeMap<String, serde_json::Value>,
}

impl CheckpointMetadata {
    pub fn new(architecture: ArchitectureSpec, criterion: impl Into<String>) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            architecture,
            criterion: criterion.into(),
            epoch: 0,
            train_loss: f32::NAN,
            val_loss: f32::NAN,
            custom: BTreeMap::new(),
        }
    }

    pub fn at_epoch(mut self, epoch: usize, train_loss: f32, val_loss: f32) -> Self {
        self.epoch = epoch;
        self.train_loss = train_loss;
        self.val_loss = val_loss;
        self
    }

    pub fn with_custom(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.custom.insert(key.into(), value);
        self
    }
}

/// Information about one stored parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterInfo {
    /// e.g. `head.label_a.weight`
    pub name: String,

    pub shape: Vec<usize>,

    pub dtype: String,
}

/// Serializable checkpoint for the text formats
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointState {
    pub metadata: CheckpointMetadata,

    pub parameters: Vec<ParameterInfo>,

    /// All parameter values, concatenated in `parameters` order
    pub data: Vec<f32>,
}

/// Weights of a composed model plus the metadata to rebuild it
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub metadata: CheckpointMetadata,

    pub parameters: Vec<(String, Tensor)>,
}

impl Checkpoint {
    pub fn new(metadata: CheckpointMetadata, parameters: Vec<(String, Tensor)>) -> Self {
        Self {
            metadata,
            parameters,
        }
    }

    /// Snapshot the current weights of `model`
    pub fn from_model(model: &ComposedModel, metadata: CheckpointMetadata) -> Self {
        let parameters = model
            .named_parameters()
            .into_iter()
            .map(|(name, tensor)| (name, Tensor::new(tensor.data().clone(), false)))
            .collect();
        Self::new(metadata, parameters)
    }

    pub fn get_parameter(&self, name: &str) -> Option<&Tensor> {
        self.parameters
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t)
    }

    /// Rebuild the model from the stored architecture and load the weights
    pub fn into_model(self) -> Result<ComposedModel> {
        let mut model = ComposedModel::from_spec(self.metadata.architecture)?;
        model.load_parameters(&self.parameters)?;
        Ok(model)
    }

    pub fn to_state(&self) -> CheckpointState {
        let mut data = Vec::new();
        let parameters = self
            .parameters
            .iter()
            .map(|(name, tensor)| {
                data.extend(tensor.data().iter().copied());
                ParameterInfo {
                    name: name.clone(),
                    shape: vec![tensor.len()],
                    dtype: "f32".to_string(),
                }
            })
            .collect();

        CheckpointState {
            metadata: self.metadata.clone(),
            parameters,
            data,
        }
    }

    /// Fails when the declared shapes do not cover `data` exactly
    pub fn from_state(state: CheckpointState) -> Result<Self> {
        let declared: usize = state
            .parameters
            .iter()
            .map(|p| p.shape.iter().product::<usize>())
            .sum();
        if declared != state.data.len() {
            return Err(Error::ShapeMismatch {
                expected: vec![declared],
                got: vec![state.data.len()],
            });
        }

        let mut offset = 0;
        let parameters = state
            .parameters
            .into_iter()
            .map(|info| {
                let size: usize = info.shape.iter().product();
                let values = state.data[offset..offset + size].to_vec();
                offset += size;
                (info.name, Tensor::from_vec(values, false))
            })
            .collect();

        Ok(Self {
            metadata: state.metadata,
            parameters,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::schema::{LabelSpec, ModalityDescriptor, TaskDescription, TaskKind};

    pub(crate) fn tabular_spec() -> ArchitectureSpec {
        ArchitectureSpec {
            model: "MLP".into(),
            task: TaskDescription {
                kind: TaskKind::Regression,
                labels: vec![LabelSpec::continuous("label_fev")],
                modality: ModalityDescriptor {
                    tabular_columns: vec!["input_age".into(), "input_height".into()],
                    image: None,
                },
                id_column: "uniqID".into(),
                period_column: None,
            },
            image_size: 32,
            mlp_hidden: vec![4],
            seed: 7,
        }
    }

    #[test]
    fn test_metadata_builders() {
        let meta = CheckpointMetadata::new(tabular_spec(), "MSE")
            .at_epoch(3, 0.5, 0.25)
            .with_custom("optimizer", serde_json::json!("adam"));
        assert_eq!(meta.epoch, 3);
        assert_eq!(meta.val_loss, 0.25);
        assert_eq!(meta.custom["optimizer"], serde_json::json!("adam"));
        assert_eq!(meta.version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_state_round_trip_keeps_order() {
        let checkpoint = Checkpoint::new(
            CheckpointMetadata::new(tabular_spec(), "MSE"),
            vec![
                ("b".into(), Tensor::from_vec(vec![1.0, 2.0, 3.0], false)),
                ("a".into(), Tensor::from_vec(vec![4.0], false)),
            ],
        );
        let state = checkpoint.to_state();
        assert_eq!(state.data, vec![1.0, 2.0, 3.0, 4.0]);

        let restored = Checkpoint::from_state(state).unwrap();
        let names: Vec<&str> = restored.parameters.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(restored.get_parameter("a").unwrap().data().to_vec(), vec![4.0]);
    }

    #[test]
    fn test_truncated_state_is_rejected() {
        let mut state = Checkpoint::new(
            CheckpointMetadata::new(tabular_spec(), "MSE"),
            vec![("w".into(), Tensor::from_vec(vec![1.0, 2.0], false))],
        )
        .to_state();
        state.data.pop();
        assert!(matches!(
            Checkpoint::from_state(state),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_snapshot_rebuilds_model() {
        let model = ComposedModel::from_spec(tabular_spec()).unwrap();
        let checkpoint =
            Checkpoint::from_model(&model, CheckpointMetadata::new(tabular_spec(), "MSE"));
        assert_eq!(checkpoint.parameters.len(), model.parameters().len());
        assert!(checkpoint.parameters.iter().all(|(_, t)| !t.requires_grad()));

        let rebuilt = checkpoint.into_model().unwrap();
        for (a, b) in model.parameters().iter().zip(rebuilt.parameters()) {
            assert_eq!(a.data(), b.data());
        }
    }
}
