//! Compose extractors and heads into one multi-output model

use super::catalog::{Backbone, ExtractorConfig, FeatureExtractor, ModelSelection};
use super::params::{Linear, ParameterStore};
use crate::autograd::concat_cols;
use crate::error::ArchitectureError;
use crate::schema::TaskDescription;
use crate::{Result, Tensor};
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

/// Image edge used when nothing else is configured
pub const DEFAULT_IMAGE_SIZE: usize = 64;

fn default_image_size() -> usize {
    DEFAULT_IMAGE_SIZE
}

fn default_mlp_hidden() -> Vec<usize> {
    vec![64, 64]
}

/// User-facing model choices
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelOptions {
    pub model: String,
    #[serde(default = "default_image_size")]
    pub image_size: usize,
    #[serde(default = "default_mlp_hidden")]
    pub mlp_hidden: Vec<usize>,
    #[serde(default)]
    pub seed: u64,
}

impl ModelOptions {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            image_size: DEFAULT_IMAGE_SIZE,
            mlp_hidden: default_mlp_hidden(),
            seed: 0,
        }
    }
}

/// Everything needed to rebuild a composed model exactly
///
/// Stored inside every checkpoint so evaluation does not depend on the
/// original configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchitectureSpec {
    /// Canonical model string, e.g. `MLP+ResNet18`
    pub model: String,
    pub task: TaskDescription,
    pub image_size: usize,
    pub mlp_hidden: Vec<usize>,
    pub seed: u64,
}

/// Batch input for a forward pass; matrices are row-major
#[derive(Debug, Clone, Default)]
pub struct ModelInput {
    pub batch: usize,
    /// batch×tabular_columns
    pub tabular: Option<Array1<f32>>,
    /// batch×(channels·size·size), channel-major per record
    pub images: Option<Array1<f32>>,
}

pub struct ComposedModel {
    spec: ArchitectureSpec,
    store: ParameterStore,
    tabular: Option<Box<dyn FeatureExtractor>>,
    image: Option<Box<dyn FeatureExtractor>>,
    heads: Vec<Linear>,
}

impl std::fmt::Debug for ComposedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComposedModel")
            .field("model", &self.spec.model)
            .field("heads", &self.heads.len())
            .field("parameters", &self.store.num_values())
            .finish()
    }
}

/// FNV-1a of the backbone name; stands in for a fixed pretrained snapshot
fn pretrained_seed(backbone: Backbone) -> u64 {
    backbone
        .name()
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325_u64, |hash, byte| {
            (hash ^ u64::from(byte)).wrapping_mul(0x0000_0100_0000_01b3)
        })
}

/// Build the network for `task` from the catalog
pub fn compose(task: &TaskDescription, options: &ModelOptions) -> Result<ComposedModel> {
    let selection: ModelSelection = options.model.parse()?;
    let spec = ArchitectureSpec {
        model: selection.to_string(),
        task: task.clone(),
        image_size: options.image_size,
        mlp_hidden: options.mlp_hidden.clone(),
        seed: options.seed,
    };
    ComposedModel::from_spec(spec)
}

impl ComposedModel {
    /// Rebuild from a stored spec; parameter names and shapes are deterministic
    pub fn from_spec(spec: ArchitectureSpec) -> Result<Self> {
        let selection: ModelSelection = spec.model.parse()?;
        let modality = &spec.task.modality;

        if selection.tabular && !modality.has_tabular() {
            return Err(ArchitectureError::MissingTabularColumns {
                model: spec.model.clone(),
            }
            .into());
        }
        let image_modality = match (selection.image, &modality.image) {
            (Some(_), None) => {
                return Err(ArchitectureError::MissingImageColumn {
                    model: spec.model.clone(),
                }
                .into())
            }
            (Some(_), Some(image)) => Some(image),
            (None, _) => None,
        };

        let config = ExtractorConfig {
            tabular_inputs: modality.tabular_columns.len(),
            mlp_hidden: spec.mlp_hidden.clone(),
            channels: image_modality.map_or(0, |m| m.channels),
            image_size: spec.image_size,
        };

        let mut store = ParameterStore::new();
        let mut rng = StdRng::seed_from_u64(spec.seed);

        let tabular = if selection.tabular {
            Some(Backbone::Mlp.build(&mut store, &config, &mut rng)?)
        } else {
            None
        };

        let image = match (selection.image, image_modality) {
            (Some(backbone), Some(modality)) => {
                let mut image_rng = if modality.pretrained {
                    StdRng::seed_from_u64(pretrained_seed(backbone))
                } else {
                    StdRng::seed_from_u64(spec.seed.wrapping_add(1))
                };
                Some(backbone.build(&mut store, &config, &mut image_rng)?)
            }
            _ => None,
        };

        let feature_width = tabular.as_ref().map_or(0, |t| t.feature_width())
            + image.as_ref().map_or(0, |i| i.feature_width());

        let heads: Vec<Linear> = spec
            .task
            .labels
            .iter()
            .map(|label| {
                Linear::new(
                    &mut store,
                    &format!("head.{}", label.name),
                    feature_width,
                    label.output_width(),
                    &mut rng,
                )
            })
            .collect();

        if heads.len() != spec.task.labels.len() {
            return Err(ArchitectureError::HeadCount {
                heads: heads.len(),
                labels: spec.task.labels.len(),
            }
            .into());
        }

        tracing::debug!(
            model = %spec.model,
            heads = heads.len(),
            feature_width,
            parameters = store.num_values(),
            "composed model"
        );

        Ok(Self {
            spec,
            store,
            tabular,
            image,
            heads,
        })
    }

    pub fn spec(&self) -> &ArchitectureSpec {
        &self.spec
    }

    pub fn task(&self) -> &TaskDescription {
        &self.spec.task
    }

    pub fn num_heads(&self) -> usize {
        self.heads.len()
    }

    pub fn feature_width(&self) -> usize {
        self.heads.first().map_or(0, Linear::in_features)
    }

    pub fn num_parameters(&self) -> usize {
        self.store.num_values()
    }

    pub fn uses_images(&self) -> bool {
        self.image.is_some()
    }

    pub fn uses_tabular(&self) -> bool {
        self.tabular.is_some()
    }

    /// Values per image record the model expects
    pub fn image_input_width(&self) -> Option<usize> {
        self.image.as_ref().map(|i| i.input_width())
    }

    pub fn parameters_mut(&mut self) -> &mut [Tensor] {
        self.store.tensors_mut()
    }

    pub fn parameters(&self) -> &[Tensor] {
        self.store.tensors()
    }

    pub fn named_parameters(&self) -> Vec<(String, Tensor)> {
        self.store.named()
    }

    pub fn load_parameters(&mut self, params: &[(String, Tensor)]) -> Result<()> {
        self.store.load_named(params)
    }

    /// One output tensor per label, in label order; head k is batch×width_k
    pub fn forward(&self, input: &ModelInput) -> Result<Vec<Tensor>> {
        let batch = input.batch;

        let tabular = match &self.tabular {
            Some(extractor) => {
                let values = input.tabular.as_ref().ok_or_else(|| {
                    ArchitectureError::MissingInput {
                        modality: "tabular".into(),
                    }
                })?;
                Some(extractor.forward(
                    &self.store,
                    &Tensor::constant(values.clone()),
                    batch,
                )?)
            }
            None => None,
        };

        let image = match &self.image {
            Some(extractor) => {
                let values = input.images.as_ref().ok_or_else(|| {
                    ArchitectureError::MissingInput {
                        modality: "image".into(),
                    }
                })?;
                Some(extractor.forward(
                    &self.store,
                    &Tensor::constant(values.clone()),
                    batch,
                )?)
            }
            None => None,
        };

        let features = match (tabular, image) {
            (Some(t), Some(i)) => {
                let t_width = self.tabular.as_ref().map_or(0, |e| e.feature_width());
                let i_width = self.image.as_ref().map_or(0, |e| e.feature_width());
                concat_cols(&t, &i, batch, t_width, i_width)
            }
            (Some(t), None) => t,
            (None, Some(i)) => i,
            (None, None) => return Err(ArchitectureError::EmptySelection.into()),
        };

        Ok(self
            .heads
            .iter()
            .map(|head| head.forward(&self.store, &features, batch))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::{add_all, backward};
    use crate::schema::{
        ImageModality, LabelSpec, ModalityDescriptor, TaskDescription, TaskKind,
    };
    use crate::Error;

    fn task(labels: Vec<LabelSpec>, tabular: usize, image: bool) -> TaskDescription {
        TaskDescription {
            kind: TaskKind::Classification,
            labels,
            modality: ModalityDescriptor {
                tabular_columns: (0..tabular).map(|i| format!("input_{i}")).collect(),
                image: image.then(|| ImageModality {
                    column: "imgpath".into(),
                    channels: 1,
                    pretrained: false,
                }),
            },
            id_column: "uniqID".into(),
            period_column: None,
        }
    }

    fn binary(name: &str) -> LabelSpec {
        LabelSpec::categorical(name, vec!["0".into(), "1".into()]).unwrap()
    }

    #[test]
    fn test_one_head_per_label_in_order() {
        let labels = vec![
            binary("label_a"),
            LabelSpec::categorical("label_b", vec!["x".into(), "y".into(), "z".into()]).unwrap(),
        ];
        let model = compose(&task(labels, 3, false), &ModelOptions::new("MLP")).unwrap();
        assert_eq!(model.num_heads(), 2);

        let input = ModelInput {
            batch: 4,
            tabular: Some(Array1::from(vec![0.1; 12])),
            images: None,
        };
        let outputs = model.forward(&input).unwrap();
        assert_eq!(outputs[0].len(), 4 * 2);
        assert_eq!(outputs[1].len(), 4 * 3);

        let names: Vec<String> = model.named_parameters().into_iter().map(|(n, _)| n).collect();
        let a = names.iter().position(|n| n == "head.label_a.weight").unwrap();
        let b = names.iter().position(|n| n == "head.label_b.weight").unwrap();
        assert!(a < b);
    }

    #[test]
    fn test_hybrid_without_image_column_fails() {
        let err = compose(
            &task(vec![binary("label_a")], 3, false),
            &ModelOptions::new("MLP+ResNet18"),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::Architecture(ArchitectureError::MissingImageColumn { .. })
        ));
    }

    #[test]
    fn test_mlp_without_tabular_columns_fails() {
        let err = compose(&task(vec![binary("label_a")], 0, true), &ModelOptions::new("MLP"))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Architecture(ArchitectureError::MissingTabularColumns { .. })
        ));
    }

    #[test]
    fn test_tabular_only_ignores_channels() {
        let model = compose(&task(vec![binary("label_a")], 2, false), &ModelOptions::new("mlp"))
            .unwrap();
        assert!(!model.uses_images());
        assert_eq!(model.spec().model, "MLP");
    }

    #[test]
    fn test_fused_width_is_sum_of_extractors() {
        let mut options = ModelOptions::new("MLP+ResNet18");
        options.image_size = 8;
        options.mlp_hidden = vec![16];
        let model = compose(&task(vec![binary("label_a")], 3, true), &options).unwrap();
        assert_eq!(model.feature_width(), 16 + 512);

        let input = ModelInput {
            batch: 2,
            tabular: Some(Array1::from(vec![1.0; 6])),
            images: None,
        };
        assert!(matches!(
            model.forward(&input).unwrap_err(),
            Error::Architecture(ArchitectureError::MissingInput { .. })
        ));

        let input = ModelInput {
            images: Some(Array1::from(vec![0.5; 2 * 64])),
            ..input
        };
        assert_eq!(model.forward(&input).unwrap()[0].len(), 4);
    }

    #[test]
    fn test_shared_trunk_receives_all_head_gradients() {
        let labels = vec![binary("label_a"), binary("label_b")];
        let mut options = ModelOptions::new("MLP");
        options.mlp_hidden = vec![4];
        let model = compose(&task(labels, 2, false), &options).unwrap();
        let input = ModelInput {
            batch: 1,
            tabular: Some(Array1::from(vec![1.0, -0.5])),
            images: None,
        };

        let outputs = model.forward(&input).unwrap();
        let mut total = add_all(&outputs).unwrap();
        backward(&mut total, None);
        let joint: Vec<f32> = model.parameters()[0].grad().unwrap().to_vec();

        let mut separate = vec![0.0; joint.len()];
        for head in 0..2 {
            for p in model.parameters() {
                p.zero_grad();
            }
            let mut out = model.forward(&input).unwrap().remove(head);
            backward(&mut out, None);
            let g = model.parameters()[0].grad().unwrap();
            for (s, v) in separate.iter_mut().zip(g.iter()) {
                *s += v;
            }
        }
        for (j, s) in joint.iter().zip(&separate) {
            approx::assert_abs_diff_eq!(j, s, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_rebuild_from_spec_is_deterministic() {
        let mut options = ModelOptions::new("MLP");
        options.seed = 9;
        let model = compose(&task(vec![binary("label_a")], 2, false), &options).unwrap();
        let rebuilt = ComposedModel::from_spec(model.spec().clone()).unwrap();
        for ((na, a), (nb, b)) in model.named_parameters().iter().zip(rebuilt.named_parameters().iter()) {
            assert_eq!(na, nb);
            assert_eq!(a.data(), b.data());
        }
    }

    #[test]
    fn test_pretrained_seed_depends_only_on_backbone() {
        assert_eq!(
            pretrained_seed(Backbone::ResNet18),
            pretrained_seed(Backbone::ResNet18)
        );
        assert_ne!(
            pretrained_seed(Backbone::ResNet18),
            pretrained_seed(Backbone::DenseNet121)
        );
    }
}
