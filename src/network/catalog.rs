//! Compile-time catalog of feature extractors
//!
//! Every backbone name resolves to exactly one [`Backbone`] variant; there is
//! no fallback for names the catalog does not know. The composer asks each
//! built extractor for its output width instead of assuming one.

use super::conv::ConvExtractor;
use super::mlp::MlpExtractor;
use super::params::ParameterStore;
use super::vit::AttentionExtractor;
use crate::error::ArchitectureError;
use crate::{Result, Tensor};
use rand::rngs::StdRng;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Tabular,
    Convolutional,
    Attention,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backbone {
    Mlp,
    ResNet18,
    ResNet50,
    DenseNet121,
    EfficientNetB0,
    ConvNeXtTiny,
    ViTB16,
    ViTL16,
}

impl Backbone {
    pub const ALL: [Backbone; 8] = [
        Backbone::Mlp,
        Backbone::ResNet18,
        Backbone::ResNet50,
        Backbone::DenseNet121,
        Backbone::EfficientNetB0,
        Backbone::ConvNeXtTiny,
        Backbone::ViTB16,
        Backbone::ViTL16,
    ];

    /// Canonical name, as accepted on the command line
    pub fn name(&self) -> &'static str {
        match self {
            Backbone::Mlp => "MLP",
            Backbone::ResNet18 => "ResNet18",
            Backbone::ResNet50 => "ResNet",
            Backbone::DenseNet121 => "DenseNet",
            Backbone::EfficientNetB0 => "EfficientNetB0",
            Backbone::ConvNeXtTiny => "ConvNeXtTiny",
            Backbone::ViTB16 => "ViTb16",
            Backbone::ViTL16 => "ViTl16",
        }
    }

    pub fn family(&self) -> Family {
        match self {
            Backbone::Mlp => Family::Tabular,
            Backbone::ViTB16 | Backbone::ViTL16 => Family::Attention,
            _ => Family::Convolutional,
        }
    }

    /// Published feature width of the image backbones
    pub fn image_feature_width(&self) -> Option<usize> {
        match self {
            Backbone::Mlp => None,
            Backbone::ResNet18 => Some(512),
            Backbone::ResNet50 => Some(2048),
            Backbone::DenseNet121 => Some(1024),
            Backbone::EfficientNetB0 => Some(1280),
            Backbone::ConvNeXtTiny => Some(768),
            Backbone::ViTB16 => Some(768),
            Backbone::ViTL16 => Some(1024),
        }
    }

    /// Patch edge for attention backbones; image size must be a multiple
    pub fn patch_size(&self) -> Option<usize> {
        match self.family() {
            Family::Attention => Some(16),
            _ => None,
        }
    }

    /// Instantiate the extractor, registering its parameters in `store`
    pub(crate) fn build(
        &self,
        store: &mut ParameterStore,
        config: &ExtractorConfig,
        rng: &mut StdRng,
    ) -> Result<Box<dyn FeatureExtractor>> {
        match self.family() {
            Family::Tabular => Ok(Box::new(MlpExtractor::new(
                store,
                config.tabular_inputs,
                &config.mlp_hidden,
                rng,
            ))),
            Family::Convolutional => Ok(Box::new(ConvExtractor::new(*self, store, config, rng)?)),
            Family::Attention => Ok(Box::new(AttentionExtractor::new(
                *self, store, config, rng,
            )?)),
        }
    }
}

impl fmt::Display for Backbone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Backbone {
    type Err = ArchitectureError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let backbone = match s.trim().to_lowercase().as_str() {
            "mlp" => Backbone::Mlp,
            "resnet18" => Backbone::ResNet18,
            "resnet" | "resnet50" => Backbone::ResNet50,
            "densenet" | "densenet121" => Backbone::DenseNet121,
            "efficientnetb0" | "b0" => Backbone::EfficientNetB0,
            "convnexttiny" => Backbone::ConvNeXtTiny,
            "vitb16" | "vit_b_16" => Backbone::ViTB16,
            "vitl16" | "vit_l_16" => Backbone::ViTL16,
            _ => {
                return Err(ArchitectureError::UnknownBackbone {
                    name: s.to_string(),
                })
            }
        };
        Ok(backbone)
    }
}

/// Parsed model string: `MLP`, `ResNet18`, or `MLP+ResNet18`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelSelection {
    pub tabular: bool,
    pub image: Option<Backbone>,
}

impl ModelSelection {
    pub fn is_fused(&self) -> bool {
        self.tabular && self.image.is_some()
    }
}

impl fmt::Display for ModelSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.tabular, self.image) {
            (true, Some(image)) => write!(f, "MLP+{image}"),
            (true, None) => write!(f, "MLP"),
            (false, Some(image)) => write!(f, "{image}"),
            (false, None) => Ok(()),
        }
    }
}

impl FromStr for ModelSelection {
    type Err = ArchitectureError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(ArchitectureError::EmptySelection);
        }

        let mut selection = ModelSelection {
            tabular: false,
            image: None,
        };
        for part in s.split('+') {
            if part.trim().is_empty() {
                return Err(ArchitectureError::EmptySelection);
            }
            let backbone: Backbone = part.parse()?;
            if backbone.family() == Family::Tabular {
                if selection.tabular {
                    return Err(ArchitectureError::MultipleTabularNetworks {
                        model: s.to_string(),
                    });
                }
                selection.tabular = true;
            } else {
                if selection.image.is_some() {
                    return Err(ArchitectureError::MultipleImageBackbones {
                        model: s.to_string(),
                    });
                }
                selection.image = Some(backbone);
            }
        }
        Ok(selection)
    }
}

/// Shape facts an extractor needs at construction time
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractorConfig {
    pub tabular_inputs: usize,
    pub mlp_hidden: Vec<usize>,
    pub channels: usize,
    pub image_size: usize,
}

/// Input modality an extractor consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modality {
    Tabular,
    Image,
}

/// Consume a batch of typed input, produce a fixed-width feature matrix
pub trait FeatureExtractor {
    fn backbone(&self) -> Backbone;

    fn modality(&self) -> Modality {
        match self.backbone().family() {
            Family::Tabular => Modality::Tabular,
            _ => Modality::Image,
        }
    }

    /// Values consumed per record
    fn input_width(&self) -> usize;

    /// Features produced per record
    fn feature_width(&self) -> usize;

    /// `input` is batch×input_width; returns batch×feature_width
    fn forward(&self, store: &ParameterStore, input: &Tensor, batch: usize) -> Result<Tensor>;

    fn check_input(&self, input: &Tensor, batch: usize) -> Result<()> {
        let expected = batch * self.input_width();
        if input.len() != expected {
            return Err(ArchitectureError::InputLength {
                backbone: self.backbone().name().to_string(),
                expected,
                got: input.len(),
            }
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_name_round_trips() {
        for backbone in Backbone::ALL {
            assert_eq!(backbone.name().parse::<Backbone>(), Ok(backbone));
        }
    }

    #[test]
    fn test_unknown_backbone_is_error() {
        assert_eq!(
            "AlexNet".parse::<Backbone>(),
            Err(ArchitectureError::UnknownBackbone {
                name: "AlexNet".into()
            })
        );
    }

    #[test]
    fn test_selection_parsing() {
        let fused: ModelSelection = "MLP+ResNet18".parse().unwrap();
        assert!(fused.is_fused());
        assert_eq!(fused.image, Some(Backbone::ResNet18));
        assert_eq!(fused.to_string(), "MLP+ResNet18");

        let image_only: ModelSelection = "vitb16".parse().unwrap();
        assert!(!image_only.tabular);
        assert_eq!(image_only.to_string(), "ViTb16");

        assert_eq!(
            "".parse::<ModelSelection>(),
            Err(ArchitectureError::EmptySelection)
        );
        assert_eq!(
            "MLP+".parse::<ModelSelection>(),
            Err(ArchitectureError::EmptySelection)
        );
        assert!(matches!(
            "ResNet18+DenseNet".parse::<ModelSelection>(),
            Err(ArchitectureError::MultipleImageBackbones { .. })
        ));
        assert!(matches!(
            "MLP+MLP".parse::<ModelSelection>(),
            Err(ArchitectureError::MultipleTabularNetworks { .. })
        ));
        assert!(matches!(
            "MLP+Inception".parse::<ModelSelection>(),
            Err(ArchitectureError::UnknownBackbone { .. })
        ));
    }

    #[test]
    fn test_widths_are_catalog_facts() {
        assert_eq!(Backbone::ResNet18.image_feature_width(), Some(512));
        assert_eq!(Backbone::ResNet50.image_feature_width(), Some(2048));
        assert_eq!(Backbone::Mlp.image_feature_width(), None);
        assert_eq!(Backbone::ViTL16.patch_size(), Some(16));
        assert_eq!(Backbone::DenseNet121.patch_size(), None);
    }
}
