//! Network assembly
//!
//! - **catalog**: backbone names, families and published feature widths
//! - **mlp / conv / vit**: the three extractor families
//! - **composer**: fuses extractors and attaches one head per label

mod catalog;
mod composer;
mod conv;
mod mlp;
mod params;
mod vit;

pub use catalog::{Backbone, ExtractorConfig, Family, FeatureExtractor, Modality, ModelSelection};
pub use composer::{
    compose, ArchitectureSpec, ComposedModel, ModelInput, ModelOptions, DEFAULT_IMAGE_SIZE,
};
pub use conv::ConvExtractor;
pub use mlp::MlpExtractor;
pub use params::{he_uniform, Linear, ParamId, ParameterStore};
pub use vit::AttentionExtractor;
