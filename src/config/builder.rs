//! Build training components from configuration

use super::schema::OptimSpec;
use crate::error::{Error, Result};
use crate::optim::{Adadelta, Adam, AdamW, Optimizer, RAdam, RMSprop, SGD};

fn param(spec: &OptimSpec, key: &str, default: f32) -> f32 {
    spec.params
        .get(key)
        .and_then(|v| v.as_f64())
        .map_or(default, |v| v as f32)
}

/// Build optimizer from configuration
///
/// Names are matched case-insensitively; missing hyperparameters take the
/// usual PyTorch defaults.
pub fn build_optimizer(spec: &OptimSpec) -> Result<Box<dyn Optimizer>> {
    match spec.name.to_lowercase().as_str() {
        "sgd" => Ok(Box::new(SGD::new(spec.lr, param(spec, "momentum", 0.0)))),
        "adam" => Ok(Box::new(Adam::new(
            spec.lr,
            param(spec, "beta1", 0.9),
            param(spec, "beta2", 0.999),
            param(spec, "eps", 1e-8),
        ))),
        "adamw" => Ok(Box::new(AdamW::new(
            spec.lr,
            param(spec, "beta1", 0.9),
            param(spec, "beta2", 0.999),
            param(spec, "eps", 1e-8),
            param(spec, "weight_decay", 0.01),
        ))),
        "adadelta" => Ok(Box::new(Adadelta::new(
            spec.lr,
            param(spec, "rho", 0.9),
            param(spec, "eps", 1e-6),
        ))),
        "radam" => Ok(Box::new(RAdam::new(
            spec.lr,
            param(spec, "beta1", 0.9),
            param(spec, "beta2", 0.999),
            param(spec, "eps", 1e-8),
        ))),
        "rmsprop" => Ok(Box::new(RMSprop::new(
            spec.lr,
            param(spec, "alpha", 0.99),
            param(spec, "eps", 1e-8),
        ))),
        name => Err(Error::ConfigError(format!(
            "Unknown optimizer: {name}. Supported: sgd, adadelta, rmsprop, adam, adamw, radam"
        ))),
    }
}
