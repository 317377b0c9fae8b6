//! Tabular feature extractor: stacked Linear + ReLU

use super::catalog::{Backbone, FeatureExtractor};
use super::params::{Linear, ParameterStore};
use crate::autograd::relu;
use crate::{Result, Tensor};
use rand::rngs::StdRng;

pub struct MlpExtractor {
    layers: Vec<Linear>,
    input_width: usize,
}

impl MlpExtractor {
    /// With no hidden sizes the raw inputs are passed through as features
    pub fn new(
        store: &mut ParameterStore,
        input_width: usize,
        hidden: &[usize],
        rng: &mut StdRng,
    ) -> Self {
        let mut layers = Vec::with_capacity(hidden.len());
        let mut width = input_width;
        for (i, &size) in hidden.iter().enumerate() {
            layers.push(Linear::new(store, &format!("mlp.fc{i}"), width, size, rng));
            width = size;
        }
        Self {
            layers,
            input_width,
        }
    }
}

impl FeatureExtractor for MlpExtractor {
    fn backbone(&self) -> Backbone {
        Backbone::Mlp
    }

    fn input_width(&self) -> usize {
        self.input_width
    }

    fn feature_width(&self) -> usize {
        self.layers
            .last()
            .map_or(self.input_width, Linear::out_features)
    }

    fn forward(&self, store: &ParameterStore, input: &Tensor, batch: usize) -> Result<Tensor> {
        self.check_input(input, batch)?;
        let mut x = input.clone();
        for layer in &self.layers {
            x = relu(&layer.forward(store, &x, batch));
        }
        Ok(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ArchitectureError;
    use crate::Error;
    use ndarray::Array1;
    use rand::SeedableRng;

    #[test]
    fn test_hidden_layers_set_width() {
        let mut store = ParameterStore::new();
        let mlp = MlpExtractor::new(&mut store, 5, &[8, 4], &mut StdRng::seed_from_u64(0));
        assert_eq!(mlp.feature_width(), 4);
        assert_eq!(store.len(), 4);

        let x = Tensor::constant(Array1::from(vec![0.5; 15]));
        let y = mlp.forward(&store, &x, 3).unwrap();
        assert_eq!(y.len(), 12);
        assert!(y.data().iter().all(|v| *v >= 0.0));
    }

    #[test]
    fn test_no_hidden_is_identity() {
        let mut store = ParameterStore::new();
        let mlp = MlpExtractor::new(&mut store, 3, &[], &mut StdRng::seed_from_u64(0));
        assert_eq!(mlp.feature_width(), 3);
        let x = Tensor::constant(Array1::from(vec![-1.0, 2.0, 3.0]));
        let y = mlp.forward(&store, &x, 1).unwrap();
        assert_eq!(y.data().to_vec(), vec![-1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_wrong_input_length() {
        let mut store = ParameterStore::new();
        let mlp = MlpExtractor::new(&mut store, 3, &[4], &mut StdRng::seed_from_u64(0));
        let x = Tensor::constant(Array1::zeros(5));
        let err = mlp.forward(&store, &x, 2).unwrap_err();
        assert!(matches!(
            err,
            Error::Architecture(ArchitectureError::InputLength {
                expected: 6,
                got: 5,
                ..
            })
        ));
    }
}
