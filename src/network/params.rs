//! Named parameter storage and the dense layer built on it

use crate::autograd::{add_bias, matmul};
use crate::{Error, Result, Tensor};
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::Rng;

/// Handle to a tensor inside a [`ParameterStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParamId(usize);

/// Owns every trainable tensor of a model, in registration order
///
/// Layers hold [`ParamId`]s; the optimizer steps the contiguous tensor slice.
#[derive(Debug, Default)]
pub struct ParameterStore {
    names: Vec<String>,
    tensors: Vec<Tensor>,
}

impl ParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, data: Array1<f32>) -> ParamId {
        self.names.push(name.into());
        self.tensors.push(Tensor::new(data, true));
        ParamId(self.tensors.len() - 1)
    }

    pub fn get(&self, id: ParamId) -> &Tensor {
        &self.tensors[id.0]
    }

    pub fn tensors(&self) -> &[Tensor] {
        &self.tensors
    }

    pub fn tensors_mut(&mut self) -> &mut [Tensor] {
        &mut self.tensors
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Total scalar parameter count
    pub fn num_values(&self) -> usize {
        self.tensors.iter().map(Tensor::len).sum()
    }

    pub fn named(&self) -> Vec<(String, Tensor)> {
        self.names
            .iter()
            .cloned()
            .zip(self.tensors.iter().cloned())
            .collect()
    }

    /// Overwrite values from a named list; every own parameter must be present
    pub fn load_named(&mut self, params: &[(String, Tensor)]) -> Result<()> {
        for (name, tensor) in self.names.iter().zip(self.tensors.iter_mut()) {
            let source = params
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, t)| t)
                .ok_or_else(|| Error::Serialization(format!("Missing parameter '{name}'")))?;
            if source.len() != tensor.len() {
                return Err(Error::ShapeMismatch {
                    expected: vec![tensor.len()],
                    got: vec![source.len()],
                });
            }
            tensor.data_mut().assign(source.data());
            tensor.zero_grad();
        }
        Ok(())
    }
}

/// He-uniform weights for a ReLU network: U(-√(6/fan_in), √(6/fan_in))
pub fn he_uniform(rng: &mut StdRng, fan_in: usize, len: usize) -> Array1<f32> {
    let limit = (6.0 / fan_in.max(1) as f32).sqrt();
    Array1::from_iter((0..len).map(|_| (rng.random::<f32>() * 2.0 - 1.0) * limit))
}

/// Fully connected layer: y = x @ W + b, W stored in×out row-major
#[derive(Debug, Clone)]
pub struct Linear {
    weight: ParamId,
    bias: ParamId,
    in_features: usize,
    out_features: usize,
}

impl Linear {
    pub fn new(
        store: &mut ParameterStore,
        name: &str,
        in_features: usize,
        out_features: usize,
        rng: &mut StdRng,
    ) -> Self {
        let weight = store.register(
            format!("{name}.weight"),
            he_uniform(rng, in_features, in_features * out_features),
        );
        let bias = store.register(format!("{name}.bias"), Array1::zeros(out_features));
        Self {
            weight,
            bias,
            in_features,
            out_features,
        }
    }

    pub fn in_features(&self) -> usize {
        self.in_features
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }

    /// `x` is rows×in_features; returns rows×out_features
    pub fn forward(&self, store: &ParameterStore, x: &Tensor, rows: usize) -> Tensor {
        let projected = matmul(
            x,
            store.get(self.weight),
            rows,
            self.in_features,
            self.out_features,
        );
        add_bias(&projected, store.get(self.bias), rows, self.out_features)
    }
}
