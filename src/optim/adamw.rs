//! AdamW optimizer (Adam with decoupled weight decay)

use super::{Adam, Optimizer};
use crate::Tensor;

/// AdamW optimizer
///
/// θ_t = (1 - lr * λ) * θ_{t-1} - lr_t * m_t / (√v_t + ε)
///
/// The decay is applied to the parameters directly rather than folded into
/// the gradient, so it is not rescaled by the adaptive denominator.
pub struct AdamW {
    inner: Adam,
    weight_decay: f32,
}

impl AdamW {
    pub fn new(lr: f32, beta1: f32, beta2: f32, epsilon: f32, weight_decay: f32) -> Self {
        Self {
            inner: Adam::new(lr, beta1, beta2, epsilon),
            weight_decay,
        }
    }

    /// Create AdamW with default parameters (weight_decay = 0.01)
    pub fn default_params(lr: f32) -> Self {
        Self::new(lr, 0.9, 0.999, 1e-8, 0.01)
    }
}

impl Optimizer for AdamW {
    fn step(&mut self, params: &mut [Tensor]) {
        let decay = 1.0 - self.inner.lr() * self.weight_decay;
        for param in params.iter_mut() {
            if param.grad().is_some() {
                param.data_mut().mapv_inplace(|x| x * decay);
            }
        }
        self.inner.step(params);
    }

    fn lr(&self) -> f32 {
        self.inner.lr()
    }

    fn set_lr(&mut self, lr: f32) {
        self.inner.set_lr(lr);
    }

    fn name(&self) -> &'static str {
        "AdamW"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_adamw_weight_decay_only() {
        let mut params = vec![Tensor::from_vec(vec![1.0], true)];
        let mut optimizer = AdamW::new(0.1, 0.9, 0.999, 1e-8, 0.1);

        // Zero gradient: only the decay moves the parameter
        params[0].set_grad(ndarray::arr1(&[0.0]));
        optimizer.step(&mut params);

        // (1 - 0.1 * 0.1) * 1.0
        assert_abs_diff_eq!(params[0].data()[0], 0.99, epsilon = 1e-6);
    }

    #[test]
    fn test_adamw_shrinks_more_than_adam() {
        let mut params_adamw = vec![Tensor::from_vec(vec![2.0, -2.0], true)];
        let mut params_adam = vec![Tensor::from_vec(vec![2.0, -2.0], true)];

        let mut adamw = AdamW::new(0.1, 0.9, 0.999, 1e-8, 0.1);
        let mut adam = Adam::default_params(0.1);

        for _ in 0..10 {
            let grad = ndarray::arr1(&[1.0, -1.0]);
            params_adamw[0].set_grad(grad.clone());
            params_adam[0].set_grad(grad);
            adamw.step(&mut params_adamw);
            adam.step(&mut params_adam);
        }

        assert!(params_adamw[0].data()[0].abs() < params_adam[0].data()[0].abs());
        assert!(params_adamw[0].data()[1].abs() < params_adam[0].data()[1].abs());
    }
}
