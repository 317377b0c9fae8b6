//! RMSprop optimizer

use super::Optimizer;
use crate::Tensor;
use ndarray::Array1;

/// RMSprop: step scaled by a running RMS of recent gradients
///
/// s_t = α * s_{t-1} + (1 - α) * g²
/// θ_t = θ_{t-1} - lr * g / (√s_t + ε)
pub struct RMSprop {
    lr: f32,
    alpha: f32,
    epsilon: f32,
    square_avg: Vec<Option<Array1<f32>>>,
}

impl RMSprop {
    pub fn new(lr: f32, alpha: f32, epsilon: f32) -> Self {
        Self {
            lr,
            alpha,
            epsilon,
            square_avg: Vec::new(),
        }
    }

    pub fn default_params(lr: f32) -> Self {
        Self::new(lr, 0.99, 1e-8)
    }
}

impl Optimizer for RMSprop {
    fn step(&mut self, params: &mut [Tensor]) {
        if self.square_avg.len() != params.len() {
            self.square_avg = params.iter().map(|_| None).collect();
        }

        for (param, slot) in params.iter_mut().zip(self.square_avg.iter_mut()) {
            let Some(grad) = param.grad() else {
                continue;
            };
            let grad_sq = &grad * &grad;
            let s_t = match slot.take() {
                Some(s) => s * self.alpha + &grad_sq * (1.0 - self.alpha),
                None => &grad_sq * (1.0 - self.alpha),
            };
            let update = &grad / &(s_t.mapv(f32::sqrt) + self.epsilon) * self.lr;
            *param.data_mut() -= &update;
            *slot = Some(s_t);
        }
    }

    fn lr(&self) -> f32 {
        self.lr
    }

    fn set_lr(&mut self, lr: f32) {
        self.lr = lr;
    }

    fn name(&self) -> &'static str {
        "RMSprop"
    }
}
