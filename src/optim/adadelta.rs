//! Adadelta optimizer

use super::Optimizer;
use crate::Tensor;
use ndarray::Array1;

/// Adadelta: step sized by the ratio of running RMS of updates and gradients
///
/// v_t = ρ * v_{t-1} + (1 - ρ) * g²
/// Δ_t = √(u_{t-1} + ε) / √(v_t + ε) * g
/// u_t = ρ * u_{t-1} + (1 - ρ) * Δ_t²
/// θ_t = θ_{t-1} - lr * Δ_t
pub struct Adadelta {
    lr: f32,
    rho: f32,
    epsilon: f32,
    square_avg: Vec<Option<Array1<f32>>>,
    delta_avg: Vec<Option<Array1<f32>>>,
}

impl Adadelta {
    pub fn new(lr: f32, rho: f32, epsilon: f32) -> Self {
        Self {
            lr,
            rho,
            epsilon,
            square_avg: Vec::new(),
            delta_avg: Vec::new(),
        }
    }

    pub fn default_params(lr: f32) -> Self {
        Self::new(lr, 0.9, 1e-6)
    }
}

impl Optimizer for Adadelta {
    fn step(&mut self, params: &mut [Tensor]) {
        if self.square_avg.len() != params.len() {
            self.square_avg = params.iter().map(|_| None).collect();
            self.delta_avg = params.iter().map(|_| None).collect();
        }

        for (i, param) in params.iter_mut().enumerate() {
            let Some(grad) = param.grad() else {
                continue;
            };
            let grad_sq = &grad * &grad;
            let v_t = match self.square_avg[i].take() {
                Some(v) => v * self.rho + &grad_sq * (1.0 - self.rho),
                None => &grad_sq * (1.0 - self.rho),
            };
            let u_prev = self.delta_avg[i]
                .take()
                .unwrap_or_else(|| Array1::zeros(grad.len()));

            let eps = self.epsilon;
            let delta = (&u_prev + eps).mapv(f32::sqrt) / (&v_t + eps).mapv(f32::sqrt) * &grad;
            let u_t = u_prev * self.rho + &(&delta * &delta) * (1.0 - self.rho);

            *param.data_mut() -= &(&delta * self.lr);
            self.square_avg[i] = Some(v_t);
            self.delta_avg[i] = Some(u_t);
        }
    }

    fn lr(&self) -> f32 {
        self.lr
    }

    fn set_lr(&mut self, lr: f32) {
        self.lr = lr;
    }

    fn name(&self) -> &'static str {
        "Adadelta"
    }
}
