//! RAdam optimizer

use super::Optimizer;
use crate::Tensor;
use ndarray::Array1;

/// Rectified Adam
///
/// Adam whose adaptive step is switched on only once the variance of the
/// second moment estimate is tractable (ρ_t > 5). Before that the update is
/// the bias-corrected first moment alone.
pub struct RAdam {
    lr: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    t: u64,
    m: Vec<Option<Array1<f32>>>,
    v: Vec<Option<Array1<f32>>>,
}

impl RAdam {
    pub fn new(lr: f32, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self {
            lr,
            beta1,
            beta2,
            epsilon,
            t: 0,
            m: Vec::new(),
            v: Vec::new(),
        }
    }

    pub fn default_params(lr: f32) -> Self {
        Self::new(lr, 0.9, 0.999, 1e-8)
    }

    /// Variance rectification term, `None` while ρ_t ≤ 5
    fn rectification(&self) -> Option<f32> {
        let t = self.t as i32;
        let beta2_t = self.beta2.powi(t);
        let rho_inf = 2.0 / (1.0 - self.beta2) - 1.0;
        let rho_t = rho_inf - 2.0 * t as f32 * beta2_t / (1.0 - beta2_t);
        (rho_t > 5.0).then(|| {
            ((rho_t - 4.0) * (rho_t - 2.0) * rho_inf
                / ((rho_inf - 4.0) * (rho_inf - 2.0) * rho_t))
                .sqrt()
        })
    }
}

impl Optimizer for RAdam {
    fn step(&mut self, params: &mut [Tensor]) {
        if self.m.len() != params.len() {
            self.m = params.iter().map(|_| None).collect();
            self.v = params.iter().map(|_| None).collect();
        }
        self.t += 1;

        let t = self.t as i32;
        let bias1 = 1.0 - self.beta1.powi(t);
        let bias2 = 1.0 - self.beta2.powi(t);
        let rect = self.rectification();

        for (i, param) in params.iter_mut().enumerate() {
            let Some(grad) = param.grad() else {
                continue;
            };
            let m_t = match self.m[i].take() {
                Some(m) => m * self.beta1 + &grad * (1.0 - self.beta1),
                None => &grad * (1.0 - self.beta1),
            };
            let grad_sq = &grad * &grad;
            let v_t = match self.v[i].take() {
                Some(v) => v * self.beta2 + &grad_sq * (1.0 - self.beta2),
                None => &grad_sq * (1.0 - self.beta2),
            };

            let m_hat = &m_t / bias1;
            let update = match rect {
                Some(r) => {
                    let adaptive = v_t.mapv(|v| bias2.sqrt() / (v.sqrt() + self.epsilon));
                    m_hat * &adaptive * (self.lr * r)
                }
                None => m_hat * self.lr,
            };
            *param.data_mut() -= &update;

            self.m[i] = Some(m_t);
            self.v[i] = Some(v_t);
        }
    }

    fn lr(&self) -> f32 {
        self.lr
    }

    fn set_lr(&mut self, lr: f32) {
        self.lr = lr;
    }

    fn name(&self) -> &'static str {
        "RAdam"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_radam_quadratic_convergence() {
        let mut params = vec![Tensor::from_vec(vec![5.0, -3.0, 2.0], true)];
        let mut optimizer = RAdam::default_params(0.1);

        for _ in 0..100 {
            // ∇(x²) = 2x
            let grad = params[0].data().mapv(|x| 2.0 * x);
            params[0].set_grad(grad);
            optimizer.step(&mut params);
        }

        for &val in params[0].data().iter() {
            assert!(val.abs() < 0.5, "Value {} did not converge", val);
        }
    }

    #[test]
    fn test_first_step_is_unrectified() {
        // ρ_1 = 1, so the step is lr * m̂ = lr * g
        let mut params = vec![Tensor::from_vec(vec![1.0], true)];
        params[0].set_grad(ndarray::arr1(&[4.0]));

        let mut optimizer = RAdam::default_params(0.01);
        optimizer.step(&mut params);

        assert_abs_diff_eq!(params[0].data()[0], 0.96, epsilon = 1e-5);
        assert!(optimizer.rectification().is_none());
    }

    #[test]
    fn test_rectification_starts_after_warmup() {
        let mut optimizer = RAdam::default_params(0.01);
        optimizer.t = 5;
        assert!(optimizer.rectification().is_none());
        optimizer.t = 6;
        let r = optimizer.rectification().unwrap();
        assert!(r > 0.0 && r < 1.0);
    }
}
