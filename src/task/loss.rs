//! Per-head loss functions
//!
//! Each loss reduces a head's batch output to a scalar tensor whose backward
//! op writes a precomputed gradient into the head output, scaled by the
//! upstream gradient of the scalar.

use crate::autograd::BackwardOp;
use crate::error::TaskStrategyError;
use crate::Tensor;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

type GradCell = Rc<RefCell<Option<Array1<f32>>>>;

struct FixedGradBackward {
    prediction: Tensor,
    grad: Array1<f32>,
    result_grad: GradCell,
}

impl BackwardOp for FixedGradBackward {
    fn backward(&self) {
        if let Some(upstream) = self.result_grad.borrow().as_ref() {
            if self.prediction.requires_grad() {
                self.prediction.accumulate_grad(&self.grad * upstream[0]);
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.prediction.clone()]
    }
}

fn scalar_loss(prediction: &Tensor, value: f32, grad: Array1<f32>) -> Tensor {
    let requires_grad = prediction.requires_grad();
    let mut loss = Tensor::from_vec(vec![value], requires_grad);
    if requires_grad {
        loss.set_backward_op(Rc::new(FixedGradBackward {
            prediction: prediction.clone(),
            grad,
            result_grad: loss.grad_cell(),
        }));
    }
    loss
}

/// Row-wise softmax of a rows×cols logit matrix
pub fn softmax_rows(logits: &[f32], cols: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(logits.len());
    for row in logits.chunks(cols) {
        let max = row.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
        let exp: Vec<f32> = row.iter().map(|v| (v - max).exp()).collect();
        let sum: f32 = exp.iter().sum();
        out.extend(exp.iter().map(|e| e / sum));
    }
    out
}

/// Mean cross-entropy of batch×classes logits against class indices
///
/// L = mean_i(logsumexp(z_i) - z_i[y_i]); ∂L/∂z = (softmax(z) - onehot(y)) / B
pub fn cross_entropy(logits: &Tensor, targets: &[usize], classes: usize) -> Tensor {
    let batch = targets.len();
    assert_eq!(logits.len(), batch * classes, "cross_entropy: logits size mismatch");

    let data = logits.data().to_vec();
    let probs = softmax_rows(&data, classes);
    let mut total = 0.0;
    let mut grad = Array1::from(probs.clone());

    for (i, &target) in targets.iter().enumerate() {
        let row = &data[i * classes..(i + 1) * classes];
        let max = row.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
        let lse = max + row.iter().map(|v| (v - max).exp()).sum::<f32>().ln();
        total += lse - row[target];
        grad[i * classes + target] -= 1.0;
    }

    let n = batch.max(1) as f32;
    scalar_loss(logits, total / n, grad / n)
}

/// Regression criterion family, fixed for the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RegressionLoss {
    Mse,
    Rmse,
    Mae,
}

impl RegressionLoss {
    pub fn name(&self) -> &'static str {
        match self {
            RegressionLoss::Mse => "MSE",
            RegressionLoss::Rmse => "RMSE",
            RegressionLoss::Mae => "MAE",
        }
    }

    pub fn forward(&self, predictions: &Tensor, targets: &[f32]) -> Tensor {
        assert_eq!(
            predictions.len(),
            targets.len(),
            "Predictions and targets must have same length"
        );
        let diff = predictions.data() - &Array1::from(targets.to_vec());
        let n = targets.len().max(1) as f32;

        match self {
            RegressionLoss::Mse => {
                let mse = diff.mapv(|d| d * d).sum() / n;
                scalar_loss(predictions, mse, &diff * (2.0 / n))
            }
            RegressionLoss::Rmse => {
                let rmse = (diff.mapv(|d| d * d).sum() / n).sqrt();
                // zero error has no defined slope; treat it as flat
                let grad = if rmse > 0.0 {
                    &diff / (n * rmse)
                } else {
                    Array1::zeros(diff.len())
                };
                scalar_loss(predictions, rmse, grad)
            }
            RegressionLoss::Mae => {
                let mae = diff.mapv(f32::abs).sum() / n;
                let grad = diff.mapv(|d| {
                    if d > 0.0 {
                        1.0 / n
                    } else if d < 0.0 {
                        -1.0 / n
                    } else {
                        0.0
                    }
                });
                scalar_loss(predictions, mae, grad)
            }
        }
    }
}

/// Negative log Cox partial likelihood (Breslow ties), averaged over events
///
/// Risk set of event i is every record with t_j ≥ t_i. A batch with no events
/// has an empty likelihood: the loss is 0 and carries no gradient.
pub fn cox_partial_likelihood(
    risk: &Tensor,
    periods: &[f32],
    events: &[bool],
) -> Result<Tensor, TaskStrategyError> {
    let n = periods.len();
    assert_eq!(risk.len(), n, "cox: risk size mismatch");
    assert_eq!(events.len(), n, "cox: event size mismatch");

    if n < 2 {
        return Err(TaskStrategyError::SurvivalBatchTooSmall { records: n });
    }
    let distinct: HashSet<u32> = periods.iter().map(|p| p.to_bits()).collect();
    if distinct.len() < 2 {
        return Err(TaskStrategyError::NoDistinctTimes);
    }

    let event_count = events.iter().filter(|&&e| e).count();
    if event_count == 0 {
        return Ok(Tensor::from_vec(vec![0.0], false));
    }

    let r = risk.data();
    let max = r.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    let w: Vec<f32> = r.iter().map(|v| (v - max).exp()).collect();

    let mut total = 0.0;
    let mut grad = Array1::<f32>::zeros(n);
    for i in (0..n).filter(|&i| events[i]) {
        let at_risk: Vec<usize> = (0..n).filter(|&j| periods[j] >= periods[i]).collect();
        let denom: f32 = at_risk.iter().map(|&j| w[j]).sum();
        total += max + denom.ln() - r[i];
        grad[i] -= 1.0;
        for &j in &at_risk {
            grad[j] += w[j] / denom;
        }
    }

    let e = event_count as f32;
    Ok(scalar_loss(risk, total / e, grad / e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::backward;
    use approx::assert_relative_eq;

    fn finite_difference(f: impl Fn(&[f32]) -> f32, x: &[f32], i: usize) -> f32 {
        let h = 1e-3;
        let mut plus = x.to_vec();
        let mut minus = x.to_vec();
        plus[i] += h;
        minus[i] -= h;
        (f(&plus) - f(&minus)) / (2.0 * h)
    }

    #[test]
    fn test_cross_entropy_uniform_logits() {
        let logits = Tensor::from_vec(vec![0.0; 6], true);
        let loss = cross_entropy(&logits, &[0, 2], 3);
        assert_relative_eq!(loss.item(), 3.0f32.ln(), epsilon = 1e-5);
    }

    #[test]
    fn test_cross_entropy_gradient() {
        let x = vec![0.3, -1.2, 2.0, 0.5, 0.1, -0.4];
        let targets = [2, 0];
        let logits = Tensor::from_vec(x.clone(), true);
        let mut loss = cross_entropy(&logits, &targets, 3);
        backward(&mut loss, None);
        let grad = logits.grad().unwrap();
        for i in 0..x.len() {
            let numeric = finite_difference(
                |v| cross_entropy(&Tensor::from_vec(v.to_vec(), false), &targets, 3).item(),
                &x,
                i,
            );
            assert_relative_eq!(grad[i], numeric, epsilon = 1e-2);
        }
    }

    #[test]
    fn test_regression_losses() {
        let pred = Tensor::from_vec(vec![1.0, 2.0, 3.0], true);
        let target = [1.5, 2.5, 3.5];
        assert_relative_eq!(RegressionLoss::Mse.forward(&pred, &target).item(), 0.25, epsilon = 1e-6);
        assert_relative_eq!(RegressionLoss::Rmse.forward(&pred, &target).item(), 0.5, epsilon = 1e-6);
        assert_relative_eq!(RegressionLoss::Mae.forward(&pred, &target).item(), 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_rmse_zero_error_has_zero_gradient() {
        let pred = Tensor::from_vec(vec![1.0, 2.0], true);
        let mut loss = RegressionLoss::Rmse.forward(&pred, &[1.0, 2.0]);
        backward(&mut loss, None);
        assert_eq!(pred.grad().unwrap().to_vec(), vec![0.0, 0.0]);
    }

    #[test]
    fn test_mse_gradient() {
        let pred = Tensor::from_vec(vec![1.0, 4.0], true);
        let mut loss = RegressionLoss::Mse.forward(&pred, &[0.0, 0.0]);
        backward(&mut loss, None);
        assert_eq!(pred.grad().unwrap().to_vec(), vec![1.0, 4.0]);
    }

    #[test]
    fn test_cox_two_records() {
        // one event at t=1 with both at risk: -log(e^a / (e^a + e^b))
        let risk = Tensor::from_vec(vec![0.5, -0.5], true);
        let mut loss = cox_partial_likelihood(&risk, &[1.0, 2.0], &[true, false]).unwrap();
        let expected = -(0.5f32.exp() / (0.5f32.exp() + (-0.5f32).exp())).ln();
        assert_relative_eq!(loss.item(), expected, epsilon = 1e-5);

        backward(&mut loss, None);
        let grad = risk.grad().unwrap();
        assert_relative_eq!(grad[0] + grad[1], 0.0, epsilon = 1e-6);
        assert!(grad[0] < 0.0);
    }

    #[test]
    fn test_cox_gradient_matches_finite_difference() {
        let x = vec![0.2, -0.3, 1.1, 0.0, -0.7];
        let periods = [5.0, 3.0, 3.0, 8.0, 1.0];
        let events = [true, true, false, true, false];
        let risk = Tensor::from_vec(x.clone(), true);
        let mut loss = cox_partial_likelihood(&risk, &periods, &events).unwrap();
        backward(&mut loss, None);
        let grad = risk.grad().unwrap();
        for i in 0..x.len() {
            let numeric = finite_difference(
                |v| {
                    cox_partial_likelihood(&Tensor::from_vec(v.to_vec(), false), &periods, &events)
                        .unwrap()
                        .item()
                },
                &x,
                i,
            );
            assert_relative_eq!(grad[i], numeric, epsilon = 1e-2);
        }
    }

    #[test]
    fn test_cox_edge_cases() {
        let one = Tensor::from_vec(vec![0.0], true);
        assert_eq!(
            cox_partial_likelihood(&one, &[1.0], &[true]).unwrap_err(),
            TaskStrategyError::SurvivalBatchTooSmall { records: 1 }
        );

        let tied = Tensor::from_vec(vec![0.0, 1.0], true);
        assert_eq!(
            cox_partial_likelihood(&tied, &[2.0, 2.0], &[true, true]).unwrap_err(),
            TaskStrategyError::NoDistinctTimes
        );

        let censored = Tensor::from_vec(vec![0.0, 1.0], true);
        let loss = cox_partial_likelihood(&censored, &[1.0, 2.0], &[false, false]).unwrap();
        assert_eq!(loss.item(), 0.0);
        assert!(!loss.requires_grad());
    }
}
