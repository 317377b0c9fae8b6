//! Gradient clipping

use crate::Tensor;

/// Rescale all gradients so their global L2 norm is at most `max_norm`
///
/// Returns the norm measured before clipping.
pub fn clip_grad_norm(params: &mut [Tensor], max_norm: f32) -> f32 {
    let total_sq: f32 = params
        .iter()
        .filter_map(|p| p.grad())
        .map(|g| g.iter().map(|x| x * x).sum::<f32>())
        .sum();
    let norm = total_sq.sqrt();

    if norm > max_norm && norm > 0.0 {
        let factor = max_norm / norm;
        for param in params.iter() {
            if let Some(grad) = param.grad() {
                param.set_grad(grad * factor);
            }
        }
    }

    norm
}
