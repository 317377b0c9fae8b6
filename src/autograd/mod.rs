//! Tape-based autograd engine
//!
//! Every operation records a [`BackwardOp`] on its result. [`backward`]
//! orders the recorded graph topologically and runs each node once, so
//! shared sub-graphs (a fused feature vector feeding several output heads)
//! receive the sum of all downstream gradients.

mod backward;
mod ops;
mod tensor;


pub use backward::BackwardOp;
pub use ops::*;
pub use tensor::Tensor;

use std::collections::HashSet;

/// Perform backward pass on a tensor
pub fn backward(tensor: &mut Tensor, grad_output: Option<ndarray::Array1<f32>>) {
    if let Some(grad) = grad_output {
        tensor.set_grad(grad);
    } else {
        // Initialize with ones for scalar loss
        let ones = ndarray::Array1::ones(tensor.data().len());
        tensor.set_grad(ones);
    }

    for node in topological_order(tensor).iter().rev() {
        if let Some(op) = node.backward_op() {
            op.backward();
        }
    }
}

/// Post-order over the graph rooted at `root` (inputs before consumers)
fn topological_order(root: &Tensor) -> Vec<Tensor> {
    let mut order = Vec::new();
    let mut visited = HashSet::new();
    let mut stack = vec![(root.clone(), false)];

    while let Some((node, expanded)) = stack.pop() {
        if expanded {
            order.push(node);
            continue;
        }
        if !visited.insert(node.id()) {
            continue;
        }
        let inputs = node
            .backward_op()
            .map(|op| op.inputs())
            .unwrap_or_default();
        stack.push((node, true));
        for input in inputs {
            if !visited.contains(&input.id()) {
                stack.push((input, false));
            }
        }
    }

    order
}
