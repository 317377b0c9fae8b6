//! Backward operation trait

use super::Tensor;

/// A node's local gradient rule
///
/// `backward` reads the gradient already accumulated on the node's output
/// and adds its contribution into each input. It must not recurse: the
/// engine visits nodes in reverse topological order so that a tensor shared
/// by several consumers has its gradient fully summed before it propagates.
pub trait BackwardOp {
    fn backward(&self);

    /// Tensors this node reads from
    fn inputs(&self) -> Vec<Tensor>;
}
