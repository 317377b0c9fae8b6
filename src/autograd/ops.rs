//! Autograd operations with backward passes

use super::{BackwardOp, Tensor};
use ndarray::Array1;
use std::cell::RefCell;
use std::rc::Rc;

type GradCell = Rc<RefCell<Option<Array1<f32>>>>;

/// Add two tensors element-wise
pub fn add(a: &Tensor, b: &Tensor) -> Tensor {
    assert_eq!(a.len(), b.len(), "add: operand size mismatch");
    let data = a.data() + b.data();
    let requires_grad = a.requires_grad() || b.requires_grad();

    let mut result = Tensor::new(data, requires_grad);

    if requires_grad {
        let backward_op = Rc::new(AddBackward {
            a: a.clone(),
            b: b.clone(),
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct AddBackward {
    a: Tensor,
    b: Tensor,
    result_grad: GradCell,
}

impl BackwardOp for AddBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                self.a.accumulate_grad(grad.clone());
            }
            if self.b.requires_grad() {
                self.b.accumulate_grad(grad.clone());
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone(), self.b.clone()]
    }
}

/// Sum a list of equally sized tensors
pub fn add_all(parts: &[Tensor]) -> Option<Tensor> {
    let (first, rest) = parts.split_first()?;
    Some(rest.iter().fold(first.clone(), |acc, t| add(&acc, t)))
}

/// Scale tensor by a scalar
pub fn scale(a: &Tensor, factor: f32) -> Tensor {
    let data = a.data() * factor;
    let requires_grad = a.requires_grad();

    let mut result = Tensor::new(data, requires_grad);

    if requires_grad {
        let backward_op = Rc::new(ScaleBackward {
            a: a.clone(),
            factor,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct ScaleBackward {
    a: Tensor,
    factor: f32,
    result_grad: GradCell,
}

impl BackwardOp for ScaleBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                // ∂L/∂a = ∂L/∂out * factor
                self.a.accumulate_grad(grad * self.factor);
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone()]
    }
}

/// ReLU activation
pub fn relu(a: &Tensor) -> Tensor {
    let data = a.data().mapv(|x| x.max(0.0));
    let requires_grad = a.requires_grad();

    let mut result = Tensor::new(data, requires_grad);

    if requires_grad {
        let backward_op = Rc::new(ReluBackward {
            a: a.clone(),
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct ReluBackward {
    a: Tensor,
    result_grad: GradCell,
}

impl BackwardOp for ReluBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                // ∂L/∂a = ∂L/∂out * (a > 0)
                let mask = self.a.data().mapv(|x| if x > 0.0 { 1.0 } else { 0.0 });
                self.a.accumulate_grad(grad * &mask);
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone()]
    }
}

/// Matrix multiplication: C = A @ B
///
/// `a` is m×k and `b` is k×n, both row-major. Returns m×n.
pub fn matmul(a: &Tensor, b: &Tensor, m: usize, k: usize, n: usize) -> Tensor {
    assert_eq!(a.len(), m * k, "Matrix A size mismatch");
    assert_eq!(b.len(), k * n, "Matrix B size mismatch");

    let a_data = a.data();
    let b_data = b.data();
    let mut result_data = vec![0.0; m * n];
    for i in 0..m {
        for p in 0..k {
            let a_ip = a_data[i * k + p];
            if a_ip == 0.0 {
                continue;
            }
            let row = &mut result_data[i * n..(i + 1) * n];
            for (j, out) in row.iter_mut().enumerate() {
                *out += a_ip * b_data[p * n + j];
            }
        }
    }

    let requires_grad = a.requires_grad() || b.requires_grad();
    let mut result = Tensor::new(Array1::from(result_data), requires_grad);

    if requires_grad {
        let backward_op = Rc::new(MatmulBackward {
            a: a.clone(),
            b: b.clone(),
            m,
            k,
            n,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct MatmulBackward {
    a: Tensor,
    b: Tensor,
    m: usize,
    k: usize,
    n: usize,
    result_grad: GradCell,
}

impl BackwardOp for MatmulBackward {
    fn backward(&self) {
        if let Some(grad_output) = self.result_grad.borrow().as_ref() {
            let (m, k, n) = (self.m, self.k, self.n);

            if self.a.requires_grad() {
                // grad_A[i,p] = sum_j grad_C[i,j] * B[p,j]
                let b = self.b.data();
                let mut grad_a = vec![0.0; m * k];
                for i in 0..m {
                    for p in 0..k {
                        let mut sum = 0.0;
                        for j in 0..n {
                            sum += grad_output[i * n + j] * b[p * n + j];
                        }
                        grad_a[i * k + p] = sum;
                    }
                }
                self.a.accumulate_grad(Array1::from(grad_a));
            }

            if self.b.requires_grad() {
                // grad_B[p,j] = sum_i A[i,p] * grad_C[i,j]
                let a = self.a.data();
                let mut grad_b = vec![0.0; k * n];
                for i in 0..m {
                    for p in 0..k {
                        let a_ip = a[i * k + p];
                        if a_ip == 0.0 {
                            continue;
                        }
                        for j in 0..n {
                            grad_b[p * n + j] += a_ip * grad_output[i * n + j];
                        }
                    }
                }
                self.b.accumulate_grad(Array1::from(grad_b));
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone(), self.b.clone()]
    }
}

/// Broadcast-add a bias row to every row of a rows×cols matrix
pub fn add_bias(x: &Tensor, bias: &Tensor, rows: usize, cols: usize) -> Tensor {
    assert_eq!(x.len(), rows * cols, "add_bias: matrix size mismatch");
    assert_eq!(bias.len(), cols, "add_bias: bias size mismatch");

    let mut data = x.data().clone();
    for r in 0..rows {
        for c in 0..cols {
            data[r * cols + c] += bias.data()[c];
        }
    }

    let requires_grad = x.requires_grad() || bias.requires_grad();
    let mut result = Tensor::new(data, requires_grad);

    if requires_grad {
        result.set_backward_op(Rc::new(AddBiasBackward {
            x: x.clone(),
            bias: bias.clone(),
            rows,
            cols,
            result_grad: result.grad_cell(),
        }));
    }

    result
}

struct AddBiasBackward {
    x: Tensor,
    bias: Tensor,
    rows: usize,
    cols: usize,
    result_grad: GradCell,
}

impl BackwardOp for AddBiasBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.x.requires_grad() {
                self.x.accumulate_grad(grad.clone());
            }
            if self.bias.requires_grad() {
                let mut grad_bias = Array1::zeros(self.cols);
                for r in 0..self.rows {
                    for c in 0..self.cols {
                        grad_bias[c] += grad[r * self.cols + c];
                    }
                }
                self.bias.accumulate_grad(grad_bias);
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.x.clone(), self.bias.clone()]
    }
}

/// Column-wise concatenation of two row-aligned matrices
///
/// `a` is rows×a_cols, `b` is rows×b_cols; the result is
/// rows×(a_cols + b_cols) with `a`'s columns first.
pub fn concat_cols(a: &Tensor, b: &Tensor, rows: usize, a_cols: usize, b_cols: usize) -> Tensor {
    assert_eq!(a.len(), rows * a_cols, "concat_cols: left size mismatch");
    assert_eq!(b.len(), rows * b_cols, "concat_cols: right size mismatch");

    let width = a_cols + b_cols;
    let mut data = Vec::with_capacity(rows * width);
    for r in 0..rows {
        data.extend(a.data().iter().skip(r * a_cols).take(a_cols));
        data.extend(b.data().iter().skip(r * b_cols).take(b_cols));
    }

    let requires_grad = a.requires_grad() || b.requires_grad();
    let mut result = Tensor::from_vec(data, requires_grad);

    if requires_grad {
        result.set_backward_op(Rc::new(ConcatColsBackward {
            a: a.clone(),
            b: b.clone(),
            rows,
            a_cols,
            b_cols,
            result_grad: result.grad_cell(),
        }));
    }

    result
}

struct ConcatColsBackward {
    a: Tensor,
    b: Tensor,
    rows: usize,
    a_cols: usize,
    b_cols: usize,
    result_grad: GradCell,
}

impl BackwardOp for ConcatColsBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            let width = self.a_cols + self.b_cols;
            if self.a.requires_grad() {
                let mut grad_a = Vec::with_capacity(self.rows * self.a_cols);
                for r in 0..self.rows {
                    grad_a.extend(grad.iter().skip(r * width).take(self.a_cols));
                }
                self.a.accumulate_grad(Array1::from(grad_a));
            }
            if self.b.requires_grad() {
                let mut grad_b = Vec::with_capacity(self.rows * self.b_cols);
                for r in 0..self.rows {
                    grad_b.extend(grad.iter().skip(r * width + self.a_cols).take(self.b_cols));
                }
                self.b.accumulate_grad(Array1::from(grad_b));
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone(), self.b.clone()]
    }
}

/// Scaled dot-product attention over a batch of independent sequences
///
/// `q` and `k` are (batch·seq_len)×d_k, `v` is (batch·seq_len)×d_v.
/// Each sequence attends only to itself. Returns (batch·seq_len)×d_v.
pub fn attention(
    q: &Tensor,
    k: &Tensor,
    v: &Tensor,
    batch: usize,
    seq_len: usize,
    d_k: usize,
    d_v: usize,
) -> Tensor {
    assert_eq!(q.len(), batch * seq_len * d_k, "attention: Q size mismatch");
    assert_eq!(k.len(), batch * seq_len * d_k, "attention: K size mismatch");
    assert_eq!(v.len(), batch * seq_len * d_v, "attention: V size mismatch");

    let scale = (d_k as f32).sqrt();
    let mut weights = vec![0.0; batch * seq_len * seq_len];
    let mut output = vec![0.0; batch * seq_len * d_v];

    for b in 0..batch {
        let qk_base = b * seq_len * d_k;
        let v_base = b * seq_len * d_v;
        let w_base = b * seq_len * seq_len;

        for i in 0..seq_len {
            let row = &mut weights[w_base + i * seq_len..w_base + (i + 1) * seq_len];
            for (j, score) in row.iter_mut().enumerate() {
                let mut dot = 0.0;
                for p in 0..d_k {
                    dot += q.data()[qk_base + i * d_k + p] * k.data()[qk_base + j * d_k + p];
                }
                *score = dot / scale;
            }

            // Softmax for numerical stability
            let max_val = row.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
            let mut sum_exp = 0.0;
            for w in row.iter_mut() {
                *w = (*w - max_val).exp();
                sum_exp += *w;
            }
            for w in row.iter_mut() {
                *w /= sum_exp;
            }

            for j in 0..d_v {
                let mut sum = 0.0;
                for p in 0..seq_len {
                    sum += row[p] * v.data()[v_base + p * d_v + j];
                }
                output[v_base + i * d_v + j] = sum;
            }
        }
    }

    let requires_grad = q.requires_grad() || k.requires_grad() || v.requires_grad();
    let mut result = Tensor::from_vec(output, requires_grad);

    if requires_grad {
        result.set_backward_op(Rc::new(AttentionBackward {
            q: q.clone(),
            k: k.clone(),
            v: v.clone(),
            weights: Array1::from(weights),
            batch,
            seq_len,
            d_k,
            d_v,
            scale,
            result_grad: result.grad_cell(),
        }));
    }

    result
}

struct AttentionBackward {
    q: Tensor,
    k: Tensor,
    v: Tensor,
    weights: Array1<f32>,
    batch: usize,
    seq_len: usize,
    d_k: usize,
    d_v: usize,
    scale: f32,
    result_grad: GradCell,
}

impl BackwardOp for AttentionBackward {
    fn backward(&self) {
        let Some(grad_output) = self.result_grad.borrow().clone() else {
            return;
        };
        let (n, d_k, d_v) = (self.seq_len, self.d_k, self.d_v);

        let mut grad_q = vec![0.0; self.q.len()];
        let mut grad_k = vec![0.0; self.k.len()];
        let mut grad_v = vec![0.0; self.v.len()];

        for b in 0..self.batch {
            let qk_base = b * n * d_k;
            let v_base = b * n * d_v;
            let w_base = b * n * n;
            let w = |i: usize, j: usize| self.weights[w_base + i * n + j];
            let g = |i: usize, j: usize| grad_output[v_base + i * d_v + j];

            // dV = Wᵀ @ dO
            for i in 0..n {
                for j in 0..d_v {
                    let mut sum = 0.0;
                    for p in 0..n {
                        sum += w(p, i) * g(p, j);
                    }
                    grad_v[v_base + i * d_v + j] += sum;
                }
            }

            // dW = dO @ Vᵀ, then through the row-wise softmax
            let mut grad_scores = vec![0.0; n * n];
            for i in 0..n {
                let mut grad_w = vec![0.0; n];
                for (j, gw) in grad_w.iter_mut().enumerate() {
                    for p in 0..d_v {
                        *gw += g(i, p) * self.v.data()[v_base + j * d_v + p];
                    }
                }
                let dot: f32 = (0..n).map(|j| w(i, j) * grad_w[j]).sum();
                for j in 0..n {
                    grad_scores[i * n + j] = w(i, j) * (grad_w[j] - dot) / self.scale;
                }
            }

            // dQ = dS @ K, dK = dSᵀ @ Q
            for i in 0..n {
                for p in 0..d_k {
                    let mut sum_q = 0.0;
                    let mut sum_k = 0.0;
                    for j in 0..n {
                        sum_q += grad_scores[i * n + j] * self.k.data()[qk_base + j * d_k + p];
                        sum_k += grad_scores[j * n + i] * self.q.data()[qk_base + j * d_k + p];
                    }
                    grad_q[qk_base + i * d_k + p] += sum_q;
                    grad_k[qk_base + i * d_k + p] += sum_k;
                }
            }
        }

        if self.q.requires_grad() {
            self.q.accumulate_grad(Array1::from(grad_q));
        }
        if self.k.requires_grad() {
            self.k.accumulate_grad(Array1::from(grad_k));
        }
        if self.v.requires_grad() {
            self.v.accumulate_grad(Array1::from(grad_v));
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.q.clone(), self.k.clone(), self.v.clone()]
    }
}
