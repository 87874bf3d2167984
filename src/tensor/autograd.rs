//! # Automatic Differentiation (Autograd)
//!
//! Reverse-mode automatic differentiation over the graph recorded by `ops`.
//!
//! Backward rules are written with the same differentiable operations used in
//! the forward pass. When gradients are requested with `retain_graph = true`,
//! evaluating those rules records new graph nodes, so the returned gradients can
//! themselves be differentiated (gradient-of-a-gradient).

use super::{ones, Tensor, TensorError};
use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::sync::{Arc, Mutex};

// --- Backward Operation Trait ---

/// Backward rule of one operation.
///
/// `Send + Sync` because graphs are built and traversed on worker threads.
pub trait BackwardOp: Debug + Send + Sync + 'static {
    /// Computes the gradients with respect to the inputs of the operation.
    ///
    /// # Arguments
    /// * `inputs` - The input tensors of the original forward operation.
    /// * `output_grad` - The gradient flowing back into this operation's output.
    ///
    /// # Returns
    /// One gradient per input, in the same order as `inputs`, each with the
    /// shape of the corresponding input.
    fn backward(&self, inputs: &[Tensor], output_grad: &Tensor) -> Result<Vec<Tensor>, TensorError>;
}

// --- Autograd Context ---

/// Graph node attached to the output tensor of a recorded operation.
#[derive(Debug)]
pub struct AutogradContext {
    op: Box<dyn BackwardOp>,
    /// Saved inputs; `None` once a non-retaining backward pass released them.
    inputs: Mutex<Option<Vec<Tensor>>>,
}

impl AutogradContext {
    pub fn new(inputs: Vec<Tensor>, op: Box<dyn BackwardOp>) -> Self {
        AutogradContext {
            op,
            inputs: Mutex::new(Some(inputs)),
        }
    }

    fn saved_inputs(&self) -> Result<Vec<Tensor>, TensorError> {
        self.inputs
            .lock()
            .expect("AutogradContext Mutex poisoned")
            .clone()
            .ok_or(TensorError::GraphReleased)
    }

    fn release(&self) {
        *self.inputs.lock().expect("AutogradContext Mutex poisoned") = None;
    }
}

// --- Grad mode ---

thread_local! {
    static GRAD_ENABLED: Cell<bool> = const { Cell::new(true) };
}

/// Whether operations on the current thread record graph nodes.
pub fn is_grad_enabled() -> bool {
    GRAD_ENABLED.with(|flag| flag.get())
}

/// Restores the previous grad mode when dropped.
#[must_use = "grad recording resumes as soon as the guard is dropped"]
pub struct NoGradGuard {
    previous: bool,
}

impl Drop for NoGradGuard {
    fn drop(&mut self) {
        GRAD_ENABLED.with(|flag| flag.set(self.previous));
    }
}

/// Disables graph recording on the current thread until the guard is dropped.
pub fn no_grad() -> NoGradGuard {
    let previous = GRAD_ENABLED.with(|flag| flag.replace(false));
    NoGradGuard { previous }
}

// --- Main Gradient Function ---

/// Computes the gradients of the sum of `outputs` with respect to `inputs`.
///
/// Every output must hold a single value; it is seeded with a gradient of one.
/// The result is aligned index-for-index with `inputs`.
///
/// Only nodes with a path down to one of `inputs` are differentiated; branches
/// that cannot reach an input are skipped entirely.
///
/// With `retain_graph = true` the traversed graph stays intact and the returned
/// gradients carry their own backward graph, so an expression built from them
/// can be differentiated again. With `retain_graph = false` the differentiated
/// nodes release their saved inputs and the gradients come back detached; a
/// later pass through the same nodes fails with [`TensorError::GraphReleased`].
///
/// # Errors
/// * [`TensorError::RequiresGradNotSet`] if an input does not require grad.
/// * [`TensorError::NotInGraph`] if the outputs do not depend on an input.
pub fn grad(outputs: &[Tensor], inputs: &[Tensor], retain_graph: bool) -> Result<Vec<Tensor>, TensorError> {
    for (index, input) in inputs.iter().enumerate() {
        if !input.requires_grad() {
            return Err(TensorError::RequiresGradNotSet { index });
        }
    }

    // Evaluating backward rules only records nodes when the caller wants a
    // differentiable result.
    let _guard = if retain_graph { None } else { Some(no_grad()) };

    let order = topological_order(outputs)?;
    let targets: HashSet<usize> = inputs.iter().map(Tensor::id).collect();
    let reaching = nodes_reaching(&order, &targets)?;

    let mut grads: HashMap<usize, Tensor> = HashMap::new();
    for output in outputs.iter().filter(|t| reaching.contains(&t.id())) {
        if !output.is_scalar() {
            return Err(TensorError::NotScalar(output.shape().to_vec()));
        }
        accumulate(&mut grads, output, ones(output.shape(), false))?;
    }

    // `order` is a post-order, so walking it backwards visits every node
    // after all of its consumers.
    for tensor in order.iter().rev().filter(|t| reaching.contains(&t.id())) {
        let Some(ctx) = tensor.grad_context() else {
            continue;
        };
        let Some(output_grad) = grads.get(&tensor.id()).cloned() else {
            continue;
        };

        let saved = ctx.saved_inputs()?;
        let input_grads = ctx.op.backward(&saved, &output_grad)?;
        if input_grads.len() != saved.len() {
            return Err(TensorError::AutogradError(format!(
                "Backward op {:?} produced {} gradients, but expected {}",
                ctx.op,
                input_grads.len(),
                saved.len()
            )));
        }

        for (input, input_grad) in saved.iter().zip(input_grads) {
            if reaching.contains(&input.id()) {
                accumulate(&mut grads, input, input_grad)?;
            }
        }

        if !retain_graph {
            ctx.release();
        }
    }

    inputs
        .iter()
        .enumerate()
        .map(|(index, input)| match grads.get(&input.id()) {
            Some(g) if retain_graph => Ok(g.clone()),
            Some(g) => Ok(g.detach()),
            None => Err(TensorError::NotInGraph { index }),
        })
        .collect()
}

fn accumulate(grads: &mut HashMap<usize, Tensor>, target: &Tensor, incoming: Tensor) -> Result<(), TensorError> {
    if incoming.shape() != target.shape() {
        return Err(TensorError::ShapeMismatch {
            expected: target.shape().to_vec(),
            got: incoming.shape().to_vec(),
        });
    }
    let merged = match grads.remove(&target.id()) {
        Some(existing) => super::ops::add(&existing, &incoming)?,
        None => incoming,
    };
    grads.insert(target.id(), merged);
    Ok(())
}

/// Ids of the tensors in `order` that are, or depend on, one of `targets`.
///
/// `order` must be a post-order, so every node comes after its inputs.
fn nodes_reaching(order: &[Tensor], targets: &HashSet<usize>) -> Result<HashSet<usize>, TensorError> {
    let mut reaching = HashSet::new();
    for tensor in order {
        let hit = targets.contains(&tensor.id())
            || match tensor.grad_context() {
                Some(ctx) => ctx.saved_inputs()?.iter().any(|input| reaching.contains(&input.id())),
                None => false,
            };
        if hit {
            reaching.insert(tensor.id());
        }
    }
    Ok(reaching)
}

/// Iterative depth-first post-order over every tensor reachable from `roots`.
fn topological_order(roots: &[Tensor]) -> Result<Vec<Tensor>, TensorError> {
    let mut order = Vec::new();
    let mut visited: HashSet<usize> = HashSet::new();
    let mut stack: Vec<(Tensor, bool)> = roots.iter().rev().map(|t| (t.clone(), false)).collect();

    while let Some((tensor, expanded)) = stack.pop() {
        if expanded {
            order.push(tensor);
            continue;
        }
        if !tensor.requires_grad() || !visited.insert(tensor.id()) {
            continue;
        }
        let children = match tensor.grad_context() {
            Some(ctx) => ctx.saved_inputs()?,
            None => Vec::new(),
        };
        stack.push((tensor, true));
        for child in children.into_iter().rev() {
            if !visited.contains(&child.id()) {
                stack.push((child, false));
            }
        }
    }

    Ok(order)
}

// --- Concrete BackwardOp Implementations ---

pub mod op_abstractions {
    use super::*;
    use crate::tensor::{ops, zeros, TensorData};

    // ---- Add ----
    #[derive(Debug)]
    pub struct AddBackward;
    impl BackwardOp for AddBackward {
        fn backward(&self, inputs: &[Tensor], output_grad: &Tensor) -> Result<Vec<Tensor>, TensorError> {
            Ok(vec![
                ops::sum_to_shape(output_grad, inputs[0].shape())?,
                ops::sum_to_shape(output_grad, inputs[1].shape())?,
            ])
        }
    }

    // ---- Sub ----
    #[derive(Debug)]
    pub struct SubBackward;
    impl BackwardOp for SubBackward {
        fn backward(&self, inputs: &[Tensor], output_grad: &Tensor) -> Result<Vec<Tensor>, TensorError> {
            let negated = ops::neg(output_grad)?;
            Ok(vec![
                ops::sum_to_shape(output_grad, inputs[0].shape())?,
                ops::sum_to_shape(&negated, inputs[1].shape())?,
            ])
        }
    }

    // ---- Mul ----
    #[derive(Debug)]
    pub struct MulBackward;
    impl BackwardOp for MulBackward {
        fn backward(&self, inputs: &[Tensor], output_grad: &Tensor) -> Result<Vec<Tensor>, TensorError> {
            let (a, b) = (&inputs[0], &inputs[1]);
            let grad_a = ops::mul(output_grad, b)?;
            let grad_b = ops::mul(output_grad, a)?;
            Ok(vec![
                ops::sum_to_shape(&grad_a, a.shape())?,
                ops::sum_to_shape(&grad_b, b.shape())?,
            ])
        }
    }

    // ---- Scalar multiply / add ----
    #[derive(Debug)]
    pub struct MulScalarBackward {
        pub factor: TensorData,
    }
    impl BackwardOp for MulScalarBackward {
        fn backward(&self, _inputs: &[Tensor], output_grad: &Tensor) -> Result<Vec<Tensor>, TensorError> {
            Ok(vec![ops::mul_scalar(output_grad, self.factor)?])
        }
    }

    #[derive(Debug)]
    pub struct AddScalarBackward;
    impl BackwardOp for AddScalarBackward {
        fn backward(&self, _inputs: &[Tensor], output_grad: &Tensor) -> Result<Vec<Tensor>, TensorError> {
            Ok(vec![output_grad.clone()])
        }
    }

    // ---- MatMul ----
    #[derive(Debug)]
    pub struct MatMulBackward;
    impl BackwardOp for MatMulBackward {
        fn backward(&self, inputs: &[Tensor], output_grad: &Tensor) -> Result<Vec<Tensor>, TensorError> {
            // C = A @ B  =>  dA = dC @ B^T,  dB = A^T @ dC
            let (a, b) = (&inputs[0], &inputs[1]);
            let grad_a = ops::matmul(output_grad, &ops::transpose(b)?)?;
            let grad_b = ops::matmul(&ops::transpose(a)?, output_grad)?;
            Ok(vec![grad_a, grad_b])
        }
    }

    // ---- Transpose ----
    #[derive(Debug)]
    pub struct TransposeBackward;
    impl BackwardOp for TransposeBackward {
        fn backward(&self, _inputs: &[Tensor], output_grad: &Tensor) -> Result<Vec<Tensor>, TensorError> {
            Ok(vec![ops::transpose(output_grad)?])
        }
    }

    // ---- Reductions and broadcasting ----
    #[derive(Debug)]
    pub struct SumBackward {
        pub input_shape: Vec<usize>,
    }
    impl BackwardOp for SumBackward {
        fn backward(&self, _inputs: &[Tensor], output_grad: &Tensor) -> Result<Vec<Tensor>, TensorError> {
            Ok(vec![ops::broadcast_to(output_grad, &self.input_shape)?])
        }
    }

    /// Shared by `sum_to_shape`: the adjoint of a reduction is a broadcast.
    #[derive(Debug)]
    pub struct SumToShapeBackward {
        pub input_shape: Vec<usize>,
    }
    impl BackwardOp for SumToShapeBackward {
        fn backward(&self, _inputs: &[Tensor], output_grad: &Tensor) -> Result<Vec<Tensor>, TensorError> {
            Ok(vec![ops::broadcast_to(output_grad, &self.input_shape)?])
        }
    }

    #[derive(Debug)]
    pub struct BroadcastToBackward {
        pub input_shape: Vec<usize>,
    }
    impl BackwardOp for BroadcastToBackward {
        fn backward(&self, _inputs: &[Tensor], output_grad: &Tensor) -> Result<Vec<Tensor>, TensorError> {
            Ok(vec![ops::sum_to_shape(output_grad, &self.input_shape)?])
        }
    }

    // ---- Reshape ----
    #[derive(Debug)]
    pub struct ReshapeBackward {
        pub original_shape: Vec<usize>,
    }
    impl BackwardOp for ReshapeBackward {
        fn backward(&self, _inputs: &[Tensor], output_grad: &Tensor) -> Result<Vec<Tensor>, TensorError> {
            Ok(vec![ops::reshape(output_grad, &self.original_shape)?])
        }
    }

    // ---- Sqrt ----
    #[derive(Debug)]
    pub struct SqrtBackward;
    impl BackwardOp for SqrtBackward {
        fn backward(&self, inputs: &[Tensor], output_grad: &Tensor) -> Result<Vec<Tensor>, TensorError> {
            // d sqrt(x) = 0.5 / sqrt(x); the safe reciprocal maps a zero root to a zero slope.
            let root = ops::sqrt(&inputs[0])?;
            let slope = ops::mul_scalar(&ops::safe_reciprocal(&root)?, 0.5)?;
            Ok(vec![ops::mul(output_grad, &slope)?])
        }
    }

    #[derive(Debug)]
    pub struct SafeReciprocalBackward;
    impl BackwardOp for SafeReciprocalBackward {
        fn backward(&self, inputs: &[Tensor], output_grad: &Tensor) -> Result<Vec<Tensor>, TensorError> {
            // d (1/x) = -1/x^2
            let r = ops::safe_reciprocal(&inputs[0])?;
            let slope = ops::neg(&ops::mul(&r, &r)?)?;
            Ok(vec![ops::mul(output_grad, &slope)?])
        }
    }

    // ---- Activations ----
    #[derive(Debug)]
    pub struct ReluBackward;
    impl BackwardOp for ReluBackward {
        fn backward(&self, inputs: &[Tensor], output_grad: &Tensor) -> Result<Vec<Tensor>, TensorError> {
            let mask = inputs[0].data().mapv(|x| if x > 0.0 { 1.0 } else { 0.0 });
            Ok(vec![ops::mul(output_grad, &Tensor::new(mask, false))?])
        }
    }

    #[derive(Debug)]
    pub struct LeakyReluBackward {
        pub leakage: TensorData,
    }
    impl BackwardOp for LeakyReluBackward {
        fn backward(&self, inputs: &[Tensor], output_grad: &Tensor) -> Result<Vec<Tensor>, TensorError> {
            let leakage = self.leakage;
            let mask = inputs[0].data().mapv(|x| if x > 0.0 { 1.0 } else { leakage });
            Ok(vec![ops::mul(output_grad, &Tensor::new(mask, false))?])
        }
    }

    #[derive(Debug)]
    pub struct SigmoidBackward;
    impl BackwardOp for SigmoidBackward {
        fn backward(&self, inputs: &[Tensor], output_grad: &Tensor) -> Result<Vec<Tensor>, TensorError> {
            // s * (1 - s), recomputed so that it stays differentiable
            let s = ops::sigmoid(&inputs[0])?;
            let one_minus_s = ops::add_scalar(&ops::neg(&s)?, 1.0)?;
            let slope = ops::mul(&s, &one_minus_s)?;
            Ok(vec![ops::mul(output_grad, &slope)?])
        }
    }

    #[derive(Debug)]
    pub struct TanhBackward;
    impl BackwardOp for TanhBackward {
        fn backward(&self, inputs: &[Tensor], output_grad: &Tensor) -> Result<Vec<Tensor>, TensorError> {
            let t = ops::tanh(&inputs[0])?;
            let slope = ops::add_scalar(&ops::neg(&ops::mul(&t, &t)?)?, 1.0)?;
            Ok(vec![ops::mul(output_grad, &slope)?])
        }
    }

    // ---- Concatenation and slicing ----
    #[derive(Debug)]
    pub struct ConcatBackward {
        pub axis: usize,
        pub sizes: Vec<usize>,
    }
    impl BackwardOp for ConcatBackward {
        fn backward(&self, _inputs: &[Tensor], output_grad: &Tensor) -> Result<Vec<Tensor>, TensorError> {
            let mut offset = 0;
            let mut grads = Vec::with_capacity(self.sizes.len());
            for &size in &self.sizes {
                grads.push(ops::narrow(output_grad, self.axis, offset, size)?);
                offset += size;
            }
            Ok(grads)
        }
    }

    #[derive(Debug)]
    pub struct NarrowBackward {
        pub axis: usize,
        pub start: usize,
        pub input_shape: Vec<usize>,
    }
    impl BackwardOp for NarrowBackward {
        fn backward(&self, _inputs: &[Tensor], output_grad: &Tensor) -> Result<Vec<Tensor>, TensorError> {
            // Pad the slice gradient back to the input extent with constant zeros.
            let len = output_grad.shape()[self.axis];
            let after = self.input_shape[self.axis] - self.start - len;
            let mut pieces = Vec::with_capacity(3);
            for extent in [self.start, usize::MAX, after] {
                if extent == usize::MAX {
                    pieces.push(output_grad.clone());
                } else if extent > 0 {
                    let mut shape = self.input_shape.clone();
                    shape[self.axis] = extent;
                    pieces.push(zeros(&shape, false));
                }
            }
            Ok(vec![ops::concat(&pieces, self.axis)?])
        }
    }
}
