//! # Tensor Operations
//!
//! Differentiable operations on `Tensor`. Each operation computes its result
//! eagerly with `ndarray` and, when any input requires grad and recording is
//! enabled, attaches a graph node whose backward rule lives in
//! `autograd::op_abstractions`.

use super::autograd::op_abstractions::{
    AddBackward, AddScalarBackward, BroadcastToBackward, ConcatBackward, LeakyReluBackward, MatMulBackward,
    MulBackward, MulScalarBackward, NarrowBackward, ReluBackward, ReshapeBackward, SafeReciprocalBackward,
    SigmoidBackward, SqrtBackward, SubBackward, SumBackward, SumToShapeBackward, TanhBackward, TransposeBackward,
};
use super::autograd::{is_grad_enabled, AutogradContext, BackwardOp};
use super::{Tensor, TensorData, TensorError};
use ndarray::{ArrayD, Axis, Ix2, IxDyn, Slice, Zip};
use std::sync::Arc;

// --- Helper Function for Autograd Setup ---

/// Wraps an op result, recording a graph node if any input requires grad.
fn create_op_result(result_data: ArrayD<TensorData>, inputs: Vec<Tensor>, backward_op: Box<dyn BackwardOp>) -> Tensor {
    let requires_grad = is_grad_enabled() && inputs.iter().any(|t| t.requires_grad());
    if requires_grad {
        let grad_context = Arc::new(AutogradContext::new(inputs, backward_op));
        Tensor::from_op(result_data, grad_context)
    } else {
        Tensor::new(result_data, false)
    }
}

// --- Broadcasting ---

/// Checks if tensor shapes can be broadcast together following NumPy broadcasting rules.
pub fn can_broadcast(shape1: &[usize], shape2: &[usize]) -> bool {
    shape1
        .iter()
        .rev()
        .zip(shape2.iter().rev())
        .all(|(&s1, &s2)| s1 == s2 || s1 == 1 || s2 == 1)
}

/// Determines the output shape after broadcasting two shapes.
pub fn broadcast_shapes(shape1: &[usize], shape2: &[usize]) -> Result<Vec<usize>, TensorError> {
    if !can_broadcast(shape1, shape2) {
        return Err(TensorError::IncompatibleShapes {
            op: "broadcast".to_string(),
            shape1: shape1.to_vec(),
            shape2: shape2.to_vec(),
        });
    }

    let max_dims = shape1.len().max(shape2.len());
    let padded1 = pad_shape_left(shape1, max_dims);
    let padded2 = pad_shape_left(shape2, max_dims);
    Ok(padded1.iter().zip(&padded2).map(|(&a, &b)| a.max(b)).collect())
}

/// Pads a shape with 1s on the left to match the target length.
fn pad_shape_left(shape: &[usize], target_len: usize) -> Vec<usize> {
    let mut padded = vec![1; target_len.saturating_sub(shape.len())];
    padded.extend_from_slice(shape);
    padded
}

fn incompatible(op: &str, shape1: &[usize], shape2: &[usize]) -> TensorError {
    TensorError::IncompatibleShapes {
        op: op.to_string(),
        shape1: shape1.to_vec(),
        shape2: shape2.to_vec(),
    }
}

/// Elementwise combination of two broadcast-compatible tensors.
fn zip_broadcast(
    op: &str,
    a: &Tensor,
    b: &Tensor,
    f: impl Fn(TensorData, TensorData) -> TensorData,
) -> Result<ArrayD<TensorData>, TensorError> {
    let output_shape = broadcast_shapes(a.shape(), b.shape()).map_err(|_| incompatible(op, a.shape(), b.shape()))?;
    // Copy `a` first so that `a` and `b` may be the same tensor.
    let a_data = a.data_clone();
    let b_data = b.data();
    let a_view = a_data
        .broadcast(IxDyn(&output_shape))
        .ok_or_else(|| incompatible(op, a.shape(), b.shape()))?;
    let b_view = b_data
        .broadcast(IxDyn(&output_shape))
        .ok_or_else(|| incompatible(op, a.shape(), b.shape()))?;
    Ok(Zip::from(a_view).and(b_view).map_collect(|&x, &y| f(x, y)))
}

fn standard_layout(data: ndarray::ArrayViewD<'_, TensorData>) -> ArrayD<TensorData> {
    data.as_standard_layout().into_owned()
}

// --- Arithmetic Operations ---

/// Element-wise addition with broadcasting.
pub fn add(a: &Tensor, b: &Tensor) -> Result<Tensor, TensorError> {
    let result_data = zip_broadcast("add", a, b, |x, y| x + y)?;
    Ok(create_op_result(result_data, vec![a.clone(), b.clone()], Box::new(AddBackward)))
}

/// Element-wise subtraction (a - b) with broadcasting.
pub fn sub(a: &Tensor, b: &Tensor) -> Result<Tensor, TensorError> {
    let result_data = zip_broadcast("sub", a, b, |x, y| x - y)?;
    Ok(create_op_result(result_data, vec![a.clone(), b.clone()], Box::new(SubBackward)))
}

/// Element-wise multiplication with broadcasting.
pub fn mul(a: &Tensor, b: &Tensor) -> Result<Tensor, TensorError> {
    let result_data = zip_broadcast("mul", a, b, |x, y| x * y)?;
    Ok(create_op_result(result_data, vec![a.clone(), b.clone()], Box::new(MulBackward)))
}

/// Multiply a tensor by a constant.
pub fn mul_scalar(a: &Tensor, factor: TensorData) -> Result<Tensor, TensorError> {
    let result_data = a.data().mapv(|x| x * factor);
    Ok(create_op_result(result_data, vec![a.clone()], Box::new(MulScalarBackward { factor })))
}

/// Add a constant to every element.
pub fn add_scalar(a: &Tensor, value: TensorData) -> Result<Tensor, TensorError> {
    let result_data = a.data().mapv(|x| x + value);
    Ok(create_op_result(result_data, vec![a.clone()], Box::new(AddScalarBackward)))
}

pub fn neg(a: &Tensor) -> Result<Tensor, TensorError> {
    mul_scalar(a, -1.0)
}

pub fn square(a: &Tensor) -> Result<Tensor, TensorError> {
    mul(a, a)
}

// --- Matrix Operations ---

/// Matrix multiplication of two 2-D tensors: `[m, k] @ [k, n] -> [m, n]`.
pub fn matmul(a: &Tensor, b: &Tensor) -> Result<Tensor, TensorError> {
    if a.ndim() != 2 || b.ndim() != 2 || a.shape()[1] != b.shape()[0] {
        return Err(incompatible("matmul", a.shape(), b.shape()));
    }
    let a_matrix = a.data_clone().into_dimensionality::<Ix2>()?;
    let b_data = b.data();
    let b_matrix = b_data.view().into_dimensionality::<Ix2>()?;
    let result_data = a_matrix.dot(&b_matrix).into_dyn();
    Ok(create_op_result(result_data, vec![a.clone(), b.clone()], Box::new(MatMulBackward)))
}

/// Transpose of a 2-D tensor.
pub fn transpose(a: &Tensor) -> Result<Tensor, TensorError> {
    if a.ndim() != 2 {
        return Err(TensorError::InvalidArgument(format!(
            "transpose expects a 2-D tensor, got shape {:?}",
            a.shape()
        )));
    }
    let result_data = standard_layout(a.data().t());
    Ok(create_op_result(result_data, vec![a.clone()], Box::new(TransposeBackward)))
}

// --- Reduction Operations ---

/// Sums all elements in the tensor. Returns a 0-dimensional tensor.
pub fn sum(a: &Tensor) -> Result<Tensor, TensorError> {
    let total = a.data().sum();
    let result_data = ArrayD::from_elem(IxDyn(&[]), total);
    Ok(create_op_result(
        result_data,
        vec![a.clone()],
        Box::new(SumBackward { input_shape: a.shape().to_vec() }),
    ))
}

/// Mean of all elements. Returns a 0-dimensional tensor.
pub fn mean(a: &Tensor) -> Result<Tensor, TensorError> {
    if a.size() == 0 {
        return Err(TensorError::InvalidArgument("mean of an empty tensor".to_string()));
    }
    mul_scalar(&sum(a)?, 1.0 / a.size() as TensorData)
}

/// Sums `a` down to `shape`, the inverse of broadcasting `shape` up to `a.shape()`.
pub fn sum_to_shape(a: &Tensor, shape: &[usize]) -> Result<Tensor, TensorError> {
    if a.shape() == shape {
        return Ok(a.clone());
    }
    let source = a.shape();
    if shape.len() > source.len() || broadcast_shapes(shape, source)? != source {
        return Err(incompatible("sum_to_shape", source, shape));
    }

    let mut reduced = a.data_clone();
    for _ in 0..(source.len() - shape.len()) {
        reduced = reduced.sum_axis(Axis(0));
    }
    for (axis, &extent) in shape.iter().enumerate() {
        if extent == 1 && reduced.shape()[axis] != 1 {
            reduced = reduced.sum_axis(Axis(axis)).insert_axis(Axis(axis));
        }
    }

    Ok(create_op_result(
        reduced,
        vec![a.clone()],
        Box::new(SumToShapeBackward { input_shape: source.to_vec() }),
    ))
}

/// Broadcasts `a` up to `shape`, materialising the result.
pub fn broadcast_to(a: &Tensor, shape: &[usize]) -> Result<Tensor, TensorError> {
    if a.shape() == shape {
        return Ok(a.clone());
    }
    let result_data = {
        let data = a.data();
        let view = data
            .broadcast(IxDyn(shape))
            .ok_or_else(|| incompatible("broadcast_to", a.shape(), shape))?;
        standard_layout(view)
    };
    Ok(create_op_result(
        result_data,
        vec![a.clone()],
        Box::new(BroadcastToBackward { input_shape: a.shape().to_vec() }),
    ))
}

// --- Shape Manipulation ---

/// Reshapes a tensor to the target shape (copying the data).
pub fn reshape(a: &Tensor, new_shape: &[usize]) -> Result<Tensor, TensorError> {
    let new_size: usize = new_shape.iter().product();
    if a.size() != new_size {
        return Err(TensorError::ShapeMismatch {
            expected: vec![a.size()],
            got: vec![new_size],
        });
    }
    let result_data = standard_layout(a.data().view()).into_shape(IxDyn(new_shape))?;
    Ok(create_op_result(
        result_data,
        vec![a.clone()],
        Box::new(ReshapeBackward { original_shape: a.shape().to_vec() }),
    ))
}

/// Views `[batch, ...]` as `[batch, rest]`.
pub fn flatten_batch(a: &Tensor) -> Result<Tensor, TensorError> {
    let batch = *a
        .shape()
        .first()
        .ok_or_else(|| TensorError::InvalidArgument("cannot flatten a 0-dimensional tensor".to_string()))?;
    let rest = if batch == 0 { 0 } else { a.size() / batch };
    reshape(a, &[batch, rest])
}

/// Concatenates tensors along `axis`; all other extents must agree.
pub fn concat(tensors: &[Tensor], axis: usize) -> Result<Tensor, TensorError> {
    let first = tensors
        .first()
        .ok_or_else(|| TensorError::InvalidArgument("cannot concatenate an empty list".to_string()))?;
    if axis >= first.ndim() {
        return Err(TensorError::AxisOutOfBounds { axis, ndim: first.ndim() });
    }
    for t in &tensors[1..] {
        let compatible = t.ndim() == first.ndim()
            && t.shape().iter().zip(first.shape()).enumerate().all(|(i, (x, y))| i == axis || x == y);
        if !compatible {
            return Err(incompatible("concat", first.shape(), t.shape()));
        }
    }

    let owned: Vec<ArrayD<TensorData>> = tensors.iter().map(Tensor::data_clone).collect();
    let views: Vec<_> = owned.iter().map(|a| a.view()).collect();
    let result_data = ndarray::concatenate(Axis(axis), &views)?;
    let sizes = tensors.iter().map(|t| t.shape()[axis]).collect();
    Ok(create_op_result(result_data, tensors.to_vec(), Box::new(ConcatBackward { axis, sizes })))
}

/// Selects `len` entries starting at `start` along `axis`.
pub fn narrow(a: &Tensor, axis: usize, start: usize, len: usize) -> Result<Tensor, TensorError> {
    if axis >= a.ndim() {
        return Err(TensorError::AxisOutOfBounds { axis, ndim: a.ndim() });
    }
    if start + len > a.shape()[axis] {
        return Err(TensorError::InvalidArgument(format!(
            "narrow {}..{} exceeds extent {} of axis {}",
            start,
            start + len,
            a.shape()[axis],
            axis
        )));
    }
    let result_data = standard_layout(a.data().slice_axis(Axis(axis), Slice::from(start..start + len)));
    Ok(create_op_result(
        result_data,
        vec![a.clone()],
        Box::new(NarrowBackward {
            axis,
            start,
            input_shape: a.shape().to_vec(),
        }),
    ))
}

// --- Elementwise functions ---

pub fn sqrt(a: &Tensor) -> Result<Tensor, TensorError> {
    let result_data = a.data().mapv(TensorData::sqrt);
    Ok(create_op_result(result_data, vec![a.clone()], Box::new(SqrtBackward)))
}

/// `1 / x`, with zero mapped to zero.
pub fn safe_reciprocal(a: &Tensor) -> Result<Tensor, TensorError> {
    let result_data = a.data().mapv(|x| if x == 0.0 { 0.0 } else { 1.0 / x });
    Ok(create_op_result(result_data, vec![a.clone()], Box::new(SafeReciprocalBackward)))
}

// --- Activation Functions ---

/// max(0, x) applied element-wise.
pub fn relu(a: &Tensor) -> Result<Tensor, TensorError> {
    let result_data = a.data().mapv(|x| x.max(0.0));
    Ok(create_op_result(result_data, vec![a.clone()], Box::new(ReluBackward)))
}

/// x for x > 0, `leakage * x` otherwise.
pub fn leaky_relu(a: &Tensor, leakage: TensorData) -> Result<Tensor, TensorError> {
    let result_data = a.data().mapv(|x| if x > 0.0 { x } else { leakage * x });
    Ok(create_op_result(result_data, vec![a.clone()], Box::new(LeakyReluBackward { leakage })))
}

pub fn sigmoid(a: &Tensor) -> Result<Tensor, TensorError> {
    let result_data = a.data().mapv(|x| 1.0 / (1.0 + (-x).exp()));
    Ok(create_op_result(result_data, vec![a.clone()], Box::new(SigmoidBackward)))
}

pub fn tanh(a: &Tensor) -> Result<Tensor, TensorError> {
    let result_data = a.data().mapv(TensorData::tanh);
    Ok(create_op_result(result_data, vec![a.clone()], Box::new(TanhBackward)))
}
