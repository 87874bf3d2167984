//! # Tensor Module
//!
//! This module defines the core `Tensor` struct used by the training procedure,
//! together with its differentiable operations and the reverse-mode autograd
//! engine that supports differentiating through a gradient (double backprop).

use ndarray::{ArrayD, IxDyn};
use rand::distributions::{Distribution, Uniform};
use rand::Rng;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

// --- Submodules ---
pub mod autograd;
pub mod ops;

// --- Re-exports ---
pub use autograd::{grad, no_grad, AutogradContext, BackwardOp, NoGradGuard};

// --- Error Handling ---
#[derive(thiserror::Error, Debug)]
pub enum TensorError {
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    #[error("Incompatible shapes for operation {op}: {shape1:?} and {shape2:?}")]
    IncompatibleShapes {
        op: String,
        shape1: Vec<usize>,
        shape2: Vec<usize>,
    },
    #[error("Axis {axis} out of bounds for tensor of rank {ndim}")]
    AxisOutOfBounds { axis: usize, ndim: usize },
    #[error("Requested gradient for input {index}, which does not require grad")]
    RequiresGradNotSet { index: usize },
    #[error("Requested gradient for input {index}, which is not part of the computation graph")]
    NotInGraph { index: usize },
    #[error("Backward graph was already released; differentiate with retain_graph = true to traverse it twice")]
    GraphReleased,
    #[error("Expected a scalar tensor, got shape {0:?}")]
    NotScalar(Vec<usize>),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("ndarray error: {0}")]
    NdarrayError(#[from] ndarray::ShapeError),
    #[error("Autograd error: {0}")]
    AutogradError(String),
}

/// Element type of every tensor in the crate.
pub type TensorData = f32;

static NEXT_TENSOR_ID: AtomicUsize = AtomicUsize::new(1);

fn next_id() -> usize {
    NEXT_TENSOR_ID.fetch_add(1, Ordering::Relaxed)
}

/// # Tensor
///
/// An n-dimensional `f32` array plus the record of the operation that produced it.
///
/// Clones are cheap and share the underlying storage (and identity). The storage
/// sits behind an `RwLock` so optimizers can update model parameters in place
/// between training rounds, while forward passes on worker threads only read.
#[derive(Clone)]
pub struct Tensor {
    data: Arc<RwLock<ArrayD<TensorData>>>,
    shape: Vec<usize>,
    id: usize,
    requires_grad: bool,
    grad_context: Option<Arc<AutogradContext>>,
}

impl Tensor {
    /// Creates a new leaf tensor from an ndarray::ArrayD.
    pub fn new(data: ArrayD<TensorData>, requires_grad: bool) -> Self {
        let shape = data.shape().to_vec();
        Tensor {
            data: Arc::new(RwLock::new(data)),
            shape,
            id: next_id(),
            requires_grad,
            grad_context: None,
        }
    }

    /// Creates a tensor that is the result of a recorded operation.
    pub(crate) fn from_op(data: ArrayD<TensorData>, grad_context: Arc<AutogradContext>) -> Self {
        let shape = data.shape().to_vec();
        Tensor {
            data: Arc::new(RwLock::new(data)),
            shape,
            id: next_id(),
            requires_grad: true,
            grad_context: Some(grad_context),
        }
    }

    /// Creates a leaf tensor from a flat vector and a shape.
    pub fn from_vec(shape: &[usize], values: Vec<TensorData>) -> Result<Self, TensorError> {
        let data = ArrayD::from_shape_vec(IxDyn(shape), values)?;
        Ok(Tensor::new(data, false))
    }

    /// Creates a 0-dimensional constant.
    pub fn scalar(value: TensorData) -> Self {
        Tensor::new(ArrayD::from_elem(IxDyn(&[]), value), false)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Returns the total number of elements.
    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }

    /// Identity shared by all clones of this tensor; used as the graph key.
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn requires_grad(&self) -> bool {
        self.requires_grad
    }

    /// A leaf has no recorded producing operation.
    pub fn is_leaf(&self) -> bool {
        self.grad_context.is_none()
    }

    pub(crate) fn grad_context(&self) -> Option<&Arc<AutogradContext>> {
        self.grad_context.as_ref()
    }

    /// Read access to the underlying data.
    pub fn data(&self) -> std::sync::RwLockReadGuard<'_, ArrayD<TensorData>> {
        self.data.read().expect("Tensor data RwLock poisoned")
    }

    /// Write access to the underlying data. Bypasses autograd entirely.
    pub fn data_mut(&self) -> std::sync::RwLockWriteGuard<'_, ArrayD<TensorData>> {
        self.data.write().expect("Tensor data RwLock poisoned")
    }

    /// Clones the underlying data into a new ArrayD.
    pub fn data_clone(&self) -> ArrayD<TensorData> {
        self.data().clone()
    }

    /// Flattened copy of the values in logical (row-major) order.
    pub fn to_vec(&self) -> Vec<TensorData> {
        self.data().iter().copied().collect()
    }

    /// Value of a single-element tensor.
    pub fn item(&self) -> Result<TensorData, TensorError> {
        if !self.is_scalar() {
            return Err(TensorError::NotScalar(self.shape.clone()));
        }
        self.data()
            .iter()
            .next()
            .copied()
            .ok_or_else(|| TensorError::NotScalar(self.shape.clone()))
    }

    /// Checks if the tensor holds exactly one value.
    pub fn is_scalar(&self) -> bool {
        self.size() == 1
    }

    /// Returns true when no element is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        self.data().iter().all(|v| v.is_finite())
    }

    /// Detaches the tensor from the computation graph.
    ///
    /// The result is a new leaf with its own copy of the data, so later in-place
    /// updates of either tensor are not visible through the other.
    pub fn detach(&self) -> Self {
        Tensor::new(self.data_clone(), false)
    }

    /// Marks a leaf as a differentiation variable.
    ///
    /// Non-leaf tensors are detached first, so the result is always a new leaf.
    pub fn requiring_grad(self) -> Self {
        let mut leaf = if self.is_leaf() { self } else { self.detach() };
        leaf.requires_grad = true;
        leaf
    }

    /// Overwrites the stored values in place, keeping identity and graph links.
    pub fn assign(&self, values: &ArrayD<TensorData>) -> Result<(), TensorError> {
        if values.shape() != self.shape.as_slice() {
            return Err(TensorError::ShapeMismatch {
                expected: self.shape.clone(),
                got: values.shape().to_vec(),
            });
        }
        self.data_mut().assign(values);
        Ok(())
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("id", &self.id)
            .field("shape", &self.shape)
            .field("requires_grad", &self.requires_grad)
            .field("is_leaf", &self.is_leaf())
            .finish()
    }
}

// --- Operator overloading, delegating to `ops` ---
use std::ops::{Add, Mul, Neg, Sub};

impl Add<&Tensor> for &Tensor {
    type Output = Result<Tensor, TensorError>;

    fn add(self, other: &Tensor) -> Self::Output {
        ops::add(self, other)
    }
}

impl Sub<&Tensor> for &Tensor {
    type Output = Result<Tensor, TensorError>;

    fn sub(self, other: &Tensor) -> Self::Output {
        ops::sub(self, other)
    }
}

impl Mul<&Tensor> for &Tensor {
    type Output = Result<Tensor, TensorError>;

    fn mul(self, other: &Tensor) -> Self::Output {
        ops::mul(self, other)
    }
}

impl Neg for &Tensor {
    type Output = Result<Tensor, TensorError>;

    fn neg(self) -> Self::Output {
        ops::neg(self)
    }
}

// --- Helper functions ---

/// Helper to create a tensor filled with zeros.
pub fn zeros(shape: &[usize], requires_grad: bool) -> Tensor {
    Tensor::new(ArrayD::zeros(IxDyn(shape)), requires_grad)
}

/// Helper to create a tensor filled with ones.
pub fn ones(shape: &[usize], requires_grad: bool) -> Tensor {
    Tensor::new(ArrayD::ones(IxDyn(shape)), requires_grad)
}

/// Helper to create a tensor with values drawn uniformly from `[low, high)`.
pub fn uniform<R: Rng + ?Sized>(
    shape: &[usize],
    low: TensorData,
    high: TensorData,
    requires_grad: bool,
    rng: &mut R,
) -> Tensor {
    let range = Uniform::new(low, high);
    let data = ArrayD::from_shape_simple_fn(IxDyn(shape), || range.sample(rng));
    Tensor::new(data, requires_grad)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detach_copies_data_and_drops_history() {
        let x = Tensor::from_vec(&[2], vec![1.0, 2.0]).unwrap().requiring_grad();
        let y = ops::mul_scalar(&x, 3.0).unwrap();
        assert!(!y.is_leaf());

        let d = y.detach();
        assert!(d.is_leaf());
        assert!(!d.requires_grad());
        assert_ne!(d.id(), y.id());

        d.data_mut().fill(0.0);
        assert_eq!(y.to_vec(), vec![3.0, 6.0]);
    }

    #[test]
    fn requiring_grad_on_non_leaf_makes_new_leaf() {
        let x = Tensor::from_vec(&[1], vec![2.0]).unwrap().requiring_grad();
        let y = ops::add_scalar(&x, 1.0).unwrap();
        let leaf = y.clone().requiring_grad();
        assert!(leaf.is_leaf());
        assert!(leaf.requires_grad());
        assert_ne!(leaf.id(), y.id());
    }

    #[test]
    fn assign_rejects_wrong_shape() {
        let t = zeros(&[2, 2], false);
        let err = t.assign(&ArrayD::zeros(IxDyn(&[3]))).unwrap_err();
        assert!(matches!(err, TensorError::ShapeMismatch { .. }));
    }

    #[test]
    fn item_requires_single_element() {
        assert_eq!(Tensor::scalar(4.5).item().unwrap(), 4.5);
        assert!(matches!(ones(&[2], false).item(), Err(TensorError::NotScalar(_))));
    }
}
