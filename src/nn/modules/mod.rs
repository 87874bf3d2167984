//! # Neural Network Layer Modules
//!
//! Layers composed into the generator and critic MLPs.

pub mod linear;
pub use linear::Linear;

pub mod activation;
pub use activation::{LeakyReLU, ReLU, Sigmoid, Tanh};
