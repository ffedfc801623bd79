//! `kv-tensor` - Row-major f32 tensors with pluggable compute backends for kv-attn.
//!
//! This crate provides:
//! - A contiguous `Tensor` type with reshape, transpose, concatenation and slicing
//! - A `ComputeBackend` trait for the numeric kernels (matmul, softmax, masked fill)
//! - A reference `CpuBackend` implementation
//! - Shape utilities and broadcasting

pub mod backend;
pub mod cpu;
pub mod error;
pub mod shape;
pub mod tensor;

// Re-export primary types at the crate root for convenience.
pub use backend::ComputeBackend;
pub use cpu::CpuBackend;
pub use error::{Result, TensorError};
pub use shape::Shape;
pub use tensor::Tensor;
