use std::fmt::Debug;

use crate::error::Result;

/// Trait for pluggable compute backends.
///
/// All operations work on contiguous row-major f32 slices. Data is passed in
/// as slices and returned as owned vectors; the backend is responsible for
/// performing the computation only; shape bookkeeping stays in `Tensor`.
pub trait ComputeBackend: Send + Sync + Debug {
    /// Returns the name of this backend (e.g., "cpu").
    fn name(&self) -> &str;

    /// Matrix multiplication: C = A @ B.
    ///
    /// - `a`: row-major data of shape [m, k]
    /// - `b`: row-major data of shape [k, n]
    /// - Returns: row-major data of shape [m, n]
    fn matmul(&self, a: &[f32], b: &[f32], m: usize, k: usize, n: usize) -> Result<Vec<f32>>;

    /// Element-wise addition: result[i] = a[i] + b[i].
    fn add(&self, a: &[f32], b: &[f32]) -> Result<Vec<f32>>;

    /// Scalar multiplication: result[i] = a[i] * s.
    fn scale(&self, a: &[f32], s: f32) -> Result<Vec<f32>>;

    /// Softmax over consecutive chunks of `n` elements.
    ///
    /// For each chunk: result[i] = exp(x[i] - max(x)) / sum(exp(x[j] - max(x)))
    fn softmax(&self, x: &[f32], n: usize) -> Result<Vec<f32>>;

    /// Replace elements selected by `mask` with `value`.
    ///
    /// `mask` is repeated over consecutive chunks of `mask.len()` elements, so
    /// a `[q, k]` mask applies to every `[.., q, k]` slab of `x`.
    fn masked_fill(&self, x: &[f32], mask: &[bool], value: f32) -> Result<Vec<f32>>;
}
