use half::f16;

use crate::backend::ComputeBackend;
use crate::error::{Result, TensorError};
use crate::shape::Shape;

/// A dense f32 tensor.
///
/// Holds contiguous, row-major data with an associated shape. Layout
/// operations (reshape, transpose, cat, narrow) are done here; operations
/// that require arithmetic are dispatched to a `ComputeBackend`.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    data: Vec<f32>,
    shape: Shape,
}

impl Tensor {
    /// Create a new tensor from f32 data and a shape.
    ///
    /// # Panics
    /// Panics if `data.len() != shape.numel()`.
    pub fn new(data: Vec<f32>, shape: Shape) -> Self {
        assert_eq!(
            data.len(),
            shape.numel(),
            "data length {} does not match shape {:?} (numel={})",
            data.len(),
            shape,
            shape.numel()
        );
        Tensor { data, shape }
    }

    /// Create a new tensor, returning an error instead of panicking when the
    /// data length does not match the shape.
    pub fn try_new(data: Vec<f32>, shape: Shape) -> Result<Self> {
        if data.len() != shape.numel() {
            return Err(TensorError::ShapeMismatch {
                expected: shape.dims().to_vec(),
                got: vec![data.len()],
            });
        }
        Ok(Tensor { data, shape })
    }

    /// Create a tensor by widening IEEE half-precision data to f32.
    pub fn from_f16(data: &[f16], shape: Shape) -> Result<Self> {
        Self::try_new(data.iter().map(|v| v.to_f32()).collect(), shape)
    }

    /// Create a zero-filled tensor with the given shape.
    pub fn zeros(shape: Shape) -> Self {
        let n = shape.numel();
        Tensor {
            data: vec![0.0; n],
            shape,
        }
    }

    /// Returns a reference to the tensor's shape.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Shorthand for `self.shape().dims()`.
    pub fn dims(&self) -> &[usize] {
        self.shape.dims()
    }

    /// Returns the underlying data as an f32 slice.
    pub fn data_f32(&self) -> &[f32] {
        &self.data
    }

    /// Reads a single element by multi-dimensional index.
    pub fn get(&self, index: &[usize]) -> Result<f32> {
        if index.len() != self.shape.ndim()
            || index.iter().zip(self.shape.dims()).any(|(&i, &d)| i >= d)
        {
            return Err(TensorError::ShapeMismatch {
                expected: self.shape.dims().to_vec(),
                got: index.to_vec(),
            });
        }
        let offset: usize = index
            .iter()
            .zip(self.shape.strides())
            .map(|(i, s)| i * s)
            .sum();
        Ok(self.data[offset])
    }

    /// Reshape the tensor, returning a new tensor with the same data but
    /// a different shape.
    ///
    /// The total number of elements must remain the same.
    pub fn reshape(&self, new_shape: Shape) -> Result<Tensor> {
        if self.shape.numel() != new_shape.numel() {
            return Err(TensorError::ShapeMismatch {
                expected: self.shape.dims().to_vec(),
                got: new_shape.dims().to_vec(),
            });
        }
        Ok(Tensor {
            data: self.data.clone(),
            shape: new_shape,
        })
    }

    /// Swap two axes. The result is materialised in contiguous row-major order.
    pub fn transpose(&self, a: usize, b: usize) -> Result<Tensor> {
        self.shape.check_axis(a)?;
        self.shape.check_axis(b)?;
        if a == b {
            return Ok(self.clone());
        }
        let mut perm: Vec<usize> = (0..self.shape.ndim()).collect();
        perm.swap(a, b);
        Ok(self.permute(&perm))
    }

    // Output axis `d` reads input axis `perm[d]`.
    fn permute(&self, perm: &[usize]) -> Tensor {
        let ndim = self.shape.ndim();
        let in_strides = self.shape.strides();
        let out_shape = Shape::new(perm.iter().map(|&p| self.shape.dim(p)).collect());
        let numel = out_shape.numel();

        let mut out = Vec::with_capacity(numel);
        let mut idx = vec![0usize; ndim];
        for _ in 0..numel {
            let offset: usize = idx
                .iter()
                .zip(perm)
                .map(|(&i, &p)| i * in_strides[p])
                .sum();
            out.push(self.data[offset]);

            for d in (0..ndim).rev() {
                idx[d] += 1;
                if idx[d] < out_shape.dim(d) {
                    break;
                }
                idx[d] = 0;
            }
        }

        Tensor {
            data: out,
            shape: out_shape,
        }
    }

    /// Concatenate tensors along `axis`. All other dimensions must agree.
    pub fn cat(tensors: &[&Tensor], axis: usize) -> Result<Tensor> {
        let first = tensors
            .first()
            .ok_or_else(|| TensorError::Other("cat: no tensors given".to_string()))?;
        first.shape.check_axis(axis)?;

        let mut axis_len = 0;
        for t in tensors {
            let same_rank = t.shape.ndim() == first.shape.ndim();
            let others_agree = same_rank
                && t.shape
                    .dims()
                    .iter()
                    .zip(first.shape.dims())
                    .enumerate()
                    .all(|(i, (a, b))| i == axis || a == b);
            if !others_agree {
                return Err(TensorError::ShapeMismatch {
                    expected: first.shape.dims().to_vec(),
                    got: t.shape.dims().to_vec(),
                });
            }
            axis_len += t.shape.dim(axis);
        }

        let out_shape = first.shape.with_dim(axis, axis_len)?;
        let outer: usize = first.shape.dims()[..axis].iter().product();
        let inner: usize = first.shape.dims()[axis + 1..].iter().product();

        let mut out = Vec::with_capacity(out_shape.numel());
        for o in 0..outer {
            for t in tensors {
                let block = t.shape.dim(axis) * inner;
                out.extend_from_slice(&t.data[o * block..(o + 1) * block]);
            }
        }

        Ok(Tensor {
            data: out,
            shape: out_shape,
        })
    }

    /// Select `len` entries starting at `start` along `axis`.
    pub fn narrow(&self, axis: usize, start: usize, len: usize) -> Result<Tensor> {
        self.shape.check_axis(axis)?;
        let axis_len = self.shape.dim(axis);
        match start.checked_add(len) {
            Some(end) if end <= axis_len => {}
            _ => {
                return Err(TensorError::Other(format!(
                    "narrow: range {}+{} out of bounds for axis {} of size {}",
                    start, len, axis, axis_len
                )))
            }
        }

        let out_shape = self.shape.with_dim(axis, len)?;
        let outer: usize = self.shape.dims()[..axis].iter().product();
        let inner: usize = self.shape.dims()[axis + 1..].iter().product();

        let mut out = Vec::with_capacity(out_shape.numel());
        for o in 0..outer {
            let base = o * axis_len * inner + start * inner;
            out.extend_from_slice(&self.data[base..base + len * inner]);
        }

        Ok(Tensor {
            data: out,
            shape: out_shape,
        })
    }

    /// Batched matrix multiplication using the given backend.
    ///
    /// Both operands must have the same rank (at least 2) and identical
    /// leading dimensions. The trailing two dimensions multiply as
    /// `[m, k] @ [k, n]`, giving `[.., m, n]`.
    pub fn matmul(&self, other: &Tensor, backend: &dyn ComputeBackend) -> Result<Tensor> {
        let ndim = self.shape.ndim();
        if ndim < 2 || other.shape.ndim() != ndim {
            return Err(TensorError::Other(format!(
                "matmul requires operands of equal rank >= 2, got {} and {}",
                self.shape, other.shape
            )));
        }

        let batch_dims = &self.shape.dims()[..ndim - 2];
        if batch_dims != &other.shape.dims()[..ndim - 2] {
            return Err(TensorError::ShapeMismatch {
                expected: self.shape.dims().to_vec(),
                got: other.shape.dims().to_vec(),
            });
        }

        let m = self.shape.dim(ndim - 2);
        let k = self.shape.dim(ndim - 1);
        let k2 = other.shape.dim(ndim - 2);
        let n = other.shape.dim(ndim - 1);
        if k != k2 {
            return Err(TensorError::MatmulMismatch { m, k, k2, n });
        }

        let batch: usize = batch_dims.iter().product();
        let mut out = Vec::with_capacity(batch * m * n);
        for bi in 0..batch {
            let a = &self.data[bi * m * k..(bi + 1) * m * k];
            let b = &other.data[bi * k * n..(bi + 1) * k * n];
            out.extend(backend.matmul(a, b, m, k, n)?);
        }

        let mut out_dims = batch_dims.to_vec();
        out_dims.extend([m, n]);
        Ok(Tensor::new(out, Shape::new(out_dims)))
    }

    /// Element-wise addition with numpy-style broadcasting.
    pub fn broadcast_add(&self, other: &Tensor, backend: &dyn ComputeBackend) -> Result<Tensor> {
        let out_shape = Shape::broadcast_shape(&self.shape, &other.shape)?;
        let lhs = self.broadcast_to(&out_shape);
        let rhs = other.broadcast_to(&out_shape);
        let data = backend.add(&lhs, &rhs)?;
        Ok(Tensor::new(data, out_shape))
    }

    // `target` must be a valid broadcast of `self.shape`.
    fn broadcast_to(&self, target: &Shape) -> Vec<f32> {
        if &self.shape == target {
            return self.data.clone();
        }

        let ndim = target.ndim();
        let pad = ndim - self.shape.ndim();
        let src_strides = self.shape.strides();
        // Broadcast axes read with stride 0.
        let strides: Vec<usize> = (0..ndim)
            .map(|d| {
                if d < pad || self.shape.dim(d - pad) == 1 {
                    0
                } else {
                    src_strides[d - pad]
                }
            })
            .collect();

        let numel = target.numel();
        let mut out = Vec::with_capacity(numel);
        let mut idx = vec![0usize; ndim];
        for _ in 0..numel {
            let offset: usize = idx.iter().zip(&strides).map(|(i, s)| i * s).sum();
            out.push(self.data[offset]);
            for d in (0..ndim).rev() {
                idx[d] += 1;
                if idx[d] < target.dim(d) {
                    break;
                }
                idx[d] = 0;
            }
        }
        out
    }

    /// Multiply every element by `s`.
    pub fn scale(&self, s: f32, backend: &dyn ComputeBackend) -> Result<Tensor> {
        let data = backend.scale(&self.data, s)?;
        Ok(Tensor::new(data, self.shape.clone()))
    }

    /// Softmax along `axis`.
    pub fn softmax(&self, axis: usize, backend: &dyn ComputeBackend) -> Result<Tensor> {
        self.shape.check_axis(axis)?;
        let last = self.shape.ndim() - 1;
        if axis != last {
            return self
                .transpose(axis, last)?
                .softmax(last, backend)?
                .transpose(axis, last);
        }
        if self.data.is_empty() {
            return Ok(self.clone());
        }
        let data = backend.softmax(&self.data, self.shape.dim(last))?;
        Ok(Tensor::new(data, self.shape.clone()))
    }

    /// Replace elements with `value` where `mask` is true.
    ///
    /// `mask` is laid out over the trailing two dimensions (row-major) and
    /// is applied identically to every leading index.
    pub fn masked_fill(
        &self,
        mask: &[bool],
        value: f32,
        backend: &dyn ComputeBackend,
    ) -> Result<Tensor> {
        let ndim = self.shape.ndim();
        if ndim < 2 {
            return Err(TensorError::RankMismatch {
                expected: 2,
                got: self.shape.dims().to_vec(),
            });
        }
        let rows = self.shape.dim(ndim - 2);
        let cols = self.shape.dim(ndim - 1);
        if mask.len() != rows * cols {
            return Err(TensorError::ShapeMismatch {
                expected: vec![rows, cols],
                got: vec![mask.len()],
            });
        }
        let data = backend.masked_fill(&self.data, mask, value)?;
        Ok(Tensor::new(data, self.shape.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::CpuBackend;

    fn arange(shape: &[usize]) -> Tensor {
        let n: usize = shape.iter().product();
        Tensor::new((0..n).map(|i| i as f32).collect(), Shape::from_slice(shape))
    }

    #[test]
    fn test_new_and_get() {
        let t = arange(&[2, 3]);
        assert_eq!(t.dims(), &[2, 3]);
        assert_eq!(t.get(&[1, 2]).unwrap(), 5.0);
        assert!(t.get(&[2, 0]).is_err());
    }

    #[test]
    #[should_panic]
    fn test_new_shape_mismatch_panics() {
        let _t = Tensor::new(vec![1.0, 2.0], Shape::new(vec![3]));
    }

    #[test]
    fn test_try_new_mismatch() {
        assert!(Tensor::try_new(vec![1.0, 2.0], Shape::new(vec![3])).is_err());
    }

    #[test]
    fn test_from_f16() {
        let data = [f16::from_f32(0.5), f16::from_f32(-2.0)];
        let t = Tensor::from_f16(&data, Shape::new(vec![2])).unwrap();
        assert_eq!(t.data_f32(), &[0.5, -2.0]);
    }

    #[test]
    fn test_reshape() {
        let t = arange(&[2, 3]);
        let r = t.reshape(Shape::new(vec![3, 2])).unwrap();
        assert_eq!(r.dims(), &[3, 2]);
        assert_eq!(r.data_f32(), t.data_f32());
        assert!(t.reshape(Shape::new(vec![4])).is_err());
    }

    #[test]
    fn test_transpose_middle_axes() {
        // [1, 2, 3, 1] -> [1, 3, 2, 1]
        let t = arange(&[1, 2, 3, 1]);
        let r = t.transpose(1, 2).unwrap();
        assert_eq!(r.dims(), &[1, 3, 2, 1]);
        assert_eq!(r.data_f32(), &[0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
        assert_eq!(r.transpose(1, 2).unwrap(), t);
    }

    #[test]
    fn test_transpose_invalid_axis() {
        assert!(arange(&[2, 2]).transpose(0, 2).is_err());
    }

    #[test]
    fn test_cat_middle_axis() {
        let a = arange(&[2, 1, 2]);
        let b = Tensor::new(vec![9.0; 4], Shape::new(vec![2, 1, 2]));
        let c = Tensor::cat(&[&a, &b], 1).unwrap();
        assert_eq!(c.dims(), &[2, 2, 2]);
        assert_eq!(
            c.data_f32(),
            &[0.0, 1.0, 9.0, 9.0, 2.0, 3.0, 9.0, 9.0]
        );
    }

    #[test]
    fn test_cat_onto_empty() {
        let empty = Tensor::zeros(Shape::new(vec![1, 2, 0, 2]));
        let x = arange(&[1, 2, 1, 2]);
        let c = Tensor::cat(&[&empty, &x], 2).unwrap();
        assert_eq!(c, x);
    }

    #[test]
    fn test_cat_rejects_mismatched_dims() {
        let a = arange(&[1, 2, 1, 2]);
        let b = arange(&[1, 3, 1, 2]);
        assert!(Tensor::cat(&[&a, &b], 2).is_err());
        assert!(Tensor::cat(&[], 0).is_err());
    }

    #[test]
    fn test_narrow() {
        let t = arange(&[2, 3, 2]);
        let r = t.narrow(1, 1, 2).unwrap();
        assert_eq!(r.dims(), &[2, 2, 2]);
        assert_eq!(
            r.data_f32(),
            &[2.0, 3.0, 4.0, 5.0, 8.0, 9.0, 10.0, 11.0]
        );
        assert!(t.narrow(1, 2, 2).is_err());
        assert!(t.narrow(1, usize::MAX, 2).is_err());
    }

    #[test]
    fn test_matmul_2d() {
        let backend = CpuBackend::new();
        let a = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], Shape::new(vec![2, 2]));
        let b = Tensor::new(vec![5.0, 6.0, 7.0, 8.0], Shape::new(vec![2, 2]));
        let c = a.matmul(&b, &backend).unwrap();
        assert_eq!(c.dims(), &[2, 2]);
        assert_eq!(c.data_f32(), &[19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_matmul_batched() {
        let backend = CpuBackend::new();
        // Two independent [1, 2] @ [2, 1] products.
        let a = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], Shape::new(vec![2, 1, 2]));
        let b = Tensor::new(vec![1.0, 1.0, 2.0, 0.0], Shape::new(vec![2, 2, 1]));
        let c = a.matmul(&b, &backend).unwrap();
        assert_eq!(c.dims(), &[2, 1, 1]);
        assert_eq!(c.data_f32(), &[3.0, 6.0]);
    }

    #[test]
    fn test_matmul_dimension_mismatch() {
        let backend = CpuBackend::new();
        let a = Tensor::new(vec![1.0, 2.0, 3.0], Shape::new(vec![1, 3]));
        let b = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], Shape::new(vec![2, 2]));
        assert!(matches!(
            a.matmul(&b, &backend),
            Err(TensorError::MatmulMismatch { .. })
        ));
        let c = arange(&[2, 2, 2]);
        let d = arange(&[3, 2, 2]);
        assert!(c.matmul(&d, &backend).is_err());
    }

    #[test]
    fn test_broadcast_add_bias() {
        let backend = CpuBackend::new();
        let x = arange(&[2, 2]);
        let bias = Tensor::new(vec![10.0, 20.0], Shape::new(vec![2]));
        let y = x.broadcast_add(&bias, &backend).unwrap();
        assert_eq!(y.data_f32(), &[10.0, 21.0, 12.0, 23.0]);
    }

    #[test]
    fn test_softmax_non_last_axis() {
        let backend = CpuBackend::new();
        let t = Tensor::new(vec![0.0, 5.0, 0.0, 5.0], Shape::new(vec![2, 2]));
        let s = t.softmax(0, &backend).unwrap();
        for v in s.data_f32() {
            assert!((v - 0.5).abs() < 1e-6);
        }
    }

    #[test]
    fn test_masked_fill_trailing_dims() {
        let backend = CpuBackend::new();
        let t = Tensor::zeros(Shape::new(vec![2, 2, 2]));
        let r = t.masked_fill(&[false, true, false, false], -1.0, &backend).unwrap();
        assert_eq!(
            r.data_f32(),
            &[0.0, -1.0, 0.0, 0.0, 0.0, -1.0, 0.0, 0.0]
        );
        assert!(t.masked_fill(&[true], 0.0, &backend).is_err());
    }
}
