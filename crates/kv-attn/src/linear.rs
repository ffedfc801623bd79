use std::fmt::Debug;

use half::f16;
use kv_tensor::{ComputeBackend, Shape, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{AttentionError, Result};

/// A learned map applied to the last axis of its input.
///
/// Projections are owned by the surrounding model and only read during a
/// step, so `forward` takes `&self`.
pub trait Projection: Send + Sync + Debug {
    /// Width of the last input axis.
    fn in_dim(&self) -> usize;

    /// Width of the last output axis.
    fn out_dim(&self) -> usize;

    /// Map `[.., in_dim]` to `[.., out_dim]`.
    fn forward(&self, x: &Tensor, backend: &dyn ComputeBackend) -> Result<Tensor>;
}

/// Affine projection `y = x @ W^T + b`.
///
/// The weight is stored as `[out_dim, in_dim]` row-major, the same layout
/// GGUF and PyTorch checkpoints use.
#[derive(Debug, Clone)]
pub struct Linear {
    weight: Tensor,
    // [in_dim, out_dim], kept so forward is a plain matmul.
    weight_t: Tensor,
    bias: Option<Tensor>,
}

impl Linear {
    /// Create a projection from a `[out_dim, in_dim]` weight and optional
    /// `[out_dim]` bias.
    pub fn new(weight: Tensor, bias: Option<Tensor>) -> Result<Self> {
        let dims = weight.dims();
        if dims.len() != 2 {
            return Err(AttentionError::shape("linear weight", &[0, 0], dims));
        }
        let (out_dim, in_dim) = (dims[0], dims[1]);
        if in_dim == 0 || out_dim == 0 {
            return Err(AttentionError::InvalidConfiguration(format!(
                "linear dimensions must be non-zero, got {}x{}",
                out_dim, in_dim
            )));
        }
        if let Some(b) = &bias {
            if b.dims() != [out_dim] {
                return Err(AttentionError::shape("linear bias", &[out_dim], b.dims()));
            }
        }
        let weight_t = weight.transpose(0, 1)?;
        Ok(Linear {
            weight,
            weight_t,
            bias,
        })
    }

    /// The identity map on `dim` features.
    pub fn identity(dim: usize) -> Result<Self> {
        let mut data = vec![0.0f32; dim * dim];
        for i in 0..dim {
            data[i * dim + i] = 1.0;
        }
        Self::new(Tensor::new(data, Shape::new(vec![dim, dim])), None)
    }

    /// Build a projection from half-precision checkpoint data.
    pub fn from_f16(
        weight: &[f16],
        bias: Option<&[f16]>,
        in_dim: usize,
        out_dim: usize,
    ) -> Result<Self> {
        let weight = Tensor::from_f16(weight, Shape::new(vec![out_dim, in_dim]))?;
        let bias = bias
            .map(|b| Tensor::from_f16(b, Shape::new(vec![out_dim])))
            .transpose()?;
        Self::new(weight, bias)
    }

    /// Randomly initialised projection, reproducible from `seed`.
    ///
    /// Weights and bias are drawn from `U(-1/sqrt(in_dim), 1/sqrt(in_dim))`.
    pub fn seeded(in_dim: usize, out_dim: usize, bias: bool, seed: u64) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(seed);
        let bound = 1.0 / (in_dim as f32).sqrt();

        let weight: Vec<f32> = (0..out_dim * in_dim)
            .map(|_| rng.gen_range(-bound..bound))
            .collect();
        let weight = Tensor::new(weight, Shape::new(vec![out_dim, in_dim]));

        let bias = if bias {
            let b: Vec<f32> = (0..out_dim).map(|_| rng.gen_range(-bound..bound)).collect();
            Some(Tensor::new(b, Shape::new(vec![out_dim])))
        } else {
            None
        };

        Self::new(weight, bias)
    }

    /// The `[out_dim, in_dim]` weight.
    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    pub fn bias(&self) -> Option<&Tensor> {
        self.bias.as_ref()
    }
}

impl Projection for Linear {
    fn in_dim(&self) -> usize {
        self.weight.dims()[1]
    }

    fn out_dim(&self) -> usize {
        self.weight.dims()[0]
    }

    fn forward(&self, x: &Tensor, backend: &dyn ComputeBackend) -> Result<Tensor> {
        let dims = x.dims();
        let in_dim = self.in_dim();
        if dims.last() != Some(&in_dim) {
            let mut expected = dims.to_vec();
            if let Some(last) = expected.last_mut() {
                *last = in_dim;
            }
            return Err(AttentionError::shape("projection input", &expected, dims));
        }

        let rows = x.shape().numel() / in_dim;
        let flat = x.reshape(Shape::new(vec![rows, in_dim]))?;
        let mut y = flat.matmul(&self.weight_t, backend)?;
        if let Some(b) = &self.bias {
            y = y.broadcast_add(b, backend)?;
        }

        let mut out_dims = dims.to_vec();
        if let Some(last) = out_dims.last_mut() {
            *last = self.out_dim();
        }
        Ok(y.reshape(Shape::new(out_dims))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kv_tensor::CpuBackend;

    #[test]
    fn test_identity_is_noop() {
        let backend = CpuBackend::new();
        let x = Tensor::new(vec![1.0, -2.0, 3.0, 0.5], Shape::new(vec![1, 1, 4]));
        let y = Linear::identity(4).unwrap().forward(&x, &backend).unwrap();
        assert_eq!(y, x);
    }

    #[test]
    fn test_weight_layout_is_out_by_in() {
        let backend = CpuBackend::new();
        // W = [[1, 2, 3], [4, 5, 6]]: 3 inputs -> 2 outputs.
        let w = Tensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], Shape::new(vec![2, 3]));
        let b = Tensor::new(vec![0.5, -0.5], Shape::new(vec![2]));
        let lin = Linear::new(w, Some(b)).unwrap();
        assert_eq!((lin.in_dim(), lin.out_dim()), (3, 2));

        let x = Tensor::new(vec![1.0, 0.0, 1.0, 0.0, 1.0, 0.0], Shape::new(vec![1, 2, 3]));
        let y = lin.forward(&x, &backend).unwrap();
        assert_eq!(y.dims(), &[1, 2, 2]);
        assert_eq!(y.data_f32(), &[4.5, 9.5, 2.5, 4.5]);
    }

    #[test]
    fn test_rejects_wrong_input_width() {
        let backend = CpuBackend::new();
        let x = Tensor::zeros(Shape::new(vec![1, 1, 3]));
        let err = Linear::identity(4).unwrap().forward(&x, &backend).unwrap_err();
        assert!(matches!(err, AttentionError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_rejects_bad_bias() {
        let w = Tensor::zeros(Shape::new(vec![2, 3]));
        let b = Tensor::zeros(Shape::new(vec![3]));
        assert!(Linear::new(w, Some(b)).is_err());
    }

    #[test]
    fn test_rejects_zero_dimensions() {
        for dims in [[3, 0], [0, 3]] {
            let w = Tensor::zeros(Shape::new(dims.to_vec()));
            assert!(matches!(
                Linear::new(w, None),
                Err(AttentionError::InvalidConfiguration(_))
            ));
        }
        assert!(Linear::identity(0).is_err());
        assert!(Linear::seeded(0, 4, false, 1).is_err());
        assert!(Linear::from_f16(&[], None, 0, 2).is_err());
    }

    #[test]
    fn test_seeded_is_reproducible() {
        let a = Linear::seeded(4, 4, true, 7).unwrap();
        let b = Linear::seeded(4, 4, true, 7).unwrap();
        let c = Linear::seeded(4, 4, true, 8).unwrap();
        assert_eq!(a.weight(), b.weight());
        assert_eq!(a.bias(), b.bias());
        assert_ne!(a.weight(), c.weight());
        assert!(a.weight().data_f32().iter().all(|w| w.abs() <= 0.5));
    }

    #[test]
    fn test_from_f16() {
        let w: Vec<f16> = [1.0f32, 0.0, 0.0, 1.0].iter().map(|&v| f16::from_f32(v)).collect();
        let lin = Linear::from_f16(&w, None, 2, 2).unwrap();
        assert_eq!(lin.weight(), Linear::identity(2).unwrap().weight());
    }
}
