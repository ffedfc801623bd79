use crate::backend::ComputeBackend;
use crate::error::{Result, TensorError};

/// Pure-Rust CPU compute backend.
///
/// Implements all operations with straightforward loops optimized for
/// correctness rather than peak performance. Intended as a reference
/// implementation and fallback.
#[derive(Debug, Clone)]
pub struct CpuBackend;

impl CpuBackend {
    pub fn new() -> Self {
        CpuBackend
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ComputeBackend for CpuBackend {
    fn name(&self) -> &str {
        "cpu"
    }

    fn matmul(&self, a: &[f32], b: &[f32], m: usize, k: usize, n: usize) -> Result<Vec<f32>> {
        if a.len() != m * k {
            return Err(TensorError::Other(format!(
                "matmul: a.len()={} but expected m*k={}",
                a.len(),
                m * k
            )));
        }
        if b.len() != k * n {
            return Err(TensorError::Other(format!(
                "matmul: b.len()={} but expected k*n={}",
                b.len(),
                k * n
            )));
        }

        let mut c = vec![0.0f32; m * n];
        for i in 0..m {
            for p in 0..k {
                let a_ip = a[i * k + p];
                let b_row = &b[p * n..(p + 1) * n];
                let c_row = &mut c[i * n..(i + 1) * n];
                for (c_ij, b_pj) in c_row.iter_mut().zip(b_row) {
                    *c_ij += a_ip * b_pj;
                }
            }
        }
        Ok(c)
    }

    fn add(&self, a: &[f32], b: &[f32]) -> Result<Vec<f32>> {
        if a.len() != b.len() {
            return Err(TensorError::ShapeMismatch {
                expected: vec![a.len()],
                got: vec![b.len()],
            });
        }
        Ok(a.iter().zip(b.iter()).map(|(x, y)| x + y).collect())
    }

    fn scale(&self, a: &[f32], s: f32) -> Result<Vec<f32>> {
        Ok(a.iter().map(|x| x * s).collect())
    }

    fn softmax(&self, x: &[f32], n: usize) -> Result<Vec<f32>> {
        if n == 0 {
            return Err(TensorError::Other("softmax: n must be > 0".to_string()));
        }
        if x.len() % n != 0 {
            return Err(TensorError::Other(format!(
                "softmax: x.len()={} is not a multiple of n={}",
                x.len(),
                n
            )));
        }

        let mut result = vec![0.0f32; x.len()];

        for (chunk, out) in x.chunks_exact(n).zip(result.chunks_exact_mut(n)) {
            // Subtract the max so exp never overflows.
            let max_val = chunk.iter().copied().fold(f32::NEG_INFINITY, f32::max);

            let mut sum = 0.0f32;
            for (o, &v) in out.iter_mut().zip(chunk) {
                let e = (v - max_val).exp();
                *o = e;
                sum += e;
            }

            for o in out.iter_mut() {
                *o /= sum;
            }
        }

        Ok(result)
    }

    fn masked_fill(&self, x: &[f32], mask: &[bool], value: f32) -> Result<Vec<f32>> {
        if mask.is_empty() {
            if x.is_empty() {
                return Ok(Vec::new());
            }
            return Err(TensorError::Other(
                "masked_fill: mask must not be empty".to_string(),
            ));
        }
        if x.len() % mask.len() != 0 {
            return Err(TensorError::ShapeMismatch {
                expected: vec![mask.len()],
                got: vec![x.len()],
            });
        }

        let mut result = x.to_vec();
        for chunk in result.chunks_exact_mut(mask.len()) {
            for (v, &masked) in chunk.iter_mut().zip(mask) {
                if masked {
                    *v = value;
                }
            }
        }
        Ok(result)
    }
}
