use crate::error::{AttentionError, Result};

/// Which key positions each query may attend to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttentionMask {
    /// Every query sees every key.
    None,
    /// Query `i` sees keys `0..=i`. Only defined for square score matrices.
    Causal,
}

impl AttentionMask {
    /// Pick the mask for `q_len` new queries over `kv_len` keys.
    ///
    /// Causal attention is well defined in two cases: prompt ingestion into an
    /// empty cache (`q_len == kv_len`, lower-triangular mask) and single-token
    /// decode (`q_len == 1`, every cached key is in the past). Chunked prefill
    /// on top of an existing cache is rejected rather than guessed at.
    pub fn resolve(causal: bool, q_len: usize, kv_len: usize) -> Result<Self> {
        if !causal {
            return Ok(AttentionMask::None);
        }
        if q_len == kv_len {
            return Ok(AttentionMask::Causal);
        }
        if q_len == 1 {
            return Ok(AttentionMask::None);
        }
        Err(AttentionError::shape(
            format!(
                "causal mask for {} queries over {} keys (only prompt or single-token steps)",
                q_len, kv_len
            ),
            &[q_len, q_len],
            &[q_len, kv_len],
        ))
    }

    /// Row-major `[q_len, kv_len]` mask, `true` where attention is disallowed.
    pub fn disallowed(&self, q_len: usize, kv_len: usize) -> Vec<bool> {
        match self {
            AttentionMask::None => vec![false; q_len * kv_len],
            AttentionMask::Causal => (0..q_len)
                .flat_map(|i| (0..kv_len).map(move |j| j > i))
                .collect(),
        }
    }
}
