//! Scaled dot-product attention over `[batch, heads, seq, head_dim]` tensors.
//!
//! Scores are always multiplied by `1 / sqrt(head_dim)` and the backend's
//! softmax subtracts the row maximum, so long cached sequences do not
//! overflow. There is no runtime guard beyond that.

use kv_tensor::{ComputeBackend, Tensor};

use crate::error::{AttentionError, Result};
use crate::mask::AttentionMask;

/// Normalised attention probabilities `softmax(q @ k^T / sqrt(d))`,
/// shape `[B, H, q_len, kv_len]`.
///
/// Masked positions are filled with `-inf` before the softmax and so come
/// out as exactly zero.
pub fn attention_weights(
    q: &Tensor,
    k: &Tensor,
    mask: AttentionMask,
    backend: &dyn ComputeBackend,
) -> Result<Tensor> {
    let (batch, heads, q_len, head_dim) = q.shape().dims4()?;
    let (kb, kh, kv_len, kd) = k.shape().dims4()?;
    if kb != batch || kh != heads || kd != head_dim {
        return Err(AttentionError::shape(
            "attention keys",
            &[batch, heads, kv_len, head_dim],
            k.dims(),
        ));
    }
    if head_dim == 0 {
        return Err(AttentionError::shape(
            "attention queries (empty head dimension)",
            &[batch, heads, q_len, 1],
            q.dims(),
        ));
    }
    if kv_len == 0 {
        return Err(AttentionError::shape(
            "attention keys (no positions to attend to)",
            &[batch, heads, 1, head_dim],
            k.dims(),
        ));
    }
    if mask == AttentionMask::Causal && q_len != kv_len {
        return Err(AttentionError::shape(
            "causal attention scores",
            &[q_len, q_len],
            &[q_len, kv_len],
        ));
    }

    let scale = 1.0 / (head_dim as f32).sqrt();
    let scores = q
        .matmul(&k.transpose(2, 3)?, backend)?
        .scale(scale, backend)?;

    let scores = match mask {
        AttentionMask::None => scores,
        AttentionMask::Causal => scores.masked_fill(
            &mask.disallowed(q_len, kv_len),
            f32::NEG_INFINITY,
            backend,
        )?,
    };

    Ok(scores.softmax(3, backend)?)
}

/// `softmax(q @ k^T / sqrt(d)) @ v`, shape `[B, H, q_len, head_dim]`.
pub fn scaled_dot_product_attention(
    q: &Tensor,
    k: &Tensor,
    v: &Tensor,
    mask: AttentionMask,
    backend: &dyn ComputeBackend,
) -> Result<Tensor> {
    let (kb, kh, kv_len, kd) = k.shape().dims4()?;
    let (vb, vh, v_len, vd) = v.shape().dims4()?;
    if vb != kb || vh != kh || v_len != kv_len || vd != kd {
        return Err(AttentionError::shape(
            "attention values",
            &[kb, kh, kv_len, kd],
            v.dims(),
        ));
    }

    let weights = attention_weights(q, k, mask, backend)?;
    Ok(weights.matmul(v, backend)?)
}
