//! Head split/merge bookkeeping.
//!
//! Head `h` always owns the contiguous embedding slice `[h * head_dim, (h + 1) * head_dim)`.
//! `merge_heads` is the exact inverse of `split_heads`.

use kv_tensor::{Shape, Tensor};

use crate::error::{AttentionError, Result};

/// `[B, S, E]` -> `[B, H, S, E / H]`.
pub fn split_heads(x: &Tensor, num_heads: usize) -> Result<Tensor> {
    let (batch, seq, embed) = x.shape().dims3()?;
    if num_heads == 0 || embed % num_heads != 0 {
        return Err(AttentionError::shape(
            format!(
                "split_heads: embedding width must be a non-zero multiple of {} heads",
                num_heads
            ),
            &[batch, seq, embed.next_multiple_of(num_heads.max(1))],
            x.dims(),
        ));
    }
    let head_dim = embed / num_heads;
    let grouped = x.reshape(Shape::new(vec![batch, seq, num_heads, head_dim]))?;
    Ok(grouped.transpose(1, 2)?)
}

/// `[B, H, S, D]` -> `[B, S, H * D]`.
pub fn merge_heads(x: &Tensor) -> Result<Tensor> {
    let (batch, heads, seq, head_dim) = x.shape().dims4()?;
    let seq_major = x.transpose(1, 2)?;
    Ok(seq_major.reshape(Shape::new(vec![batch, seq, heads * head_dim]))?)
}
