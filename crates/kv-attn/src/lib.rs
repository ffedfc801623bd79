//! `kv-attn` - Incremental multi-head attention with a key/value cache.
//!
//! During autoregressive decoding every step only projects the new tokens;
//! keys and values of earlier tokens are kept in an append-only
//! [`AttentionCache`] and reused. [`MultiHeadAttention::step`] is the
//! incremental entry point, [`MultiHeadAttention::forward`] the non-cached
//! reference it must agree with.
//!
//! All numeric kernels are delegated to a [`kv_tensor::ComputeBackend`].

pub mod attention;
pub mod cache;
pub mod config;
pub mod error;
pub mod heads;
pub mod linear;
pub mod mask;
pub mod mha;

pub use attention::{attention_weights, scaled_dot_product_attention};
pub use cache::{AttentionCache, LayerCaches};
pub use config::AttentionConfig;
pub use error::{AttentionError, Result};
pub use heads::{merge_heads, split_heads};
pub use linear::{Linear, Projection};
pub use mask::AttentionMask;
pub use mha::MultiHeadAttention;
