use kv_tensor::{ComputeBackend, Tensor};

use crate::attention::scaled_dot_product_attention;
use crate::cache::AttentionCache;
use crate::config::AttentionConfig;
use crate::error::{AttentionError, Result};
use crate::heads::{merge_heads, split_heads};
use crate::linear::{Linear, Projection};
use crate::mask::AttentionMask;

/// Multi-head self-attention with incremental decoding support.
///
/// Holds the four `embed_dim -> embed_dim` projections. The module itself is
/// stateless across steps: the decoding loop owns an [`AttentionCache`] and
/// lends it to [`step`](Self::step) once per decoding step.
#[derive(Debug)]
pub struct MultiHeadAttention {
    config: AttentionConfig,
    wq: Box<dyn Projection>,
    wk: Box<dyn Projection>,
    wv: Box<dyn Projection>,
    wo: Box<dyn Projection>,
}

impl MultiHeadAttention {
    /// Assemble an attention layer from externally owned projections.
    ///
    /// Every projection must map `embed_dim -> embed_dim`.
    pub fn new(
        config: AttentionConfig,
        wq: Box<dyn Projection>,
        wk: Box<dyn Projection>,
        wv: Box<dyn Projection>,
        wo: Box<dyn Projection>,
    ) -> Result<Self> {
        config.validate()?;
        let e = config.embed_dim;
        for (name, p) in [("query", &wq), ("key", &wk), ("value", &wv), ("output", &wo)] {
            if p.in_dim() != e || p.out_dim() != e {
                return Err(AttentionError::shape(
                    format!("{} projection", name),
                    &[e, e],
                    &[p.out_dim(), p.in_dim()],
                ));
            }
        }

        log::debug!(
            "multi-head attention: embed_dim={} num_heads={} head_dim={} batch_size={}",
            e,
            config.num_heads,
            config.head_dim(),
            config.batch_size
        );

        Ok(MultiHeadAttention {
            config,
            wq,
            wk,
            wv,
            wo,
        })
    }

    /// Attention with every projection set to the identity (q = k = v = x).
    pub fn identity(config: AttentionConfig) -> Result<Self> {
        let e = config.embed_dim;
        Self::new(
            config,
            Box::new(Linear::identity(e)?),
            Box::new(Linear::identity(e)?),
            Box::new(Linear::identity(e)?),
            Box::new(Linear::identity(e)?),
        )
    }

    /// Randomly initialised projections, reproducible from `seed`.
    ///
    /// The query, key, value and output projections use `seed`, `seed + 1`,
    /// `seed + 2` and `seed + 3`.
    pub fn seeded(config: AttentionConfig, seed: u64) -> Result<Self> {
        config.validate()?;
        let e = config.embed_dim;
        let proj = |offset: u64| -> Result<Box<dyn Projection>> {
            Ok(Box::new(Linear::seeded(
                e,
                e,
                config.bias,
                seed.wrapping_add(offset),
            )?))
        };
        let (wq, wk, wv, wo) = (proj(0)?, proj(1)?, proj(2)?, proj(3)?);
        Self::new(config, wq, wk, wv, wo)
    }

    pub fn config(&self) -> &AttentionConfig {
        &self.config
    }

    /// An empty cache matching this layer's dimensions.
    pub fn new_cache(&self) -> Result<AttentionCache> {
        AttentionCache::from_config(&self.config)
    }

    /// Run one decoding step.
    ///
    /// `x` holds the embeddings of the new tokens, `[batch_size, s_new, embed_dim]`:
    /// the whole prompt on the first step, one token per step afterwards.
    /// Only the new tokens are projected; their keys and values are appended
    /// to `cache` and the new queries attend over everything cached, their
    /// own positions included. Returns `[batch_size, s_new, embed_dim]`.
    ///
    /// With `causal` set, a multi-token step is only accepted on an empty
    /// cache. All validation happens before the cache is touched, so on
    /// error the cache is exactly as it was.
    pub fn step(
        &self,
        cache: &mut AttentionCache,
        x: &Tensor,
        causal: bool,
        backend: &dyn ComputeBackend,
    ) -> Result<Tensor> {
        self.check_cache(cache)?;
        let (batch, s_new) = self.check_input(x)?;
        if batch != cache.batch_size() {
            return Err(AttentionError::shape(
                "step input batch",
                &[cache.batch_size(), s_new, self.config.embed_dim],
                x.dims(),
            ));
        }

        let kv_len = cache.len() + s_new;
        let mask = AttentionMask::resolve(causal, s_new, kv_len)?;
        let (q, k, v) = self.project_heads(x, backend)?;

        let (keys, values) = cache.append(&k, &v)?;
        log::trace!(
            "attention step on {}: s_new={} kv_len={} mask={:?}",
            backend.name(),
            s_new,
            kv_len,
            mask
        );

        let attended = scaled_dot_product_attention(&q, &keys, &values, mask, backend)?;
        self.wo.forward(&merge_heads(&attended)?, backend)
    }

    /// Full self-attention over `x` without a cache.
    ///
    /// Recomputes every projection from scratch; row `t` of the causal
    /// output equals what [`step`](Self::step) produces for token `t` when
    /// tokens are fed one at a time.
    pub fn forward(&self, x: &Tensor, causal: bool, backend: &dyn ComputeBackend) -> Result<Tensor> {
        let (_, seq) = self.check_input(x)?;
        let mask = AttentionMask::resolve(causal, seq, seq)?;
        let (q, k, v) = self.project_heads(x, backend)?;
        let attended = scaled_dot_product_attention(&q, &k, &v, mask, backend)?;
        self.wo.forward(&merge_heads(&attended)?, backend)
    }

    // Returns (batch, seq).
    fn check_input(&self, x: &Tensor) -> Result<(usize, usize)> {
        let e = self.config.embed_dim;
        let (batch, seq, embed) = x.shape().dims3().map_err(|_| {
            AttentionError::shape("attention input", &[self.config.batch_size, 1, e], x.dims())
        })?;
        if embed != e || seq == 0 || batch == 0 {
            return Err(AttentionError::shape(
                "attention input",
                &[batch.max(1), seq.max(1), e],
                x.dims(),
            ));
        }
        Ok((batch, seq))
    }

    fn check_cache(&self, cache: &AttentionCache) -> Result<()> {
        let expected = [
            self.config.batch_size,
            self.config.num_heads,
            self.config.head_dim(),
        ];
        let got = [cache.batch_size(), cache.num_heads(), cache.head_dim()];
        if expected != got {
            return Err(AttentionError::shape("attention cache", &expected, &got));
        }
        Ok(())
    }

    // Project x and split into [B, H, S, D] query, key and value.
    fn project_heads(
        &self,
        x: &Tensor,
        backend: &dyn ComputeBackend,
    ) -> Result<(Tensor, Tensor, Tensor)> {
        let h = self.config.num_heads;
        let q = split_heads(&self.wq.forward(x, backend)?, h)?;
        let k = split_heads(&self.wk.forward(x, backend)?, h)?;
        let v = split_heads(&self.wv.forward(x, backend)?, h)?;
        Ok((q, k, v))
    }
}
