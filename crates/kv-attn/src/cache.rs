use kv_tensor::{Shape, Tensor};

use crate::config::AttentionConfig;
use crate::error::{AttentionError, Result};

/// Append-only key/value store for one attention layer of one decoding episode.
///
/// Conceptually holds keys and values of shape
/// `[batch_size, num_heads, len, head_dim]`. Each (batch, head) pair is kept
/// in its own row, so appending never moves existing entries and batch
/// elements never share storage.
#[derive(Debug, Clone)]
pub struct AttentionCache {
    batch_size: usize,
    num_heads: usize,
    head_dim: usize,
    /// k[b * num_heads + h] has len * head_dim elements.
    k: Vec<Vec<f32>>,
    /// v[b * num_heads + h] has len * head_dim elements.
    v: Vec<Vec<f32>>,
    len: usize,
}

impl AttentionCache {
    /// Create an empty cache.
    pub fn new(batch_size: usize, num_heads: usize, head_dim: usize) -> Result<Self> {
        Self::with_capacity(batch_size, num_heads, head_dim, 0)
    }

    /// Create an empty cache with room for `capacity` positions before any
    /// reallocation.
    pub fn with_capacity(
        batch_size: usize,
        num_heads: usize,
        head_dim: usize,
        capacity: usize,
    ) -> Result<Self> {
        if batch_size == 0 || num_heads == 0 || head_dim == 0 {
            return Err(AttentionError::InvalidConfiguration(format!(
                "cache dimensions must be non-zero, got batch_size={} num_heads={} head_dim={}",
                batch_size, num_heads, head_dim
            )));
        }
        let rows = batch_size * num_heads;
        let row = || Vec::with_capacity(capacity * head_dim);
        Ok(AttentionCache {
            batch_size,
            num_heads,
            head_dim,
            k: (0..rows).map(|_| row()).collect(),
            v: (0..rows).map(|_| row()).collect(),
            len: 0,
        })
    }

    /// Create an empty cache sized for an attention layer.
    pub fn from_config(config: &AttentionConfig) -> Result<Self> {
        config.validate()?;
        Self::new(config.batch_size, config.num_heads, config.head_dim())
    }

    /// Number of cached positions.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn num_heads(&self) -> usize {
        self.num_heads
    }

    pub fn head_dim(&self) -> usize {
        self.head_dim
    }

    /// `[batch_size, num_heads, len, head_dim]`.
    pub fn shape(&self) -> Shape {
        Shape::new(vec![self.batch_size, self.num_heads, self.len, self.head_dim])
    }

    /// All cached keys, `[batch_size, num_heads, len, head_dim]`.
    pub fn keys(&self) -> Tensor {
        Tensor::new(self.k.concat(), self.shape())
    }

    /// All cached values, `[batch_size, num_heads, len, head_dim]`.
    pub fn values(&self) -> Tensor {
        Tensor::new(self.v.concat(), self.shape())
    }

    /// Keys and values of a single sequence, each `[1, num_heads, len, head_dim]`.
    pub fn view(&self, batch_index: usize) -> Result<(Tensor, Tensor)> {
        if batch_index >= self.batch_size {
            return Err(AttentionError::shape(
                "cache view batch index",
                &[self.batch_size],
                &[batch_index],
            ));
        }
        let rows = batch_index * self.num_heads..(batch_index + 1) * self.num_heads;
        let shape = Shape::new(vec![1, self.num_heads, self.len, self.head_dim]);
        Ok((
            Tensor::new(self.k[rows.clone()].concat(), shape.clone()),
            Tensor::new(self.v[rows].concat(), shape),
        ))
    }

    /// Append keys and values for new positions and return the full cache
    /// contents.
    ///
    /// `k` and `v` must both be `[batch_size, num_heads, s_new, head_dim]`
    /// with `s_new >= 1`. Shapes are checked before anything is written, so
    /// a rejected append leaves the cache unchanged.
    pub fn append(&mut self, k: &Tensor, v: &Tensor) -> Result<(Tensor, Tensor)> {
        let s_new = self.check_append(k, v)?;

        let block = s_new * self.head_dim;
        for (row, (k_row, v_row)) in self.k.iter_mut().zip(self.v.iter_mut()).enumerate() {
            k_row.extend_from_slice(&k.data_f32()[row * block..(row + 1) * block]);
            v_row.extend_from_slice(&v.data_f32()[row * block..(row + 1) * block]);
        }
        self.len += s_new;

        log::debug!(
            "kv cache append: {} new position(s), len={} ({} bytes)",
            s_new,
            self.len,
            self.memory_bytes()
        );

        Ok((self.keys(), self.values()))
    }

    /// Validate a pending append, returning the number of new positions.
    pub fn check_append(&self, k: &Tensor, v: &Tensor) -> Result<usize> {
        let (kb, kh, s_new, kd) = k.shape().dims4()?;
        if kb != self.batch_size || kh != self.num_heads || kd != self.head_dim || s_new == 0 {
            return Err(AttentionError::shape(
                "cache append keys",
                &[self.batch_size, self.num_heads, s_new.max(1), self.head_dim],
                k.dims(),
            ));
        }
        if v.dims() != k.dims() {
            return Err(AttentionError::shape("cache append values", k.dims(), v.dims()));
        }
        Ok(s_new)
    }

    /// Drop all cached positions, keeping the allocation for the next episode.
    pub fn reset(&mut self) {
        for row in self.k.iter_mut().chain(self.v.iter_mut()) {
            row.clear();
        }
        self.len = 0;
        log::debug!("kv cache reset");
    }

    /// Bytes held by cached keys and values.
    pub fn memory_bytes(&self) -> usize {
        2 * self.batch_size * self.num_heads * self.len * self.head_dim * std::mem::size_of::<f32>()
    }
}

/// One [`AttentionCache`] per transformer layer.
#[derive(Debug, Clone)]
pub struct LayerCaches {
    layers: Vec<AttentionCache>,
}

impl LayerCaches {
    /// Create `num_layers` empty caches, all sized by `config`.
    pub fn new(num_layers: usize, config: &AttentionConfig) -> Result<Self> {
        if num_layers == 0 {
            return Err(AttentionError::InvalidConfiguration(
                "num_layers must be greater than zero".into(),
            ));
        }
        let layers = (0..num_layers)
            .map(|_| AttentionCache::from_config(config))
            .collect::<Result<Vec<_>>>()?;
        Ok(LayerCaches { layers })
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn layer(&self, layer: usize) -> Result<&AttentionCache> {
        let num_layers = self.layers.len();
        self.layers
            .get(layer)
            .ok_or(AttentionError::LayerOutOfRange { layer, num_layers })
    }

    pub fn layer_mut(&mut self, layer: usize) -> Result<&mut AttentionCache> {
        let num_layers = self.layers.len();
        self.layers
            .get_mut(layer)
            .ok_or(AttentionError::LayerOutOfRange { layer, num_layers })
    }

    /// Number of positions cached by the first layer.
    ///
    /// Layers advance one after another within a step, so between steps all
    /// layers hold the same length.
    pub fn seq_len(&self) -> usize {
        self.layers.first().map_or(0, AttentionCache::len)
    }

    /// Reset every layer, starting a new episode.
    pub fn reset(&mut self) {
        for layer in &mut self.layers {
            layer.reset();
        }
    }

    pub fn memory_bytes(&self) -> usize {
        self.layers.iter().map(AttentionCache::memory_bytes).sum()
    }
}
