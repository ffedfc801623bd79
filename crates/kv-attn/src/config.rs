use serde::{Deserialize, Serialize};

use crate::error::{AttentionError, Result};

/// Hyperparameters of one multi-head attention layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttentionConfig {
    /// Model (embedding) dimension; input and output width of every projection.
    pub embed_dim: usize,
    /// Number of attention heads.
    pub num_heads: usize,
    /// Number of independent sequences decoded together.
    pub batch_size: usize,
    /// Whether the projections carry a bias term.
    #[serde(default)]
    pub bias: bool,
}

impl AttentionConfig {
    /// Build and validate a configuration.
    pub fn new(embed_dim: usize, num_heads: usize, batch_size: usize) -> Result<Self> {
        let config = AttentionConfig {
            embed_dim,
            num_heads,
            batch_size,
            bias: false,
        };
        config.validate()?;
        Ok(config)
    }

    /// Same configuration with projection biases switched on or off.
    pub fn with_bias(mut self, bias: bool) -> Self {
        self.bias = bias;
        self
    }

    /// Dimension of each attention head (embed_dim / num_heads).
    pub fn head_dim(&self) -> usize {
        if self.num_heads == 0 {
            return 0;
        }
        self.embed_dim / self.num_heads
    }

    /// Check the structural invariants every cache and module relies on.
    pub fn validate(&self) -> Result<()> {
        if self.embed_dim == 0 {
            return Err(AttentionError::InvalidConfiguration(
                "embed_dim must be greater than zero".into(),
            ));
        }
        if self.num_heads == 0 {
            return Err(AttentionError::InvalidConfiguration(
                "num_heads must be greater than zero".into(),
            ));
        }
        if self.batch_size == 0 {
            return Err(AttentionError::InvalidConfiguration(
                "batch_size must be greater than zero".into(),
            ));
        }
        if self.embed_dim % self.num_heads != 0 {
            return Err(AttentionError::InvalidConfiguration(format!(
                "embed_dim ({}) must be divisible by num_heads ({})",
                self.embed_dim, self.num_heads
            )));
        }
        Ok(())
    }
}
