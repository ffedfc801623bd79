use thiserror::Error;

#[derive(Error, Debug)]
pub enum AttentionError {
    #[error("shape mismatch in {context}: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        context: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("layer index {layer} out of range for {num_layers} layers")]
    LayerOutOfRange { layer: usize, num_layers: usize },
    #[error("tensor error: {0}")]
    Tensor(#[from] kv_tensor::TensorError),
}

impl AttentionError {
    pub(crate) fn shape(context: impl Into<String>, expected: &[usize], got: &[usize]) -> Self {
        AttentionError::ShapeMismatch {
            context: context.into(),
            expected: expected.to_vec(),
            got: got.to_vec(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AttentionError>;
