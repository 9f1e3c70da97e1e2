use thiserror::Error;

pub type LossResult<T> = Result<T, LossError>;

/// Errors raised by loss layers and their configuration helpers.
#[derive(Error, Debug)]
pub enum LossError {
    /// Prediction and target disagree on the number of elements per example.
    #[error("inputs must have the same dimension: prediction has {prediction} elements per example, target has {target}")]
    ShapeMismatch { prediction: usize, target: usize },

    #[error("{input} has no batch axis")]
    MissingBatchAxis { input: &'static str },

    #[error("prediction batch is empty")]
    EmptyBatch,

    #[error("layer used before setup")]
    NotSetUp,

    #[error("backward called without a preceding forward")]
    BackwardBeforeForward,

    /// An input no longer matches the scratch buffer sized at setup.
    #[error("{input} has {got} elements, expected {expected}")]
    InputSizeMismatch { input: &'static str, expected: usize, got: usize },

    #[error("mask is enabled but no mask input was supplied")]
    MissingMask,

    #[error("mask supplied but the layer was configured without one")]
    UnexpectedMask,

    #[error("mask has {got} elements, expected {expected}")]
    MaskSizeMismatch { expected: usize, got: usize },

    #[error("shape {shape:?} has more elements than fit in memory")]
    ShapeOverflow { shape: Vec<usize> },

    #[error("data length {got} does not match shape volume {expected}")]
    DataLength { expected: usize, got: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
