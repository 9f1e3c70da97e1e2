use serde::{Serialize, Deserialize};

/// Result of running one `LossCase` through setup, forward and backward.
///
/// Gradients are only reported for inputs whose propagate flag was set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LossReport {
    /// Name taken from the case's `LossSpec`.
    pub name: String,
    /// Scalar loss from the forward pass.
    pub loss: f64,
    /// Upstream gradient that seeded the backward pass.
    pub upstream: f64,
    /// Elements that passed the mask; equals `total_elements` without one.
    pub valid_elements: usize,
    pub total_elements: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prediction_grad: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_grad: Option<Vec<f64>>,
}
