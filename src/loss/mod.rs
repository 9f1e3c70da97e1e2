pub mod masked_euclidean;
pub mod spec;

use crate::error::LossResult;
use crate::math::blob::Blob;

pub use masked_euclidean::{LossEvaluation, MaskedEuclideanLoss};
pub use spec::LossSpec;

/// Capability a host executor drives to run a two-input loss layer.
///
/// Call order per shape change is `setup`, then any number of
/// `forward`/`backward` pairs. `backward` consumes state left by the most
/// recent `forward`, so the two must not be interleaved across invocations.
pub trait LossLayer {
    /// Registered type name of the layer.
    fn layer_type(&self) -> &'static str;

    /// Validates input shapes and sizes internal scratch storage.
    /// Returns the shape of that scratch storage. On error the layer is left
    /// unconfigured.
    fn setup(&mut self, prediction: &[usize], target: &[usize]) -> LossResult<Vec<usize>>;

    /// Computes the scalar loss.
    ///
    /// Both inputs must hold exactly as many elements as the prediction shape
    /// given to `setup`. Setup only compares per-example sizes, so a target
    /// with a different batch extent passes setup but is rejected here.
    /// A failed call invalidates the previous forward: `backward` is refused
    /// until a forward succeeds again.
    fn forward(&mut self, prediction: &Blob, target: &Blob, mask: Option<&Blob>) -> LossResult<f64>;

    /// Writes gradients into the `diff` buffers of the inputs whose
    /// `propagate_down` flag is set. `top_diff` is the derivative of the
    /// objective with respect to this layer's scalar output.
    fn backward(
        &mut self,
        top_diff: f64,
        propagate_down: [bool; 2],
        prediction: &mut Blob,
        target: &mut Blob,
        mask: Option<&Blob>,
    ) -> LossResult<()>;
}
