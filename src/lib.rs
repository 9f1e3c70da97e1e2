pub mod error;
pub mod math;
pub mod loss;
pub mod case;

// Convenience re-exports
pub use error::{LossError, LossResult};
pub use math::blob::Blob;
pub use loss::{LossLayer, LossSpec, LossEvaluation, MaskedEuclideanLoss};
pub use case::{LossCase, LossReport};
