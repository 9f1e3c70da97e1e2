pub mod loss_case;
pub mod report;

pub use loss_case::LossCase;
pub use report::LossReport;
