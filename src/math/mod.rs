pub mod blob;
pub mod ops;

pub use blob::Blob;
