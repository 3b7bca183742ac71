//! Object store backend implementations

pub mod file;
pub mod memory;
#[cfg(feature = "s3")]
pub mod s3;

pub use file::FileObjectStore;
pub use memory::MemoryObjectStore;
#[cfg(feature = "s3")]
pub use s3::S3ObjectStore;
