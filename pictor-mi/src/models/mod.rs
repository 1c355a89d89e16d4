//! Shared data types for the ingest service

pub mod progress;
pub mod upload;

pub use progress::{ImportProgress, ImportStatus, ProgressRegistry};
pub use upload::{AssembledUpload, UploadRegistry};
