//! Import orchestration
//!
//! `pipeline` drives one file through inspect → convert → thumbnail →
//! metadata → dedup → persist; `import` runs a whole archive batch with
//! partial-failure semantics; `finalize` is the single-file direct upload
//! path over the same pipeline.

pub mod finalize;
pub mod import;
pub mod pipeline;

pub use finalize::{finalize_upload, FinalizeOptions};
pub use import::{run_archive_commit, run_archive_preview, CommitOptions, CommitSummary};
pub use pipeline::{process_media_file, FileOutcome, MediaSource};
