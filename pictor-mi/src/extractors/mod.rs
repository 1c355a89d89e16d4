//! Metadata extraction from embedded and external sources

pub mod exif;
pub mod geocode;
pub mod merge;
pub mod video;

pub use geocode::{GeocodeClient, RateGate, SystemClock};
pub use merge::{merge_metadata, EmbeddedMetadata, MediaMetadata};
