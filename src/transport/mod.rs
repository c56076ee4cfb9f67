//! Transport to the remote collector.
//!
//! Delivery is best-effort: a failed upload is logged and lost.

pub mod collector;

pub use collector::{CollectorConfig, HttpUploader, UploadOutcome, Uploader};
