//! Checkpoint marker watcher.
//!
//! Watches a fixed camera viewpoint for the temporary occlusion of a small
//! marker zone (stickers placed in a known area). Once the markers stay hidden
//! for the configured dwell time, a photo of a related region is forwarded to
//! a remote collector endpoint. One instance runs per physical checkpoint.
//!
//! # Pipeline
//!
//! One poll tick runs strictly in sequence:
//!
//! 1. `ingest`: fetch a frame from the camera (skipped tick on any failure).
//! 2. `region`: crop the detection region and the upload region.
//! 3. `detect`: decide whether the markers are visible.
//! 4. `event`: debounce visibility into at most one upload per occlusion.
//! 5. `transport`: fire-and-forget delivery of the upload crop.
//! 6. `storage`: bounded FIFO of saved detection crops on disk.
//!
//! `pipeline::Watcher` owns all of the above and drives the loop.

pub mod config;
pub mod detect;
pub mod event;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod region;
pub mod storage;
pub mod transport;

pub use config::{Checkpoint, WatcherConfig};
pub use detect::{build_detector, ColorThreshold, DetectorKind, OcclusionDetector, ReferenceDiff};
pub use event::{EventState, EventStateMachine, Transition};
pub use frame::Frame;
pub use ingest::{FrameSource, ReplaySource, SnapshotSource};
pub use pipeline::{RecordingUploader, TickReport, Watcher};
pub use region::{PixelRect, Region};
pub use storage::{sweep_directory, ImageCache, ImageStore};
pub use transport::{HttpUploader, UploadOutcome, Uploader};

/// Configuration problem that makes the detector unusable.
///
/// Not retryable: the process must stop and an operator has to fix the
/// camera placement, lighting or configuration.
#[derive(Clone, Debug)]
pub struct FatalConfigError {
    pub code: &'static str,
    pub message: String,
}

impl FatalConfigError {
    pub const MARKER_ZONES: &'static str = "FATAL_MARKER_ZONES";
    pub const REFERENCE_FRAME: &'static str = "FATAL_REFERENCE_FRAME";
    pub const REGION: &'static str = "FATAL_REGION";

    pub fn marker_zones(message: impl Into<String>) -> Self {
        Self {
            code: Self::MARKER_ZONES,
            message: message.into(),
        }
    }

    pub fn reference_frame(message: impl Into<String>) -> Self {
        Self {
            code: Self::REFERENCE_FRAME,
            message: message.into(),
        }
    }

    pub fn region(message: impl Into<String>) -> Self {
        Self {
            code: Self::REGION,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FatalConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}
impl std::error::Error for FatalConfigError {}

/// Find a `FatalConfigError` anywhere in an error chain.
pub fn fatal_config_error(err: &anyhow::Error) -> Option<&FatalConfigError> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<FatalConfigError>())
}
