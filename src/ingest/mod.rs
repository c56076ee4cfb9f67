//! Frame sources.
//!
//! - Network camera still-image endpoint over HTTP (with Digest auth)
//! - Local directory replay (offline tuning and smoke tests)
//!
//! A source produces one decoded `Frame` per call and keeps nothing between
//! calls. Any failure (network error, timeout, bad status, undecodable body)
//! is returned as an error; the poll loop treats it as "no frame this tick"
//! and tries again on the next one.

pub mod digest;
pub mod replay;
pub mod snapshot;

use anyhow::Result;

use crate::frame::Frame;

pub use replay::ReplaySource;
pub use snapshot::{SnapshotConfig, SnapshotSource, SnapshotStats};

/// Acquires full-resolution frames on demand.
pub trait FrameSource {
    /// Fetch and decode one frame.
    fn next_frame(&mut self) -> Result<Frame>;

    /// Human-readable source description for logs.
    fn describe(&self) -> String;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<Frame> {
        (**self).next_frame()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}
