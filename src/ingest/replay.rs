//! Local replay source.
//!
//! Cycles through the image files of a directory in name order, one per
//! call. Used to exercise a deployment's regions and thresholds against
//! recorded snapshots without a camera.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};

use super::FrameSource;
use crate::frame::Frame;

const REPLAY_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

pub struct ReplaySource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    next: usize,
}

impl ReplaySource {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let mut files = Vec::new();
        for entry in
            std::fs::read_dir(&dir).with_context(|| format!("read replay dir {}", dir.display()))?
        {
            let path = entry?.path();
            if is_replay_image(&path) {
                files.push(path);
            }
        }
        if files.is_empty() {
            return Err(anyhow!("no images to replay in {}", dir.display()));
        }
        files.sort();
        Ok(Self {
            dir,
            files,
            next: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn is_replay_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| REPLAY_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

impl FrameSource for ReplaySource {
    fn next_frame(&mut self) -> Result<Frame> {
        let path = &self.files[self.next];
        self.next = (self.next + 1) % self.files.len();
        let bytes = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
        Frame::decode(&bytes).with_context(|| format!("decode {}", path.display()))
    }

    fn describe(&self) -> String {
        format!("replay:{}", self.dir.display())
    }
}
