//! The poll loop.
//!
//! `Watcher` is responsible for:
//! - reconciling the save directory once at startup
//! - building the detector from the first frame it manages to fetch
//! - running one tick per poll interval, strictly in sequence
//!
//! `Watcher` MUST NOT:
//! - retry an upload or keep an upload crop after the attempt
//! - let transient I/O or cleanup failures escape a tick
//!
//! The only errors `tick` returns are fatal configuration errors raised while
//! building the detector.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::config::WatcherConfig;
use crate::detect::{build_detector, ColorParams, DetectorKind, DiffParams, OcclusionDetector};
use crate::event::{EventState, EventStateMachine, Transition};
use crate::frame::Frame;
use crate::ingest::FrameSource;
use crate::region::Region;
use crate::storage::{remove_quietly, sweep_directory, ImageCache, ImageRole, ImageStore};
use crate::transport::{UploadOutcome, Uploader};

/// What happened during one tick.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TickReport {
    /// A frame was fetched and decoded.
    pub fetched: bool,
    /// This tick's frame became the detector reference.
    pub baseline_captured: bool,
    /// Detector verdict; `None` when the tick was skipped before detection.
    pub visible: Option<bool>,
    pub transition: Option<Transition>,
    /// The dwell condition was met and an upload was attempted.
    pub fired: bool,
    /// Collector response, when the attempt reached it.
    pub upload: Option<UploadOutcome>,
}

pub struct Watcher<S, U> {
    source: S,
    uploader: U,
    detector: Option<Box<dyn OcclusionDetector>>,
    detector_kind: DetectorKind,
    color: ColorParams,
    diff: DiffParams,
    events: EventStateMachine,
    store: ImageStore,
    cache: ImageCache,
    detection_region: Region,
    upload_region: Region,
    poll_interval: Duration,
}

impl<S: FrameSource, U: Uploader> Watcher<S, U> {
    /// Prepare the save directory and remove leftovers beyond `max_images`.
    pub fn new(config: &WatcherConfig, source: S, uploader: U) -> Result<Self> {
        let store = ImageStore::new(
            config.save_dir.clone(),
            config.file_prefix.clone(),
            config.jpeg_quality,
        );
        store.ensure_dir()?;
        match sweep_directory(store.dir(), config.max_images) {
            Ok(0) => {}
            Ok(n) => log::info!("startup sweep removed {} leftover images", n),
            Err(e) => log::warn!("startup sweep of {} failed: {:#}", store.dir().display(), e),
        }

        Ok(Self {
            source,
            uploader,
            detector: None,
            detector_kind: config.detector,
            color: config.color.clone(),
            diff: config.diff.clone(),
            events: EventStateMachine::new(config.dwell),
            store,
            cache: ImageCache::new(config.max_images),
            detection_region: config.detection_region,
            upload_region: config.upload_region,
            poll_interval: config.poll_interval,
        })
    }

    /// The detector has been built from a reference frame.
    pub fn is_ready(&self) -> bool {
        self.detector.is_some()
    }

    pub fn detector_name(&self) -> Option<&'static str> {
        self.detector.as_ref().map(|d| d.name())
    }

    pub fn state(&self) -> EventState {
        self.events.state()
    }

    pub fn cached_images(&self) -> impl Iterator<Item = &Path> {
        self.cache.entries()
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn uploader(&self) -> &U {
        &self.uploader
    }

    /// Run ticks until `shutdown` is set, sleeping the poll interval between
    /// them.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<()> {
        log::info!(
            "watching {} every {:?} (dwell {:?}, detector {})",
            self.source.describe(),
            self.poll_interval,
            self.events.dwell(),
            self.detector_kind.as_str()
        );
        while !shutdown.load(Ordering::SeqCst) {
            self.tick(Instant::now())?;
            std::thread::sleep(self.poll_interval);
        }
        log::info!("watcher stopped");
        Ok(())
    }

    /// One poll tick at monotonic time `now`.
    ///
    /// Until the detector exists, a tick only tries to capture the reference
    /// frame; a failed fetch leaves the watcher waiting for the next tick.
    pub fn tick(&mut self, now: Instant) -> Result<TickReport> {
        let mut report = TickReport::default();

        let frame = match self.source.next_frame() {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("no frame from {}: {:#}", self.source.describe(), e);
                return Ok(report);
            }
        };
        report.fetched = true;

        if self.detector.is_none() {
            self.capture_reference(&frame)?;
            report.baseline_captured = true;
            return Ok(report);
        }

        let (detection, upload) = match self.crop_regions(&frame) {
            Ok(crops) => crops,
            Err(e) => {
                log::warn!("skipping {}x{} frame: {:#}", frame.width(), frame.height(), e);
                return Ok(report);
            }
        };

        let unix_secs = frame.unix_secs();
        match self.store.save(ImageRole::Detect, unix_secs, &detection) {
            Ok(path) => {
                self.cache.push(path);
            }
            Err(e) => log::warn!("failed to save detection image: {:#}", e),
        }
        let upload_path = match self.store.save(ImageRole::Upload, unix_secs, &upload) {
            Ok(path) => Some(path),
            Err(e) => {
                log::warn!("failed to save upload image: {:#}", e);
                None
            }
        };

        let verdict = match self.detector.as_ref() {
            Some(detector) => detector.evaluate(&detection),
            None => return Ok(report),
        };
        let visible = match verdict {
            Ok(visible) => visible,
            Err(e) => {
                log::warn!("detector gave no signal: {:#}", e);
                if let Some(path) = &upload_path {
                    remove_quietly(path);
                }
                return Ok(report);
            }
        };
        report.visible = Some(visible);

        let transition = self.events.observe(visible, now);
        if transition.changed() {
            log::info!(
                "marker state {} -> {}",
                transition.from.name(),
                transition.to.name()
            );
        }
        report.transition = Some(transition);

        if transition.fire {
            report.fired = true;
            log::info!("markers hidden for {:?}, uploading", self.events.dwell());
            report.upload = self.deliver(upload_path.as_deref());
        }
        if let Some(path) = upload_path {
            remove_quietly(&path);
        }
        Ok(report)
    }

    fn capture_reference(&mut self, frame: &Frame) -> Result<()> {
        let rect = self
            .detection_region
            .resolve_checked(frame.width(), frame.height())
            .context("detection region")?;
        self.upload_region
            .resolve_checked(frame.width(), frame.height())
            .context("upload region")?;
        let reference = frame.crop(rect);
        let detector = build_detector(self.detector_kind, &self.color, &self.diff, &reference)?;
        log::info!(
            "{} detector ready on {}x{} frames",
            detector.name(),
            frame.width(),
            frame.height()
        );
        self.detector = Some(detector);
        Ok(())
    }

    fn crop_regions(&self, frame: &Frame) -> Result<(image::RgbImage, image::RgbImage)> {
        let detection = self
            .detection_region
            .resolve_checked(frame.width(), frame.height())?;
        let upload = self
            .upload_region
            .resolve_checked(frame.width(), frame.height())?;
        Ok((frame.crop(detection), frame.crop(upload)))
    }

    fn deliver(&mut self, path: Option<&Path>) -> Option<UploadOutcome> {
        let path = match path {
            Some(path) => path,
            None => {
                log::warn!("upload skipped: no upload image was saved this tick");
                return None;
            }
        };
        match self.uploader.send(path) {
            Ok(outcome) => {
                if !outcome.is_success() {
                    log::warn!("collector rejected {}: {}", path.display(), outcome.status);
                }
                Some(outcome)
            }
            Err(e) => {
                log::warn!("upload of {} failed: {:#}", path.display(), e);
                None
            }
        }
    }
}

/// Upload target that only records what it was asked to send.
///
/// Used by `--once` dry runs and tests.
#[derive(Debug, Default)]
pub struct RecordingUploader {
    pub sent: Vec<PathBuf>,
}

impl Uploader for RecordingUploader {
    fn send(&mut self, path: &Path) -> Result<UploadOutcome> {
        log::info!("dry run: would upload {}", path.display());
        self.sent.push(path.to_path_buf());
        Ok(UploadOutcome {
            status: 200,
            body_preview: String::new(),
        })
    }
}
