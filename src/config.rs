use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::detect::{ColorParams, DetectorKind, DiffParams};
use crate::ingest::snapshot::{SnapshotConfig, DEFAULT_TIMEOUT, DEFAULT_USER_AGENT};
use crate::region::Region;
use crate::storage::{DEFAULT_JPEG_QUALITY, DEFAULT_MAX_IMAGES};
use crate::transport::collector::{CollectorConfig, DEFAULT_FIELD_NAME};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_DWELL: Duration = Duration::from_secs(2);
const DEFAULT_CAMERA_USER: &str = "admin";

pub const CONFIG_ENV: &str = "MARKER_WATCH_CONFIG";

/// Physical checkpoint a watcher instance is deployed at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Checkpoint {
    #[serde(alias = "entree")]
    Entry,
    #[serde(alias = "sortie")]
    Exit,
}

impl Checkpoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Checkpoint::Entry => "entry",
            Checkpoint::Exit => "exit",
        }
    }
}

impl FromStr for Checkpoint {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "entry" | "entree" => Ok(Checkpoint::Entry),
            "exit" | "sortie" => Ok(Checkpoint::Exit),
            other => Err(anyhow!(
                "unknown checkpoint '{}'; expected 'entry' or 'exit'",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct WatcherConfigFile {
    checkpoint: Option<Checkpoint>,
    camera: Option<CameraConfigFile>,
    storage: Option<StorageConfigFile>,
    poll: Option<PollConfigFile>,
    upload: Option<UploadConfigFile>,
    regions: Option<RegionsConfigFile>,
    detector: Option<DetectorConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    url: Option<String>,
    username: Option<String>,
    password: Option<String>,
    timeout_ms: Option<u64>,
    user_agent: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct StorageConfigFile {
    save_dir: Option<PathBuf>,
    file_prefix: Option<String>,
    max_images: Option<usize>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct PollConfigFile {
    interval_ms: Option<u64>,
    dwell_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct UploadConfigFile {
    url: Option<String>,
    field_name: Option<String>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct RegionsConfigFile {
    detection: Option<Region>,
    upload: Option<Region>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    kind: Option<DetectorKind>,
    color: Option<ColorParams>,
    diff: Option<DiffParams>,
}

/// Complete settings for one watcher instance.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub checkpoint: Checkpoint,
    pub camera: SnapshotConfig,
    pub save_dir: PathBuf,
    /// Prefix of saved file names (`{prefix}_{role}_{unix}.jpg`).
    pub file_prefix: String,
    pub poll_interval: Duration,
    /// Minimum uninterrupted occlusion before an upload fires.
    pub dwell: Duration,
    pub max_images: usize,
    pub jpeg_quality: u8,
    pub upload: CollectorConfig,
    pub detection_region: Region,
    pub upload_region: Region,
    pub detector: DetectorKind,
    pub color: ColorParams,
    pub diff: DiffParams,
}

impl WatcherConfig {
    /// Built-in settings of a checkpoint deployment.
    pub fn preset(checkpoint: Checkpoint) -> Self {
        let (camera_url, save_dir, upload_url, detection_region, upload_region, prefix, detector) =
            match checkpoint {
                Checkpoint::Entry => (
                    "http://192.168.1.103/ISAPI/Streaming/channels/1/picture",
                    "./cam_entree",
                    "https://ai.hublo.eu/upload",
                    Region::from_spans(0.38, 0.53, 0.40, 0.64),
                    Region::from_spans(0.30, 0.68, 0.01, 0.45),
                    "entree",
                    DetectorKind::ColorThreshold,
                ),
                Checkpoint::Exit => (
                    "http://192.168.1.104/ISAPI/Streaming/channels/1/picture",
                    "./cam_sortie",
                    "https://ai.hublo.eu/upload_sortie",
                    Region::from_spans(0.45, 0.53, 0.09, 0.21),
                    Region::from_spans(0.35, 0.63, 0.02, 0.40),
                    "sortie",
                    DetectorKind::ReferenceDiff,
                ),
            };
        Self {
            checkpoint,
            camera: SnapshotConfig {
                url: camera_url.to_string(),
                username: DEFAULT_CAMERA_USER.to_string(),
                password: String::new(),
                timeout: DEFAULT_TIMEOUT,
                user_agent: DEFAULT_USER_AGENT.to_string(),
            },
            save_dir: PathBuf::from(save_dir),
            file_prefix: prefix.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            dwell: DEFAULT_DWELL,
            max_images: DEFAULT_MAX_IMAGES,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            upload: CollectorConfig {
                url: upload_url.to_string(),
                field_name: DEFAULT_FIELD_NAME.to_string(),
                timeout: None,
            },
            detection_region,
            upload_region,
            detector,
            color: ColorParams::default(),
            diff: DiffParams::default(),
        }
    }

    /// Load settings: checkpoint preset, then the `MARKER_WATCH_CONFIG` file
    /// (if set), then `MARKER_WATCH_*` environment overrides.
    ///
    /// `checkpoint` takes precedence over the file and environment choice.
    pub fn load(checkpoint: Option<Checkpoint>) -> Result<Self> {
        let config_path = std::env::var(CONFIG_ENV).ok().filter(|p| !p.trim().is_empty());
        let file_cfg = match config_path.as_deref() {
            Some(path) => read_config_file(Path::new(path))?,
            None => WatcherConfigFile::default(),
        };
        let env_checkpoint = match std::env::var("MARKER_WATCH_CHECKPOINT") {
            Ok(value) if !value.trim().is_empty() => Some(value.parse()?),
            _ => None,
        };
        let checkpoint = checkpoint
            .or(env_checkpoint)
            .or(file_cfg.checkpoint)
            .unwrap_or(Checkpoint::Entry);

        let mut cfg = Self::preset(checkpoint);
        cfg.apply_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_file(&mut self, file: WatcherConfigFile) {
        if let Some(camera) = file.camera {
            if let Some(url) = camera.url {
                self.camera.url = url;
            }
            if let Some(username) = camera.username {
                self.camera.username = username;
            }
            if let Some(password) = camera.password {
                self.camera.password = password;
            }
            if let Some(ms) = camera.timeout_ms {
                self.camera.timeout = Duration::from_millis(ms);
            }
            if let Some(user_agent) = camera.user_agent {
                self.camera.user_agent = user_agent;
            }
        }
        if let Some(storage) = file.storage {
            if let Some(dir) = storage.save_dir {
                self.save_dir = dir;
            }
            if let Some(prefix) = storage.file_prefix {
                self.file_prefix = prefix;
            }
            if let Some(max) = storage.max_images {
                self.max_images = max;
            }
            if let Some(quality) = storage.jpeg_quality {
                self.jpeg_quality = quality;
            }
        }
        if let Some(poll) = file.poll {
            if let Some(ms) = poll.interval_ms {
                self.poll_interval = Duration::from_millis(ms);
            }
            if let Some(ms) = poll.dwell_ms {
                self.dwell = Duration::from_millis(ms);
            }
        }
        if let Some(upload) = file.upload {
            if let Some(url) = upload.url {
                self.upload.url = url;
            }
            if let Some(field) = upload.field_name {
                self.upload.field_name = field;
            }
            if let Some(ms) = upload.timeout_ms {
                self.upload.timeout = Some(Duration::from_millis(ms));
            }
        }
        if let Some(regions) = file.regions {
            if let Some(region) = regions.detection {
                self.detection_region = region;
            }
            if let Some(region) = regions.upload {
                self.upload_region = region;
            }
        }
        if let Some(detector) = file.detector {
            if let Some(kind) = detector.kind {
                self.detector = kind;
            }
            if let Some(color) = detector.color {
                self.color = color;
            }
            if let Some(diff) = detector.diff {
                self.diff = diff;
            }
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(url) = env_nonempty("MARKER_WATCH_CAMERA_URL") {
            self.camera.url = url;
        }
        if let Some(user) = env_nonempty("MARKER_WATCH_CAMERA_USER") {
            self.camera.username = user;
        }
        // An explicitly empty password is meaningful, so only unset skips it.
        if let Ok(password) = std::env::var("MARKER_WATCH_CAMERA_PASSWORD") {
            self.camera.password = password;
        }
        if let Some(dir) = env_nonempty("MARKER_WATCH_SAVE_DIR") {
            self.save_dir = PathBuf::from(dir);
        }
        if let Some(url) = env_nonempty("MARKER_WATCH_UPLOAD_URL") {
            self.upload.url = url;
        }
        if let Some(ms) = env_nonempty("MARKER_WATCH_INTERVAL_MS") {
            let ms: u64 = ms.parse().map_err(|_| {
                anyhow!("MARKER_WATCH_INTERVAL_MS must be an integer number of milliseconds")
            })?;
            self.poll_interval = Duration::from_millis(ms);
        }
        if let Some(max) = env_nonempty("MARKER_WATCH_MAX_IMAGES") {
            self.max_images = max
                .parse()
                .map_err(|_| anyhow!("MARKER_WATCH_MAX_IMAGES must be a positive integer"))?;
        }
        if let Some(kind) = env_nonempty("MARKER_WATCH_DETECTOR") {
            self.detector = kind.parse()?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.camera.url.trim().is_empty() {
            return Err(anyhow!("camera url must not be empty"));
        }
        if self.upload.url.trim().is_empty() {
            return Err(anyhow!("upload url must not be empty"));
        }
        if self.poll_interval.is_zero() {
            return Err(anyhow!("poll interval must be greater than zero"));
        }
        if self.camera.timeout.is_zero() {
            return Err(anyhow!("camera timeout must be greater than zero"));
        }
        if self.max_images == 0 {
            return Err(anyhow!("max_images must be greater than zero"));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(anyhow!("jpeg_quality must be within 1..=100"));
        }
        self.detection_region
            .validate_fractions()
            .context("detection region")?;
        self.upload_region
            .validate_fractions()
            .context("upload region")?;

        if !self.color.range.is_well_formed() {
            return Err(anyhow!(
                "color range {:?}..={:?} is inverted or hue exceeds 179",
                self.color.range.lower,
                self.color.range.upper
            ));
        }
        check_ratio("color.min_ratio", self.color.min_ratio)?;
        if self.color.zone_count == 0 {
            return Err(anyhow!("color.zone_count must be at least 1"));
        }
        check_ratio("diff.max_changed_ratio", self.diff.max_changed_ratio)?;

        if self.dwell <= self.poll_interval {
            log::warn!(
                "dwell {:?} is not longer than the poll interval {:?}; a single hidden sample after the first can fire an upload",
                self.dwell,
                self.poll_interval
            );
        }
        Ok(())
    }
}

fn check_ratio(name: &str, value: f32) -> Result<()> {
    if value.is_finite() && value > 0.0 && value < 1.0 {
        Ok(())
    } else {
        Err(anyhow!("{} must be within (0, 1), got {}", name, value))
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<WatcherConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_are_valid() {
        for checkpoint in [Checkpoint::Entry, Checkpoint::Exit] {
            let cfg = WatcherConfig::preset(checkpoint);
            cfg.validate().unwrap();
            assert_eq!(cfg.max_images, 10);
            assert_eq!(cfg.poll_interval, Duration::from_secs(1));
            assert_eq!(cfg.dwell, Duration::from_secs(2));
            assert_eq!(cfg.camera.timeout, Duration::from_secs(5));
            assert_eq!(cfg.camera.user_agent, "Mozilla/5.0");
            assert_eq!(cfg.upload.field_name, "image");
        }
    }

    #[test]
    fn exit_preset_uses_its_own_endpoint() {
        let entry = WatcherConfig::preset(Checkpoint::Entry);
        let exit = WatcherConfig::preset(Checkpoint::Exit);
        assert_ne!(entry.upload.url, exit.upload.url);
        assert_ne!(entry.save_dir, exit.save_dir);
        assert_eq!(exit.file_prefix, "sortie");
        assert_eq!(entry.detector, DetectorKind::ColorThreshold);
        assert_eq!(exit.detector, DetectorKind::ReferenceDiff);
        assert!(exit.upload.url.ends_with("/upload_sortie"));
    }

    #[test]
    fn parses_checkpoint_names() {
        assert_eq!("entree".parse::<Checkpoint>().unwrap(), Checkpoint::Entry);
        assert_eq!("EXIT".parse::<Checkpoint>().unwrap(), Checkpoint::Exit);
        assert!("lobby".parse::<Checkpoint>().is_err());
    }

    #[test]
    fn rejects_zero_interval_and_bad_ratio() {
        let mut cfg = WatcherConfig::preset(Checkpoint::Entry);
        cfg.poll_interval = Duration::ZERO;
        assert!(cfg.validate().is_err());

        let mut cfg = WatcherConfig::preset(Checkpoint::Entry);
        cfg.diff.max_changed_ratio = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = WatcherConfig::preset(Checkpoint::Entry);
        cfg.max_images = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn invalid_region_is_a_fatal_config_error() {
        let mut cfg = WatcherConfig::preset(Checkpoint::Entry);
        cfg.upload_region = Region {
            x: 0.9,
            y: 0.0,
            width: 0.5,
            height: 0.5,
        };
        let err = cfg.validate().unwrap_err();
        let fatal = crate::fatal_config_error(&err).expect("fatal config error in chain");
        assert_eq!(fatal.code, crate::FatalConfigError::REGION);
    }

    #[test]
    fn file_overrides_apply_partially() {
        let file: WatcherConfigFile = toml::from_str(
            r#"
            [poll]
            dwell_ms = 3000

            [detector]
            kind = "diff"

            [detector.color]
            min_ratio = 0.05
            "#,
        )
        .unwrap();
        let mut cfg = WatcherConfig::preset(Checkpoint::Entry);
        cfg.apply_file(file);
        assert_eq!(cfg.dwell, Duration::from_secs(3));
        assert_eq!(cfg.poll_interval, Duration::from_secs(1));
        assert_eq!(cfg.detector, DetectorKind::ReferenceDiff);
        assert_eq!(cfg.color.min_ratio, 0.05);
        assert_eq!(cfg.color.zone_count, 3);
        assert_eq!(cfg.color.min_zone_area, 200);
    }
}
