use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use marker_watch::{fatal_config_error, Checkpoint, DetectorKind, FatalConfigError, WatcherConfig};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "MARKER_WATCH_CONFIG",
        "MARKER_WATCH_CHECKPOINT",
        "MARKER_WATCH_CAMERA_URL",
        "MARKER_WATCH_CAMERA_USER",
        "MARKER_WATCH_CAMERA_PASSWORD",
        "MARKER_WATCH_SAVE_DIR",
        "MARKER_WATCH_UPLOAD_URL",
        "MARKER_WATCH_INTERVAL_MS",
        "MARKER_WATCH_MAX_IMAGES",
        "MARKER_WATCH_DETECTOR",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_to_entry_preset() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = WatcherConfig::load(None).expect("load config");
    assert_eq!(cfg.checkpoint, Checkpoint::Entry);
    assert_eq!(cfg.file_prefix, "entree");
    assert_eq!(cfg.upload.url, "https://ai.hublo.eu/upload");
    assert_eq!(cfg.camera.username, "admin");
    assert_eq!(cfg.detector, DetectorKind::ColorThreshold);
}

#[test]
fn loads_json_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "checkpoint": "sortie",
        "camera": {
            "url": "http://10.0.0.9/ISAPI/Streaming/channels/1/picture",
            "password": "from-file",
            "timeout_ms": 3000
        },
        "storage": { "max_images": 25 },
        "poll": { "interval_ms": 500, "dwell_ms": 2500 },
        "regions": {
            "detection": { "x": 0.1, "y": 0.2, "width": 0.3, "height": 0.4 }
        },
        "detector": {
            "kind": "diff",
            "diff": { "pixel_threshold": 40 }
        }
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("MARKER_WATCH_CONFIG", file.path());
    std::env::set_var("MARKER_WATCH_CAMERA_PASSWORD", "from-env");
    std::env::set_var("MARKER_WATCH_MAX_IMAGES", "7");

    let cfg = WatcherConfig::load(None).expect("load config");
    clear_env();

    assert_eq!(cfg.checkpoint, Checkpoint::Exit);
    assert_eq!(cfg.file_prefix, "sortie");
    assert_eq!(cfg.upload.url, "https://ai.hublo.eu/upload_sortie");
    assert_eq!(
        cfg.camera.url,
        "http://10.0.0.9/ISAPI/Streaming/channels/1/picture"
    );
    assert_eq!(cfg.camera.password, "from-env");
    assert_eq!(cfg.camera.timeout, Duration::from_secs(3));
    assert_eq!(cfg.max_images, 7);
    assert_eq!(cfg.poll_interval, Duration::from_millis(500));
    assert_eq!(cfg.dwell, Duration::from_millis(2500));
    assert_eq!(cfg.detection_region.width, 0.3);
    assert_eq!(cfg.detector, DetectorKind::ReferenceDiff);
    assert_eq!(cfg.diff.pixel_threshold, 40);
    assert_eq!(cfg.diff.max_changed_ratio, 0.02);
}

#[test]
fn loads_toml_file_and_explicit_checkpoint_wins() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
        checkpoint = "exit"

        [upload]
        url = "http://collector.local/upload"
        field_name = "photo"

        [detector.color.range]
        lower = [90, 60, 60]
        upper = [120, 255, 255]
    "#;
    file.write_all(toml.as_bytes()).expect("write config");
    std::env::set_var("MARKER_WATCH_CONFIG", file.path());
    std::env::set_var("MARKER_WATCH_DETECTOR", "color");

    let cfg = WatcherConfig::load(Some(Checkpoint::Entry)).expect("load config");
    clear_env();

    assert_eq!(cfg.checkpoint, Checkpoint::Entry);
    assert_eq!(cfg.file_prefix, "entree");
    assert_eq!(cfg.upload.url, "http://collector.local/upload");
    assert_eq!(cfg.upload.field_name, "photo");
    assert_eq!(cfg.color.range.lower, [90, 60, 60]);
    assert_eq!(cfg.color.min_ratio, 0.02);
}

#[test]
fn rejects_bad_env_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("MARKER_WATCH_INTERVAL_MS", "soon");
    assert!(WatcherConfig::load(None).is_err());
    clear_env();

    std::env::set_var("MARKER_WATCH_DETECTOR", "neural");
    assert!(WatcherConfig::load(None).is_err());
    clear_env();

    std::env::set_var("MARKER_WATCH_MAX_IMAGES", "0");
    assert!(WatcherConfig::load(None).is_err());
    clear_env();
}

#[test]
fn out_of_frame_region_is_fatal() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(
        br#"{ "regions": { "upload": { "x": 0.8, "y": 0.1, "width": 0.4, "height": 0.2 } } }"#,
    )
    .expect("write config");
    std::env::set_var("MARKER_WATCH_CONFIG", file.path());

    let err = WatcherConfig::load(None).unwrap_err();
    clear_env();

    let fatal = fatal_config_error(&err).expect("fatal config error");
    assert_eq!(fatal.code, FatalConfigError::REGION);
}

#[test]
fn missing_config_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("MARKER_WATCH_CONFIG", "/nonexistent/marker-watch.json");
    let err = WatcherConfig::load(None).unwrap_err();
    clear_env();
    assert!(err.to_string().contains("failed to read config file"));
}
