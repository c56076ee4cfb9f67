//! Local image files.
//!
//! - `ImageStore`: the per-deployment save directory and file naming.
//! - `ImageCache`: bounded FIFO of saved detection crops; evicting an entry
//!   deletes its file.
//! - `sweep_directory`: one-time startup reconciliation of leftovers from a
//!   previous run.
//!
//! Deletion failures are logged and never propagated: disk hygiene must not
//! interrupt the poll loop.

use anyhow::{Context, Result};
use image::RgbImage;
use std::collections::VecDeque;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub const IMAGE_EXTENSION: &str = "jpg";
pub const DEFAULT_MAX_IMAGES: usize = 10;
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// What a saved crop is for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageRole {
    Detect,
    Upload,
}

impl ImageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageRole::Detect => "detect",
            ImageRole::Upload => "upload",
        }
    }
}

/// Save directory of one deployment.
pub struct ImageStore {
    dir: PathBuf,
    prefix: String,
    jpeg_quality: u8,
}

impl ImageStore {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>, jpeg_quality: u8) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            jpeg_quality,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the save directory if absent.
    pub fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create save directory {}", self.dir.display()))
    }

    /// `{dir}/{prefix}_{role}_{unix_secs}.jpg`
    pub fn path_for(&self, role: ImageRole, unix_secs: u64) -> PathBuf {
        let name = if self.prefix.is_empty() {
            format!("{}_{}.{}", role.as_str(), unix_secs, IMAGE_EXTENSION)
        } else {
            format!(
                "{}_{}_{}.{}",
                self.prefix,
                role.as_str(),
                unix_secs,
                IMAGE_EXTENSION
            )
        };
        self.dir.join(name)
    }

    /// Encode `image` as JPEG and write it under the role/timestamp name.
    pub fn save(&self, role: ImageRole, unix_secs: u64, image: &RgbImage) -> Result<PathBuf> {
        let path = self.path_for(role, unix_secs);
        let file =
            fs::File::create(&path).with_context(|| format!("create {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        let encoder =
            image::codecs::jpeg::JpegEncoder::new_with_quality(&mut writer, self.jpeg_quality);
        image
            .write_with_encoder(encoder)
            .with_context(|| format!("encode {}", path.display()))?;
        writer
            .flush()
            .with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }
}

/// Bounded FIFO of saved image paths. Insertion order is temporal order.
pub struct ImageCache {
    entries: VecDeque<PathBuf>,
    max_images: usize,
}

impl ImageCache {
    pub fn new(max_images: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(max_images + 1),
            max_images,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_images(&self) -> usize {
        self.max_images
    }

    pub fn entries(&self) -> impl Iterator<Item = &Path> {
        self.entries.iter().map(PathBuf::as_path)
    }

    /// Append a path, then evict oldest-first until within capacity.
    ///
    /// Returns the evicted paths. Re-pushing the newest path (a second save
    /// within the same unix second overwrites the same file) is a no-op.
    pub fn push(&mut self, path: PathBuf) -> Vec<PathBuf> {
        if self.entries.back() == Some(&path) {
            return Vec::new();
        }
        self.entries.push_back(path);
        let mut evicted = Vec::new();
        while self.entries.len() > self.max_images {
            match self.pop_oldest() {
                Some(path) => evicted.push(path),
                None => break,
            }
        }
        evicted
    }

    /// Remove the oldest entry and delete its file.
    pub fn pop_oldest(&mut self) -> Option<PathBuf> {
        let oldest = self.entries.pop_front()?;
        match fs::remove_file(&oldest) {
            Ok(()) => log::debug!("evicted {}", oldest.display()),
            Err(e) => log::warn!("failed to delete evicted image {}: {}", oldest.display(), e),
        }
        Some(oldest)
    }
}

/// Startup reconciliation of a save directory left by a previous run.
///
/// Keeps the `keep` most recently modified detection crops and deletes older
/// ones. Leftover upload crops come from interrupted ticks and are always
/// deleted. Files not named like saved crops are left alone. Returns the
/// number of files deleted.
pub fn sweep_directory(dir: &Path, keep: usize) -> Result<usize> {
    let mut detections: Vec<(SystemTime, PathBuf)> = Vec::new();
    let mut stale: Vec<PathBuf> = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("skipping unreadable entry in {}: {}", dir.display(), e);
                continue;
            }
        };
        let path = entry.path();
        let Some(role) = role_of(&path) else {
            continue;
        };
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        match role {
            ImageRole::Detect => {
                let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                detections.push((modified, path));
            }
            ImageRole::Upload => stale.push(path),
        }
    }

    // Newest first; ties broken by name so the result is deterministic.
    detections.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
    stale.extend(detections.into_iter().skip(keep).map(|(_, path)| path));

    let mut deleted = 0;
    for path in stale {
        match fs::remove_file(&path) {
            Ok(()) => {
                deleted += 1;
                log::info!("removed leftover image {}", path.display());
            }
            Err(e) => log::warn!("failed to remove leftover image {}: {}", path.display(), e),
        }
    }
    Ok(deleted)
}

/// Role of a file named `[{prefix}_]{role}_{unix}.jpg`.
fn role_of(path: &Path) -> Option<ImageRole> {
    if path.extension().and_then(|ext| ext.to_str()) != Some(IMAGE_EXTENSION) {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let mut parts = stem.rsplitn(3, '_');
    let unix = parts.next()?;
    let role = parts.next()?;
    unix.parse::<u64>().ok()?;
    match role {
        "detect" => Some(ImageRole::Detect),
        "upload" => Some(ImageRole::Upload),
        _ => None,
    }
}

/// Delete a file, logging instead of failing.
pub fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        log::warn!("failed to delete {}: {}", path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, b"x").unwrap();
        path
    }

    fn set_mtime(path: &Path, secs: u64) {
        let file = fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
            .unwrap();
    }

    #[test]
    fn names_files_by_prefix_role_and_timestamp() {
        let store = ImageStore::new("/data/cam", "entree", 90);
        assert_eq!(
            store.path_for(ImageRole::Detect, 1_700_000_000),
            PathBuf::from("/data/cam/entree_detect_1700000000.jpg")
        );
        assert_eq!(
            store.path_for(ImageRole::Upload, 5),
            PathBuf::from("/data/cam/entree_upload_5.jpg")
        );
        let bare = ImageStore::new("/data/cam", "", 90);
        assert_eq!(
            bare.path_for(ImageRole::Detect, 5),
            PathBuf::from("/data/cam/detect_5.jpg")
        );
    }

    #[test]
    fn saves_decodable_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::new(dir.path().join("nested"), "sortie", 90);
        store.ensure_dir().unwrap();
        store.ensure_dir().unwrap();
        let image = RgbImage::from_pixel(16, 8, image::Rgb([40, 80, 120]));
        let path = store.save(ImageRole::Upload, 42, &image).unwrap();
        let decoded = image::open(&path).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 8));
    }

    #[test]
    fn cache_evicts_oldest_first_and_deletes_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = ImageCache::new(3);
        let paths: Vec<PathBuf> = (0..5)
            .map(|i| touch(dir.path(), &format!("detect_{}.jpg", i)))
            .collect();

        for path in &paths[..3] {
            assert!(cache.push(path.clone()).is_empty());
        }
        assert_eq!(cache.len(), 3);

        let evicted = cache.push(paths[3].clone());
        assert_eq!(evicted, vec![paths[0].clone()]);
        assert!(!paths[0].exists());

        let evicted = cache.push(paths[4].clone());
        assert_eq!(evicted, vec![paths[1].clone()]);
        assert!(!paths[1].exists());

        assert_eq!(cache.len(), 3);
        let held: Vec<&Path> = cache.entries().collect();
        assert_eq!(held, vec![paths[2].as_path(), paths[3].as_path(), paths[4].as_path()]);
        assert!(paths[2..].iter().all(|p| p.exists()));
    }

    #[test]
    fn eviction_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = ImageCache::new(1);
        let gone = dir.path().join("already_gone.jpg");
        cache.push(gone.clone());
        let kept = touch(dir.path(), "kept.jpg");
        let evicted = cache.push(kept.clone());
        assert_eq!(evicted, vec![gone]);
        assert_eq!(cache.len(), 1);
        assert!(kept.exists());
    }

    #[test]
    fn same_path_twice_is_one_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = ImageCache::new(2);
        let path = touch(dir.path(), "entree_detect_7.jpg");
        cache.push(path.clone());
        assert!(cache.push(path.clone()).is_empty());
        assert_eq!(cache.len(), 1);
        assert!(path.exists());
    }

    #[test]
    fn never_exceeds_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = ImageCache::new(DEFAULT_MAX_IMAGES);
        for i in 0..25 {
            let evicted = cache.push(touch(dir.path(), &format!("{}.jpg", i)));
            assert!(evicted.len() <= 1);
            assert!(cache.len() <= DEFAULT_MAX_IMAGES);
        }
        let remaining = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(remaining, DEFAULT_MAX_IMAGES);
    }

    #[test]
    fn sweep_keeps_newest_images_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut images = Vec::new();
        for i in 0..6u64 {
            let path = touch(dir.path(), &format!("entree_detect_{}.jpg", i));
            set_mtime(&path, 1_000 + i);
            images.push(path);
        }
        let notes = touch(dir.path(), "notes.txt");
        set_mtime(&notes, 1);

        let deleted = sweep_directory(dir.path(), 4).unwrap();
        assert_eq!(deleted, 2);
        assert!(!images[0].exists());
        assert!(!images[1].exists());
        assert!(images[2..].iter().all(|p| p.exists()));
        assert!(notes.exists());
    }

    #[test]
    fn sweep_budget_counts_detection_crops_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut detections = Vec::new();
        for i in 0..3u64 {
            let path = touch(dir.path(), &format!("sortie_detect_{}.jpg", i));
            set_mtime(&path, 1_000 + i);
            detections.push(path);
        }
        let upload = touch(dir.path(), "sortie_upload_9.jpg");
        set_mtime(&upload, 5_000);
        let foreign = touch(dir.path(), "snapshot.jpg");

        let deleted = sweep_directory(dir.path(), 3).unwrap();
        assert_eq!(deleted, 1);
        assert!(detections.iter().all(|p| p.exists()));
        assert!(!upload.exists());
        assert!(foreign.exists());
    }

    #[test]
    fn recognises_saved_file_roles() {
        let store = ImageStore::new("/data", "cam_a", 90);
        assert_eq!(
            role_of(&store.path_for(ImageRole::Detect, 12)),
            Some(ImageRole::Detect)
        );
        assert_eq!(
            role_of(&store.path_for(ImageRole::Upload, 12)),
            Some(ImageRole::Upload)
        );
        assert_eq!(role_of(Path::new("/data/detect_7.jpg")), Some(ImageRole::Detect));
        assert_eq!(role_of(Path::new("/data/entree_detect_x.jpg")), None);
        assert_eq!(role_of(Path::new("/data/entree_detect_7.png")), None);
    }

    #[test]
    fn sweep_under_limit_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "entree_detect_1.jpg");
        touch(dir.path(), "entree_detect_2.jpg");
        assert_eq!(sweep_directory(dir.path(), 10).unwrap(), 0);
    }
}
