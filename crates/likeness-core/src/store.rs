//! Face gallery storage: one directory per user, one image file per sample.

use crate::normalizer::{self, NormalizeError};
use chrono::Utc;
use image::{GrayImage, ImageFormat};
use std::fs::{self, OpenOptions};
use std::io::{Cursor, ErrorKind, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

const SAMPLE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];
/// Sample keys are UTC timestamps so directory order is capture order.
const KEY_FORMAT: &str = "%Y%m%dT%H%M%S%.6f";
const MAX_KEY_SUFFIX: u32 = 1000;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid user name {0:?}")]
    InvalidUserName(String),
    #[error("gallery I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode sample {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to encode sample: {0}")]
    Encode(#[source] image::ImageError),
    #[error("no free sample key for {0}")]
    KeyExhausted(String),
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
}

/// Raw bytes of a stored sample, ready to serve.
#[derive(Debug, Clone)]
pub struct StoredSample {
    pub key: String,
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
}

/// Labeled face gallery consumed by the recognition pipeline.
pub trait ImageStore: Send {
    /// User names in lexicographic order.
    fn list_users(&self) -> Result<Vec<String>, StoreError>;

    /// Storage keys of a user's samples, in storage order.
    fn sample_keys(&self, user: &str) -> Result<Vec<String>, StoreError>;

    /// A user's samples as canonical-size grayscale faces, in storage order.
    fn list_samples(&self, user: &str) -> Result<Vec<GrayImage>, StoreError>;

    /// Persist a normalized face and return its storage key.
    fn save_sample(&self, user: &str, face: &GrayImage) -> Result<String, StoreError>;

    /// The first stored sample for a user, if any.
    fn first_sample(&self, user: &str) -> Result<Option<StoredSample>, StoreError>;
}

/// Reject names that cannot be used as a single directory component.
pub fn validate_user_name(user: &str) -> Result<(), StoreError> {
    let bad = user.is_empty()
        || user == "."
        || user == ".."
        || user.contains(['/', '\\', '\0']);
    if bad {
        return Err(StoreError::InvalidUserName(user.to_string()));
    }
    Ok(())
}

/// Gallery rooted at a directory: `<root>/<user>/<key>.png`.
#[derive(Debug, Clone)]
pub struct FsImageStore {
    root: PathBuf,
    face_size: (u32, u32),
}

impl FsImageStore {
    pub fn new(root: impl Into<PathBuf>, face_size: (u32, u32)) -> Self {
        Self {
            root: root.into(),
            face_size,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn user_dir(&self, user: &str) -> Result<PathBuf, StoreError> {
        validate_user_name(user)?;
        Ok(self.root.join(user))
    }

    fn sample_paths(&self, user: &str) -> Result<Vec<PathBuf>, StoreError> {
        let dir = self.user_dir(user)?;
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&dir, e)),
        };

        let mut paths = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| io_error(&dir, e))?.path();
            if path.is_file() && is_sample(&path) {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    fn load_sample(&self, path: &Path) -> Result<GrayImage, StoreError> {
        let gray = image::open(path)
            .map_err(|source| StoreError::Decode {
                path: path.to_path_buf(),
                source,
            })?
            .to_luma8();

        if gray.dimensions() != self.face_size {
            tracing::warn!(
                path = %path.display(),
                actual = ?gray.dimensions(),
                expected = ?self.face_size,
                "sample is not canonical size; resizing"
            );
        }
        Ok(normalizer::resize_to(gray, self.face_size)?)
    }
}

impl ImageStore for FsImageStore {
    fn list_users(&self) -> Result<Vec<String>, StoreError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&self.root, e)),
        };

        let mut users = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_error(&self.root, e))?;
            if !entry.path().is_dir() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) if !name.starts_with('.') => users.push(name),
                Ok(_) => {}
                Err(raw) => tracing::warn!(name = ?raw, "skipping non UTF-8 user directory"),
            }
        }
        users.sort();
        Ok(users)
    }

    fn sample_keys(&self, user: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .sample_paths(user)?
            .iter()
            .filter_map(|p| p.file_name()?.to_str().map(str::to_string))
            .collect())
    }

    fn list_samples(&self, user: &str) -> Result<Vec<GrayImage>, StoreError> {
        self.sample_paths(user)?
            .iter()
            .map(|p| self.load_sample(p))
            .collect()
    }

    fn save_sample(&self, user: &str, face: &GrayImage) -> Result<String, StoreError> {
        let dir = self.user_dir(user)?;
        fs::create_dir_all(&dir).map_err(|e| io_error(&dir, e))?;

        let mut encoded = Vec::new();
        face.write_to(&mut Cursor::new(&mut encoded), ImageFormat::Png)
            .map_err(StoreError::Encode)?;

        let stamp = Utc::now().format(KEY_FORMAT).to_string();
        for attempt in 0..MAX_KEY_SUFFIX {
            let key = if attempt == 0 {
                format!("{stamp}.png")
            } else {
                format!("{stamp}_{attempt}.png")
            };
            let path = dir.join(&key);
            let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(io_error(&path, e)),
            };
            file.write_all(&encoded).map_err(|e| io_error(&path, e))?;
            tracing::debug!(user, key, "face sample stored");
            return Ok(key);
        }

        Err(StoreError::KeyExhausted(user.to_string()))
    }

    fn first_sample(&self, user: &str) -> Result<Option<StoredSample>, StoreError> {
        let Some(path) = self.sample_paths(user)?.into_iter().next() else {
            return Ok(None);
        };
        let bytes = fs::read(&path).map_err(|e| io_error(&path, e))?;
        let key = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        Ok(Some(StoredSample {
            key,
            bytes,
            content_type: content_type(&path),
        }))
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

fn is_sample(path: &Path) -> bool {
    extension(path).is_some_and(|ext| SAMPLE_EXTENSIONS.contains(&ext.as_str()))
}

fn content_type(path: &Path) -> &'static str {
    match extension(path).as_deref() {
        Some("png") => "image/png",
        _ => "image/jpeg",
    }
}
