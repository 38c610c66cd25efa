//! Media storage for uploaded sources/targets and generated outputs.
//!
//! Files live in three flat directories (`source`, `target`, `output`):
//! - On-disk storage in deployments, where the face-swap process reads and
//!   writes the files directly
//! - In-memory storage for tests
//!
//! Public URLs are produced by a [`UrlResolver`], so the same files can be
//! served from wherever the deployment exposes them.

use std::fmt;
use std::path::{Path as FsPath, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::TryStreamExt;
use object_store::ObjectStore;
use object_store::ObjectStoreExt;
use object_store::path::Path;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid storage config: {0}")]
    InvalidConfig(String),

    #[error("invalid file name: {0:?}")]
    InvalidName(String),

    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("unknown media directory: {0}")]
    UnknownDir(String),

    #[error("file does not exist: {dir}/{name}")]
    NotFound { dir: MediaDir, name: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object_store error: {0}")]
    ObjectStore(#[from] object_store::Error),
}

/// One of the three media directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaDir {
    Source,
    Target,
    Output,
}

impl MediaDir {
    pub const ALL: [MediaDir; 3] = [MediaDir::Source, MediaDir::Target, MediaDir::Output];

    pub fn as_str(self) -> &'static str {
        match self {
            MediaDir::Source => "source",
            MediaDir::Target => "target",
            MediaDir::Output => "output",
        }
    }
}

impl fmt::Display for MediaDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaDir {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "source" => Ok(MediaDir::Source),
            "target" => Ok(MediaDir::Target),
            "output" => Ok(MediaDir::Output),
            other => Err(StorageError::UnknownDir(other.to_string())),
        }
    }
}

/// A stored file and the URL it is served from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaFile {
    pub name: String,
    pub url: String,
}

/// Maps a `(directory, file name)` pair to a public URL.
pub trait UrlResolver: Send + Sync + 'static {
    fn resolve(&self, dir: MediaDir, name: &str) -> String;
}

/// Resolves to `{base}/files/{dir}/{name}`.
#[derive(Debug, Clone)]
pub struct BaseUrlResolver {
    base: String,
}

impl BaseUrlResolver {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
        }
    }
}

impl UrlResolver for BaseUrlResolver {
    fn resolve(&self, dir: MediaDir, name: &str) -> String {
        format!("{}/files/{}/{}", self.base, dir, name)
    }
}

/// File extension for an accepted upload content type.
pub fn extension_for_mime(content_type: &str) -> Option<&'static str> {
    let essence = content_type.split(';').next().unwrap_or_default().trim();
    match essence.to_ascii_lowercase().as_str() {
        "image/jpeg" => Some(".jpg"),
        "image/png" => Some(".png"),
        "video/mp4" => Some(".mp4"),
        _ => None,
    }
}

/// Check that `name` is a plain file name: no separators, no traversal.
pub fn validate_name(name: &str) -> Result<(), StorageError> {
    let invalid = name.trim().is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if invalid {
        Err(StorageError::InvalidName(name.to_string()))
    } else {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Filesystem,
    Memory,
}

impl StorageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageKind::Filesystem => "filesystem",
            StorageKind::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone)]
pub enum StorageBackendConfig {
    Filesystem { root: PathBuf },
    Memory,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackendConfig,
    /// Base of the public file URLs.
    pub public_base_url: String,
}

const DEFAULT_MEDIA_ROOT: &str = "./data/media";
const DEFAULT_PUBLIC_BASE_URL: &str = "http://localhost:5000";

impl StorageConfig {
    pub fn memory() -> Self {
        Self {
            backend: StorageBackendConfig::Memory,
            public_base_url: DEFAULT_PUBLIC_BASE_URL.to_string(),
        }
    }

    pub fn filesystem(root: impl Into<PathBuf>) -> Self {
        Self {
            backend: StorageBackendConfig::Filesystem { root: root.into() },
            public_base_url: DEFAULT_PUBLIC_BASE_URL.to_string(),
        }
    }

    pub fn with_public_base_url(mut self, url: impl Into<String>) -> Self {
        self.public_base_url = url.into();
        self
    }

    /// Build a config from environment variables.
    ///
    /// - `MEDIA_BACKEND` (`filesystem` or `memory`, default: `filesystem`)
    /// - `MEDIA_ROOT` (default: `./data/media`)
    /// - `PUBLIC_BASE_URL` (default: `http://localhost:5000`)
    pub fn from_env() -> Result<Self, StorageError> {
        let backend = std::env::var("MEDIA_BACKEND").ok().and_then(non_empty);
        let public_base_url = std::env::var("PUBLIC_BASE_URL")
            .ok()
            .and_then(non_empty)
            .unwrap_or_else(|| DEFAULT_PUBLIC_BASE_URL.to_string());

        let cfg = match backend.as_deref() {
            Some("filesystem") | Some("fs") | None => {
                let root = std::env::var("MEDIA_ROOT")
                    .ok()
                    .and_then(non_empty)
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_MEDIA_ROOT));
                Self::filesystem(root)
            }
            Some("memory") | Some("mem") => Self::memory(),
            Some(other) => {
                return Err(StorageError::InvalidConfig(format!(
                    "unsupported MEDIA_BACKEND={other} (expected filesystem|memory)"
                )));
            }
        };

        Ok(cfg.with_public_base_url(public_base_url))
    }
}

/// The three media directories over one object store.
#[derive(Clone)]
pub struct MediaStore {
    kind: StorageKind,
    store: Arc<dyn ObjectStore>,
    /// On-disk root for the filesystem backend.
    root: Option<PathBuf>,
    resolver: Arc<dyn UrlResolver>,
}

impl MediaStore {
    pub fn kind(&self) -> StorageKind {
        self.kind
    }

    pub fn kind_str(&self) -> &'static str {
        self.kind.as_str()
    }

    pub async fn new(cfg: StorageConfig) -> Result<Self, StorageError> {
        let resolver: Arc<dyn UrlResolver> = Arc::new(BaseUrlResolver::new(cfg.public_base_url));

        let (kind, store, root) = match cfg.backend {
            StorageBackendConfig::Filesystem { root } => {
                for dir in MediaDir::ALL {
                    ensure_dir(&root.join(dir.as_str()))?;
                }
                let root = std::fs::canonicalize(&root)?;
                let fs = object_store::local::LocalFileSystem::new_with_prefix(&root)?;
                (StorageKind::Filesystem, Arc::new(fs) as _, Some(root))
            }
            StorageBackendConfig::Memory => {
                let mem = object_store::memory::InMemory::new();
                (StorageKind::Memory, Arc::new(mem) as _, None)
            }
        };

        tracing::info!("Media store ready ({})", kind.as_str());

        Ok(Self {
            kind,
            store,
            root,
            resolver,
        })
    }

    pub async fn from_env() -> Result<Self, StorageError> {
        Self::new(StorageConfig::from_env()?).await
    }

    /// Replace the URL resolver.
    pub fn with_resolver(mut self, resolver: Arc<dyn UrlResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn resolver(&self) -> Arc<dyn UrlResolver> {
        self.resolver.clone()
    }

    pub fn url(&self, dir: MediaDir, name: &str) -> String {
        self.resolver.resolve(dir, name)
    }

    /// Path the external process uses for a file. For the memory backend
    /// this is the relative object key.
    pub fn path_of(&self, dir: MediaDir, name: &str) -> PathBuf {
        match &self.root {
            Some(root) => root.join(dir.as_str()).join(name),
            None => FsPath::new(dir.as_str()).join(name),
        }
    }

    fn to_path(dir: MediaDir, name: &str) -> Result<Path, StorageError> {
        validate_name(name)?;
        Ok(Path::from(format!("{}/{}", dir.as_str(), name)))
    }

    fn media_file(&self, dir: MediaDir, name: String) -> MediaFile {
        MediaFile {
            url: self.url(dir, &name),
            name,
        }
    }

    pub async fn put_bytes(
        &self,
        dir: MediaDir,
        name: &str,
        bytes: Bytes,
    ) -> Result<MediaFile, StorageError> {
        let path = Self::to_path(dir, name)?;
        self.store
            .put(&path, object_store::PutPayload::from(bytes))
            .await?;
        Ok(self.media_file(dir, name.to_string()))
    }

    pub async fn get_bytes(&self, dir: MediaDir, name: &str) -> Result<Bytes, StorageError> {
        let path = Self::to_path(dir, name)?;
        match self.store.get(&path).await {
            Ok(res) => Ok(res.bytes().await?),
            Err(object_store::Error::NotFound { .. }) => Err(StorageError::NotFound {
                dir,
                name: name.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Store an upload under a timestamp name with the extension implied by
    /// its content type.
    pub async fn save_upload(
        &self,
        dir: MediaDir,
        content_type: &str,
        bytes: Bytes,
    ) -> Result<MediaFile, StorageError> {
        let extension = extension_for_mime(content_type)
            .ok_or_else(|| StorageError::UnsupportedMediaType(content_type.to_string()))?;

        // Uploads within the same second get the next free timestamp.
        let mut timestamp = chrono::Utc::now().timestamp();
        let mut name = format!("{timestamp}{extension}");
        while self.exists(dir, &name).await? {
            timestamp += 1;
            name = format!("{timestamp}{extension}");
        }

        tracing::info!("Saving upload {}/{} ({} bytes)", dir, name, bytes.len());
        self.put_bytes(dir, &name, bytes).await
    }

    pub async fn exists(&self, dir: MediaDir, name: &str) -> Result<bool, StorageError> {
        let path = Self::to_path(dir, name)?;
        match self.store.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Files of one directory, sorted by name.
    pub async fn list(&self, dir: MediaDir) -> Result<Vec<MediaFile>, StorageError> {
        let prefix = Path::from(dir.as_str());
        let objects: Vec<_> = self.store.list(Some(&prefix)).try_collect().await?;

        let mut names: Vec<String> = objects
            .iter()
            .filter_map(|meta| meta.location.filename().map(str::to_string))
            .collect();
        names.sort();

        Ok(names
            .into_iter()
            .map(|name| self.media_file(dir, name))
            .collect())
    }

    pub async fn delete(&self, dir: MediaDir, name: &str) -> Result<(), StorageError> {
        if !self.exists(dir, name).await? {
            return Err(StorageError::NotFound {
                dir,
                name: name.to_string(),
            });
        }

        let path = Self::to_path(dir, name)?;
        self.store.delete(&path).await?;
        tracing::info!("Deleted {}/{}", dir, name);
        Ok(())
    }
}

fn ensure_dir(root: &FsPath) -> Result<(), StorageError> {
    std::fs::create_dir_all(root)?;
    Ok(())
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use super::*;

    #[tokio::test]
    async fn in_memory_round_trip() -> Result<(), StorageError> {
        let storage = MediaStore::new(StorageConfig::memory()).await?;
        let file = storage
            .put_bytes(MediaDir::Source, "a.jpg", Bytes::from("hi"))
            .await?;
        assert_eq!(file.url, "http://localhost:5000/files/source/a.jpg");

        let got = storage.get_bytes(MediaDir::Source, "a.jpg").await?;
        assert_eq!(got, Bytes::from("hi"));
        assert!(!storage.exists(MediaDir::Target, "a.jpg").await?);
        Ok(())
    }

    #[tokio::test]
    async fn filesystem_list_and_delete() -> Result<(), StorageError> {
        let dir = tempfile::tempdir()?;
        let storage = MediaStore::new(
            StorageConfig::filesystem(dir.path()).with_public_base_url("https://media.example/"),
        )
        .await?;

        storage
            .put_bytes(MediaDir::Target, "b.jpg", Bytes::from("b"))
            .await?;
        storage
            .put_bytes(MediaDir::Target, "a.png", Bytes::from("a"))
            .await?;

        let files = storage.list(MediaDir::Target).await?;
        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["a.png", "b.jpg"]);
        assert_eq!(files[0].url, "https://media.example/files/target/a.png");
        assert!(storage.list(MediaDir::Output).await?.is_empty());

        let on_disk = storage.path_of(MediaDir::Target, "b.jpg");
        assert_eq!(std::fs::read(&on_disk)?, b"b");

        storage.delete(MediaDir::Target, "b.jpg").await?;
        assert!(!on_disk.exists());
        let missing = storage.delete(MediaDir::Target, "b.jpg").await;
        assert!(matches!(missing, Err(StorageError::NotFound { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn uploads_get_timestamp_names() -> Result<(), StorageError> {
        let storage = MediaStore::new(StorageConfig::memory()).await?;

        let first = storage
            .save_upload(MediaDir::Source, "image/jpeg", Bytes::from("1"))
            .await?;
        let second = storage
            .save_upload(MediaDir::Source, "image/jpeg", Bytes::from("2"))
            .await?;
        assert!(first.name.ends_with(".jpg"));
        assert_ne!(first.name, second.name);

        let video = storage
            .save_upload(MediaDir::Target, "video/mp4", Bytes::from("v"))
            .await?;
        assert!(video.name.ends_with(".mp4"));

        let rejected = storage
            .save_upload(MediaDir::Target, "text/plain", Bytes::from("t"))
            .await;
        assert!(matches!(rejected, Err(StorageError::UnsupportedMediaType(_))));
        Ok(())
    }

    #[test]
    fn names_and_mime_types() {
        assert!(validate_name("a.jpg").is_ok());
        for bad in ["", "  ", ".", "..", "../a.jpg", "dir/a.jpg", "a\\b"] {
            assert!(validate_name(bad).is_err(), "{bad:?} accepted");
        }

        assert_eq!(extension_for_mime("image/png"), Some(".png"));
        assert_eq!(extension_for_mime("IMAGE/JPEG; charset=binary"), Some(".jpg"));
        assert_eq!(extension_for_mime("image/gif"), None);

        assert_eq!("output".parse::<MediaDir>().ok(), Some(MediaDir::Output));
        assert!("thumbs".parse::<MediaDir>().is_err());
    }
}
