use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::fs;
use tracing::{debug, warn};

use crate::error::{AppError, AppResult};

pub const PUBLIC_PREFIX: &str = "/uploads";
pub const PROFILE_PICTURES_DIR: &str = "profile-pictures";

/// Which upload directory a file lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Area {
    Shared,
    ProfilePictures,
}

/// Local disk storage rooted at the configured upload directory.
#[derive(Debug, Clone)]
pub struct DiskStorage {
    root: PathBuf,
    profile_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub filename: String,
    pub size: u64,
    pub extension: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub modified: OffsetDateTime,
    pub url: String,
}

/// Rejects anything that could step outside the upload directory.
pub fn check_filename(name: &str) -> AppResult<&str> {
    if name.is_empty()
        || name.contains("..")
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
    {
        return Err(AppError::bad_request("Invalid filename"));
    }
    Ok(name)
}

impl DiskStorage {
    /// Creates the upload directories if they are missing.
    pub async fn init(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        let profile_dir = root.join(PROFILE_PICTURES_DIR);
        fs::create_dir_all(&profile_dir)
            .await
            .with_context(|| format!("create upload dir {}", profile_dir.display()))?;
        debug!(root = %root.display(), "upload storage ready");
        Ok(Self { root, profile_dir })
    }

    pub fn dir(&self, area: Area) -> &Path {
        match area {
            Area::Shared => &self.root,
            Area::ProfilePictures => &self.profile_dir,
        }
    }

    /// Callers pass generated names or names that passed [`check_filename`].
    pub fn path_of(&self, area: Area, filename: &str) -> PathBuf {
        self.dir(area).join(filename)
    }

    pub fn public_url(area: Area, filename: &str) -> String {
        match area {
            Area::Shared => format!("{PUBLIC_PREFIX}/{filename}"),
            Area::ProfilePictures => format!("{PUBLIC_PREFIX}/{PROFILE_PICTURES_DIR}/{filename}"),
        }
    }

    /// Maps a stored public URL back to a path on disk. Unknown or unsafe references yield `None`.
    pub fn resolve_public_url(&self, url: &str) -> Option<PathBuf> {
        let profile_prefix = format!("{PUBLIC_PREFIX}/{PROFILE_PICTURES_DIR}/");
        let shared_prefix = format!("{PUBLIC_PREFIX}/");
        let (area, name) = if let Some(name) = url.strip_prefix(&profile_prefix) {
            (Area::ProfilePictures, name)
        } else if let Some(name) = url.strip_prefix(&shared_prefix) {
            (Area::Shared, name)
        } else {
            return None;
        };
        check_filename(name).ok()?;
        Some(self.path_of(area, name))
    }

    pub async fn create_new(&self, path: &Path) -> anyhow::Result<fs::File> {
        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await
            .with_context(|| format!("create {}", path.display()))
    }

    /// Deletes `path`, tolerating a file that is already gone. Other failures
    /// are logged and swallowed. Returns whether a file was removed.
    pub async fn remove_if_exists(&self, path: &Path) -> bool {
        match fs::remove_file(path).await {
            Ok(()) => {
                debug!(path = %path.display(), "file removed");
                true
            }
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => {
                warn!(error = %e, path = %path.display(), "file cleanup failed");
                false
            }
        }
    }

    /// Deletes a file in the shared directory. `Ok(false)` when it does not exist.
    pub async fn delete_shared(&self, filename: &str) -> AppResult<bool> {
        let name = check_filename(filename)?;
        let path = self.path_of(Area::Shared, name);
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {}
            _ => return Ok(false),
        }
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(anyhow::Error::new(e)
                .context(format!("delete {}", path.display()))
                .into()),
        }
    }

    /// Metadata for a file in the shared directory. `Ok(None)` when it does not exist.
    pub async fn stat_shared(&self, filename: &str) -> AppResult<Option<FileInfo>> {
        let name = check_filename(filename)?;
        let path = self.path_of(Area::Shared, name);
        let meta = match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context(format!("stat {}", path.display()))
                    .into())
            }
        };

        let modified = meta
            .modified()
            .map(OffsetDateTime::from)
            .context("read mtime")?;
        // Not every filesystem records birth time.
        let created = meta.created().map(OffsetDateTime::from).unwrap_or(modified);
        let extension = Path::new(name)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();

        Ok(Some(FileInfo {
            filename: name.to_string(),
            size: meta.len(),
            extension,
            created,
            modified,
            url: Self::public_url(Area::Shared, name),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traversal_payloads_are_rejected() {
        for bad in ["", "..", "../secret", "..%2Fsecret", "a/b", "a\\b", "x\0y", "...."] {
            assert!(check_filename(bad).is_err(), "{bad:?} should be rejected");
        }
        assert_eq!(check_filename("files-1-2-3.png").unwrap(), "files-1-2-3.png");
    }

    #[tokio::test]
    async fn init_creates_both_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("nested").join("uploads");
        let storage = DiskStorage::init(&root).await.unwrap();
        assert!(storage.dir(Area::Shared).is_dir());
        assert!(storage.dir(Area::ProfilePictures).is_dir());
    }

    #[tokio::test]
    async fn public_urls_round_trip_to_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = DiskStorage::init(tmp.path()).await.unwrap();

        let url = DiskStorage::public_url(Area::ProfilePictures, "pic.png");
        assert_eq!(url, "/uploads/profile-pictures/pic.png");
        assert_eq!(
            storage.resolve_public_url(&url),
            Some(tmp.path().join(PROFILE_PICTURES_DIR).join("pic.png"))
        );
        assert_eq!(
            storage.resolve_public_url("/uploads/doc.pdf"),
            Some(tmp.path().join("doc.pdf"))
        );
        assert_eq!(storage.resolve_public_url("/uploads/profile-pictures/../x"), None);
        assert_eq!(storage.resolve_public_url("/etc/passwd"), None);
    }

    #[tokio::test]
    async fn remove_if_exists_tolerates_missing_files() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = DiskStorage::init(tmp.path()).await.unwrap();
        let path = storage.path_of(Area::Shared, "gone.txt");
        assert!(!storage.remove_if_exists(&path).await);

        fs::write(&path, b"data").await.unwrap();
        assert!(storage.remove_if_exists(&path).await);
        assert!(!fs::try_exists(&path).await.unwrap());
    }

    #[tokio::test]
    async fn stat_and_delete_shared_files() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = DiskStorage::init(tmp.path()).await.unwrap();
        fs::write(storage.path_of(Area::Shared, "report.pdf"), b"%PDF-1.4")
            .await
            .unwrap();

        let info = storage.stat_shared("report.pdf").await.unwrap().unwrap();
        assert_eq!(info.size, 8);
        assert_eq!(info.extension, ".pdf");
        assert_eq!(info.url, "/uploads/report.pdf");

        assert!(storage.stat_shared("missing.pdf").await.unwrap().is_none());
        // The profile-pictures directory is not a file.
        assert!(storage.stat_shared(PROFILE_PICTURES_DIR).await.unwrap().is_none());

        assert!(storage.delete_shared("report.pdf").await.unwrap());
        assert!(!storage.delete_shared("report.pdf").await.unwrap());
        assert!(!storage.delete_shared(PROFILE_PICTURES_DIR).await.unwrap());
        assert!(storage.dir(Area::ProfilePictures).is_dir());
    }
}
