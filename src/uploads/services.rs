use std::path::{Path, PathBuf};

use axum::extract::{multipart::Field, Multipart};
use rand::Rng;
use time::OffsetDateTime;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    config::UploadConfig,
    error::{AppError, AppResult},
    storage::{Area, DiskStorage},
};

/// Where a multipart upload is allowed to land and how many files it may carry.
#[derive(Debug, Clone, Copy)]
pub struct UploadSlot {
    pub field: &'static str,
    pub area: Area,
    pub max_files: usize,
}

pub const PROFILE_PICTURE_SLOT: UploadSlot = UploadSlot {
    field: "profilePicture",
    area: Area::ProfilePictures,
    max_files: 1,
};

pub const FILES_SLOT: UploadSlot = UploadSlot {
    field: "files",
    area: Area::Shared,
    max_files: 5,
};

/// A file that has been fully written to disk.
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub path: PathBuf,
    pub filename: String,
    pub original_name: String,
    pub size: u64,
    pub mimetype: String,
}

fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "image/heic" => Some("heic"),
        "application/pdf" => Some("pdf"),
        _ => None,
    }
}

/// Extension for a stored file, dot included. The client's extension is kept
/// only when it is short and alphanumeric; otherwise it is derived from the MIME type.
pub fn extension_for(original_name: &str, mimetype: &str) -> String {
    let client_ext = Path::new(original_name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| (1..=10).contains(&e.len()) && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(str::to_ascii_lowercase);

    match client_ext.or_else(|| ext_from_mime(mimetype).map(String::from)) {
        Some(ext) => format!(".{ext}"),
        None => String::new(),
    }
}

/// `<field>-<userId>-<unixMillis>-<random><ext>`
pub fn generate_filename(field: &str, user_id: Uuid, ext: &str) -> String {
    let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000_000);
    format!("{field}-{user_id}-{millis}-{suffix}{ext}")
}

/// Streams every file of `slot.field` to disk. On any failure all files
/// written by this call, including a partial one, are removed before the
/// error is returned.
pub async fn receive_files(
    storage: &DiskStorage,
    config: &UploadConfig,
    multipart: &mut Multipart,
    slot: UploadSlot,
    user_id: Uuid,
) -> AppResult<Vec<StoredFile>> {
    let mut written: Vec<PathBuf> = Vec::new();
    let mut stored = Vec::new();

    let result = collect(storage, config, multipart, slot, user_id, &mut written, &mut stored).await;
    if let Err(e) = result {
        for path in &written {
            storage.remove_if_exists(path).await;
        }
        debug!(removed = written.len(), "upload aborted; written files removed");
        return Err(e);
    }
    Ok(stored)
}

async fn collect(
    storage: &DiskStorage,
    config: &UploadConfig,
    multipart: &mut Multipart,
    slot: UploadSlot,
    user_id: Uuid,
    written: &mut Vec<PathBuf>,
    stored: &mut Vec<StoredFile>,
) -> AppResult<()> {
    while let Some(field) = multipart.next_field().await? {
        // Plain text fields are ignored.
        let Some(original_name) = field.file_name().map(String::from) else {
            continue;
        };
        if field.name() != Some(slot.field) {
            warn!(field = ?field.name(), "unexpected file field");
            return Err(AppError::bad_request("Unexpected field"));
        }
        if stored.len() >= slot.max_files {
            return Err(AppError::bad_request("Too many files"));
        }

        let mimetype = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        if !config.is_allowed(&mimetype) {
            warn!(%mimetype, "rejected upload type");
            return Err(AppError::bad_request(format!(
                "File type {} is not allowed. Allowed types: {}",
                mimetype,
                config.allowed_types.join(", ")
            )));
        }

        let ext = extension_for(&original_name, &mimetype);
        let filename = generate_filename(slot.field, user_id, &ext);
        let path = storage.path_of(slot.area, &filename);

        let file = storage.create_new(&path).await?;
        written.push(path.clone());
        let size = write_field(field, file, config.max_file_size).await?;

        debug!(%filename, size, "file stored");
        stored.push(StoredFile {
            path,
            filename,
            original_name,
            size,
            mimetype,
        });
    }
    Ok(())
}

async fn write_field(
    mut field: Field<'_>,
    mut file: tokio::fs::File,
    limit: u64,
) -> AppResult<u64> {
    let mut size: u64 = 0;
    while let Some(chunk) = field.chunk().await? {
        size += chunk.len() as u64;
        if size > limit {
            return Err(AppError::bad_request("File too large"));
        }
        file.write_all(&chunk)
            .await
            .map_err(|e| anyhow::Error::new(e).context("write upload chunk"))?;
    }
    file.flush()
        .await
        .map_err(|e| anyhow::Error::new(e).context("flush upload"))?;
    Ok(size)
}

/// Best-effort removal of everything in `files`.
pub async fn discard(storage: &DiskStorage, files: &[StoredFile]) {
    for f in files {
        storage.remove_if_exists(&f.path).await;
    }
}
