use axum::{
    async_trait,
    extract::{DefaultBodyLimit, FromRequest, Multipart, Path, Request, State},
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::services::{discard, receive_files, FILES_SLOT, PROFILE_PICTURE_SLOT};
use crate::{
    auth::CurrentUser,
    error::{AppError, AppResult},
    response::ApiResponse,
    state::AppState,
    storage::{Area, DiskStorage, FileInfo},
};

/// Multipart extractor whose rejections render as the error envelope.
pub struct AppMultipart(pub Multipart);

#[async_trait]
impl<S> FromRequest<S> for AppMultipart
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(Multipart::from_request(req, state).await?))
    }
}

/// Headroom for multipart framing on top of the file payloads.
const MULTIPART_OVERHEAD: u64 = 64 * 1024;

pub fn upload_routes(max_file_size: u64) -> Router<AppState> {
    let body_limit = max_file_size
        .saturating_mul(FILES_SLOT.max_files as u64)
        .saturating_add(MULTIPART_OVERHEAD);
    let body_limit = usize::try_from(body_limit).unwrap_or(usize::MAX);

    Router::new()
        .route(
            "/upload/profile-picture",
            post(upload_profile_picture).delete(delete_profile_picture),
        )
        .route("/upload/files", post(upload_files))
        .route("/upload/file/:filename", delete(delete_file))
        .route("/upload/info/:filename", get(file_info))
        .layer(DefaultBodyLimit::max(body_limit))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProfilePictureUpload {
    pub url: String,
    pub filename: String,
    pub size: u64,
    pub mimetype: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    pub filename: String,
    pub original_name: String,
    pub size: u64,
    pub mimetype: String,
    pub url: String,
    pub uploaded_by: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub uploaded_at: OffsetDateTime,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadedFiles {
    pub files: Vec<UploadedFile>,
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn upload_profile_picture(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    AppMultipart(mut multipart): AppMultipart,
) -> AppResult<ApiResponse<ProfilePictureUpload>> {
    let mut files = receive_files(
        &state.storage,
        &state.config.upload,
        &mut multipart,
        PROFILE_PICTURE_SLOT,
        user.id,
    )
    .await?;
    let Some(file) = files.pop() else {
        return Err(AppError::bad_request("No file uploaded"));
    };

    if let Some(old) = user.profile_picture.as_deref() {
        match state.storage.resolve_public_url(old) {
            Some(path) => {
                state.storage.remove_if_exists(&path).await;
            }
            None => warn!(old, "stored profile picture does not map to the upload dir"),
        }
    }

    let url = DiskStorage::public_url(Area::ProfilePictures, &file.filename);
    let updated = match state.users.set_profile_picture(user.id, Some(&url)).await {
        Ok(Some(_)) => Ok(()),
        Ok(None) => Err(AppError::NotFound("User not found".into())),
        Err(e) => Err(e),
    };
    if let Err(e) = updated {
        warn!("profile update failed; removing new picture");
        discard(&state.storage, std::slice::from_ref(&file)).await;
        return Err(e);
    }

    info!(filename = %file.filename, size = file.size, "profile picture uploaded");
    Ok(ApiResponse::ok(ProfilePictureUpload {
        url,
        filename: file.filename,
        size: file.size,
        mimetype: file.mimetype,
    })
    .with_message("Profile picture uploaded successfully"))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn delete_profile_picture(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> AppResult<ApiResponse<()>> {
    let Some(current) = user.profile_picture.as_deref() else {
        return Err(AppError::InvalidOperation("No profile picture to delete".into()));
    };

    if let Some(path) = state.storage.resolve_public_url(current) {
        state.storage.remove_if_exists(&path).await;
    }

    state
        .users
        .set_profile_picture(user.id, None)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;

    info!("profile picture deleted");
    Ok(ApiResponse::message("Profile picture deleted successfully"))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn upload_files(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    AppMultipart(mut multipart): AppMultipart,
) -> AppResult<ApiResponse<UploadedFiles>> {
    let stored = receive_files(
        &state.storage,
        &state.config.upload,
        &mut multipart,
        FILES_SLOT,
        user.id,
    )
    .await?;
    if stored.is_empty() {
        return Err(AppError::bad_request("No files uploaded"));
    }

    // Nothing persists who uploaded what; `uploadedBy` is echoed only.
    let now = OffsetDateTime::now_utc();
    let files: Vec<UploadedFile> = stored
        .into_iter()
        .map(|f| UploadedFile {
            url: DiskStorage::public_url(Area::Shared, &f.filename),
            filename: f.filename,
            original_name: f.original_name,
            size: f.size,
            mimetype: f.mimetype,
            uploaded_by: user.id,
            uploaded_at: now,
        })
        .collect();

    info!(count = files.len(), "files uploaded");
    let message = format!("{} file(s) uploaded successfully", files.len());
    Ok(ApiResponse::ok(UploadedFiles { files }).with_message(message))
}

#[instrument(skip_all, fields(user_id = %user.id, %filename))]
pub async fn delete_file(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(filename): Path<String>,
) -> AppResult<ApiResponse<()>> {
    if !state.storage.delete_shared(&filename).await? {
        return Err(AppError::NotFound("File not found".into()));
    }
    info!("file deleted");
    Ok(ApiResponse::message("File deleted successfully"))
}

#[instrument(skip_all, fields(user_id = %user.id, %filename))]
pub async fn file_info(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(filename): Path<String>,
) -> AppResult<ApiResponse<FileInfo>> {
    let info = state
        .storage
        .stat_shared(&filename)
        .await?
        .ok_or_else(|| AppError::NotFound("File not found".into()))?;
    Ok(ApiResponse::ok(info))
}
