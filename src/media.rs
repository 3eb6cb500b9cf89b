//! Uploaded images and videos.
//!
//! Files are classified by extension alone and written once under a
//! timestamp-prefixed name. The hub never reads them back; clients send the
//! returned URL as ordinary message content.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use axum::{
    Json, Router, debug_handler,
    extract::{DefaultBodyLimit, Multipart, State},
    routing::post,
};
use serde::Serialize;
use time::{OffsetDateTime, format_description::BorrowedFormatItem, macros::format_description};
use tracing::info;

use crate::{AppError, AppResult, AppState, store::MessageKind};

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "gif"];

const MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;

/// `20250301123005123456`: second resolution plus microseconds.
const NAME_PREFIX_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year][month][day][hour][minute][second][subsecond digits:6]");

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/upload", post(upload))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Asset {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub url: String,
}

/// Image for the usual still-image extensions, video for everything else.
pub fn classify(filename: &str) -> MessageKind {
    let extension = filename.rsplit('.').next().unwrap_or_default().to_lowercase();
    if IMAGE_EXTENSIONS.contains(&extension.as_str()) {
        MessageKind::Image
    } else {
        MessageKind::Video
    }
}

#[derive(Debug, Clone)]
pub struct MediaIngest {
    dir: Arc<PathBuf>,
}

impl MediaIngest {
    /// Uses `dir` for uploads, creating it if needed.
    pub async fn new(dir: impl Into<PathBuf>) -> AppResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(MediaIngest { dir: Arc::new(dir) })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes `bytes` as a new asset and returns where it will be served.
    ///
    /// A failed write may leave a partial file behind.
    pub async fn store(&self, filename: &str, bytes: &[u8]) -> AppResult<Asset> {
        self.store_at(OffsetDateTime::now_utc(), filename, bytes).await
    }

    async fn store_at(&self, at: OffsetDateTime, filename: &str, bytes: &[u8]) -> AppResult<Asset> {
        let base = Path::new(filename)
            .file_name()
            .and_then(|name| name.to_str())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| AppError::BadRequest(format!("unusable file name {filename:?}")))?;

        let prefix = at
            .format(NAME_PREFIX_FORMAT)
            .map_err(|e| AppError::Io(std::io::Error::other(e)))?;
        let name = format!("{prefix}_{base}");

        tokio::fs::write(self.dir.join(&name), bytes).await?;
        info!("stored upload {name} ({} bytes)", bytes.len());

        Ok(Asset {
            kind: classify(base),
            url: format!("/uploads/{name}"),
        })
    }
}

#[debug_handler(state = AppState)]
pub(crate) async fn upload(
    State(media): State<MediaIngest>,
    mut multipart: Multipart,
) -> AppResult<Json<Asset>> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_owned)
            .ok_or_else(|| AppError::BadRequest("file field without a file name".to_owned()))?;
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?;

        return Ok(Json(media.store(&filename, &bytes).await?));
    }

    Err(AppError::BadRequest("missing file field".to_owned()))
}
