use axum::{
    Json,
    extract::{Query, State},
};
use chrono::{DateTime, Utc};
use mdview_core::WatchError;
use serde::Serialize;

use crate::{errors::AppResult, handlers::watch::WatchQuery, infra::app_state::AppState};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadataResponse {
    pub file_path: String,
    pub last_modified: Option<DateTime<Utc>>,
    pub size: u64,
}

/// `GET /api/file?path=<rel>`. Clients call this after reconnecting to
/// decide whether they missed a change while the channel was down.
pub async fn file_metadata_handler(
    State(state): State<AppState>,
    Query(query): Query<WatchQuery>,
) -> AppResult<Json<FileMetadataResponse>> {
    let requested = query.path.unwrap_or_default();
    let target = state.lifecycle().resolve_file(&requested).await?;
    let metadata = match tokio::fs::metadata(target.root_path()).await {
        Ok(metadata) => metadata,
        // Deleted between resolution and stat.
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(WatchError::TargetMissing(target.root_path().to_path_buf()).into());
        }
        Err(err) => return Err(WatchError::from(err).into()),
    };

    Ok(Json(FileMetadataResponse {
        file_path: target.label().to_string(),
        last_modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        size: metadata.len(),
    }))
}
