use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::error;

use crate::error::{MutationError, ReaderError, SyncError};
use crate::models::{Folder, Settings};
use crate::reader::{ArticleEntry, Reader};
use crate::state::{FolderSelection, Mutation, View};
use crate::sync::{SyncOutcome, SyncStatus};

pub struct AppState {
    pub reader: Arc<Reader>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/state", get(get_state))
        .route("/api/folders", post(create_folder))
        .route(
            "/api/folders/:id",
            patch(rename_folder).delete(delete_folder),
        )
        .route(
            "/api/folders/:id/feeds",
            post(add_feed).patch(rename_feed).delete(remove_feed),
        )
        .route("/api/view", put(set_view))
        .route("/api/hide-read", put(set_hide_read))
        .route("/api/settings", patch(update_settings))
        .route("/api/articles", get(list_articles))
        .route("/api/articles/open", post(open_article))
        .route("/api/articles/read", post(mark_read))
        .route("/api/articles/read-all", post(mark_all_read))
        .route("/api/sync/connect", post(sync_connect))
        .route("/api/sync/disconnect", post(sync_disconnect))
        .route("/api/sync/push", post(sync_push))
        .route("/api/sync/pull", post(sync_pull))
        .route("/api/sync/status", get(sync_status))
        .with_state(state)
}

// Errors become `{"error": "..."}` with a status matching the cause
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    NotFound(String),
    Upstream(String),
    Internal(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            AppError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            AppError::Upstream(message) => (StatusCode::BAD_GATEWAY, message),
            AppError::Internal(err) => {
                error!(error = %err, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<MutationError> for AppError {
    fn from(err: MutationError) -> Self {
        match err {
            MutationError::UnknownFolder(_) | MutationError::UnknownFeed(_) => {
                AppError::NotFound(err.to_string())
            }
            _ => AppError::BadRequest(err.to_string()),
        }
    }
}

impl From<ReaderError> for AppError {
    fn from(err: ReaderError) -> Self {
        match err {
            ReaderError::Mutation(err) => err.into(),
            ReaderError::Store(err) => AppError::Internal(err),
        }
    }
}

impl From<SyncError> for AppError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::InvalidToken(_) => AppError::BadRequest(err.to_string()),
            SyncError::Store(err) => AppError::Internal(err),
            _ => AppError::Upstream(err.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FeedView {
    pub url: String,
    pub name: Option<String>,
    /// What the sidebar shows: the display name, else the feed's host
    pub label: String,
}

#[derive(Debug, Serialize)]
pub struct FolderView {
    pub id: String,
    pub name: String,
    pub feeds: Vec<FeedView>,
}

impl From<Folder> for FolderView {
    fn from(folder: Folder) -> Self {
        let feeds = folder
            .feeds
            .into_iter()
            .map(|feed| FeedView {
                label: feed.label(),
                url: feed.url,
                name: feed.display_name,
            })
            .collect();
        Self {
            id: folder.id,
            name: folder.name,
            feeds,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateResponse {
    pub folders: Vec<FolderView>,
    pub view: View,
    pub hide_read: bool,
    pub settings: Settings,
    pub read_count: usize,
    pub sync: SyncStatus,
}

async fn state_response(reader: &Reader) -> StateResponse {
    let state = reader.snapshot().await;
    StateResponse {
        folders: state.folders.into_iter().map(FolderView::from).collect(),
        view: state.view,
        hide_read: state.hide_read,
        settings: state.settings,
        read_count: state.read_articles.len(),
        sync: reader.sync().status().await,
    }
}

/// Apply one mutation and answer with the resulting state.
async fn mutate(state: &AppState, mutation: Mutation) -> Result<Json<StateResponse>, AppError> {
    state.reader.apply(mutation).await?;
    Ok(Json(state_response(&state.reader).await))
}

pub async fn health() -> impl IntoResponse {
    "OK"
}

pub async fn get_state(State(state): State<Arc<AppState>>) -> Json<StateResponse> {
    Json(state_response(&state.reader).await)
}

#[derive(Debug, Deserialize)]
pub struct FolderRequest {
    pub name: String,
}

pub async fn create_folder(
    State(state): State<Arc<AppState>>,
    Json(body): Json<FolderRequest>,
) -> Result<Json<StateResponse>, AppError> {
    mutate(&state, Mutation::CreateFolder { name: body.name }).await
}

pub async fn rename_folder(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<FolderRequest>,
) -> Result<Json<StateResponse>, AppError> {
    mutate(&state, Mutation::RenameFolder { id, name: body.name }).await
}

pub async fn delete_folder(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<StateResponse>, AppError> {
    mutate(&state, Mutation::DeleteFolder { id }).await
}

#[derive(Debug, Deserialize)]
pub struct FeedRequest {
    pub url: String,
    #[serde(default)]
    pub name: Option<String>,
}

pub async fn add_feed(
    State(state): State<Arc<AppState>>,
    Path(folder_id): Path<String>,
    Json(body): Json<FeedRequest>,
) -> Result<Json<StateResponse>, AppError> {
    let mutation = Mutation::AddFeed {
        folder_id,
        url: body.url,
        display_name: body.name,
    };
    mutate(&state, mutation).await
}

pub async fn rename_feed(
    State(state): State<Arc<AppState>>,
    Path(folder_id): Path<String>,
    Json(body): Json<FeedRequest>,
) -> Result<Json<StateResponse>, AppError> {
    let mutation = Mutation::RenameFeed {
        folder_id,
        url: body.url,
        display_name: body.name,
    };
    mutate(&state, mutation).await
}

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    pub url: String,
}

pub async fn remove_feed(
    State(state): State<Arc<AppState>>,
    Path(folder_id): Path<String>,
    Query(query): Query<FeedQuery>,
) -> Result<Json<StateResponse>, AppError> {
    mutate(
        &state,
        Mutation::RemoveFeed {
            folder_id,
            url: query.url,
        },
    )
    .await
}

/// Omitting `folder` keeps the active folder; `source` is always replaced.
#[derive(Debug, Deserialize)]
pub struct ViewRequest {
    #[serde(default)]
    pub folder: Option<FolderSelection>,
    #[serde(default)]
    pub source: Option<String>,
}

pub async fn set_view(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ViewRequest>,
) -> Result<Json<StateResponse>, AppError> {
    let mutation = Mutation::SelectView {
        folder: body.folder,
        source: body.source,
    };
    mutate(&state, mutation).await
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HideReadRequest {
    pub hide_read: bool,
}

pub async fn set_hide_read(
    State(state): State<Arc<AppState>>,
    Json(body): Json<HideReadRequest>,
) -> Result<Json<StateResponse>, AppError> {
    mutate(&state, Mutation::SetHideRead(body.hide_read)).await
}

pub async fn update_settings(
    State(state): State<Arc<AppState>>,
    Json(patch): Json<Map<String, Value>>,
) -> Result<Json<StateResponse>, AppError> {
    mutate(&state, Mutation::UpdateSettings(patch)).await
}

#[derive(Debug, Serialize)]
pub struct ArticlesResponse {
    pub articles: Vec<ArticleEntry>,
}

pub async fn list_articles(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ArticlesResponse>, AppError> {
    state.reader.load_view().await?;
    Ok(Json(ArticlesResponse {
        articles: state.reader.visible_articles().await,
    }))
}

#[derive(Debug, Deserialize)]
pub struct OpenRequest {
    pub id: String,
}

pub async fn open_article(
    State(state): State<Arc<AppState>>,
    Json(body): Json<OpenRequest>,
) -> Result<impl IntoResponse, AppError> {
    match state.reader.open_article(&body.id).await? {
        Some(article) => Ok(Json(article)),
        None => Err(AppError::NotFound(format!(
            "article '{}' is not in the current view",
            body.id
        ))),
    }
}

#[derive(Debug, Deserialize)]
pub struct ReadRequest {
    pub ids: Vec<String>,
}

pub async fn mark_read(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ReadRequest>,
) -> Result<Json<StateResponse>, AppError> {
    mutate(&state, Mutation::MarkRead(body.ids)).await
}

pub async fn mark_all_read(
    State(state): State<Arc<AppState>>,
) -> Result<Json<StateResponse>, AppError> {
    state.reader.mark_all_read().await?;
    Ok(Json(state_response(&state.reader).await))
}

#[derive(Debug, Deserialize)]
pub struct ConnectRequest {
    pub token: String,
}

pub async fn sync_connect(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ConnectRequest>,
) -> Result<Json<SyncOutcome>, AppError> {
    let token = body.token.trim();
    if token.is_empty() {
        return Err(AppError::BadRequest("token is empty".to_string()));
    }
    Ok(Json(state.reader.connect(token).await?))
}

pub async fn sync_disconnect(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SyncStatusResponse>, AppError> {
    state.reader.disconnect().await?;
    Ok(Json(sync_status_response(&state.reader).await))
}

pub async fn sync_push(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SyncOutcome>, AppError> {
    Ok(Json(state.reader.push().await?))
}

pub async fn sync_pull(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SyncOutcome>, AppError> {
    Ok(Json(state.reader.pull().await?))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatusResponse {
    #[serde(flatten)]
    pub status: SyncStatus,
    pub configured: bool,
    pub syncing: bool,
    pub last_synced_at: Option<DateTime<Utc>>,
}

async fn sync_status_response(reader: &Reader) -> SyncStatusResponse {
    let sync = reader.sync();
    let credential = sync.credential().await;
    SyncStatusResponse {
        status: sync.status().await,
        configured: credential.is_configured(),
        syncing: sync.is_syncing().await,
        last_synced_at: credential.last_synced_at,
    }
}

pub async fn sync_status(State(state): State<Arc<AppState>>) -> Json<SyncStatusResponse> {
    Json(sync_status_response(&state.reader).await)
}
