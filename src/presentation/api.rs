use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::application::{DeleteMediaUseCase, ListFilesUseCase, SyncCatalogUseCase, SyncReport};
use crate::config::{AccessPolicy, MediaRoot};
use crate::domain::{CatalogRepository, DomainError, FileQuery, ItemType, MediaType};

// App State
#[derive(Clone)]
pub struct AppState {
    pub list_use_case: Arc<ListFilesUseCase>,
    pub delete_use_case: Arc<DeleteMediaUseCase>,
    pub sync_use_case: Arc<SyncCatalogUseCase>,
    pub repo: Arc<dyn CatalogRepository>,
    pub access: Arc<AccessPolicy>,
    pub roots: Arc<Vec<MediaRoot>>,
    pub shutdown: CancellationToken,
}

const USER_HEADER: &str = "x-user-id";

/// Caller identity as asserted by the (external) auth layer in front of us.
fn user_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn parse_media_types(raw: Option<&str>) -> Vec<MediaType> {
    raw.map(|s| s.split(',').filter_map(MediaType::parse).collect())
        .unwrap_or_default()
}

#[derive(Deserialize)]
pub struct FilesParams {
    pub folder: Option<String>,
    pub recursive: Option<bool>,
    /// Comma-separated
    pub media_type: Option<String>,
    pub exclude_media_type: Option<String>,
    pub source_id: Option<String>,
    pub random: Option<bool>,
    pub favorites: Option<bool>,
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

async fn list_files_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<FilesParams>,
) -> Result<impl IntoResponse, DomainError> {
    let user = user_id(&headers);
    let query = FileQuery {
        folder_path: params.folder,
        recursive: params.recursive.unwrap_or(false),
        media_types: parse_media_types(params.media_type.as_deref()),
        exclude_media_types: parse_media_types(params.exclude_media_type.as_deref()),
        source_id: params.source_id,
        random: params.random.unwrap_or(false),
        allowed_paths: state.access.allowed_paths(user.as_deref()),
        user_id: user,
        ..Default::default()
    };
    let page = params.page.unwrap_or(1);
    let limit = params.limit.unwrap_or(100).min(1000);

    let results = state
        .list_use_case
        .execute(query, page, limit, params.favorites.unwrap_or(false))
        .await?;
    Ok(Json(results))
}

#[derive(Deserialize)]
pub struct FoldersParams {
    pub parent: Option<String>,
    pub favorites_only: Option<bool>,
}

async fn list_folders_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<FoldersParams>,
) -> Result<impl IntoResponse, DomainError> {
    let user = user_id(&headers);
    let allowed = state.access.allowed_paths(user.as_deref());
    let folders = state.repo.query_folders(
        params.parent.as_deref().unwrap_or(""),
        params.favorites_only.unwrap_or(false),
        user.as_deref(),
        allowed.as_deref(),
    )?;
    Ok(Json(json!({ "folders": folders })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleFavoriteRequest {
    pub item_id: String,
    pub item_type: ItemType,
}

async fn toggle_favorite_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ToggleFavoriteRequest>,
) -> Result<impl IntoResponse, DomainError> {
    let Some(user) = user_id(&headers) else {
        return Ok((
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Missing user" })),
        ));
    };
    let is_favorite = state
        .repo
        .toggle_favorite(&user, &payload.item_id, payload.item_type)?;
    Ok((StatusCode::OK, Json(json!({ "isFavorite": is_favorite }))))
}

async fn list_favorites_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, DomainError> {
    let Some(user) = user_id(&headers) else {
        return Ok(Json(json!({ "files": [], "folders": [] })));
    };
    let ids = state.repo.list_favorite_ids(&user)?;
    Ok(Json(json!(ids)))
}

#[derive(Deserialize)]
pub struct PageParams {
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

async fn list_favorite_files_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<PageParams>,
) -> Result<impl IntoResponse, DomainError> {
    let user = user_id(&headers);
    let query = FileQuery {
        allowed_paths: state.access.allowed_paths(user.as_deref()),
        user_id: user,
        ..Default::default()
    };
    let results = state
        .list_use_case
        .execute(
            query,
            params.page.unwrap_or(1),
            params.limit.unwrap_or(100).min(1000),
            true,
        )
        .await?;
    Ok(Json(results))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameRequest {
    pub old_path: String,
    pub new_path: String,
    #[serde(default)]
    pub new_name: String,
}

async fn rename_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<RenameRequest>,
) -> impl IntoResponse {
    let user = user_id(&headers);
    if !state.access.permits(user.as_deref(), &payload.old_path)
        || !state.access.permits(user.as_deref(), &payload.new_path)
    {
        return Json(json!({ "ok": false }));
    }
    let ok = match state
        .repo
        .rename(&payload.old_path, &payload.new_path, &payload.new_name)
    {
        Ok(_) => true,
        Err(e) => {
            warn!(
                "Rename {} -> {} failed: {}",
                payload.old_path, payload.new_path, e
            );
            false
        }
    };
    Json(json!({ "ok": ok }))
}

#[derive(Deserialize)]
pub struct PathParams {
    pub path: String,
}

async fn delete_file_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<PathParams>,
) -> Result<impl IntoResponse, DomainError> {
    if !state.access.permits(user_id(&headers).as_deref(), &params.path) {
        return Err(DomainError::NotFound);
    }
    state.delete_use_case.execute(&params.path).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_folder_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<PathParams>,
) -> Result<impl IntoResponse, DomainError> {
    if !state.access.permits(user_id(&headers).as_deref(), &params.path) {
        return Err(DomainError::NotFound);
    }
    let deleted = state.delete_use_case.execute_folder(&params.path).await?;
    Ok(Json(json!({ "deleted": deleted })))
}

async fn stats_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, DomainError> {
    let allowed = state.access.allowed_paths(user_id(&headers).as_deref());
    let stats = state.repo.get_stats(allowed.as_deref())?;
    Ok(Json(stats))
}

async fn sync_handler(State(state): State<AppState>) -> Result<impl IntoResponse, DomainError> {
    let reports = sync_roots(&state.sync_use_case, &state.roots, &state.shutdown).await;
    Ok(Json(reports))
}

/// Syncs each configured root in turn; one failing root does not stop the rest.
pub async fn sync_roots(
    sync: &SyncCatalogUseCase,
    roots: &[MediaRoot],
    cancel: &CancellationToken,
) -> Vec<SyncReport> {
    let mut reports = Vec::with_capacity(roots.len());
    for root in roots {
        if cancel.is_cancelled() {
            break;
        }
        match sync.execute(root.path.clone(), &root.source_id, cancel).await {
            Ok(report) => reports.push(report),
            Err(e) => error!("Sync of {} ({}) failed: {}", root.source_id, root.path.display(), e),
        }
    }
    reports
}

// Error handling
impl IntoResponse for DomainError {
    fn into_response(self) -> axum::response::Response {
        // Log the error for debugging
        match &self {
            DomainError::NotFound | DomainError::Conflict(_) | DomainError::InvalidRecord(_) => {}
            DomainError::Database(e) => error!("Database Error: {}", e),
            DomainError::Schema(e) => error!("Schema Error: {}", e),
            DomainError::Transaction(e) => error!("Transaction Error: {}", e),
            DomainError::Persistence(e) => error!("Persistence Error: {}", e),
            DomainError::ReadOnly => error!("Write rejected: catalog is read-only"),
            DomainError::Io(e) => error!("IO Error: {}", e),
        }

        let (status, message) = match self {
            DomainError::NotFound => (StatusCode::NOT_FOUND, "Not found"),
            DomainError::Conflict(_) => (StatusCode::CONFLICT, "Path already exists"),
            DomainError::InvalidRecord(_) => (StatusCode::BAD_REQUEST, "Invalid record"),
            DomainError::ReadOnly => (StatusCode::SERVICE_UNAVAILABLE, "Catalog is read-only"),
            DomainError::Database(_)
            | DomainError::Schema(_)
            | DomainError::Transaction(_)
            | DomainError::Persistence(_)
            | DomainError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Catalog error"),
        };

        let body = Json(json!({ "error": message }));
        (status, body).into_response()
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/files", get(list_files_handler).delete(delete_file_handler))
        .route("/files/rename", post(rename_handler))
        .route("/folders", get(list_folders_handler).delete(delete_folder_handler))
        .route("/favorites", get(list_favorites_handler))
        .route("/favorites/files", get(list_favorite_files_handler))
        .route("/favorites/toggle", post(toggle_favorite_handler))
        .route("/stats", get(stats_handler))
        .route("/sync", post(sync_handler))
        .with_state(state)
}
