//! Library CRUD and the sync trigger/status/cancel surface.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, Result};
use crate::models::{
    CreateLibraryRequest, SyncStatus, SyncType, TriggerSyncRequest, UpdateLibraryRequest,
    UserLibrary,
};
use crate::services::catalog::SyncCatalog;
use crate::services::job_queue::{JobFunction, QueueName};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_page() -> u32 {
    1
}

fn default_limit() -> u32 {
    20
}

#[derive(Debug, Serialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub page: u32,
    pub pages: u32,
    pub total: i64,
}

impl<T> Paginated<T> {
    pub fn new(data: Vec<T>, page: u32, limit: u32, total: i64) -> Self {
        let pages = ((total as f64) / (limit.max(1) as f64)).ceil() as u32;
        Self {
            data,
            page,
            pages,
            total,
        }
    }
}

pub async fn list_libraries(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Paginated<UserLibrary>>> {
    let limit = query.limit.clamp(1, 100);
    let (libraries, total) = state.store.list_libraries(query.page.max(1), limit).await?;
    Ok(Json(Paginated::new(libraries, query.page.max(1), limit, total)))
}

pub async fn create_library(
    State(state): State<AppState>,
    Json(request): Json<CreateLibraryRequest>,
) -> Result<(StatusCode, Json<UserLibrary>)> {
    request.validate()?;
    let library = state.store.create_library(&request).await?;
    Ok((StatusCode::CREATED, Json(library)))
}

pub async fn get_library(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<UserLibrary>> {
    Ok(Json(state.store.get_library(id).await?))
}

pub async fn update_library(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateLibraryRequest>,
) -> Result<Json<UserLibrary>> {
    request.validate()?;
    Ok(Json(state.store.update_library(id, &request).await?))
}

pub async fn delete_library(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    state.store.delete_library(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct SyncAccepted {
    pub job_id: Uuid,
    pub library_id: Uuid,
    pub queue: &'static str,
}

/// Enqueue a sync job. A held lock yields 409 with the running operation id
/// unless `force` is set, in which case the lock is broken first.
pub async fn trigger_sync(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<TriggerSyncRequest>,
) -> Result<(StatusCode, Json<SyncAccepted>)> {
    let library = state.store.get_library(id).await?;

    let sync_type = SyncType::parse(&request.sync_type).ok_or_else(|| AppError::InvalidField {
        field: "sync_type".to_string(),
        message: format!("unknown sync type {:?}", request.sync_type),
    })?;

    if state.sync_state.is_syncing(id).await? {
        if !request.force {
            let operation_id = state.store.running_operation(id).await?;
            return Err(AppError::SyncAlreadyInProgress { operation_id });
        }
        state.sync_state.release_lock(id).await?;
    }

    let queue = match sync_type {
        SyncType::ManualSync => QueueName::High,
        _ => QueueName::Default,
    };
    let job_id = state
        .queue
        .enqueue(
            queue,
            JobFunction::LibrarySync {
                library_id: id,
                force: request.force,
                sync_type: sync_type.as_str().to_string(),
            },
            None,
        )
        .await?;

    state
        .store
        .set_library_status(id, SyncStatus::Queued, None)
        .await?;

    tracing::info!(
        library_id = %library.id,
        job_id = %job_id,
        queue = queue.as_str(),
        "sync job enqueued"
    );
    Ok((
        StatusCode::ACCEPTED,
        Json(SyncAccepted {
            job_id,
            library_id: id,
            queue: queue.as_str(),
        }),
    ))
}

/// Latest progress: tracker snapshot first, library row as the fallback once
/// the snapshot TTL lapses.
pub async fn sync_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>> {
    if let Some(event) = state.progress.latest(id).await? {
        return Ok(Json(serde_json::to_value(event)?));
    }

    let library = state.store.get_library(id).await?;
    let operation = state.store.latest_operation(id).await?;
    Ok(Json(serde_json::json!({
        "library_id": library.id,
        "status": library.sync_status,
        "error": library.sync_error,
        "last_sync_at": library.last_sync_at,
        "operation": operation,
    })))
}

/// Cancellation is deleting the lock; the worker notices at the next batch
/// boundary and checkpoints.
pub async fn cancel_sync(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    state.store.get_library(id).await?;
    state.sync_state.release_lock(id).await?;
    Ok(StatusCode::ACCEPTED)
}
