//! Document store routes.

use armory_engine::wire::{
    BatchDeleteRequest, BatchDeleteResponse, IncrementRequest, IncrementResponse, InsertResponse,
};
use armory_engine::{Document, Fields};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

use crate::auth::StoreAccess;
use crate::error::Result;
use crate::handlers::{
    handle_batch_delete, handle_delete, handle_get, handle_increment, handle_insert, handle_list,
    handle_set, handle_update, parse_topic, ListParams,
};
use crate::AppState;

/// Create store routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/{topic}", get(list_handler).post(insert_handler))
        .route("/v1/{topic}/batch-delete", post(batch_delete_handler))
        .route(
            "/v1/{topic}/{id}",
            get(get_handler)
                .patch(update_handler)
                .put(set_handler)
                .delete(delete_handler),
        )
        .route("/v1/{topic}/{id}/increment", post(increment_handler))
}

/// GET /v1/{topic} - List or query a collection.
async fn list_handler(
    State(state): State<AppState>,
    _access: StoreAccess,
    Path(topic): Path<String>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Document>>> {
    let topic = parse_topic(&topic)?;
    Ok(Json(handle_list(state.store.as_ref(), topic, params).await?))
}

/// POST /v1/{topic} - Insert with a generated id.
async fn insert_handler(
    State(state): State<AppState>,
    _access: StoreAccess,
    Path(topic): Path<String>,
    Json(fields): Json<Fields>,
) -> Result<(StatusCode, Json<InsertResponse>)> {
    let topic = parse_topic(&topic)?;
    let response = handle_insert(state.store.as_ref(), topic, fields).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /v1/{topic}/{id}
async fn get_handler(
    State(state): State<AppState>,
    _access: StoreAccess,
    Path((topic, id)): Path<(String, String)>,
) -> Result<Json<Document>> {
    let topic = parse_topic(&topic)?;
    Ok(Json(handle_get(state.store.as_ref(), topic, &id).await?))
}

/// PATCH /v1/{topic}/{id} - Merge fields into an existing document.
async fn update_handler(
    State(state): State<AppState>,
    _access: StoreAccess,
    Path((topic, id)): Path<(String, String)>,
    Json(fields): Json<Fields>,
) -> Result<StatusCode> {
    let topic = parse_topic(&topic)?;
    handle_update(state.store.as_ref(), topic, &id, fields).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /v1/{topic}/{id} - Create or overwrite.
async fn set_handler(
    State(state): State<AppState>,
    _access: StoreAccess,
    Path((topic, id)): Path<(String, String)>,
    Json(fields): Json<Fields>,
) -> Result<StatusCode> {
    let topic = parse_topic(&topic)?;
    handle_set(state.store.as_ref(), topic, &id, fields).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /v1/{topic}/{id}
async fn delete_handler(
    State(state): State<AppState>,
    _access: StoreAccess,
    Path((topic, id)): Path<(String, String)>,
) -> Result<StatusCode> {
    let topic = parse_topic(&topic)?;
    handle_delete(state.store.as_ref(), topic, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /v1/{topic}/{id}/increment - Atomic numeric increment.
async fn increment_handler(
    State(state): State<AppState>,
    _access: StoreAccess,
    Path((topic, id)): Path<(String, String)>,
    Json(request): Json<IncrementRequest>,
) -> Result<Json<IncrementResponse>> {
    let topic = parse_topic(&topic)?;
    Ok(Json(
        handle_increment(state.store.as_ref(), topic, &id, request).await?,
    ))
}

/// POST /v1/{topic}/batch-delete
async fn batch_delete_handler(
    State(state): State<AppState>,
    access: StoreAccess,
    Path(topic): Path<String>,
    Json(request): Json<BatchDeleteRequest>,
) -> Result<Json<BatchDeleteResponse>> {
    let topic = parse_topic(&topic)?;
    tracing::debug!(access = access.label(), topic = %topic, "batch delete requested");
    Ok(Json(
        handle_batch_delete(state.store.as_ref(), topic, request).await?,
    ))
}
