use axum::{
    extract::{DefaultBodyLimit, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{delete, get, post},
    Json, Router,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use pouch_blob::{AssetType, PrincipalId, UploadToken};
use pouch_core::errors::PouchError;

use crate::error::ApiError;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    // Append chunks may be as large as the configured session cap, so
    // the body limit tracks it instead of axum's 2MB default. Headroom
    // over the cap lets a chunk just past it reach the gateway and get
    // its BadRequest instead of a bare 413.
    let body_limit = (state.gateway.config().max_upload_bytes as usize).saturating_add(1024);

    Router::new()
        .route("/upload/handshake", post(handshake))
        .route("/upload/append", post(append))
        .route("/upload/status", get(status))
        .route("/upload/delete", delete(remove))
        .route("/upload/finalize", post(finalize))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}

/// The caller's identity, stamped by the upstream auth proxy.
fn principal(headers: &HeaderMap) -> Result<PrincipalId, ApiError> {
    let id = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| PouchError::not_authenticated("Missing x-user-id header"))?;
    Ok(PrincipalId::from_string(id.to_string()))
}

#[derive(Debug, Deserialize)]
struct HandshakeBody {
    file_name: String,
}

#[derive(Debug, Serialize)]
struct HandshakeResponse {
    file_token: String,
}

async fn handshake(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<HandshakeBody>,
) -> Result<(StatusCode, Json<HandshakeResponse>), ApiError> {
    let owner = principal(&headers)?;
    let token = state.gateway.handshake(&owner, &body.file_name).await?;
    Ok((
        StatusCode::CREATED,
        Json(HandshakeResponse {
            file_token: token.0,
        }),
    ))
}

#[derive(Debug, Deserialize)]
struct SessionParams {
    token: String,
    file_name: String,
}

#[derive(Debug, Serialize)]
struct AppendResponse {
    bytes_persisted: u64,
}

async fn append(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<SessionParams>,
    body: Bytes,
) -> Result<Json<AppendResponse>, ApiError> {
    principal(&headers)?;
    let token = UploadToken::from_string(params.token);
    let total = state
        .gateway
        .append(&token, &params.file_name, body)
        .await?;
    Ok(Json(AppendResponse {
        bytes_persisted: total,
    }))
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    total_chunk_uploaded: u64,
}

async fn status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<SessionParams>,
) -> Result<Json<StatusResponse>, ApiError> {
    principal(&headers)?;
    let token = UploadToken::from_string(params.token);
    let total = state.gateway.status(&token, &params.file_name).await?;
    Ok(Json(StatusResponse {
        total_chunk_uploaded: total,
    }))
}

async fn remove(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<SessionParams>,
) -> Result<StatusCode, ApiError> {
    principal(&headers)?;
    let token = UploadToken::from_string(params.token);
    state.gateway.remove(&token, &params.file_name).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct FinalizeParams {
    token: String,
    file_name: String,
    asset_type: String,
}

#[derive(Debug, Serialize)]
struct FinalizeResponse {
    path: String,
}

async fn finalize(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<FinalizeParams>,
) -> Result<Json<FinalizeResponse>, ApiError> {
    principal(&headers)?;
    let asset_type: AssetType = params
        .asset_type
        .parse()
        .map_err(|e: String| ApiError::from(PouchError::bad_request(e)))?;
    let token = UploadToken::from_string(params.token);
    let path = state
        .gateway
        .finalize(&token, &params.file_name, asset_type)
        .await?;
    Ok(Json(FinalizeResponse { path }))
}
