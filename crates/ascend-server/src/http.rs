//! HTTP API
//!
//! - `POST /api/v1/sync` - one exchange; bearer token subject must match `identityId`
//! - `GET /health` - liveness

use std::sync::Arc;

use ascend_types::{SyncRequest, SyncResponse, SYNC_PATH};
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap},
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::auth::{extract_token_from_header, JwtValidator};
use crate::db::RemoteDb;
use crate::error::ServerError;
use crate::merge::merge_exchange;

/// Shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<RemoteDb>,
    pub jwt: Arc<JwtValidator>,
}

impl AppState {
    pub fn new(db: RemoteDb, jwt: JwtValidator) -> Self {
        Self {
            db: Arc::new(db),
            jwt: Arc::new(jwt),
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(SYNC_PATH, post(sync))
        .route("/health", get(health))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

/// POST /api/v1/sync
async fn sync(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<SyncResponse>, ServerError> {
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let token = extract_token_from_header(auth)
        .ok_or_else(|| ServerError::Unauthorized("Missing bearer token".into()))?;
    let claims = state.jwt.verify_token(token)?;

    let request: SyncRequest = serde_json::from_slice(&body)
        .map_err(|e| ServerError::BadRequest(format!("Invalid sync payload: {}", e)))?;

    if claims.sub != request.identity_id {
        warn!(subject = %claims.sub, identity = %request.identity_id, "Token subject mismatch");
        return Err(ServerError::Forbidden(
            "Token does not grant access to this identity".into(),
        ));
    }

    let db = state.db.clone();
    let (response, report) = tokio::task::spawn_blocking(move || {
        db.with_conn_mut(|conn| merge_exchange(conn, &request))
    })
    .await
    .map_err(|e| ServerError::Internal(format!("Merge task failed: {}", e)))?
    .inspect_err(|e| warn!(identity = %claims.sub, error = %e, "Merge failed"))?;

    info!(
        identity = %claims.sub,
        habits = report.habits_upserted,
        journal = report.journal_upserted,
        focus_inserted = report.focus_inserted,
        focus_skipped = report.focus_skipped,
        trades_inserted = report.trades_inserted,
        trades_skipped = report.trades_skipped,
        xp_total = report.xp_total,
        "Exchange merged"
    );

    Ok(Json(response))
}
