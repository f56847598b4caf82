//! JSON API handlers. Wire field names match the dashboard client.

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use paircast_core::Error;

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct NumberRequest {
    pub number: String,
}

#[derive(Debug, Serialize)]
pub struct PairResponse {
    #[serde(rename = "pairingCode")]
    pub pairing_code: String,
    #[serde(rename = "isNewUser")]
    pub is_new_user: bool,
}

fn error_response(e: Error) -> (StatusCode, Json<Value>) {
    let status = match e {
        Error::InvalidNumber(_) => StatusCode::BAD_REQUEST,
        Error::SessionNotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": e.to_string() })))
}

/// POST /api/pair `{number}` -> `{pairingCode, isNewUser}`.
pub async fn pair(
    State(state): State<AppState>,
    Json(req): Json<NumberRequest>,
) -> Result<Json<PairResponse>, (StatusCode, Json<Value>)> {
    match state.pairing.request_pairing(&req.number).await {
        Ok(resp) => Ok(Json(PairResponse {
            pairing_code: resp.code,
            is_new_user: resp.is_new_user,
        })),
        Err(e) => {
            tracing::warn!(number = %req.number, error = %e, "pairing request failed");
            Err(error_response(e))
        }
    }
}

/// POST /api/logout `{number}` -> `{success, number}`.
pub async fn logout(
    State(state): State<AppState>,
    Json(req): Json<NumberRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    match state.lifecycle.logout(&req.number).await {
        Ok(id) => Ok(Json(json!({ "success": true, "number": id.to_string() }))),
        Err(e) => {
            tracing::warn!(number = %req.number, error = %e, "logout failed");
            Err(error_response(e))
        }
    }
}

/// GET /api/commands -> `{commands, total}`. Patterns only; aliases are
/// lookup keys, not separate commands.
pub async fn commands(State(state): State<AppState>) -> Json<Value> {
    let patterns = state.commands.patterns();
    Json(json!({ "total": patterns.len(), "commands": patterns }))
}
