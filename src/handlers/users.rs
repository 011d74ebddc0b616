//! # User Handlers
//!
//! Profile of the logged-in user, including the passkeys they own.

use crate::db::users;
use crate::error::{AppError, AppResult};
use crate::handlers::{session_error, SESSION_USER_ID};
use crate::state::AppState;
use crate::webauthn::b64;
use axum::{extract::State, Json};
use serde_json::{json, Value};
use tower_sessions::Session;

/// Get current authenticated user's profile
///
/// ## Route
/// GET /api/users/me (protected by `require_auth`)
///
/// ## Response
/// ```json
/// {
///   "id": "550e8400-e29b-41d4-a716-446655440000",
///   "username": "alice",
///   "display_name": "Alice Smith",
///   "created_at": "2024-01-15T10:30:00Z",
///   "credentials": [
///     { "credential_id": "q83v", "counter": 4, "transports": ["internal"],
///       "created_at": "...", "last_used_at": "..." }
///   ]
/// }
/// ```
///
/// Public keys are never returned.
pub async fn get_current_user(
    State(state): State<AppState>,
    session: Session,
) -> AppResult<Json<Value>> {
    let user_id: String = session
        .get(SESSION_USER_ID)
        .await
        .map_err(session_error)?
        .ok_or_else(|| AppError::Unauthorized("Not authenticated".to_string()))?;

    let user = users::find_by_id(&state.db, &user_id).await?;

    let credentials: Vec<Value> = state
        .engine
        .credentials()
        .list_for_identity(&user.id)
        .await?
        .into_iter()
        .map(|c| {
            json!({
                "credential_id": b64::encode(&c.credential_id),
                "counter": c.counter,
                "transports": c.transports,
                "created_at": c.created_at.to_rfc3339(),
                "last_used_at": c.last_used_at.map(|t| t.to_rfc3339()),
            })
        })
        .collect();

    Ok(Json(json!({
        "id": user.id,
        "username": user.username,
        "display_name": user.display_name,
        "created_at": user.created_at,
        "credentials": credentials,
    })))
}
