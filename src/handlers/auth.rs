//! # Ceremony Endpoints
//!
//! Thin HTTP wrappers around the ceremony engine. They resolve identities,
//! pin them in the session between start and finish, and decide what the
//! user sees.

use crate::db::models::Identity;
use crate::db::users;
use crate::error::{AppError, AppResult};
use crate::handlers::{
    session_error, SESSION_PENDING_AUTHENTICATION, SESSION_PENDING_REGISTRATION, SESSION_USER_ID,
};
use crate::state::AppState;
use crate::webauthn::b64;
use crate::webauthn::types::*;
use axum::{extract::State, Json};
use serde_json::{json, Value};
use tower_sessions::Session;

// Registration endpoints

/// Start registering a passkey
///
/// ## Route
/// POST /api/auth/register/start
///
/// Unknown usernames get a new identity. A passkey can only be added to an
/// identity that already has passkeys from a session logged in as it.
pub async fn register_start(
    State(state): State<AppState>,
    session: Session,
    Json(req): Json<RegistrationStartRequest>,
) -> AppResult<Json<RegistrationOptions>> {
    let username = req.username.trim();
    if username.is_empty() {
        return Err(AppError::BadRequest("Username is required".to_string()));
    }
    let display_name = match req.display_name.trim() {
        "" => username,
        name => name,
    };

    let identity = resolve_registrant(&state, &session, username, display_name).await?;
    let options = state.engine.begin_registration(&identity).await?;

    session
        .insert(SESSION_PENDING_REGISTRATION, &identity.id)
        .await
        .map_err(session_error)?;

    Ok(Json(options))
}

/// Find or create the identity a registration is for
async fn resolve_registrant(
    state: &AppState,
    session: &Session,
    username: &str,
    display_name: &str,
) -> AppResult<Identity> {
    let existing = match users::find_by_username(&state.db, username).await {
        Ok(identity) => identity,
        Err(AppError::NotFound(_)) => {
            let identity = users::create_user(&state.db, username, display_name).await?;
            tracing::info!(identity = %identity.id, "Created identity for {}", username);
            return Ok(identity);
        }
        Err(e) => return Err(e),
    };

    // An identity without passkeys is an abandoned registration; let it resume
    let owned = state
        .engine
        .credentials()
        .list_for_identity(&existing.id)
        .await?;
    if owned.is_empty() {
        return Ok(existing);
    }

    let logged_in: Option<String> = session.get(SESSION_USER_ID).await.map_err(session_error)?;
    if logged_in.as_deref() == Some(existing.id.as_str()) {
        Ok(existing)
    } else {
        Err(AppError::BadRequest(format!(
            "User '{}' already exists",
            username
        )))
    }
}

/// Finish registering a passkey
///
/// ## Route
/// POST /api/auth/register/finish
///
/// ## Request
/// The `PublicKeyCredential` from `navigator.credentials.create()`, with
/// binary fields base64url-encoded
pub async fn register_finish(
    State(state): State<AppState>,
    session: Session,
    Json(response): Json<RegistrationResponse>,
) -> AppResult<Json<Value>> {
    let identity = pinned_identity(&state, &session, SESSION_PENDING_REGISTRATION).await?;

    let verified = state
        .engine
        .finish_registration(&identity, &response)
        .await?;

    session
        .remove::<String>(SESSION_PENDING_REGISTRATION)
        .await
        .map_err(session_error)?;

    Ok(Json(json!({
        "verified": true,
        "credential_id": b64::encode(&verified.credential_id),
        "counter": verified.counter,
    })))
}

// Authentication endpoints

/// Start signing in
///
/// ## Route
/// POST /api/auth/authenticate/start
pub async fn authenticate_start(
    State(state): State<AppState>,
    session: Session,
    Json(req): Json<AuthenticationStartRequest>,
) -> AppResult<Json<AuthenticationOptions>> {
    let identity = users::find_by_username(&state.db, req.username.trim()).await?;
    let options = state.engine.begin_authentication(&identity).await?;

    if options.allow_credentials.is_empty() {
        return Err(AppError::NoCredentialsRegistered(identity.username));
    }

    session
        .insert(SESSION_PENDING_AUTHENTICATION, &identity.id)
        .await
        .map_err(session_error)?;

    Ok(Json(options))
}

/// Finish signing in and start a logged-in session
///
/// ## Route
/// POST /api/auth/authenticate/finish
pub async fn authenticate_finish(
    State(state): State<AppState>,
    session: Session,
    Json(response): Json<AuthenticationResponse>,
) -> AppResult<Json<Value>> {
    let identity = pinned_identity(&state, &session, SESSION_PENDING_AUTHENTICATION).await?;

    let verified = state
        .engine
        .finish_authentication(&identity, &response)
        .await?;

    // New session id on privilege change
    session.cycle_id().await.map_err(session_error)?;
    session
        .remove::<String>(SESSION_PENDING_AUTHENTICATION)
        .await
        .map_err(session_error)?;
    session
        .insert(SESSION_USER_ID, &identity.id)
        .await
        .map_err(session_error)?;

    tracing::info!(identity = %identity.id, "User logged in");

    Ok(Json(json!({
        "verified": true,
        "user_id": identity.id,
        "counter": verified.new_counter,
    })))
}

/// Identity a start call pinned in this session under `key`
async fn pinned_identity(state: &AppState, session: &Session, key: &str) -> AppResult<Identity> {
    let identity_id: String = session
        .get(key)
        .await
        .map_err(session_error)?
        .ok_or_else(|| AppError::Unauthorized("No ceremony in progress".to_string()))?;

    users::find_by_id(&state.db, &identity_id).await
}

// Session endpoints

pub async fn logout(session: Session) -> AppResult<Json<Value>> {
    session.flush().await.map_err(session_error)?;

    Ok(Json(json!({
        "success": true,
        "message": "Logged out successfully"
    })))
}

pub async fn session_info(session: Session) -> AppResult<Json<Value>> {
    let user_id: Option<String> = session.get(SESSION_USER_ID).await.map_err(session_error)?;

    match user_id {
        Some(id) => Ok(Json(json!({
            "authenticated": true,
            "user_id": id
        }))),
        None => Ok(Json(json!({
            "authenticated": false
        }))),
    }
}
