//! # Passkey Relying-Party Server
//!
//! WebAuthn/passkey registration and authentication for a relying party.
//!
//! ## Key Concepts
//! - **Ceremony**: one begin/finish exchange (registration or authentication)
//! - **Challenge**: single-use, short-lived nonce binding a finish to its begin
//! - **Signature counter**: lets the server spot cloned authenticators
//!
//! The library exposes the ceremony engine and its stores; `create_router`
//! wires them into the HTTP API the binary serves.

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod state;
pub mod webauthn;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tower_sessions::{Expiry, SessionManagerLayer, SessionStore};

use crate::handlers::auth::*;
use crate::handlers::health::health_check;
use crate::handlers::users::get_current_user;
use crate::state::AppState;

/// Build the application router
///
/// Sessions are kept in `session_store` and expire after 24 hours of
/// inactivity. Anything that isn't an API route is served from `static/`.
pub fn create_router<S>(state: AppState, session_store: S) -> Router
where
    S: SessionStore + Clone,
{
    let session_layer = SessionManagerLayer::new(session_store)
        .with_expiry(Expiry::OnInactivity(Duration::hours(24)));

    // TODO: restrict to RP_ORIGIN once the frontend is served from the same origin
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let protected_routes = Router::new()
        .route("/api/users/me", get(get_current_user))
        .layer(axum_middleware::from_fn(middleware::auth::require_auth));

    Router::new()
        .route("/health", get(health_check))
        // Registration ceremony
        .route("/api/auth/register/start", post(register_start))
        .route("/api/auth/register/finish", post(register_finish))
        // Authentication ceremony
        .route("/api/auth/authenticate/start", post(authenticate_start))
        .route("/api/auth/authenticate/finish", post(authenticate_finish))
        // Session management
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/session", get(session_info))
        .merge(protected_routes)
        .fallback_service(ServeDir::new("static"))
        // Layers run in reverse order
        .layer(session_layer)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
