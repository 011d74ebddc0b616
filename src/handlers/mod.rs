//! # HTTP Request Handlers
//!
//! Each handler processes one API endpoint.
//!
//! ## Submodules
//! - `health`: Health check endpoint (for monitoring)
//! - `auth`: Ceremony endpoints (register, authenticate) plus logout and session
//! - `users`: Profile of the logged-in user
//!
//! ## Handler Pattern
//! Handlers are async functions that:
//! 1. Extract data from request (JSON body, session, state)
//! 2. Resolve the identity and call the ceremony engine
//! 3. Return a response (JSON, status code)
//!
//! ## Session Pinning
//! A finish call never names the identity it applies to. The matching start
//! call stores the identity id in the session, and finish reads it back, so a
//! client can only complete ceremonies it started.

pub mod auth;
pub mod health;
pub mod users;

use crate::error::AppError;

/// Session key holding the logged-in identity id
pub const SESSION_USER_ID: &str = "user_id";

/// Session key pinning the identity of an in-progress registration
pub const SESSION_PENDING_REGISTRATION: &str = "pending_registration_user";

/// Session key pinning the identity of an in-progress authentication
pub const SESSION_PENDING_AUTHENTICATION: &str = "pending_authentication_user";

pub(crate) fn session_error(e: impl std::fmt::Display) -> AppError {
    AppError::Internal(format!("Session error: {}", e))
}
