use crate::error::AppError;
use crate::handlers::{session_error, SESSION_USER_ID};
use axum::{extract::Request, middleware::Next, response::Response};
use tower_sessions::Session;

/// Reject requests whose session isn't logged in
///
/// A session that only has a ceremony in progress doesn't count.
pub async fn require_auth(
    session: Session,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let user_id: Option<String> = session.get(SESSION_USER_ID).await.map_err(session_error)?;

    match user_id {
        Some(_) => Ok(next.run(request).await),
        None => Err(AppError::Unauthorized("Not authenticated".to_string())),
    }
}
