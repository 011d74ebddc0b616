//! # Middleware Module
//!
//! Middleware runs before (or after) route handlers and can short-circuit a
//! request before the handler sees it.
//!
//! ## Our Middleware
//! - `auth`: Checks that the session belongs to a logged-in user

pub mod auth;
