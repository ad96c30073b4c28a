//! Backend REST API collaborators
//!
//! Thin request/response wrappers: upload/process, history, session/profile,
//! and admin. All calls share one `ApiClient` so the session cookie persists.

pub mod admin;
pub mod auth;
mod client;
pub mod history;
pub mod upload;

pub use client::{ApiClient, ApiError};
