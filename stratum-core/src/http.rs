//! Minimal HTTP re-exports used across the workspace.
//!
//! The HTTP adapter (`stratum-api`) is a thin interface obligation, not a
//! generic web framework — so unlike the wider surface this crate is
//! descended from, there is no routing DSL or extractor macro layer
//! here, just the `axum` types error/response conversion needs.

pub use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
pub use axum::response::{IntoResponse, Response};
pub use axum::Json;
