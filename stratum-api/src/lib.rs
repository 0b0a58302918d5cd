//! Thin HTTP adapter over the method pipeline.
//!
//! Per SPEC_FULL.md §4, HTTP routing and body parsing are interface
//! obligations only: this crate exposes the minimum surface needed to
//! drive [`stratum_pipeline::run_call`] over the wire, not a full REST
//! mapping of every method onto its own verb and path.
//!
//! A single route, `POST /{username}/{method}`, carries the method's
//! `params` as the JSON body and the caller's token in either the
//! `Authorization` header or the `auth` query parameter; `{method}`
//! accepts its dots literally (e.g. `/alice/streams.get`).

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, OriginalUri, Path, State};
use axum::routing::post;
use axum::Router;
use serde_json::Value;
use stratum_context::{MethodContext, Source};
use stratum_core::http::{HeaderMap, IntoResponse, Json, Response};
use stratum_core::params::parse_query_string;
use stratum_core::AppError;
use stratum_pipeline::{AppState, MethodRegistry};

#[derive(Clone)]
pub struct ApiState {
    pub app: Arc<AppState>,
    pub registry: Arc<MethodRegistry>,
}

impl ApiState {
    pub fn new(app: Arc<AppState>) -> Self {
        ApiState {
            app,
            registry: Arc::new(MethodRegistry::build()),
        }
    }
}

/// The router every `stratum-api` binary mounts; callers add their own
/// `tower-http` layers (CORS, tracing) around it.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/{username}/{*method}", post(call_method))
        .with_state(state)
}

async fn call_method(
    State(state): State<ApiState>,
    Path((username, method)): Path<(String, String)>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    Json(params): Json<Value>,
) -> Response {
    match handle(&state, username, method, peer, uri, headers, params).await {
        Ok(value) => Json(value).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn handle(
    state: &ApiState,
    username: String,
    method: String,
    peer: SocketAddr,
    uri: axum::http::Uri,
    headers: HeaderMap,
    params: Value,
) -> Result<Value, AppError> {
    let query: std::collections::HashMap<String, String> =
        parse_query_string(uri.query()).into_iter().collect();

    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim_start_matches("Bearer ").to_string())
        .or_else(|| query.get("auth").cloned());
    // The request's declared origin, checked by `auth.login`'s
    // `TrustedOrigin` step against `security.trusted_app_patterns`: the
    // `Origin` header for browser clients, `Referer` as a fallback, or
    // the literal `"http"` when neither is present.
    let source_name = headers
        .get("origin")
        .or_else(|| headers.get("referer"))
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| "http".to_string());
    let trace_id = uuid::Uuid::new_v4().to_string();
    let mut ctx = MethodContext::new(
        Source {
            name: source_name,
            ip: peer.ip().to_string(),
        },
        username,
        auth.as_deref(),
        headers,
        query,
        trace_id,
    );

    let method = normalize_method(&method);
    tracing::info!(method = %method, "dispatching call");
    stratum_pipeline::run_call(&state.registry, &state.app, &mut ctx, &method, params).await
}

/// `{*method}` captures the raw remainder of the path, e.g.
/// `/streams.get` or `/streams/get` depending on how the caller chose
/// to write it; both resolve to the same `"streams.get"` chain name.
fn normalize_method(raw: &str) -> String {
    raw.trim_start_matches('/').replace('/', ".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_leading_slash() {
        assert_eq!(normalize_method("/streams.get"), "streams.get");
    }

    #[test]
    fn normalizes_slash_separated_segments() {
        assert_eq!(normalize_method("/streams/get"), "streams.get");
    }
}
