//! Query-string helpers shared by the method pipeline's parameter-parsing
//! step and the HTTP adapter.

use crate::error::AppError;

/// Parse a query string into key-value pairs.
pub fn parse_query_string(query: Option<&str>) -> Vec<(String, String)> {
    match query {
        Some(q) => form_urlencoded::parse(q.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect(),
        None => Vec::new(),
    }
}

/// Parse a JSON request body, mapping malformed input to the
/// `invalid-request-structure` error kind (not `invalid-parameters-format`,
/// which is reserved for query/params validation).
pub fn parse_json_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, AppError> {
    serde_json::from_slice(body)
        .map_err(|e| AppError::invalid_request_structure(format!("malformed request body: {e}")))
}
