//! The typed error taxonomy shared by every Stratum crate.
//!
//! `AppError` is the single sum type that crosses component boundaries:
//! storage, the Mall, security and the method pipeline all convert their
//! leaf errors (usually `thiserror` enums) into an `AppError` via
//! `map_error!` at the point where they hand control back to a caller that
//! doesn't care about the originating layer, only about `{id, message,
//! httpStatus, data}`.

use crate::http::{Json, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::Value;

/// One of the typed error kinds. The wire `id` (used in the JSON body and
/// in audit records) is its `kebab-case` name via [`AppError::id`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidRequestStructure,
    InvalidParametersFormat,
    InvalidItemId,
    MissingHeader,
    UnsupportedContentType,
    InvalidAccessToken,
    InvalidCredentials,
    Forbidden,
    UnknownResource,
    UnknownReferencedResource,
    ItemAlreadyExists,
    /// Not one of the named kinds below, but required for rejecting an
    /// overlapping event insert/update on a single-activity stream.
    InvalidOperation,
    UnexpectedError,
}

impl ErrorKind {
    /// The wire identifier, e.g. `"invalid-request-structure"`.
    pub fn id(&self) -> &'static str {
        match self {
            ErrorKind::InvalidRequestStructure => "invalid-request-structure",
            ErrorKind::InvalidParametersFormat => "invalid-parameters-format",
            ErrorKind::InvalidItemId => "invalid-item-id",
            ErrorKind::MissingHeader => "missing-header",
            ErrorKind::UnsupportedContentType => "unsupported-content-type",
            ErrorKind::InvalidAccessToken => "invalid-access-token",
            ErrorKind::InvalidCredentials => "invalid-credentials",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::UnknownResource => "unknown-resource",
            ErrorKind::UnknownReferencedResource => "unknown-referenced-resource",
            ErrorKind::ItemAlreadyExists => "item-already-exists",
            ErrorKind::InvalidOperation => "invalid-operation",
            ErrorKind::UnexpectedError => "unexpected-error",
        }
    }

    /// The default HTTP status for this kind. `InvalidAccessToken` may be
    /// overridden to 403 by callers that know the token was merely expired
    /// rather than absent/unknown — see [`AppError::invalid_access_token`].
    pub fn default_status(&self) -> StatusCode {
        match self {
            ErrorKind::InvalidRequestStructure
            | ErrorKind::InvalidParametersFormat
            | ErrorKind::InvalidItemId => StatusCode::BAD_REQUEST,
            ErrorKind::MissingHeader => StatusCode::BAD_REQUEST,
            ErrorKind::UnsupportedContentType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ErrorKind::InvalidAccessToken => StatusCode::UNAUTHORIZED,
            ErrorKind::InvalidCredentials => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::UnknownResource => StatusCode::NOT_FOUND,
            ErrorKind::UnknownReferencedResource => StatusCode::BAD_REQUEST,
            ErrorKind::ItemAlreadyExists => StatusCode::CONFLICT,
            ErrorKind::InvalidOperation => StatusCode::BAD_REQUEST,
            ErrorKind::UnexpectedError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// A typed application error: `{id, message, httpStatus, data}` per
/// the error handling design.
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: ErrorKind,
    pub message: String,
    pub http_status: StatusCode,
    pub data: Option<Value>,
}

impl AppError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let http_status = kind.default_status();
        AppError {
            kind,
            message: message.into(),
            http_status,
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.http_status = status;
        self
    }

    pub fn invalid_request_structure(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequestStructure, message)
    }

    pub fn invalid_parameters_format(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidParametersFormat, message)
    }

    pub fn invalid_item_id(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidItemId, message)
    }

    pub fn missing_header(header: impl Into<String>) -> Self {
        Self::new(ErrorKind::MissingHeader, header)
    }

    pub fn unsupported_content_type(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnsupportedContentType, message)
    }

    /// `invalid-access-token`, defaulting to 401. Pass `forbidden_variant =
    /// true` for the 403 cases (unknown token, expired personal session).
    pub fn invalid_access_token(message: impl Into<String>, forbidden_variant: bool) -> Self {
        let mut err = Self::new(ErrorKind::InvalidAccessToken, message);
        if forbidden_variant {
            err.http_status = StatusCode::FORBIDDEN;
        }
        err
    }

    pub fn invalid_credentials(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidCredentials, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    pub fn unknown_resource(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownResource, message)
    }

    pub fn unknown_referenced_resource(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownReferencedResource, message)
    }

    pub fn item_already_exists(message: impl Into<String>, data: Value) -> Self {
        Self::new(ErrorKind::ItemAlreadyExists, message).with_data(data)
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnexpectedError, message)
    }

    /// `invalid-operation` — e.g. an overlapping insert/update on a
    /// single-activity stream.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidOperation, message)
    }

    pub fn id(&self) -> &'static str {
        self.kind.id()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut body = serde_json::json!({
            "id": self.kind.id(),
            "message": self.message,
        });
        if let Some(data) = &self.data {
            body["data"] = data.clone();
        }
        (self.http_status, Json(body)).into_response()
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.id(), self.message)
    }
}

impl std::error::Error for AppError {}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::unexpected(err.to_string())
    }
}

/// Generate `From<E> for AppError` implementations that map a leaf error
/// type to a specific `AppError` constructor.
///
/// ```ignore
/// stratum_core::map_error! {
///     sqlx::Error => unexpected,
///     stratum_data::DataError => unexpected,
/// }
/// ```
#[macro_export]
macro_rules! map_error {
    ( $( $err_ty:ty => $ctor:ident ),* $(,)? ) => {
        $(
            impl From<$err_ty> for $crate::error::AppError {
                fn from(err: $err_ty) -> Self {
                    $crate::error::AppError::$ctor(err.to_string())
                }
            }
        )*
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn error_parts(err: AppError) -> (StatusCode, serde_json::Value) {
        let resp = err.into_response();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        (status, json)
    }

    #[tokio::test]
    async fn unknown_resource_is_404() {
        let (status, body) = error_parts(AppError::unknown_resource("no such stream")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["id"], "unknown-resource");
        assert_eq!(body["message"], "no such stream");
    }

    #[tokio::test]
    async fn invalid_access_token_defaults_401() {
        let (status, _) = error_parts(AppError::invalid_access_token("missing token", false)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn invalid_access_token_forbidden_variant_is_403() {
        let (status, _) =
            error_parts(AppError::invalid_access_token("unknown token", true)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn item_already_exists_carries_data() {
        let (status, body) = error_parts(AppError::item_already_exists(
            "email taken",
            serde_json::json!({"email": "a@b.com"}),
        ))
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["data"]["email"], "a@b.com");
    }

    #[test]
    fn display_includes_kind_id() {
        let err = AppError::forbidden("nope");
        assert_eq!(err.to_string(), "forbidden: nope");
    }

    #[test]
    fn from_io_error_is_unexpected() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let app_err: AppError = io_err.into();
        assert_eq!(app_err.kind, ErrorKind::UnexpectedError);
    }
}
