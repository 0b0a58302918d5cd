use stratum_core::AppError;

/// Leaf errors raised while evaluating access-token permissions.
/// Every variant maps onto exactly one `AppError` kind through `map_error!`
/// below — the pipeline never has to know what `AccessLogic` looks like
/// internally.
#[derive(Debug, thiserror::Error)]
pub enum SecurityError {
    #[error("no token supplied")]
    MissingToken,

    #[error("unknown access token")]
    UnknownToken,

    #[error("access expired")]
    AccessExpired,

    #[error("personal session expired")]
    SessionExpired,

    #[error("custom auth hook rejected the request")]
    CustomAuthRejected,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("insufficient permission: {0}")]
    InsufficientPermission(String),

    #[error("{0}")]
    Internal(String),
}

impl From<SecurityError> for AppError {
    fn from(err: SecurityError) -> Self {
        match err {
            SecurityError::MissingToken => {
                AppError::invalid_access_token(err.to_string(), false)
            }
            SecurityError::UnknownToken => AppError::invalid_access_token(err.to_string(), true),
            SecurityError::AccessExpired => AppError::forbidden(err.to_string()),
            SecurityError::SessionExpired => {
                AppError::invalid_access_token(err.to_string(), true)
            }
            SecurityError::CustomAuthRejected => {
                AppError::invalid_access_token(err.to_string(), false)
            }
            SecurityError::InvalidCredentials => AppError::invalid_credentials(err.to_string()),
            SecurityError::InsufficientPermission(_) => AppError::forbidden(err.to_string()),
            SecurityError::Internal(_) => AppError::unexpected(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_token_maps_to_403() {
        let app_err: AppError = SecurityError::UnknownToken.into();
        assert_eq!(app_err.http_status, stratum_core::http::StatusCode::FORBIDDEN);
    }

    #[test]
    fn missing_token_maps_to_401() {
        let app_err: AppError = SecurityError::MissingToken.into();
        assert_eq!(app_err.http_status, stratum_core::http::StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn access_expired_maps_to_forbidden() {
        let app_err: AppError = SecurityError::AccessExpired.into();
        assert_eq!(app_err.kind, stratum_core::ErrorKind::Forbidden);
    }
}
