use stratum_core::AppError;
use stratum_mall::MallError;

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error(transparent)]
    Mall(#[from] MallError),

    #[error("{0}")]
    Sink(String),
}

impl From<AuditError> for AppError {
    fn from(err: AuditError) -> Self {
        match err {
            AuditError::Mall(e) => e.into(),
            AuditError::Sink(msg) => AppError::unexpected(msg),
        }
    }
}
