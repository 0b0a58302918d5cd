use stratum_core::AppError;
use stratum_data::DataError;

/// Leaf errors raised by the Mall and by individual `Store` implementations.
#[derive(Debug, thiserror::Error)]
pub enum MallError {
    #[error("unknown store: {0}")]
    UnknownStore(String),

    #[error("{0}")]
    InvalidRequestStructure(String),

    #[error("{0}")]
    InvalidOperation(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Data(#[from] DataError),
}

impl From<MallError> for AppError {
    fn from(err: MallError) -> Self {
        match err {
            MallError::UnknownStore(id) => {
                AppError::invalid_request_structure(format!("unknown store: {id}"))
            }
            MallError::InvalidRequestStructure(msg) => AppError::invalid_request_structure(msg),
            MallError::InvalidOperation(msg) => AppError::invalid_operation(msg),
            MallError::NotFound(msg) => AppError::unknown_resource(msg),
            MallError::Data(e) => e.into(),
        }
    }
}
