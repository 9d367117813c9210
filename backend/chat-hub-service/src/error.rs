use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use deadpool_postgres::PoolError;
use thiserror::Error;
use tokio_postgres::error::SqlState;

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(AppError::status_code(self)).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(ResponseError::status_code(self)).json(serde_json::json!({
            "error": self.to_string(),
        }))
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Distinguishes between retryable and permanent errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Retryable,
    Permanent,
}

#[derive(Debug, Error, Clone)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found")]
    NotFound,

    #[error("database error: {message}")]
    Database { message: String, kind: ErrorKind },

    #[error("internal server error")]
    Internal,
}

/// Closed connections, socket failures and transaction conflicts can succeed on retry.
fn classify_pg(e: &tokio_postgres::Error) -> ErrorKind {
    let io_failure = std::error::Error::source(e)
        .map(|source| source.is::<std::io::Error>())
        .unwrap_or(false);
    let conflict = matches!(
        e.code(),
        Some(code) if *code == SqlState::T_R_SERIALIZATION_FAILURE
            || *code == SqlState::T_R_DEADLOCK_DETECTED
    );

    if e.is_closed() || io_failure || conflict {
        ErrorKind::Retryable
    } else {
        ErrorKind::Permanent
    }
}

impl From<tokio_postgres::Error> for AppError {
    fn from(e: tokio_postgres::Error) -> Self {
        AppError::Database {
            kind: classify_pg(&e),
            message: e.to_string(),
        }
    }
}

impl From<PoolError> for AppError {
    fn from(e: PoolError) -> Self {
        let kind = match &e {
            PoolError::Backend(pg) => classify_pg(pg),
            PoolError::Timeout(_) | PoolError::Closed => ErrorKind::Retryable,
            _ => ErrorKind::Permanent,
        };
        AppError::Database {
            kind,
            message: e.to_string(),
        }
    }
}

impl AppError {
    pub fn database(message: impl Into<String>, kind: ErrorKind) -> Self {
        AppError::Database {
            message: message.into(),
            kind,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Database { kind, .. } => *kind,
            AppError::Internal => ErrorKind::Retryable,
            _ => ErrorKind::Permanent,
        }
    }

    /// Returns whether this error is retryable (e.g., database connection timeout)
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Retryable
    }

    /// Returns HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::BadRequest(_) => 400,
            AppError::NotFound => 404,
            AppError::Database { .. } | AppError::Internal => 500,
            AppError::Config(_) | AppError::StartServer(_) => 500,
        }
    }
}
