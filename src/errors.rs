use rocket::http::Status;
use rocket::response::{self, Responder};
use rocket::serde::json::Json;
use rocket::Request;
use serde_json::{json, Value};
use thiserror::Error;

/// Failures raised by the storage layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A row with the same unique key already exists.
    #[error("duplicate key")]
    Conflict,
    #[error("database error: {0}")]
    Sqlite(rusqlite::Error),
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        match value {
            rusqlite::Error::SqliteFailure(error, _)
                if error.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || error.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
            {
                StoreError::Conflict
            }
            error => StoreError::Sqlite(error),
        }
    }
}

/// Errors surfaced to callers of the cost and report operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{message}")]
    Validation { id: Option<Value>, message: String },
    #[error("{message}")]
    NotFound { id: Option<Value>, message: String },
    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),
}

impl ServiceError {
    pub fn validation(id: Option<Value>, message: impl Into<String>) -> Self {
        ServiceError::Validation {
            id,
            message: message.into(),
        }
    }

    pub fn not_found(id: i64, message: impl Into<String>) -> Self {
        ServiceError::NotFound {
            id: Some(json!(id)),
            message: message.into(),
        }
    }

    pub fn status(&self) -> Status {
        match self {
            ServiceError::Validation { .. } => Status::BadRequest,
            ServiceError::NotFound { .. } => Status::NotFound,
            ServiceError::Storage(_) => Status::InternalServerError,
        }
    }

    /// Identifier of the subject the error is about, when known.
    pub fn subject(&self) -> Value {
        match self {
            ServiceError::Validation { id, .. } | ServiceError::NotFound { id, .. } => {
                id.clone().unwrap_or(Value::Null)
            }
            ServiceError::Storage(_) => Value::Null,
        }
    }
}

impl<'r> Responder<'r, 'static> for ServiceError {
    fn respond_to(self, request: &'r Request<'_>) -> response::Result<'static> {
        let body = json!({
            "id": self.subject(),
            "message": self.to_string(),
        });
        (self.status(), Json(body)).respond_to(request)
    }
}
