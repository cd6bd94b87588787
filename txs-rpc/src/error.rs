// RPC Errors
// Transport-level failures and their HTTP rendering

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::fmt;

pub type RpcResult<T> = Result<T, RpcError>;

#[derive(Debug)]
pub enum RpcError {
    Unauthorized(String),
    InvalidRequest(String),
    InternalError(String),
}

impl RpcError {
    pub fn status(&self) -> StatusCode {
        match self {
            RpcError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            RpcError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            RpcError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RpcError::Unauthorized(_) => "Unauthorized",
            RpcError::InvalidRequest(_) => "InvalidRequest",
            RpcError::InternalError(_) => "Internal",
        }
    }

    fn message(&self) -> &str {
        match self {
            RpcError::Unauthorized(msg)
            | RpcError::InvalidRequest(msg)
            | RpcError::InternalError(msg) => msg,
        }
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            RpcError::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            RpcError::InternalError(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for RpcError {}

impl From<std::io::Error> for RpcError {
    fn from(err: std::io::Error) -> Self {
        RpcError::InternalError(err.to_string())
    }
}

impl IntoResponse for RpcError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": {
                "kind": self.kind(),
                "message": self.message(),
            }
        });
        (self.status(), Json(body)).into_response()
    }
}
