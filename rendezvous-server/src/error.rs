//! HTTP error taxonomy for the rendezvous server.
//!
//! Every fallible path in the server maps to one of these variants,
//! which in turn maps to the HTTP status code the pairing protocol
//! specifies for it (validation -> 400/405, conflict -> 409, not
//! found -> 404).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    NotFound(String),
    #[error("method not allowed")]
    MethodNotAllowed,
    #[error("transfer cancelled: {0}")]
    Cancelled(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            AppError::Cancelled(_) => StatusCode::BAD_GATEWAY,
        };
        (status, format!("[ERROR] {self}\n")).into_response()
    }
}
