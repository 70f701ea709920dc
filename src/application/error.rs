use std::error::Error as StdError;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::{
    application::repos::StoreError,
    cache::{ReconcileError, SubmitError},
    config::LoadError,
    infra::error::InfraError,
};

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Config(#[from] LoadError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    #[error(transparent)]
    Submit(#[from] SubmitError),
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Store(_) | AppError::Reconcile(ReconcileError::Store(_)) => {
                StatusCode::BAD_GATEWAY
            }
            AppError::Submit(SubmitError::NotConfigured) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Submit(SubmitError::Stopped) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Reconcile(_)
            | AppError::Infra(_)
            | AppError::Config(_)
            | AppError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    causes: Vec<String>,
}

impl ErrorBody {
    fn from_error(error: &dyn StdError) -> Self {
        let mut causes = Vec::new();
        let mut current = error.source();
        while let Some(inner) = current {
            causes.push(inner.to_string());
            current = inner.source();
        }
        Self {
            error: error.to_string(),
            causes,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(ErrorBody::from_error(&self))).into_response()
    }
}
