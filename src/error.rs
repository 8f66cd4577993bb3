use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Every failure the auth core can surface to a caller.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthenticated(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    /// Reset token invalid or expired.
    #[error("{0}")]
    TokenError(String),

    #[error("{0}")]
    ExternalService(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation_error",
            AppError::Unauthenticated(_) => "unauthenticated",
            AppError::Forbidden(_) => "forbidden",
            AppError::NotFound(_) => "not_found",
            AppError::TokenError(_) => "token_error",
            AppError::ExternalService(_) => "external_service_error",
            AppError::Internal(_) => "internal_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::TokenError(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::ExternalService(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Whether the message can be shown to the caller verbatim.
    pub fn is_operational(&self) -> bool {
        !matches!(self, AppError::Internal(_))
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        AppError::Internal(anyhow::anyhow!(msg.into()))
    }
}

/// Full error chain of an internal failure, attached to the response so the
/// development-only layer can expose it. Never serialized by itself.
#[derive(Debug, Clone)]
pub struct InternalDetail(pub String);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let label = if status.is_server_error() { "error" } else { "fail" };

        match self {
            AppError::Internal(e) => {
                tracing::error!(error = ?e, "internal error");
                let body = json!({ "status": label, "message": "Something went very wrong!" });
                let mut res = (status, Json(body)).into_response();
                res.extensions_mut().insert(InternalDetail(format!("{e:#}")));
                res
            }
            other => {
                if status.is_server_error() {
                    tracing::error!(kind = other.kind(), error = %other, "request failed");
                } else {
                    tracing::debug!(kind = other.kind(), error = %other, "request rejected");
                }
                (status, Json(json!({ "status": label, "message": other.to_string() })))
                    .into_response()
            }
        }
    }
}

/// Adds the internal error chain to 500 bodies. Only layered in development.
pub async fn expose_internal_detail(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    let res = next.run(req).await;
    let Some(InternalDetail(detail)) = res.extensions().get::<InternalDetail>().cloned() else {
        return res;
    };
    let status = res.status();
    let body = json!({
        "status": "error",
        "message": "Something went very wrong!",
        "detail": detail,
    });
    (status, Json(body)).into_response()
}
