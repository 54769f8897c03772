use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use stepauth_core::AppError;
use tracing::{debug, warn};

/// API error payload.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    message: String,
    /// Present only on lockout responses, for the client countdown.
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_seconds: Option<i64>,
}

/// HTTP API error wrapper around core application errors.
#[derive(Debug)]
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(value: AppError) -> Self {
        Self(value)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, retry_after_seconds) = match &self.0 {
            AppError::InvalidCode => (StatusCode::UNAUTHORIZED, None),
            AppError::Locked(remaining) => (StatusCode::TOO_MANY_REQUESTS, Some(*remaining)),
            AppError::InvalidState(_) => (StatusCode::CONFLICT, None),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, None),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, None),
            AppError::Storage(_) => (StatusCode::SERVICE_UNAVAILABLE, None),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, None),
        };

        // Storage and internal details stay server-side.
        let message = match &self.0 {
            AppError::Storage(detail) => {
                warn!(error = %detail, "storage error");
                "storage unavailable".to_owned()
            }
            AppError::Internal(detail) => {
                warn!(error = %detail, "internal error");
                "internal error".to_owned()
            }
            AppError::InvalidState(detail) => {
                warn!(detail = %detail, "mfa operation in invalid state");
                self.0.to_string()
            }
            AppError::InvalidCode => {
                debug!("mfa code rejected");
                self.0.to_string()
            }
            other => other.to_string(),
        };

        let payload = Json(ErrorResponse {
            message,
            retry_after_seconds,
        });

        (status, payload).into_response()
    }
}

/// Standard API result type.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use stepauth_core::AppError;

    use super::ApiError;

    #[test]
    fn invalid_code_maps_to_unauthorized() {
        let response = ApiError(AppError::InvalidCode).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn lockout_maps_to_too_many_requests() {
        let response = ApiError(AppError::Locked(240)).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn storage_detail_never_reaches_the_client() {
        let response =
            ApiError(AppError::Storage("connection refused to 10.0.0.5".to_owned()))
                .into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
