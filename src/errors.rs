use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

/// Error taxonomy for the access-control core.
///
/// Business outcomes (insufficient funds, device conflict, …) are explicit
/// variants so every call site handles them; only infrastructure failures
/// map to retryable 5xx responses. `Unavailable` must never be conflated
/// with `NotFound` — a store outage is not an invalid token.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("missing device identifier")]
    MissingDeviceId,

    #[error("insufficient funds")]
    InsufficientFunds,

    #[error("token not found")]
    NotFound,

    #[error("token expired or revoked")]
    Expired,

    #[error("token is bound to another device")]
    DeviceConflict {
        /// Device currently holding the session, for operator-facing detail.
        /// `None` when the holder vanished before it could be read back.
        bound_device: Option<String>,
        last_activity: Option<chrono::DateTime<chrono::Utc>>,
    },

    #[error("token {token_id} revoked but refund of {refund} failed")]
    RefundFailed { token_id: Uuid, refund: rust_decimal::Decimal },

    #[error("backing store unavailable")]
    Unavailable,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code, msg) = match &self {
            AppError::InvalidRequest(reason) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "invalid_request",
                reason.clone(),
            ),
            AppError::MissingDeviceId => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "missing_device_id",
                "device identifier is required".to_string(),
            ),
            AppError::InsufficientFunds => (
                StatusCode::PAYMENT_REQUIRED,
                "billing_error",
                "insufficient_funds",
                "account balance does not cover this purchase".to_string(),
            ),
            AppError::NotFound => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "not_found",
                "unknown token or account".to_string(),
            ),
            AppError::Expired => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "token_expired",
                "token is expired or revoked".to_string(),
            ),
            AppError::DeviceConflict {
                bound_device,
                last_activity,
            } => (
                StatusCode::CONFLICT,
                "session_error",
                "device_conflict",
                match (bound_device, last_activity) {
                    (Some(device), Some(at)) => format!(
                        "token is in use by device '{}' (last active {})",
                        device,
                        at.to_rfc3339()
                    ),
                    _ => "token is in use by another device".to_string(),
                },
            ),
            AppError::RefundFailed { token_id, refund } => (
                StatusCode::BAD_GATEWAY,
                "billing_error",
                "refund_failed",
                format!(
                    "token {} was revoked but the refund of {} could not be credited; it will be reconciled",
                    token_id, refund
                ),
            ),
            AppError::Unavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "availability_error",
                "store_unavailable",
                "backing store unavailable, retry later".to_string(),
            ),
            AppError::Database(e) => {
                tracing::error!("database error: {}", e);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "availability_error",
                    "store_unavailable",
                    "backing store unavailable, retry later".to_string(),
                )
            }
            AppError::Redis(e) => {
                tracing::error!("redis error: {}", e);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "availability_error",
                    "store_unavailable",
                    "backing store unavailable, retry later".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": code,
            }
        }));

        let mut response = (status, body).into_response();

        // Retryable infrastructure failures advertise a backoff hint.
        if matches!(
            self,
            AppError::Unavailable | AppError::Database(_) | AppError::Redis(_)
        ) {
            response
                .headers_mut()
                .insert("retry-after", axum::http::HeaderValue::from_static("5"));
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn business_outcomes_map_to_4xx() {
        assert_eq!(
            AppError::InvalidRequest("bad duration".into())
                .into_response()
                .status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::MissingDeviceId.into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::InsufficientFunds.into_response().status(),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            AppError::NotFound.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::Expired.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::DeviceConflict {
                bound_device: Some("dev-a".into()),
                last_activity: Some(chrono::Utc::now()),
            }
            .into_response()
            .status(),
            StatusCode::CONFLICT
        );
    }

    /// A conflict whose holder vanished before detail could be read still
    /// reports cleanly, with no empty-string device in the message.
    #[tokio::test]
    async fn device_conflict_without_detail_has_a_clean_message() {
        let resp = AppError::DeviceConflict {
            bound_device: None,
            last_activity: None,
        }
        .into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let msg = body["error"]["message"].as_str().unwrap();
        assert_eq!(msg, "token is in use by another device");
        assert!(!msg.contains("''"));
    }

    #[test]
    fn unavailable_is_retryable_and_distinct_from_not_found() {
        let resp = AppError::Unavailable.into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(resp.headers().contains_key("retry-after"));

        let resp = AppError::NotFound.into_response();
        assert_ne!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(!resp.headers().contains_key("retry-after"));
    }

    #[test]
    fn refund_failure_names_token_and_amount() {
        let id = Uuid::new_v4();
        let err = AppError::RefundFailed {
            token_id: id,
            refund: Decimal::new(900, 2),
        };
        let msg = err.to_string();
        assert!(msg.contains(&id.to_string()));
        assert!(msg.contains("9.00"));
        assert_eq!(err.into_response().status(), StatusCode::BAD_GATEWAY);
    }
}
