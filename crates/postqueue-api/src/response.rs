//! JSON response envelope and error mapping
//!
//! Every response is `{success, data?, error?, meta}`. Core errors map to
//! stable codes; storage and internal failures are surfaced with generic
//! text and the real cause stays in the logs.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use postqueue_core::sanitize::sanitize_error;
use postqueue_core::Error as CoreError;

#[derive(Debug, Serialize)]
pub struct Meta {
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl Meta {
    fn now() -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            request_id: Some(Uuid::new_v4().to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    pub meta: Meta,
}

/// 200 with a data payload
pub fn success<T: Serialize>(data: T) -> Response {
    (
        StatusCode::OK,
        Json(Envelope {
            success: true,
            data: Some(data),
            error: None,
            meta: Meta::now(),
        }),
    )
        .into_response()
}

/// 201 with a data payload
pub fn created<T: Serialize>(data: T) -> Response {
    (
        StatusCode::CREATED,
        Json(Envelope {
            success: true,
            data: Some(data),
            error: None,
            meta: Meta::now(),
        }),
    )
        .into_response()
}

/// Wrapper turning a core error into the envelope + status code
#[derive(Debug)]
pub struct ApiError(pub CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status =
            StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        // Internal failures never leak their cause to clients
        let (message, details) = match &err {
            CoreError::Database(_) | CoreError::Storage(_) => {
                tracing::error!(category = err.category(), error = %sanitize_error(&err.to_string()), "storage error");
                ("A storage error occurred".to_string(), None)
            }
            CoreError::DuplicateContent { existing, status } => (
                sanitize_error(&err.to_string()),
                Some(json!({"existing_job_id": existing, "status": status})),
            ),
            CoreError::Validation(_)
            | CoreError::InvalidScheduleTime(_)
            | CoreError::JobNotFound(_) => (sanitize_error(&err.to_string()), None),
            other => {
                tracing::error!(category = other.category(), error = %sanitize_error(&other.to_string()), "unexpected error");
                ("An internal error occurred".to_string(), None)
            }
        };

        (
            status,
            Json(Envelope::<Value> {
                success: false,
                data: None,
                error: Some(ErrorBody {
                    code: err.code().to_string(),
                    message,
                    details,
                }),
                meta: Meta::now(),
            }),
        )
            .into_response()
    }
}
