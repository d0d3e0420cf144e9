use axum::extract::multipart::MultipartError;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use lookbook_engine::{error_chain_text, gateway_error, GatewayError};
use serde_json::json;

const LOG_CHAIN_MAX_CHARS: usize = 2000;
pub const UPSTREAM_FAILURE_MESSAGE: &str = "The AI service request failed; see server logs";

/// Error returned by every handler, rendered as
/// `{"success": false, "error": ..., "message": ...}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{error}: {message}")]
    BadRequest { error: String, message: String },
    #[error("{error}: {message}")]
    PayloadTooLarge { error: String, message: String },
    #[error("{error}: {message}")]
    BadGateway { error: String, message: String },
    #[error("{error}: {message}")]
    Internal { error: String, message: String },
}

impl ApiError {
    pub fn bad_request(error: impl Into<String>, message: impl Into<String>) -> Self {
        ApiError::BadRequest {
            error: error.into(),
            message: message.into(),
        }
    }

    pub fn internal(error: impl Into<String>, message: impl Into<String>) -> Self {
        ApiError::Internal {
            error: error.into(),
            message: message.into(),
        }
    }

    /// Map a failed upstream operation. `operation` is the summary used when
    /// the failure is not one the gateway classifies.
    ///
    /// The full cause chain goes to the log only; clients get the classified
    /// reason or a fixed message.
    pub fn from_upstream(operation: &str, err: &anyhow::Error) -> Self {
        tracing::error!(
            operation,
            error = %error_chain_text(err, LOG_CHAIN_MAX_CHARS),
            "upstream call failed"
        );
        match gateway_error(err) {
            Some(classified @ GatewayError::NotConfigured(_)) => ApiError::Internal {
                error: "AI service not configured".to_string(),
                message: classified.to_string(),
            },
            Some(GatewayError::Unparseable(schema)) => ApiError::BadGateway {
                error: "Failed to parse AI response".to_string(),
                message: format!("model response could not be parsed: {schema}"),
            },
            Some(classified @ GatewayError::NoPayload(kind)) => ApiError::BadGateway {
                error: format!("No {kind} generated"),
                message: classified.to_string(),
            },
            None => ApiError::Internal {
                error: operation.to_string(),
                message: UPSTREAM_FAILURE_MESSAGE.to_string(),
            },
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::BadGateway { .. } => StatusCode::BAD_GATEWAY,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn summary(&self) -> &str {
        match self {
            ApiError::BadRequest { error, .. }
            | ApiError::PayloadTooLarge { error, .. }
            | ApiError::BadGateway { error, .. }
            | ApiError::Internal { error, .. } => error,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ApiError::BadRequest { message, .. }
            | ApiError::PayloadTooLarge { message, .. }
            | ApiError::BadGateway { message, .. }
            | ApiError::Internal { message, .. } => message,
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            return ApiError::PayloadTooLarge {
                error: "Upload too large".to_string(),
                message: err.body_text(),
            };
        }
        ApiError::bad_request("Invalid multipart body", err.body_text())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            return ApiError::PayloadTooLarge {
                error: "Request body too large".to_string(),
                message: rejection.body_text(),
            };
        }
        ApiError::bad_request("Invalid request body", rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "success": false,
            "error": self.summary(),
            "message": self.message(),
        });
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::http::StatusCode;
    use lookbook_contracts::models::Task;
    use lookbook_contracts::schema::SchemaError;
    use lookbook_engine::{
        ContentPart, GatewayError, GatewayRequest, GeminiGateway, GenerativeGateway,
    };

    use super::{ApiError, UPSTREAM_FAILURE_MESSAGE};

    #[test]
    fn upstream_failures_map_to_the_error_taxonomy() {
        let unparseable = anyhow::Error::from(GatewayError::Unparseable(SchemaError::NotJson))
            .context("gemini detection call failed");
        let mapped = ApiError::from_upstream("Failed to analyze image", &unparseable);
        assert_eq!(mapped.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(mapped.summary(), "Failed to parse AI response");

        let no_image = anyhow::Error::from(GatewayError::NoPayload("image"));
        let mapped = ApiError::from_upstream("Failed to process virtual try-on", &no_image);
        assert_eq!(mapped.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(mapped.summary(), "No image generated");

        let unconfigured = anyhow::Error::from(GatewayError::NotConfigured("gemini".to_string()));
        let mapped = ApiError::from_upstream("Internal server error", &unconfigured);
        assert_eq!(mapped.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(mapped.summary(), "AI service not configured");

        let network = anyhow::anyhow!("connection reset").context("Gemini request failed");
        let mapped = ApiError::from_upstream("Failed to analyze image", &network);
        assert_eq!(mapped.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(mapped.summary(), "Failed to analyze image");
        assert_eq!(mapped.message(), UPSTREAM_FAILURE_MESSAGE);
    }

    #[test]
    fn transport_failures_do_not_echo_the_api_key() -> anyhow::Result<()> {
        let gateway = GeminiGateway::new(
            "http://127.0.0.1:1/v1beta",
            Some("SECRET-KEY-123".to_string()),
            Duration::from_secs(2),
        )?;
        let request = GatewayRequest {
            task: Task::Detect,
            model: "gemini-2.5-flash".to_string(),
            parts: vec![ContentPart::Text("describe".to_string())],
        };
        let err = gateway.generate(&request).unwrap_err();
        let mapped = ApiError::from_upstream("Failed to analyze image", &err);
        assert_eq!(mapped.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!mapped.message().contains("SECRET-KEY-123"));
        assert!(!mapped.to_string().contains("SECRET-KEY-123"));
        assert!(!mapped.message().contains("127.0.0.1"));
        Ok(())
    }
}
