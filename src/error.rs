//! Common error types for the generation job client

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Backend returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited (HTTP 429): {0}")]
    RateLimited(String),

    #[error("Session expired or unauthorized: {0}")]
    Unauthorized(String),

    #[error("Plan limit reached: {0}")]
    PlanLimitExceeded(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Content rejected by provider: {0}")]
    ContentRejected(String),

    #[error("Job {job_id} failed: {message}")]
    JobFailed { job_id: String, message: String },

    #[error("Job {0} is unknown to the backend")]
    JobNotFound(String),

    #[error("Job {0} completed but no asset was returned")]
    MissingResult(String),

    #[error("Job {job_id} did not finish after {attempts} status checks")]
    TimedOut { job_id: String, attempts: u32 },

    #[error("Unexpected response from {endpoint}: {detail}")]
    UnexpectedResponse { endpoint: String, detail: String },

    #[error("Job {0} is already being polled")]
    AlreadyPolling(String),

    #[error("A generation is already in progress")]
    Busy,

    #[error("Cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Closed set of failure classes surfaced to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Authentication,
    PlanLimit,
    RateLimited,
    Validation,
    ContentRejected,
    Timeout,
    Cancelled,
    Generic,
}

impl ErrorCode {
    /// Message shown to the user for this class of failure
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorCode::Authentication => "Your session has expired. Please sign in again.",
            ErrorCode::PlanLimit => {
                "You've reached your plan's generation limit. Upgrade to keep creating."
            }
            ErrorCode::RateLimited => {
                "The generation service is busy right now. Please try again in a minute."
            }
            ErrorCode::Validation => "Please check your inputs and try again.",
            ErrorCode::ContentRejected => {
                "This request was blocked by the content filter. Try a different prompt or image."
            }
            ErrorCode::Timeout => {
                "Generation is taking longer than expected. Please try again later."
            }
            ErrorCode::Cancelled => "Generation was cancelled.",
            ErrorCode::Generic => "Something went wrong while generating. Please try again.",
        }
    }
}

impl AppError {
    /// Classify this error for user-facing reporting
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Unauthorized(_) => ErrorCode::Authentication,
            AppError::PlanLimitExceeded(_) => ErrorCode::PlanLimit,
            AppError::RateLimited(_) => ErrorCode::RateLimited,
            AppError::Validation(_) | AppError::Busy => ErrorCode::Validation,
            AppError::ContentRejected(_) => ErrorCode::ContentRejected,
            AppError::TimedOut { .. } => ErrorCode::Timeout,
            AppError::Cancelled => ErrorCode::Cancelled,
            AppError::HttpClient(e) if e.is_timeout() => ErrorCode::Timeout,
            _ => ErrorCode::Generic,
        }
    }

    /// Whether the rate-limited caller should try again
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, AppError::RateLimited(_))
    }
}

/// Error body returned by the generation backend and by upload providers
#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    error: Option<ErrorField>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

/// Providers disagree on whether `error` is a string or an object
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorField {
    Text(String),
    Object {
        message: String,
        #[serde(default)]
        code: Option<String>,
    },
}

/// Turn a non-2xx backend response into a typed error.
///
/// This is the only place status codes and provider error codes are
/// interpreted; everything downstream matches on `AppError`.
pub fn classify_response(status: StatusCode, body: &str) -> AppError {
    let parsed: ApiErrorBody = serde_json::from_str(body).unwrap_or_default();

    let (nested_message, nested_code) = match parsed.error {
        Some(ErrorField::Text(text)) => (Some(text), None),
        Some(ErrorField::Object { message, code }) => (Some(message), code),
        None => (None, None),
    };
    let code = parsed.code.or(nested_code).map(|c| c.to_ascii_lowercase());
    let message = parsed
        .message
        .or(nested_message)
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                status.to_string()
            } else {
                trimmed.chars().take(512).collect()
            }
        });

    match (status, code.as_deref()) {
        (StatusCode::TOO_MANY_REQUESTS, _) => AppError::RateLimited(message),
        (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN, _) => AppError::Unauthorized(message),
        (StatusCode::PAYMENT_REQUIRED, _) | (_, Some("plan_limit")) => {
            AppError::PlanLimitExceeded(message)
        }
        (_, Some("nsfw" | "content_policy")) => AppError::ContentRejected(message),
        _ => AppError::Api {
            status: status.as_u16(),
            message,
        },
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;
