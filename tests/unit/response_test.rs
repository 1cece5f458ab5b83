//! Unit tests for error classification and user notices

use base64::{engine::general_purpose::STANDARD, Engine};
use genjob_client::error::{classify_response, AppError, ErrorCode};
use genjob_client::session::Notice;
use genjob_client::upload::{preview, FileRef};
use reqwest::StatusCode;

#[test]
fn test_status_codes_map_to_error_codes() {
    let cases = [
        (StatusCode::TOO_MANY_REQUESTS, "", ErrorCode::RateLimited),
        (StatusCode::UNAUTHORIZED, "", ErrorCode::Authentication),
        (StatusCode::FORBIDDEN, "", ErrorCode::Authentication),
        (StatusCode::PAYMENT_REQUIRED, "", ErrorCode::PlanLimit),
        (StatusCode::BAD_GATEWAY, "", ErrorCode::Generic),
    ];

    for (status, body, expected) in cases {
        assert_eq!(classify_response(status, body).code(), expected, "{status}");
    }
}

#[test]
fn test_body_codes_take_effect_on_any_status() {
    let plan = classify_response(
        StatusCode::BAD_REQUEST,
        r#"{"message": "quota used", "code": "plan_limit"}"#,
    );
    assert_eq!(plan.code(), ErrorCode::PlanLimit);

    let nsfw = classify_response(
        StatusCode::UNPROCESSABLE_ENTITY,
        r#"{"error": "flagged", "code": "content_policy"}"#,
    );
    assert!(matches!(nsfw, AppError::ContentRejected(ref m) if m == "flagged"));
}

#[test]
fn test_nsfw_in_free_text_is_not_guessed() {
    // Classification relies on the code field, never on message wording
    let err = classify_response(StatusCode::BAD_REQUEST, r#"{"error": "nsfw content"}"#);
    assert_eq!(err.code(), ErrorCode::Generic);
}

#[test]
fn test_notice_uses_lookup_message() {
    let notice = Notice::from_error(&AppError::ContentRejected("flagged".to_string()));
    assert_eq!(notice.code, ErrorCode::ContentRejected);
    assert_eq!(notice.message, ErrorCode::ContentRejected.user_message());
    assert!(notice.detail.contains("flagged"));
}

#[test]
fn test_every_code_has_a_message() {
    let codes = [
        ErrorCode::Authentication,
        ErrorCode::PlanLimit,
        ErrorCode::RateLimited,
        ErrorCode::Validation,
        ErrorCode::ContentRejected,
        ErrorCode::Timeout,
        ErrorCode::Cancelled,
        ErrorCode::Generic,
    ];
    for code in codes {
        assert!(!code.user_message().is_empty());
    }
}

#[test]
fn test_error_code_serializes_snake_case() {
    let json = serde_json::to_string(&ErrorCode::ContentRejected).unwrap();
    assert_eq!(json, "\"content_rejected\"");
}

#[test]
fn test_preview_data_url() {
    let file = FileRef::from_bytes("p.webp", "image/webp", b"RIFF\0\0\0\0WEBPVP8 ".to_vec());
    let url = preview::data_url(&file);
    let payload = url.strip_prefix("data:image/webp;base64,").unwrap();
    assert_eq!(STANDARD.decode(payload).unwrap(), file.data);
}
