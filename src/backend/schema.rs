//! Wire schemas for each backend endpoint.
//!
//! Every endpoint gets exactly one request body and one response shape.
//! Responses that fit none of the declared shapes are rejected.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::backend::traits::{JobState, JobStatus};
use crate::error::{AppError, Result};

/// Body of `POST /api/generate-video-json`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoGenerateBody<'a> {
    pub prompt_image_url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_image_url: Option<&'a str>,
    pub prompt_text: &'a str,
    pub video_mode: &'a str,
    pub model: &'a str,
    pub ratio: &'a str,
    pub duration: u32,
}

/// Body of `POST /api/text-to-speech`
#[derive(Debug, Serialize)]
pub struct TtsBody<'a> {
    pub text: &'a str,
    pub voice_id: &'a str,
    pub stability: f32,
    pub similarity_boost: f32,
}

/// Body of `POST /api/generate-text`
#[derive(Debug, Serialize)]
pub struct TextBody<'a> {
    pub prompt: &'a str,
}

/// Response of `POST /api/generate-branded-ad`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ImageSubmitResponse {
    Ready {
        #[serde(default = "default_success")]
        success: bool,
        #[serde(rename = "imageUrl")]
        image_url: String,
        #[serde(default)]
        metadata: Option<serde_json::Value>,
    },
    Queued {
        generation_id: String,
    },
}

fn default_success() -> bool {
    true
}

/// Response of `POST /api/generate-video-json`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum VideoSubmitResponse {
    Ready { video_url: String },
    Job { job_id: String },
    Task { task_id: String },
}

/// Response of `POST /api/text-to-speech`
#[derive(Debug, Deserialize)]
pub struct TtsResponse {
    pub audio_url: String,
}

/// Response of `POST /api/generate-text`
#[derive(Debug, Deserialize)]
pub struct TextResponse {
    pub text: String,
}

/// Response of `GET /api/v1/stable-diffusion/image-result/{generation_id}`
#[derive(Debug, Deserialize)]
pub struct ImageResultResponse {
    pub status: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl From<ImageResultResponse> for JobStatus {
    fn from(body: ImageResultResponse) -> Self {
        JobStatus {
            state: JobState::parse(&body.status),
            result_url: non_empty(body.image_url),
            error: body.error,
            metadata: body.metadata,
        }
    }
}

/// Response of `GET /video-status/{job_id}`
#[derive(Debug, Deserialize)]
pub struct VideoStatusResponse {
    pub status: String,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl From<VideoStatusResponse> for JobStatus {
    fn from(body: VideoStatusResponse) -> Self {
        JobStatus {
            state: JobState::parse(&body.status),
            result_url: non_empty(body.video_url),
            error: body.error,
            metadata: None,
        }
    }
}

/// Response of `GET /api/video-task/{task_id}`
#[derive(Debug, Deserialize)]
pub struct VideoTaskResponse {
    pub status: String,
    #[serde(default)]
    pub output: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl From<VideoTaskResponse> for JobStatus {
    fn from(body: VideoTaskResponse) -> Self {
        JobStatus {
            state: JobState::parse(&body.status),
            result_url: non_empty(body.output.into_iter().next()),
            error: body.error,
            metadata: None,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Parse a response body against the endpoint's schema
pub fn parse<T: DeserializeOwned>(endpoint: &str, body: &str) -> Result<T> {
    serde_json::from_str(body).map_err(|e| AppError::UnexpectedResponse {
        endpoint: endpoint.to_string(),
        detail: format!("{}: {}", e, truncate(body, 256)),
    })
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let mut out: String = text.chars().take(max).collect();
        out.push('…');
        out
    }
}
