//! HTTP backend client implementation

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::backend::retry::RetryPolicy;
use crate::backend::schema::{
    self, ImageResultResponse, ImageSubmitResponse, TextBody, TextResponse, TtsBody,
    TtsResponse, VideoGenerateBody, VideoStatusResponse, VideoSubmitResponse, VideoTaskResponse,
};
use crate::backend::traits::{
    GenerationBackend, GenerationKind, GenerationOutput, GenerationRequest, IdField, JobHandle,
    JobStatus, SubmitAssets, Submission,
};
use crate::config::Settings;
use crate::error::{classify_response, AppError, Result};
use crate::time::{Sleeper, TokioSleeper};
use crate::upload::FileRef;

const BRANDED_AD_PATH: &str = "/api/generate-branded-ad";
const VIDEO_GENERATE_PATH: &str = "/api/generate-video-json";
const TTS_PATH: &str = "/api/text-to-speech";
const TEXT_PATH: &str = "/api/generate-text";
const IMAGE_RESULT_PATH: &str = "/api/v1/stable-diffusion/image-result";
const VIDEO_STATUS_PATH: &str = "/video-status";
const VIDEO_TASK_PATH: &str = "/api/video-task";

/// Generation backend reached over HTTP
pub struct HttpBackend {
    name: String,
    client: Client,
    base_url: String,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl HttpBackend {
    /// Create a new HTTP backend
    pub fn new(
        base_url: &str,
        timeout: Duration,
        retry: RetryPolicy,
        sleeper: Arc<dyn Sleeper>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            name: "http".to_string(),
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry,
            sleeper,
        })
    }

    /// Create a backend from loaded settings, sleeping on the tokio timer
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::new(
            &settings.api.base_url,
            Duration::from_millis(settings.api.timeout_ms),
            RetryPolicy::from(&settings.retry),
            Arc::new(TokioSleeper),
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send a request built by `build`, retrying on 429, and return the body
    async fn execute<F>(&self, endpoint: &str, build: F) -> Result<String>
    where
        F: Fn() -> Result<RequestBuilder>,
    {
        debug!(backend = %self.name, endpoint = %endpoint, "Sending request");

        self.retry
            .run(self.sleeper.as_ref(), || {
                let request = build();
                async move { read_body(request?.send().await?).await }
            })
            .await
    }

    /// Send a request exactly once. Status checks use this so the poller's
    /// cadence is the only backoff between them.
    async fn send_once(&self, endpoint: &str, request: RequestBuilder) -> Result<String> {
        debug!(backend = %self.name, endpoint = %endpoint, "Sending request");
        read_body(request.send().await?).await
    }

    async fn submit_image(
        &self,
        request: &GenerationRequest,
        assets: &SubmitAssets,
    ) -> Result<Submission> {
        let product = assets.primary_file.as_ref().ok_or_else(|| {
            AppError::Validation("Image generation needs a product image".to_string())
        })?;
        let url = self.url(BRANDED_AD_PATH);

        let body = self
            .execute(BRANDED_AD_PATH, || {
                let mut form = Form::new()
                    .text("prompt", request.prompt.clone())
                    .part("product_image", file_part(product)?);
                if let Some(reference) = &assets.reference_file {
                    form = form.part("reference_image", file_part(reference)?);
                }
                Ok(self.client.post(&url).multipart(form))
            })
            .await?;

        match schema::parse::<ImageSubmitResponse>(BRANDED_AD_PATH, &body)? {
            ImageSubmitResponse::Ready {
                success: false, ..
            } => Err(AppError::UnexpectedResponse {
                endpoint: BRANDED_AD_PATH.to_string(),
                detail: "backend reported success=false".to_string(),
            }),
            ImageSubmitResponse::Ready {
                image_url,
                metadata,
                ..
            } => Ok(Submission::Ready(GenerationOutput::Asset {
                url: image_url,
                metadata,
            })),
            ImageSubmitResponse::Queued { generation_id } => Ok(Submission::Queued(
                JobHandle::new(generation_id, IdField::GenerationId, GenerationKind::Image),
            )),
        }
    }

    async fn submit_video(
        &self,
        request: &GenerationRequest,
        assets: &SubmitAssets,
    ) -> Result<Submission> {
        let primary = assets.primary_upload.as_ref().ok_or_else(|| {
            AppError::Validation("Video generation needs an uploaded source image".to_string())
        })?;
        let url = self.url(VIDEO_GENERATE_PATH);

        let payload = VideoGenerateBody {
            prompt_image_url: &primary.remote_url,
            reference_image_url: assets
                .reference_upload
                .as_ref()
                .map(|r| r.remote_url.as_str()),
            prompt_text: &request.prompt,
            video_mode: &request.mode.video_mode,
            model: &request.mode.model,
            ratio: &request.mode.ratio,
            duration: request.mode.duration,
        };

        let body = self
            .execute(VIDEO_GENERATE_PATH, || Ok(self.client.post(&url).json(&payload)))
            .await?;

        let submission = match schema::parse::<VideoSubmitResponse>(VIDEO_GENERATE_PATH, &body)? {
            VideoSubmitResponse::Ready { video_url } => {
                Submission::Ready(GenerationOutput::Asset {
                    url: video_url,
                    metadata: None,
                })
            }
            VideoSubmitResponse::Job { job_id } => Submission::Queued(JobHandle::new(
                job_id,
                IdField::JobId,
                GenerationKind::Video,
            )),
            VideoSubmitResponse::Task { task_id } => Submission::Queued(JobHandle::new(
                task_id,
                IdField::TaskId,
                GenerationKind::Video,
            )),
        };
        Ok(submission)
    }

    async fn submit_tts(&self, request: &GenerationRequest) -> Result<Submission> {
        let voice = request.voice.clone().unwrap_or_default();
        let url = self.url(TTS_PATH);
        let payload = TtsBody {
            text: &request.prompt,
            voice_id: &voice.voice_id,
            stability: voice.stability,
            similarity_boost: voice.similarity_boost,
        };

        let body = self
            .execute(TTS_PATH, || Ok(self.client.post(&url).json(&payload)))
            .await?;
        let response = schema::parse::<TtsResponse>(TTS_PATH, &body)?;

        Ok(Submission::Ready(GenerationOutput::Asset {
            url: response.audio_url,
            metadata: None,
        }))
    }

    async fn submit_text(&self, request: &GenerationRequest) -> Result<Submission> {
        let url = self.url(TEXT_PATH);
        let payload = TextBody {
            prompt: &request.prompt,
        };

        let body = self
            .execute(TEXT_PATH, || Ok(self.client.post(&url).json(&payload)))
            .await?;
        let response = schema::parse::<TextResponse>(TEXT_PATH, &body)?;

        Ok(Submission::Ready(GenerationOutput::Text {
            content: response.text,
        }))
    }
}

#[async_trait]
impl GenerationBackend for HttpBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn submit(
        &self,
        request: &GenerationRequest,
        assets: &SubmitAssets,
    ) -> Result<Submission> {
        let submission = match request.kind {
            GenerationKind::Image => self.submit_image(request, assets).await?,
            GenerationKind::Video => self.submit_video(request, assets).await?,
            GenerationKind::Tts => self.submit_tts(request).await?,
            GenerationKind::Text => self.submit_text(request).await?,
        };

        if let Submission::Queued(handle) = &submission {
            debug!(
                backend = %self.name,
                job_id = %handle.id,
                id_field = handle.id_field.as_str(),
                "Job accepted"
            );
        }

        Ok(submission)
    }

    async fn job_status(&self, handle: &JobHandle) -> Result<JobStatus> {
        let path = match handle.id_field {
            IdField::GenerationId => IMAGE_RESULT_PATH,
            IdField::JobId => VIDEO_STATUS_PATH,
            IdField::TaskId => VIDEO_TASK_PATH,
        };
        let url = format!("{}/{}", self.url(path), handle.id);

        let body = self.send_once(path, self.client.get(&url)).await?;

        let status = match handle.id_field {
            IdField::GenerationId => schema::parse::<ImageResultResponse>(path, &body)?.into(),
            IdField::JobId => schema::parse::<VideoStatusResponse>(path, &body)?.into(),
            IdField::TaskId => schema::parse::<VideoTaskResponse>(path, &body)?.into(),
        };
        Ok(status)
    }
}

/// Build a multipart part from an in-memory file
pub(crate) fn file_part(file: &FileRef) -> Result<Part> {
    Ok(Part::bytes(file.data.clone())
        .file_name(file.name.clone())
        .mime_str(&file.mime_type)?)
}

/// Read a response body, turning non-2xx statuses into typed errors
pub(crate) async fn read_body(response: Response) -> Result<String> {
    let status = response.status();
    let body = response.text().await?;

    if status.is_success() {
        Ok(body)
    } else {
        let error = classify_response(status, &body);
        warn!(status = %status, error = %error, "Backend call failed");
        Err(error)
    }
}
