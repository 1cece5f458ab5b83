//! Common traits and types for generation backends

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::upload::{FileRef, UploadedAssetRef};

/// What a request asks the backend to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationKind {
    Image,
    Video,
    Tts,
    Text,
}

impl GenerationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationKind::Image => "image",
            GenerationKind::Video => "video",
            GenerationKind::Tts => "tts",
            GenerationKind::Text => "text",
        }
    }
}

impl std::str::FromStr for GenerationKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "image" => Ok(Self::Image),
            "video" => Ok(Self::Video),
            "tts" | "speech" => Ok(Self::Tts),
            "text" => Ok(Self::Text),
            other => Err(AppError::Validation(format!(
                "Unknown generation kind '{}'",
                other
            ))),
        }
    }
}

/// Video options chosen in the dashboard form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeFlags {
    pub video_mode: String,
    pub model: String,
    pub ratio: String,
    /// Clip length in seconds
    pub duration: u32,
}

impl Default for ModeFlags {
    fn default() -> Self {
        Self {
            video_mode: "image_to_video".to_string(),
            model: "gen4_turbo".to_string(),
            ratio: "1280:720".to_string(),
            duration: 5,
        }
    }
}

/// Voice settings for text-to-speech
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceParams {
    pub voice_id: String,
    pub stability: f32,
    pub similarity_boost: f32,
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self {
            voice_id: "21m00Tcm4TlvDq8ikWAM".to_string(),
            stability: 0.5,
            similarity_boost: 0.75,
        }
    }
}

/// A generation the user submitted. Immutable once built.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub kind: GenerationKind,
    pub prompt: String,
    pub primary_asset: Option<FileRef>,
    pub reference_asset: Option<FileRef>,
    pub mode: ModeFlags,
    pub voice: Option<VoiceParams>,
}

impl GenerationRequest {
    pub fn new(kind: GenerationKind, prompt: impl Into<String>) -> Self {
        Self {
            kind,
            prompt: prompt.into(),
            primary_asset: None,
            reference_asset: None,
            mode: ModeFlags::default(),
            voice: None,
        }
    }

    pub fn with_primary_asset(mut self, file: FileRef) -> Self {
        self.primary_asset = Some(file);
        self
    }

    pub fn with_reference_asset(mut self, file: FileRef) -> Self {
        self.reference_asset = Some(file);
        self
    }

    pub fn with_mode(mut self, mode: ModeFlags) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_voice(mut self, voice: VoiceParams) -> Self {
        self.voice = Some(voice);
        self
    }

    /// Whether the primary asset must be uploaded before submission
    pub fn needs_upload(&self) -> bool {
        self.kind == GenerationKind::Video
    }

    /// Check required fields before anything touches the network
    pub fn validate(&self) -> Result<()> {
        if self.prompt.trim().is_empty() {
            return Err(AppError::Validation("Prompt cannot be empty".to_string()));
        }
        match self.kind {
            GenerationKind::Image | GenerationKind::Video if self.primary_asset.is_none() => {
                Err(AppError::Validation(format!(
                    "{} generation needs a source image",
                    self.kind.as_str()
                )))
            }
            GenerationKind::Tts | GenerationKind::Text if self.primary_asset.is_some() => {
                Err(AppError::Validation(format!(
                    "{} generation does not take an image",
                    self.kind.as_str()
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Assets in the form the backend consumes them.
///
/// Video jobs reference uploaded URLs; image jobs send the bytes inline.
#[derive(Debug, Clone, Default)]
pub struct SubmitAssets {
    pub primary_file: Option<FileRef>,
    pub reference_file: Option<FileRef>,
    pub primary_upload: Option<UploadedAssetRef>,
    pub reference_upload: Option<UploadedAssetRef>,
}

/// Field the backend used to name an asynchronous job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdField {
    GenerationId,
    JobId,
    TaskId,
}

impl IdField {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdField::GenerationId => "generation_id",
            IdField::JobId => "job_id",
            IdField::TaskId => "task_id",
        }
    }
}

/// An accepted asynchronous job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub id: String,
    pub id_field: IdField,
    pub kind: GenerationKind,
    pub submitted_at: DateTime<Utc>,
}

impl JobHandle {
    pub fn new(id: impl Into<String>, id_field: IdField, kind: GenerationKind) -> Self {
        Self {
            id: id.into(),
            id_field,
            kind,
            submitted_at: Utc::now(),
        }
    }

    /// Key that is unique across id schemes
    pub fn key(&self) -> String {
        format!("{}:{}", self.id_field.as_str(), self.id)
    }
}

/// A finished generation
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutput {
    Asset {
        url: String,
        metadata: Option<serde_json::Value>,
    },
    Text {
        content: String,
    },
}

impl GenerationOutput {
    pub fn url(&self) -> Option<&str> {
        match self {
            GenerationOutput::Asset { url, .. } => Some(url),
            GenerationOutput::Text { .. } => None,
        }
    }
}

/// Outcome of a submission
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// The backend answered with the result straight away
    Ready(GenerationOutput),
    /// The backend accepted a job that has to be polled
    Queued(JobHandle),
}

/// State reported by a status endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Processing,
    Completed,
    Failed,
    NotFound,
}

impl JobState {
    /// Interpret a raw status string. Unknown values count as still running.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "completed" | "complete" | "succeeded" | "success" => JobState::Completed,
            "failed" | "error" => JobState::Failed,
            "not_found" => JobState::NotFound,
            "queued" | "pending" => JobState::Queued,
            _ => JobState::Processing,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::NotFound
        )
    }
}

/// One status observation
#[derive(Debug, Clone, PartialEq)]
pub struct JobStatus {
    pub state: JobState,
    pub result_url: Option<String>,
    pub error: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl JobStatus {
    pub fn new(state: JobState) -> Self {
        Self {
            state,
            result_url: None,
            error: None,
            metadata: None,
        }
    }
}

/// Trait for generation backends
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Get the backend name
    fn name(&self) -> &str;

    /// Submit a generation. Assets that need a durable URL must already be
    /// uploaded and present in `assets`.
    async fn submit(&self, request: &GenerationRequest, assets: &SubmitAssets)
        -> Result<Submission>;

    /// Fetch the current status of an asynchronous job
    async fn job_status(&self, handle: &JobHandle) -> Result<JobStatus>;
}
