//! Generation session - runs one request end to end and keeps view state
//!
//! A session plays the role of the dashboard form: it uploads inputs,
//! submits, polls when the backend answers with a job id, and records the
//! outcome. Once [`GenerationSession::unmount`] is called, the session
//! stops touching its state and interrupts any poll in progress.

pub mod usage;

pub use usage::{PlanLimits, UsageCounter};

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::backend::traits::{
    GenerationBackend, GenerationOutput, GenerationRequest, SubmitAssets, Submission,
};
use crate::config::{Settings, UploadConfig};
use crate::error::{AppError, ErrorCode, Result};
use crate::poller::{PollPhase, PollProfiles, Poller, ResultUrlRewrite};
use crate::upload::{self, preview, Uploader};

/// User-facing report of a failed generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub code: ErrorCode,
    pub message: String,
    /// Underlying error text, for logs and support
    pub detail: String,
}

impl Notice {
    pub fn from_error(error: &AppError) -> Self {
        let code = error.code();
        Self {
            code,
            message: code.user_message().to_string(),
            detail: error.to_string(),
        }
    }
}

/// What the view renders
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionState {
    pub is_generating: bool,
    pub phase: Option<PollPhase>,
    pub job_id: Option<String>,
    pub generated_url: Option<String>,
    pub generated_text: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub previews: Vec<String>,
    pub last_notice: Option<Notice>,
}

/// Clears `is_generating` when a generation ends, including when its future
/// is dropped before completion
struct GeneratingGuard<'a> {
    session: &'a GenerationSession,
}

impl Drop for GeneratingGuard<'_> {
    fn drop(&mut self) {
        self.session.update(|state| state.is_generating = false);
    }
}

/// Runs generation requests and integrates their results
pub struct GenerationSession {
    backend: Arc<dyn GenerationBackend>,
    uploader: Arc<dyn Uploader>,
    poller: Arc<Poller>,
    profiles: PollProfiles,
    usage: Arc<UsageCounter>,
    limits: UploadConfig,
    state: RwLock<SessionState>,
    mounted: CancellationToken,
}

impl GenerationSession {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        uploader: Arc<dyn Uploader>,
        poller: Arc<Poller>,
        profiles: PollProfiles,
        usage: Arc<UsageCounter>,
        limits: UploadConfig,
    ) -> Self {
        Self {
            backend,
            uploader,
            poller,
            profiles,
            usage,
            limits,
            state: RwLock::new(SessionState::default()),
            mounted: CancellationToken::new(),
        }
    }

    /// Wire up the HTTP backend, the configured uploader and a poller
    pub fn from_settings(settings: &Settings, usage: Arc<UsageCounter>) -> Result<Self> {
        let backend = Arc::new(crate::backend::HttpBackend::from_settings(settings)?);
        let uploader = upload::from_settings(settings)?;
        let poller = Arc::new(Poller::new(ResultUrlRewrite::from_config(&settings.rewrite)?));

        Ok(Self::new(
            backend,
            uploader,
            poller,
            PollProfiles::from(&settings.polling),
            usage,
            settings.upload.clone(),
        ))
    }

    /// Snapshot of the current view state
    pub fn state(&self) -> SessionState {
        self.state.read().clone()
    }

    pub fn usage(&self) -> &UsageCounter {
        &self.usage
    }

    /// Tear the session down. In-flight work is interrupted and the state
    /// is frozen from this point on.
    pub fn unmount(&self) {
        let _state = self.state.write();
        self.mounted.cancel();
        info!("Session unmounted");
    }

    pub fn is_mounted(&self) -> bool {
        !self.mounted.is_cancelled()
    }

    /// Apply `f` to the state unless the session has been unmounted
    fn update(&self, f: impl FnOnce(&mut SessionState)) -> bool {
        let mut state = self.state.write();
        if self.mounted.is_cancelled() {
            return false;
        }
        f(&mut state);
        true
    }

    /// Run one generation end to end.
    ///
    /// Failures are recorded as a [`Notice`] in the state and also returned.
    pub async fn generate(&self, request: GenerationRequest) -> Result<GenerationOutput> {
        {
            let mut state = self.state.write();
            if self.mounted.is_cancelled() {
                return Err(AppError::Cancelled);
            }
            if state.is_generating {
                return Err(AppError::Busy);
            }
            *state = SessionState {
                is_generating: true,
                ..SessionState::default()
            };
        }
        let _generating = GeneratingGuard { session: self };

        let request_id = Uuid::new_v4();
        info!(
            request_id = %request_id,
            kind = request.kind.as_str(),
            "Starting generation"
        );

        match self.run(&request, request_id).await {
            Ok((output, usage_key)) => {
                let applied = self.update(|state| {
                    state.is_generating = false;
                    state.phase = Some(PollPhase::Completed);
                    match &output {
                        GenerationOutput::Asset { url, metadata } => {
                            state.generated_url = Some(url.clone());
                            state.metadata = metadata.clone();
                        }
                        GenerationOutput::Text { content } => {
                            state.generated_text = Some(content.clone());
                        }
                    }
                });
                if applied {
                    self.usage.record_success(&usage_key);
                }
                info!(request_id = %request_id, "Generation finished");
                Ok(output)
            }
            Err(e) => {
                let notice = Notice::from_error(&e);
                match notice.code {
                    ErrorCode::Generic => {
                        error!(request_id = %request_id, error = %e, "Generation failed")
                    }
                    _ => warn!(
                        request_id = %request_id,
                        code = ?notice.code,
                        error = %e,
                        "Generation failed"
                    ),
                }
                self.update(|state| {
                    state.is_generating = false;
                    state.phase = Some(PollPhase::for_error(&e));
                    state.last_notice = Some(notice);
                });
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        request: &GenerationRequest,
        request_id: Uuid,
    ) -> Result<(GenerationOutput, String)> {
        request.validate()?;
        self.usage.check()?;

        let assets = self.prepare_assets(request).await?;

        let submission = tokio::select! {
            biased;
            _ = self.mounted.cancelled() => return Err(AppError::Cancelled),
            submission = self.backend.submit(request, &assets) => submission?,
        };
        self.update(|state| state.phase = Some(PollPhase::Submitted));

        match submission {
            Submission::Ready(output) => Ok((output, format!("request:{}", request_id))),
            Submission::Queued(handle) => {
                self.update(|state| {
                    state.phase = Some(PollPhase::Polling);
                    state.job_id = Some(handle.id.clone());
                });

                let profile = self.profiles.for_handle(&handle);
                let output = self
                    .poller
                    .poll(self.backend.as_ref(), &handle, profile, &self.mounted)
                    .await?;
                Ok((output, handle.key()))
            }
        }
    }

    /// Upload or validate inputs. Nothing is submitted until every asset the
    /// request references has a remote URL.
    async fn prepare_assets(&self, request: &GenerationRequest) -> Result<SubmitAssets> {
        let mut assets = SubmitAssets::default();

        if request.needs_upload() {
            let primary = request.primary_asset.as_ref().ok_or_else(|| {
                AppError::Validation("A source image is required".to_string())
            })?;

            let uploads = async {
                match &request.reference_asset {
                    Some(reference) => {
                        let (p, r) =
                            upload::upload_pair(self.uploader.as_ref(), primary, reference)
                                .await?;
                        Ok::<_, AppError>((p, Some(r)))
                    }
                    None => Ok((self.uploader.upload(primary).await?, None)),
                }
            };

            let (primary_upload, reference_upload) = tokio::select! {
                biased;
                _ = self.mounted.cancelled() => return Err(AppError::Cancelled),
                uploaded = uploads => uploaded?,
            };

            let mut previews = vec![primary_upload.preview_url.clone()];
            previews.extend(reference_upload.iter().map(|r| r.preview_url.clone()));
            self.update(|state| state.previews = previews);

            assets.primary_upload = Some(primary_upload);
            assets.reference_upload = reference_upload;
        } else {
            for file in request.primary_asset.iter().chain(request.reference_asset.iter()) {
                file.validate(&self.limits)?;
            }

            let previews: Vec<String> = request
                .primary_asset
                .iter()
                .chain(request.reference_asset.iter())
                .map(preview::data_url)
                .collect();
            if !previews.is_empty() {
                self.update(|state| state.previews = previews);
            }

            assets.primary_file = request.primary_asset.clone();
            assets.reference_file = request.reference_asset.clone();
        }

        Ok(assets)
    }
}
