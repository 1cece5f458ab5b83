//! Upload step - turns local files into durable URLs

pub mod file;
pub mod preview;

pub use file::FileRef;

use async_trait::async_trait;
use reqwest::multipart::Form;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::backend::http_backend::{file_part, read_body};
use crate::backend::retry::RetryPolicy;
use crate::backend::schema;
use crate::config::{Settings, UploadConfig, UploadMode};
use crate::error::{AppError, Result};
use crate::time::{Sleeper, TokioSleeper};

const PROXY_UPLOAD_PATH: &str = "/api/upload";
const SIGNATURE_PATH: &str = "/api/cloudinary-signature";

/// A file that has been stored by a provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedAssetRef {
    pub local_name: String,
    pub remote_url: String,
    pub size_bytes: u64,
    pub mime_type: String,
    /// `data:` URL for immediate display, independent of `remote_url`
    pub preview_url: String,
}

impl UploadedAssetRef {
    fn new(file: &FileRef, remote_url: String) -> Self {
        Self {
            local_name: file.name.clone(),
            remote_url,
            size_bytes: file.size(),
            mime_type: file.mime_type.clone(),
            preview_url: preview::data_url(file),
        }
    }
}

/// Something that can store a local file and hand back its URL
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, file: &FileRef) -> Result<UploadedAssetRef>;
}

/// Upload two keyframes at once; fails if either upload fails
pub async fn upload_pair(
    uploader: &dyn Uploader,
    first: &FileRef,
    second: &FileRef,
) -> Result<(UploadedAssetRef, UploadedAssetRef)> {
    futures::try_join!(uploader.upload(first), uploader.upload(second))
}

/// Build the uploader selected by `upload.mode`
pub fn from_settings(settings: &Settings) -> Result<Arc<dyn Uploader>> {
    let sleeper: Arc<dyn Sleeper> = Arc::new(TokioSleeper);
    let retry = RetryPolicy::from(&settings.retry);
    let timeout = Duration::from_millis(settings.api.timeout_ms);

    let uploader: Arc<dyn Uploader> = match settings.upload.mode {
        UploadMode::Proxy => Arc::new(ProxyUploader::new(
            &settings.api.base_url,
            settings.upload.clone(),
            timeout,
            retry,
            sleeper,
        )?),
        UploadMode::Direct => {
            let cloud_name = settings.cloudinary.cloud_name.clone().ok_or_else(|| {
                AppError::Validation("cloudinary.cloud_name is not configured".to_string())
            })?;
            let upload_preset = settings.cloudinary.upload_preset.clone().ok_or_else(|| {
                AppError::Validation("cloudinary.upload_preset is not configured".to_string())
            })?;
            Arc::new(DirectUploader::new(
                &settings.api.base_url,
                CloudinaryTarget {
                    base_url: settings.cloudinary.base_url.clone(),
                    cloud_name,
                    upload_preset,
                },
                settings.upload.clone(),
                timeout,
                retry,
                sleeper,
            )?)
        }
    };
    Ok(uploader)
}

fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))
}

#[derive(Debug, Deserialize)]
struct ProxyUploadResponse {
    url: String,
}

/// Uploads through the backend, which forwards to storage
pub struct ProxyUploader {
    client: Client,
    endpoint: String,
    limits: UploadConfig,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl ProxyUploader {
    pub fn new(
        api_base_url: &str,
        limits: UploadConfig,
        timeout: Duration,
        retry: RetryPolicy,
        sleeper: Arc<dyn Sleeper>,
    ) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            endpoint: format!("{}{}", api_base_url.trim_end_matches('/'), PROXY_UPLOAD_PATH),
            limits,
            retry,
            sleeper,
        })
    }
}

#[async_trait]
impl Uploader for ProxyUploader {
    async fn upload(&self, file: &FileRef) -> Result<UploadedAssetRef> {
        file.validate(&self.limits)?;
        debug!(file = %file.name, size = file.size(), "Uploading through proxy");

        let body = self
            .retry
            .run(self.sleeper.as_ref(), || {
                let form = file_part(file).map(|part| Form::new().part("file", part));
                let request = form.map(|form| self.client.post(&self.endpoint).multipart(form));
                async move { read_body(request?.send().await?).await }
            })
            .await?;

        let response = schema::parse::<ProxyUploadResponse>(PROXY_UPLOAD_PATH, &body)?;
        info!(file = %file.name, url = %response.url, "Upload complete");
        Ok(UploadedAssetRef::new(file, response.url))
    }
}

/// Where direct uploads go
#[derive(Debug, Clone)]
pub struct CloudinaryTarget {
    pub base_url: String,
    pub cloud_name: String,
    pub upload_preset: String,
}

#[derive(Debug, Deserialize)]
struct SignatureResponse {
    signature: String,
    timestamp: i64,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct CloudinaryUploadResponse {
    secure_url: String,
}

/// Uploads straight to Cloudinary with a signature issued by the backend
pub struct DirectUploader {
    client: Client,
    signature_endpoint: String,
    target: CloudinaryTarget,
    limits: UploadConfig,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl DirectUploader {
    pub fn new(
        api_base_url: &str,
        target: CloudinaryTarget,
        limits: UploadConfig,
        timeout: Duration,
        retry: RetryPolicy,
        sleeper: Arc<dyn Sleeper>,
    ) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            signature_endpoint: format!(
                "{}{}",
                api_base_url.trim_end_matches('/'),
                SIGNATURE_PATH
            ),
            target,
            limits,
            retry,
            sleeper,
        })
    }

    fn upload_endpoint(&self) -> String {
        format!(
            "{}/v1_1/{}/image/upload",
            self.target.base_url.trim_end_matches('/'),
            self.target.cloud_name
        )
    }

    async fn fetch_signature(&self) -> Result<SignatureResponse> {
        let body = self
            .retry
            .run(self.sleeper.as_ref(), || {
                let request = self.client.get(&self.signature_endpoint);
                async move { read_body(request.send().await?).await }
            })
            .await?;
        schema::parse(SIGNATURE_PATH, &body)
    }
}

#[async_trait]
impl Uploader for DirectUploader {
    async fn upload(&self, file: &FileRef) -> Result<UploadedAssetRef> {
        file.validate(&self.limits)?;

        let signature = self.fetch_signature().await?;
        let endpoint = self.upload_endpoint();
        debug!(file = %file.name, endpoint = %endpoint, "Uploading to Cloudinary");

        let body = self
            .retry
            .run(self.sleeper.as_ref(), || {
                let form = file_part(file).map(|part| {
                    Form::new()
                        .part("file", part)
                        .text("api_key", signature.api_key.clone())
                        .text("timestamp", signature.timestamp.to_string())
                        .text("signature", signature.signature.clone())
                        .text("upload_preset", self.target.upload_preset.clone())
                });
                let request = form.map(|form| self.client.post(&endpoint).multipart(form));
                async move { read_body(request?.send().await?).await }
            })
            .await?;

        let response = schema::parse::<CloudinaryUploadResponse>(&endpoint, &body)?;
        info!(file = %file.name, url = %response.secure_url, "Upload complete");
        Ok(UploadedAssetRef::new(file, response.secure_url))
    }
}
