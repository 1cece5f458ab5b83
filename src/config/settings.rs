//! Application settings and configuration management

use crate::error::{AppError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub cloudinary: CloudinaryConfig,
    #[serde(default)]
    pub supabase: SupabaseConfig,
    #[serde(default)]
    pub stripe: StripeConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub rewrite: RewriteConfig,
    #[serde(default)]
    pub plans: PlansConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Generation backend configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_timeout() -> u64 {
    120000
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_ms: default_timeout(),
        }
    }
}

/// How local files reach a durable URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadMode {
    /// Through the backend's upload proxy
    Proxy,
    /// Straight to Cloudinary with a backend-issued signature
    Direct,
}

/// Upload validation and routing
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UploadConfig {
    #[serde(default = "default_upload_mode")]
    pub mode: UploadMode,
    #[serde(default = "default_max_size")]
    pub max_size_bytes: u64,
    #[serde(default = "default_mime_types")]
    pub allowed_mime_types: Vec<String>,
}

fn default_upload_mode() -> UploadMode {
    UploadMode::Proxy
}

fn default_max_size() -> u64 {
    10 * 1024 * 1024
}

fn default_mime_types() -> Vec<String> {
    vec![
        "image/jpeg".to_string(),
        "image/png".to_string(),
        "image/webp".to_string(),
    ]
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            mode: default_upload_mode(),
            max_size_bytes: default_max_size(),
            allowed_mime_types: default_mime_types(),
        }
    }
}

/// Cloudinary direct-upload target
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CloudinaryConfig {
    #[serde(default)]
    pub cloud_name: Option<String>,
    #[serde(default)]
    pub upload_preset: Option<String>,
    #[serde(default = "default_cloudinary_base")]
    pub base_url: String,
}

fn default_cloudinary_base() -> String {
    "https://api.cloudinary.com".to_string()
}

impl Default for CloudinaryConfig {
    fn default() -> Self {
        Self {
            cloud_name: None,
            upload_preset: None,
            base_url: default_cloudinary_base(),
        }
    }
}

/// Carried for the embedding application; never called from this crate
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SupabaseConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub anon_key: Option<String>,
}

/// Carried for the embedding application; never called from this crate
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StripeConfig {
    #[serde(default)]
    pub public_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Linear,
    Exponential,
}

/// Retry-on-429 configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Total calls, including the first
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff")]
    pub backoff: BackoffKind,
    #[serde(default = "default_retry_base")]
    pub base_delay_ms: u64,
    #[serde(default = "default_retry_increment")]
    pub increment_ms: u64,
    /// Unit for exponential backoff
    #[serde(default = "default_retry_unit")]
    pub unit_ms: u64,
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_backoff() -> BackoffKind {
    BackoffKind::Linear
}

fn default_retry_base() -> u64 {
    8000
}

fn default_retry_increment() -> u64 {
    5000
}

fn default_retry_unit() -> u64 {
    2000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            backoff: default_backoff(),
            base_delay_ms: default_retry_base(),
            increment_ms: default_retry_increment(),
            unit_ms: default_retry_unit(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleKind {
    Fixed,
    Linear,
}

/// Poll cadence for one job family
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PollProfileConfig {
    pub schedule: ScheduleKind,
    pub interval_ms: u64,
    #[serde(default)]
    pub step_ms: u64,
    #[serde(default)]
    pub max_interval_ms: Option<u64>,
    pub max_attempts: u32,
}

/// Poll profiles keyed by job id scheme
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PollingConfig {
    #[serde(default = "default_image_profile")]
    pub image: PollProfileConfig,
    #[serde(default = "default_video_profile")]
    pub video: PollProfileConfig,
    #[serde(default = "default_video_task_profile")]
    pub video_task: PollProfileConfig,
}

fn default_image_profile() -> PollProfileConfig {
    PollProfileConfig {
        schedule: ScheduleKind::Linear,
        interval_ms: 3000,
        step_ms: 1000,
        max_interval_ms: Some(10000),
        max_attempts: 20,
    }
}

fn default_video_profile() -> PollProfileConfig {
    PollProfileConfig {
        schedule: ScheduleKind::Fixed,
        interval_ms: 10000,
        step_ms: 0,
        max_interval_ms: None,
        max_attempts: 60,
    }
}

fn default_video_task_profile() -> PollProfileConfig {
    PollProfileConfig {
        schedule: ScheduleKind::Fixed,
        interval_ms: 5000,
        step_ms: 0,
        max_interval_ms: None,
        max_attempts: 20,
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            image: default_image_profile(),
            video: default_video_profile(),
            video_task: default_video_task_profile(),
        }
    }
}

/// Rewrite applied to completed asset URLs
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RewriteConfig {
    #[serde(default)]
    pub cdn_host: Option<String>,
    #[serde(default)]
    pub storage_base_url: Option<String>,
    #[serde(default = "default_true")]
    pub strip_query: bool,
}

fn default_true() -> bool {
    true
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self {
            cdn_host: None,
            storage_base_url: None,
            strip_query: true,
        }
    }
}

/// Plan name to generation quota
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlansConfig {
    #[serde(default = "default_plan")]
    pub default_plan: String,
    #[serde(default = "default_limits")]
    pub limits: HashMap<String, u32>,
}

fn default_plan() -> String {
    "free".to_string()
}

fn default_limits() -> HashMap<String, u32> {
    HashMap::from([
        ("free".to_string(), 3),
        ("starter".to_string(), 50),
        ("pro".to_string(), 200),
        ("enterprise".to_string(), 1000),
    ])
}

impl Default for PlansConfig {
    fn default() -> Self {
        Self {
            default_plan: default_plan(),
            limits: default_limits(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Environment variables shared with the web dashboard build
const VITE_OVERRIDES: &[(&str, &str)] = &[
    ("api.base_url", "VITE_API_BASE_URL"),
    ("supabase.url", "VITE_SUPABASE_URL"),
    ("supabase.anon_key", "VITE_SUPABASE_ANON_KEY"),
    ("cloudinary.cloud_name", "VITE_CLOUDINARY_CLOUD_NAME"),
    ("cloudinary.upload_preset", "VITE_CLOUDINARY_UPLOAD_PRESET"),
    ("stripe.public_key", "VITE_STRIPE_PUBLIC_KEY"),
];

impl Settings {
    /// Load settings from configuration files and environment variables
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/default.toml")
    }

    /// Load settings from a specific configuration file path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_str().ok_or_else(|| {
            AppError::Config(config::ConfigError::Message(
                "Configuration path is not valid UTF-8".to_string(),
            ))
        })?;

        let mut builder = Config::builder()
            .set_default("api.base_url", default_base_url())?
            .set_default("api.timeout_ms", default_timeout() as i64)?
            .add_source(File::with_name(path).required(false))
            // Override with environment variables (prefixed with GENJOB__)
            .add_source(
                Environment::with_prefix("GENJOB")
                    .separator("__")
                    .try_parsing(true),
            );

        for (key, var) in VITE_OVERRIDES {
            let value = std::env::var(var).ok().filter(|v| !v.trim().is_empty());
            builder = builder.set_override_option(*key, value)?;
        }

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        reqwest::Url::parse(&self.api.base_url).map_err(|e| {
            invalid(format!("api.base_url '{}' is not a URL: {}", self.api.base_url, e))
        })?;

        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts must be at least 1".to_string()));
        }

        for (name, profile) in [
            ("image", &self.polling.image),
            ("video", &self.polling.video),
            ("video_task", &self.polling.video_task),
        ] {
            if profile.max_attempts == 0 {
                return Err(invalid(format!(
                    "polling.{}.max_attempts must be at least 1",
                    name
                )));
            }
            if profile.interval_ms == 0 {
                return Err(invalid(format!(
                    "polling.{}.interval_ms must be greater than 0",
                    name
                )));
            }
        }

        if self.upload.allowed_mime_types.is_empty() {
            return Err(invalid(
                "upload.allowed_mime_types cannot be empty".to_string(),
            ));
        }

        if self.upload.mode == UploadMode::Direct
            && (self.cloudinary.cloud_name.is_none() || self.cloudinary.upload_preset.is_none())
        {
            return Err(invalid(
                "Direct uploads need cloudinary.cloud_name and cloudinary.upload_preset"
                    .to_string(),
            ));
        }

        if !self.plans.limits.contains_key(&self.plans.default_plan) {
            return Err(invalid(format!(
                "plans.default_plan '{}' has no entry in plans.limits",
                self.plans.default_plan
            )));
        }

        if self.rewrite.cdn_host.is_some() != self.rewrite.storage_base_url.is_some() {
            return Err(invalid(
                "rewrite.cdn_host and rewrite.storage_base_url must be set together".to_string(),
            ));
        }

        Ok(())
    }
}

fn invalid(message: String) -> AppError {
    AppError::Config(config::ConfigError::Message(message))
}
