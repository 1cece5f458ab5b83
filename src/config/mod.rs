//! Configuration loading

pub mod settings;

pub use settings::{
    ApiConfig, BackoffKind, CloudinaryConfig, LoggingConfig, PlansConfig, PollProfileConfig,
    PollingConfig, RetryConfig, RewriteConfig, ScheduleKind, Settings, UploadConfig, UploadMode,
};
