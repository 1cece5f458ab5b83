//! Backend module - Traits, wire schemas, the HTTP client and 429 retries

pub mod http_backend;
pub mod retry;
pub mod schema;
pub mod traits;

pub use http_backend::HttpBackend;
pub use retry::{Backoff, RetryPolicy};
pub use traits::{
    GenerationBackend, GenerationKind, GenerationOutput, GenerationRequest, IdField, JobHandle,
    JobState, JobStatus, ModeFlags, SubmitAssets, Submission, VoiceParams,
};
