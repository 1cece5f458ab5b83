//! Generation Job Client
//!
//! Drives long-running image, video and speech generation backends: uploads
//! inputs, submits requests, retries rate-limited calls and polls
//! asynchronous jobs until they produce an asset.

pub mod backend;
pub mod config;
pub mod error;
pub mod poller;
pub mod session;
pub mod time;
pub mod upload;

pub use error::{AppError, ErrorCode, Result};
pub use session::{GenerationSession, SessionState};
