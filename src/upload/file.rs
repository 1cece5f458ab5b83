//! Local files and the checks they must pass before upload

use std::path::Path;
use tokio::fs;
use tracing::debug;

use crate::config::UploadConfig;
use crate::error::{AppError, Result};

/// A local file held in memory
#[derive(Clone, PartialEq, Eq)]
pub struct FileRef {
    pub name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl std::fmt::Debug for FileRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileRef")
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("size", &self.data.len())
            .finish()
    }
}

impl FileRef {
    /// Wrap bytes that are already in memory
    pub fn from_bytes(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            data,
        }
    }

    /// Read a file from disk, sniffing its type from the content
    pub async fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read(path).await?;

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload")
            .to_string();
        let mime_type = detect_mime_type(&data)
            .or_else(|| mime_from_extension(path))
            .unwrap_or("application/octet-stream")
            .to_string();

        debug!(path = ?path, mime_type = %mime_type, size = data.len(), "Loaded local file");

        Ok(Self {
            name,
            mime_type,
            data,
        })
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Reject files the upload targets will not accept
    pub fn validate(&self, config: &UploadConfig) -> Result<()> {
        if self.data.is_empty() {
            return Err(AppError::Validation(format!("'{}' is empty", self.name)));
        }

        if self.size() > config.max_size_bytes {
            return Err(AppError::Validation(format!(
                "'{}' is {} bytes; the limit is {} bytes",
                self.name,
                self.size(),
                config.max_size_bytes
            )));
        }

        let declared = self.mime_type.to_ascii_lowercase();
        if !config
            .allowed_mime_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(&declared))
        {
            return Err(AppError::Validation(format!(
                "'{}' has type {}; allowed types are {}",
                self.name,
                declared,
                config.allowed_mime_types.join(", ")
            )));
        }

        if let Some(sniffed) = detect_mime_type(&self.data) {
            if sniffed != declared {
                return Err(AppError::Validation(format!(
                    "'{}' claims to be {} but contains {}",
                    self.name, declared, sniffed
                )));
            }
        }

        Ok(())
    }
}

/// Detect image MIME type from binary data using magic bytes
pub fn detect_mime_type(data: &[u8]) -> Option<&'static str> {
    if data.len() < 8 {
        return None;
    }

    // PNG: 89 50 4E 47 0D 0A 1A 0A
    if data.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some("image/png");
    }

    // JPEG: FF D8 FF
    if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some("image/jpeg");
    }

    // GIF: GIF87a or GIF89a
    if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        return Some("image/gif");
    }

    // WebP: RIFF....WEBP
    if data.len() >= 12 && data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
        return Some("image/webp");
    }

    None
}

fn mime_from_extension(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}
