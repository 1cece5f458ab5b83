//! Local preview URLs for uploaded files

use base64::{engine::general_purpose::STANDARD, Engine};

use crate::upload::FileRef;

/// Build a `data:` URL that renders the file without a network round trip
pub fn data_url(file: &FileRef) -> String {
    format!("data:{};base64,{}", file.mime_type, STANDARD.encode(&file.data))
}
