//! Rewrite of completed asset URLs before they are handed out

use reqwest::Url;

use crate::config::RewriteConfig;
use crate::error::{AppError, Result};

/// Moves CDN-hosted results onto the storage bucket and drops query strings
#[derive(Debug, Clone, Default)]
pub struct ResultUrlRewrite {
    /// CDN host and the storage base its paths map onto
    rebase: Option<(String, Url)>,
    strip_query: bool,
}

impl ResultUrlRewrite {
    /// Leave URLs untouched
    pub fn identity() -> Self {
        Self::default()
    }

    pub fn new(
        cdn_host: Option<&str>,
        storage_base_url: Option<&str>,
        strip_query: bool,
    ) -> Result<Self> {
        let rebase = match (cdn_host, storage_base_url) {
            (Some(host), Some(base)) => {
                let mut base = Url::parse(base).map_err(|e| {
                    AppError::Validation(format!("Invalid storage base URL '{}': {}", base, e))
                })?;
                if !base.path().ends_with('/') {
                    let path = format!("{}/", base.path());
                    base.set_path(&path);
                }
                Some((host.to_ascii_lowercase(), base))
            }
            (None, None) => None,
            _ => {
                return Err(AppError::Validation(
                    "CDN host and storage base URL must be configured together".to_string(),
                ))
            }
        };

        Ok(Self {
            rebase,
            strip_query,
        })
    }

    pub fn from_config(config: &RewriteConfig) -> Result<Self> {
        Self::new(
            config.cdn_host.as_deref(),
            config.storage_base_url.as_deref(),
            config.strip_query,
        )
    }

    /// Apply the rewrite. The result is always an absolute URL.
    ///
    /// A URL the backend reported that cannot be used is an
    /// [`AppError::UnexpectedResponse`], not an input error.
    pub fn apply(&self, raw: &str) -> Result<String> {
        let mut url = Url::parse(raw.trim())
            .map_err(|e| unusable(raw, format!("not a valid URL: {}", e)))?;

        if let Some((cdn_host, storage_base)) = &self.rebase {
            let on_cdn = url
                .host_str()
                .map(|h| h.eq_ignore_ascii_case(cdn_host))
                .unwrap_or(false);
            if on_cdn {
                let relative = url.path().trim_start_matches('/');
                let mut rebased = storage_base
                    .join(relative)
                    .map_err(|e| unusable(raw, format!("cannot rebase: {}", e)))?;
                rebased.set_query(url.query());
                url = rebased;
            }
        }

        if self.strip_query {
            url.set_query(None);
            url.set_fragment(None);
        }

        Ok(url.to_string())
    }
}

fn unusable(raw: &str, detail: String) -> AppError {
    AppError::UnexpectedResponse {
        endpoint: "result url".to_string(),
        detail: format!("'{}' {}", raw, detail),
    }
}
