//! Remote spreadsheet fetch

use futures::StreamExt;
use reqwest::{Client, Url};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use super::SourceFormat;
use crate::{EtlError, Result};

/// Upper bound on a downloaded workbook.
pub const MAX_DOWNLOAD_BYTES: usize = 512 * 1024 * 1024;

/// Download the whole resource. Any non-2xx status is an error.
pub async fn fetch(url: &str, timeout: Duration) -> Result<Vec<u8>> {
    let client = Client::builder().timeout(timeout).build()?;

    info!(%url, "Fetching source");
    let response = client.get(url).send().await?.error_for_status()?;

    let expected = response.content_length().unwrap_or(0) as usize;
    if expected > MAX_DOWNLOAD_BYTES {
        return Err(too_large(url));
    }

    let mut body = Vec::with_capacity(expected);
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if body.len() + chunk.len() > MAX_DOWNLOAD_BYTES {
            return Err(too_large(url));
        }
        body.extend_from_slice(&chunk);
    }

    info!(%url, bytes = body.len(), "Fetched source");
    Ok(body)
}

fn too_large(url: &str) -> EtlError {
    EtlError::Source(format!(
        "{} exceeds the {} byte download limit",
        url, MAX_DOWNLOAD_BYTES
    ))
}

fn url_path(url: &str) -> Option<String> {
    Url::parse(url).ok().map(|u| u.path().to_string())
}

/// Format implied by the extension of the URL path (query string ignored).
pub fn format_from_url(url: &str) -> Option<SourceFormat> {
    SourceFormat::from_path(Path::new(&url_path(url)?))
}

/// Stem of the last path segment, used to name csv sources.
pub fn name_from_url(url: &str) -> String {
    url_path(url)
        .and_then(|path| {
            Path::new(&path)
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
        })
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| "Sheet1".to_string())
}
