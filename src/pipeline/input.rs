//! Input resolution: a local path or HTTP(S) URL → validated PDF bytes.
//!
//! pdfium loads straight from memory, so downloads never touch disk. The
//! `%PDF` magic is checked here so a mislabelled upload fails with
//! [`InvoiceOcrError::NotAPdf`] instead of a pdfium parse error.

use crate::error::InvoiceOcrError;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

const PDF_MAGIC: &[u8] = b"%PDF";

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Read a local file or download a URL, returning the PDF bytes.
pub async fn load_document(input: &str, timeout_secs: u64) -> Result<Vec<u8>, InvoiceOcrError> {
    let bytes = if is_url(input) {
        download(input, timeout_secs).await?
    } else {
        read_local(input).await?
    };
    check_magic(input, &bytes)?;
    Ok(bytes)
}

/// Reject buffers that do not start with `%PDF`.
pub fn check_magic(source_name: &str, bytes: &[u8]) -> Result<(), InvoiceOcrError> {
    if bytes.starts_with(PDF_MAGIC) {
        return Ok(());
    }
    Err(InvoiceOcrError::NotAPdf {
        source_name: source_name.to_string(),
        magic: bytes.iter().take(PDF_MAGIC.len()).copied().collect(),
    })
}

async fn read_local(path_str: &str) -> Result<Vec<u8>, InvoiceOcrError> {
    let path = PathBuf::from(path_str);
    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            debug!("Read {} bytes from {}", bytes.len(), path.display());
            Ok(bytes)
        }
        Err(e) if e.kind() == ErrorKind::PermissionDenied => {
            Err(InvoiceOcrError::PermissionDenied { path })
        }
        Err(_) => Err(InvoiceOcrError::FileNotFound { path }),
    }
}

async fn download(url: &str, timeout_secs: u64) -> Result<Vec<u8>, InvoiceOcrError> {
    info!("Downloading PDF from: {}", url);

    let failed = |reason: String| InvoiceOcrError::DownloadFailed {
        url: url.to_string(),
        reason,
    };
    let classify = |e: reqwest::Error| {
        if e.is_timeout() {
            InvoiceOcrError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(classify)?;
    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let bytes = response.bytes().await.map_err(classify)?;
    info!("Downloaded {} bytes", bytes.len());
    Ok(bytes.to_vec())
}
