//! Error types for the edgequake-invoice library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`InvoiceOcrError`] — **Fatal**: the batch cannot proceed at all
//!   (unreadable document, invalid page range, provider not configured,
//!   nothing to export). Returned as `Err(InvoiceOcrError)` from the
//!   top-level `extract*` functions.
//!
//! * [`PageError`] — **Non-fatal**: a single page failed (network error,
//!   non-success status, no parsable JSON) but the batch continues. The
//!   error text is recorded on a sentinel [`crate::output::PageResult`]
//!   so the page still shows up in both the raw JSON and the CSV report.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-invoice library.
#[derive(Debug, Error)]
pub enum InvoiceOcrError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The bytes were read, but they are not a PDF.
    #[error("Input '{source_name}' is not a valid PDF\nFirst bytes: {magic:?}")]
    NotAPdf { source_name: String, magic: Vec<u8> },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF is corrupt: {detail}\nTry repairing with: qpdf input.pdf output.pdf")]
    CorruptPdf { detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired,

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF")]
    WrongPassword,

    /// The requested page range does not satisfy `1 <= start <= end <= total`.
    #[error("Invalid page range {start}-{end} (document has {total} pages)")]
    InvalidRange {
        start: usize,
        end: usize,
        total: usize,
    },

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium, place the library in the working\n\
directory, or install it system-wide.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Extraction errors ─────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Aggregation errors ────────────────────────────────────────────────
    /// No invoice-keyed rows survived aggregation; there is no table to emit.
    #[error("No data to convert to CSV: no page produced an invoice number")]
    NothingToExport,

    // ── Output errors ─────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The CSV writer rejected a record.
    #[error("CSV serialisation failed: {0}")]
    Csv(#[from] csv::Error),

    /// The JSON report could not be serialised.
    #[error("JSON serialisation failed: {0}")]
    Json(#[from] serde_json::Error),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl InvoiceOcrError {
    /// `true` when the caller supplied something unusable (bad document, bad
    /// range, bad config) or the batch produced nothing to export.
    ///
    /// Request-style front ends map this to a 4xx status and everything else
    /// to a 5xx status.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            InvoiceOcrError::FileNotFound { .. }
                | InvoiceOcrError::PermissionDenied { .. }
                | InvoiceOcrError::NotAPdf { .. }
                | InvoiceOcrError::CorruptPdf { .. }
                | InvoiceOcrError::PasswordRequired
                | InvoiceOcrError::WrongPassword
                | InvoiceOcrError::InvalidRange { .. }
                | InvoiceOcrError::NothingToExport
                | InvoiceOcrError::InvalidConfig(_)
        )
    }
}

/// A non-fatal error for a single page.
///
/// Its `Display` text becomes the `error` field of the page's sentinel
/// [`crate::output::PageResult`].
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// The request never produced a response (connection refused, DNS,
    /// provider-side error).
    #[error("Page {page}: request failed: {detail}")]
    Request { page: usize, detail: String },

    /// The call was abandoned by the caller-side timeout.
    #[error("Page {page}: request timed out after {secs}s")]
    Timeout { page: usize, secs: u64 },

    /// The endpoint answered with a non-success status.
    #[error("Page {page}: HTTP {status}")]
    HttpStatus { page: usize, status: u16 },

    /// The response envelope did not contain any text.
    #[error("Page {page}: malformed response: {detail}")]
    MalformedResponse { page: usize, detail: String },

    /// The response text contained no parsable JSON object.
    #[error("Page {page}: No JSON")]
    NoJson { page: usize },
}

impl PageError {
    /// 1-indexed page the error belongs to.
    pub fn page(&self) -> usize {
        match self {
            PageError::Request { page, .. }
            | PageError::Timeout { page, .. }
            | PageError::HttpStatus { page, .. }
            | PageError::MalformedResponse { page, .. }
            | PageError::NoJson { page } => *page,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_range_display() {
        let e = InvoiceOcrError::InvalidRange {
            start: 3,
            end: 9,
            total: 5,
        };
        let msg = e.to_string();
        assert!(msg.contains("3-9"), "got: {msg}");
        assert!(msg.contains("5 pages"), "got: {msg}");
    }

    #[test]
    fn client_and_server_errors_are_distinguishable() {
        assert!(InvoiceOcrError::NothingToExport.is_client_error());
        assert!(InvoiceOcrError::InvalidRange {
            start: 0,
            end: 1,
            total: 1
        }
        .is_client_error());
        assert!(!InvoiceOcrError::Internal("boom".into()).is_client_error());
        assert!(!InvoiceOcrError::ProviderNotConfigured {
            provider: "gemini".into(),
            hint: "set GEMINI_API_KEY".into(),
        }
        .is_client_error());
    }

    #[test]
    fn page_error_display_mentions_page() {
        let e = PageError::Timeout { page: 2, secs: 120 };
        assert_eq!(e.to_string(), "Page 2: request timed out after 120s");
        assert_eq!(e.page(), 2);

        let e = PageError::HttpStatus {
            page: 4,
            status: 503,
        };
        assert!(e.to_string().contains("HTTP 503"));
    }

    #[test]
    fn no_json_display() {
        assert_eq!(PageError::NoJson { page: 7 }.to_string(), "Page 7: No JSON");
    }
}
