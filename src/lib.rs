//! # edgequake-invoice
//!
//! Extract structured fields from scanned tax-invoice PDFs with Vision
//! Language Models and emit a per-page JSON report plus a CSV table with one
//! row per invoice.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input      local file or URL, `%PDF` check
//!  ├─ 2. Render     each page at 300 DPI via pdfium → base64 PNG
//!  ├─ 3. Extract    one vision call per page, sequential, fixed delay
//!  ├─ 4. Sanitize   fenced/braced JSON, numeric separators, trailing commas
//!  ├─ 5. Aggregate  pages sharing an invoice number → one row
//!  └─ 6. Output     {"results": [...]} JSON + BOM-prefixed CSV
//! ```
//!
//! A page that fails at any step becomes a sentinel record
//! (`document_type = "Error"`, `invoice_number = "ERROR_<page>"`) so it stays
//! visible in both reports.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_invoice::{export, extract_invoices, ExtractionConfig, PageRange};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / GEMINI_API_KEY / …
//!     let config = ExtractionConfig::builder()
//!         .pages(PageRange::new(1, 4))
//!         .build()?;
//!     let output = extract_invoices("invoices.pdf", &config).await?;
//!     std::fs::write("invoices.csv", export::to_csv_bytes(&output.table())?)?;
//!     eprintln!("{}/{} pages ok", output.stats.succeeded_pages, output.stats.requested_pages);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `invoice-ocr` binary (clap, indicatif, anyhow, tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod export;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{Backend, ExtractionConfig, ExtractionConfigBuilder, PageRange};
pub use error::{InvoiceOcrError, PageError};
pub use extract::{
    extract_invoices, extract_invoices_from_bytes, extract_to_files, inspect, process_pages,
};
pub use output::{BatchOutput, BatchStats, DocumentInfo, LineItem, PageResult};
pub use pipeline::aggregate::{aggregate, format_page_ranges, Column, InvoiceGroup, InvoiceTable};
pub use pipeline::client::{GeminiRestExtractor, LlmExtractor, PageExtractor};
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
