//! Pipeline stages for invoice extraction.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ client ──▶ sanitize ──▶ aggregate
//! (path/URL) (pdfium+PNG) (VLM)   (JSON repair)  (one row per invoice)
//! ```
//!
//! 1. [`input`]     — read a local file or download a URL, check `%PDF`
//! 2. [`render`]    — rasterise the page range at `dpi / 72` zoom and
//!    PNG-encode each page; runs in `spawn_blocking`
//! 3. [`client`]    — send one page image to the model; the only stage with
//!    per-page network I/O
//! 4. [`sanitize`]  — pull a JSON object out of free-form model text and
//!    canonicalise its keys
//! 5. [`aggregate`] — flatten line items, group pages by invoice number,
//!    reduce each column by its policy

pub mod aggregate;
pub mod client;
pub mod input;
pub mod render;
pub mod sanitize;
