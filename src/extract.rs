//! Batch entry points.
//!
//! A batch is one document and one page range. Pages go to the model one at
//! a time in ascending order with a fixed pause after each; a page that fails
//! becomes a sentinel record and the batch carries on.

use crate::config::ExtractionConfig;
use crate::error::{InvoiceOcrError, PageError};
use crate::export;
use crate::output::{BatchOutput, BatchStats, DocumentInfo, PageResult};
use crate::pipeline::client::{ConfiguredExtractor, PageExtractor};
use crate::pipeline::{input, render, sanitize};
use edgequake_llm::ImageData;
use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Extract every page of a local PDF or URL.
///
/// # Errors
/// Only fatal conditions: unreadable input, invalid range, missing
/// credentials, pdfium failures. Per-page failures are sentinel records in
/// `results`.
pub async fn extract_invoices(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<BatchOutput, InvoiceOcrError> {
    let input_str = input_str.as_ref();
    info!("Starting extraction: {}", input_str);
    let bytes = input::load_document(input_str, config.download_timeout_secs).await?;
    extract_invoices_from_bytes(bytes, config).await
}

/// Extract from an in-memory PDF.
///
/// ```rust,no_run
/// use edgequake_invoice::{extract_invoices_from_bytes, ExtractionConfig};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let bytes = std::fs::read("invoices.pdf")?;
/// let output = extract_invoices_from_bytes(bytes, &ExtractionConfig::default()).await?;
/// println!("{} invoices", output.table().len());
/// # Ok(())
/// # }
/// ```
pub async fn extract_invoices_from_bytes(
    bytes: Vec<u8>,
    config: &ExtractionConfig,
) -> Result<BatchOutput, InvoiceOcrError> {
    let total_start = Instant::now();
    input::check_magic("<bytes>", &bytes)?;

    // Input problems (unreadable document, bad range) are reported before
    // credentials, and credentials before any rendering work.
    let info = render::document_info(bytes.clone(), config.password.clone()).await?;
    render::validate_range(config.range_for(info.page_count), info.page_count)?;
    let extractor = ConfiguredExtractor::from_config(config).await?;

    let render_start = Instant::now();
    let rendered = render::render_pages(bytes, config).await?;
    let render_duration_ms = render_start.elapsed().as_millis() as u64;
    info!(
        "Rendered {} pages in {}ms",
        rendered.pages.len(),
        render_duration_ms
    );

    let extraction_start = Instant::now();
    let results = process_pages(&extractor, &rendered.pages, config).await;
    let extraction_duration_ms = extraction_start.elapsed().as_millis() as u64;

    let failed_pages = results.iter().filter(|r| r.is_error()).count();
    let stats = BatchStats {
        requested_pages: rendered.pages.len(),
        succeeded_pages: results.len() - failed_pages,
        failed_pages,
        render_duration_ms,
        extraction_duration_ms,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    };
    info!(
        "Batch complete: {}/{} pages succeeded in {}ms",
        stats.succeeded_pages, stats.requested_pages, stats.total_duration_ms
    );

    Ok(BatchOutput {
        results,
        info: rendered.info,
        stats,
    })
}

/// Run every rendered page through `extractor`, in order.
///
/// Always returns one record per input page. Each call is bounded by
/// `api_timeout_secs`; after every page, success or failure, the loop sleeps
/// `page_delay_ms`.
pub async fn process_pages<E: PageExtractor>(
    extractor: &E,
    pages: &[(usize, ImageData)],
    config: &ExtractionConfig,
) -> Vec<PageResult> {
    let total = pages.len();
    let timeout = Duration::from_secs(config.api_timeout_secs);
    let delay = Duration::from_millis(config.page_delay_ms);
    let callback = config.progress_callback.as_ref();
    let mut results = Vec::with_capacity(total);

    for (index, (page_num, image)) in pages.iter().enumerate() {
        let page_num = *page_num;
        let position = index + 1;
        if let Some(cb) = callback {
            cb.on_page_start(page_num, position, total);
        }
        info!("Processing page {} ({}/{})", page_num, position, total);

        let outcome = match tokio::time::timeout(timeout, extractor.extract_page(page_num, image)).await {
            Ok(Ok(text)) => {
                debug!("Page {}: {} chars of response", page_num, text.len());
                sanitize::page_result_from_response(page_num, &text)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(PageError::Timeout {
                page: page_num,
                secs: config.api_timeout_secs,
            }),
        };

        let result = match outcome {
            Ok(result) => {
                if let Some(cb) = callback {
                    cb.on_page_complete(
                        page_num,
                        position,
                        total,
                        result.invoice_key().as_deref(),
                    );
                }
                result
            }
            Err(e) => {
                warn!("{}", e);
                if let Some(cb) = callback {
                    cb.on_page_error(page_num, position, total, &e.to_string());
                }
                PageResult::failed(&e)
            }
        };
        results.push(result);

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    if let Some(cb) = callback {
        let succeeded = results.iter().filter(|r| !r.is_error()).count();
        cb.on_batch_complete(total, succeeded);
    }
    results
}

/// Extract and write the JSON report and the CSV table.
///
/// JSON is written first and always. When aggregation yields no rows the
/// CSV is skipped and [`InvoiceOcrError::NothingToExport`] is returned.
pub async fn extract_to_files(
    input_str: impl AsRef<str>,
    csv_path: impl AsRef<Path>,
    json_path: impl AsRef<Path>,
    config: &ExtractionConfig,
) -> Result<BatchOutput, InvoiceOcrError> {
    let output = extract_invoices(input_str, config).await?;

    let json = export::to_json_string(&output.results)?;
    write_atomic(json_path.as_ref(), json.as_bytes())?;
    info!("Wrote JSON report to {}", json_path.as_ref().display());

    let csv = export::to_csv_bytes(&output.table())?;
    write_atomic(csv_path.as_ref(), &csv)?;
    info!("Wrote CSV report to {}", csv_path.as_ref().display());

    Ok(output)
}

/// Page count and metadata without any model call.
pub async fn inspect(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<DocumentInfo, InvoiceOcrError> {
    let bytes = input::load_document(input_str.as_ref(), config.download_timeout_secs).await?;
    render::document_info(bytes, config.password.clone()).await
}

/// Write to a sibling temp file, then rename over `path`.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), InvoiceOcrError> {
    let write_err = |source: std::io::Error| InvoiceOcrError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(write_err)?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);

    let mut file = std::fs::File::create(&tmp).map_err(write_err)?;
    file.write_all(contents).map_err(write_err)?;
    file.sync_all().map_err(write_err)?;
    drop(file);

    std::fs::rename(&tmp, path).map_err(write_err)
}
