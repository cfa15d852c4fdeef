//! Rasterisation: PDF bytes → one base64 PNG per requested page.
//!
//! pdfium keeps thread-local state and blocks the calling thread, so every
//! call here runs under `tokio::task::spawn_blocking`. Each bitmap is
//! PNG-encoded as soon as it is rendered; only the compressed images are
//! held for the extraction loop.

use crate::config::{ExtractionConfig, PageRange};
use crate::error::InvoiceOcrError;
use crate::output::DocumentInfo;
use crate::progress::ProgressCallback;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::io::Cursor;
use std::path::PathBuf;
use tracing::{debug, info};

/// Rendered pages of one document, in ascending page order.
pub struct RenderedPages {
    pub info: DocumentInfo,
    /// `(1-indexed page number, PNG image)`.
    pub pages: Vec<(usize, ImageData)>,
}

/// Bind the pdfium shared library.
///
/// Lookup order: `PDFIUM_LIB_PATH`, a library in the working directory,
/// then the system library path.
pub fn bind_pdfium() -> Result<Pdfium, InvoiceOcrError> {
    if let Ok(path) = std::env::var("PDFIUM_LIB_PATH") {
        let path = PathBuf::from(path);
        if path.exists() {
            return Pdfium::bind_to_library(&path)
                .map(Pdfium::new)
                .map_err(|e| {
                    InvoiceOcrError::PdfiumBindingFailed(format!("{}: {e}", path.display()))
                });
        }
        debug!("PDFIUM_LIB_PATH {} does not exist; trying defaults", path.display());
    }

    Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| Pdfium::bind_to_system_library())
        .map(Pdfium::new)
        .map_err(|e| InvoiceOcrError::PdfiumBindingFailed(e.to_string()))
}

/// Check `1 <= start <= end <= page_count`.
pub fn validate_range(range: PageRange, page_count: usize) -> Result<(), InvoiceOcrError> {
    if range.start < 1 || range.start > range.end || range.end > page_count {
        return Err(InvoiceOcrError::InvalidRange {
            start: range.start,
            end: range.end,
            total: page_count,
        });
    }
    Ok(())
}

/// Open the document, validate the configured range and render it.
///
/// `on_batch_start` fires once the range is known to be valid, before the
/// first page is rendered.
pub async fn render_pages(
    bytes: Vec<u8>,
    config: &ExtractionConfig,
) -> Result<RenderedPages, InvoiceOcrError> {
    let zoom = config.zoom();
    let range = config.pages;
    let password = config.password.clone();
    let callback = config.progress_callback.clone();

    tokio::task::spawn_blocking(move || {
        render_pages_blocking(bytes, zoom, range, password.as_deref(), callback)
    })
    .await
    .map_err(|e| InvoiceOcrError::Internal(format!("Render task panicked: {e}")))?
}

fn render_pages_blocking(
    bytes: Vec<u8>,
    zoom: f32,
    range: Option<PageRange>,
    password: Option<&str>,
    callback: Option<ProgressCallback>,
) -> Result<RenderedPages, InvoiceOcrError> {
    let pdfium = bind_pdfium()?;
    let document = pdfium
        .load_pdf_from_byte_vec(bytes, password)
        .map_err(|e| load_error(e, password.is_some()))?;

    let info = read_info(&document);
    let range = range.unwrap_or_else(|| PageRange::whole(info.page_count));
    validate_range(range, info.page_count)?;
    info!(
        "PDF loaded: {} pages, rendering {}-{} at zoom {:.2}",
        info.page_count, range.start, range.end, zoom
    );

    if let Some(ref cb) = callback {
        cb.on_batch_start(range.len());
    }

    let render_config = PdfRenderConfig::new().scale_page_by_factor(zoom);
    let pages = document.pages();
    let mut rendered = Vec::with_capacity(range.len());

    for page_num in range.pages() {
        let failed = |detail: String| InvoiceOcrError::RasterisationFailed {
            page: page_num,
            detail,
        };

        let page = pages
            .get((page_num - 1) as u16)
            .map_err(|e| failed(format!("{e:?}")))?;
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| failed(format!("{e:?}")))?;

        let image = bitmap.as_image();
        debug!("Rendered page {} → {}x{} px", page_num, image.width(), image.height());

        let data = encode_png(&image).map_err(|e| failed(format!("PNG encoding failed: {e}")))?;
        rendered.push((page_num, data));
    }

    Ok(RenderedPages {
        info,
        pages: rendered,
    })
}

/// Page count and metadata without rendering.
pub async fn document_info(
    bytes: Vec<u8>,
    password: Option<String>,
) -> Result<DocumentInfo, InvoiceOcrError> {
    tokio::task::spawn_blocking(move || {
        let pdfium = bind_pdfium()?;
        let document = pdfium
            .load_pdf_from_byte_vec(bytes, password.as_deref())
            .map_err(|e| load_error(e, password.is_some()))?;
        Ok(read_info(&document))
    })
    .await
    .map_err(|e| InvoiceOcrError::Internal(format!("Inspect task panicked: {e}")))?
}

fn read_info(document: &PdfDocument<'_>) -> DocumentInfo {
    let metadata = document.metadata();
    let tag = |kind: PdfDocumentMetadataTagType| -> Option<String> {
        metadata
            .get(kind)
            .map(|t| t.value().trim().to_string())
            .filter(|v| !v.is_empty())
    };

    DocumentInfo {
        page_count: document.pages().len() as usize,
        title: tag(PdfDocumentMetadataTagType::Title),
        author: tag(PdfDocumentMetadataTagType::Author),
        producer: tag(PdfDocumentMetadataTagType::Producer),
        pdf_version: format!("{:?}", document.version()),
    }
}

fn load_error(e: PdfiumError, had_password: bool) -> InvoiceOcrError {
    let detail = format!("{e:?}");
    if detail.to_ascii_lowercase().contains("password") {
        if had_password {
            InvoiceOcrError::WrongPassword
        } else {
            InvoiceOcrError::PasswordRequired
        }
    } else {
        InvoiceOcrError::CorruptPdf { detail }
    }
}

/// Encode a rendered page as base64 PNG for the vision request.
///
/// PNG keeps glyph edges intact; `detail: "high"` asks tiling providers for
/// full-resolution tiling.
pub fn encode_png(image: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let mut buf = Vec::new();
    image.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    let b64 = STANDARD.encode(&buf);
    debug!("Encoded page image → {} bytes base64", b64.len());
    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn range_within_document_is_valid() {
        assert!(validate_range(PageRange::new(1, 4), 4).is_ok());
        assert!(validate_range(PageRange::new(3, 3), 4).is_ok());
    }

    #[test]
    fn range_past_end_is_rejected() {
        let err = validate_range(PageRange::new(2, 9), 4).unwrap_err();
        assert!(matches!(
            err,
            InvoiceOcrError::InvalidRange {
                start: 2,
                end: 9,
                total: 4
            }
        ));
        assert!(err.is_client_error());
    }

    #[test]
    fn inverted_and_zero_ranges_are_rejected() {
        assert!(validate_range(PageRange::new(3, 2), 4).is_err());
        assert!(validate_range(PageRange::new(0, 2), 4).is_err());
        // Whole-document default on an empty document.
        assert!(validate_range(PageRange::new(1, 0), 0).is_err());
    }

    #[test]
    fn load_errors_are_classified() {
        let e = PdfiumError::PdfiumLibraryInternalError(PdfiumInternalError::PasswordError);
        assert!(matches!(load_error(e, false), InvoiceOcrError::PasswordRequired));
        let e = PdfiumError::PdfiumLibraryInternalError(PdfiumInternalError::PasswordError);
        assert!(matches!(load_error(e, true), InvoiceOcrError::WrongPassword));
        let e = PdfiumError::PdfiumLibraryInternalError(PdfiumInternalError::FormatError);
        assert!(matches!(load_error(e, false), InvoiceOcrError::CorruptPdf { .. }));
    }

    #[test]
    fn encodes_png_with_high_detail() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([255, 255, 255])));
        let data = encode_png(&img).unwrap();
        assert_eq!(data.mime_type, "image/png");
        let png = STANDARD.decode(&data.data).unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
    }
}
