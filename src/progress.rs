//! Progress-callback trait for per-page extraction events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! events as the batch walks through its pages.
//!
//! Pages are processed strictly in ascending order, one at a time, so events
//! for a batch always arrive in page order: `on_page_start(n)` is followed by
//! exactly one of `on_page_complete(n)` / `on_page_error(n)` before the next
//! page starts.
//!
//! Per-page events carry both the document page number and the page's
//! 1-indexed `position` within the batch, so a batch over pages 5–7 reports
//! page 5 at position 1 of 3.
//!
//! # Example
//!
//! ```rust
//! use edgequake_invoice::{ExtractionConfig, ExtractionProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl ExtractionProgressCallback for CountingCallback {
//!     fn on_page_complete(
//!         &self,
//!         page_num: usize,
//!         position: usize,
//!         total_pages: usize,
//!         invoice_number: Option<&str>,
//!     ) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("Page {page_num} ({position}/{total_pages}): {invoice_number:?}");
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { completed: AtomicUsize::new(0) });
//!
//! let config = ExtractionConfig::builder()
//!     .progress_callback(counter as Arc<dyn ExtractionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the batch loop as it processes each page.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called once after the page range is validated, before rendering.
    fn on_batch_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called just before the page is sent to the extraction client.
    ///
    /// # Arguments
    /// * `page_num`    — 1-indexed page number in the document
    /// * `position`    — 1-indexed position of the page in this batch
    /// * `total_pages` — pages in this batch
    fn on_page_start(&self, page_num: usize, position: usize, total_pages: usize) {
        let _ = (page_num, position, total_pages);
    }

    /// Called when a page produced a parsed record.
    ///
    /// `invoice_number` is the raw identifier the model reported, if any.
    fn on_page_complete(
        &self,
        page_num: usize,
        position: usize,
        total_pages: usize,
        invoice_number: Option<&str>,
    ) {
        let _ = (page_num, position, total_pages, invoice_number);
    }

    /// Called when a page was recorded as a sentinel error.
    fn on_page_error(&self, page_num: usize, position: usize, total_pages: usize, error: &str) {
        let _ = (page_num, position, total_pages, error);
    }

    /// Called once after every page has been attempted.
    fn on_batch_complete(&self, total_pages: usize, success_count: usize) {
        let _ = (total_pages, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingCallback {
        events: Mutex<Vec<String>>,
    }

    impl ExtractionProgressCallback for RecordingCallback {
        fn on_batch_start(&self, total_pages: usize) {
            self.events.lock().unwrap().push(format!("start {total_pages}"));
        }

        fn on_page_complete(
            &self,
            page_num: usize,
            _position: usize,
            _total: usize,
            invoice_number: Option<&str>,
        ) {
            self.events
                .lock()
                .unwrap()
                .push(format!("ok {page_num} {}", invoice_number.unwrap_or("-")));
        }

        fn on_page_error(&self, page_num: usize, _position: usize, _total: usize, _error: &str) {
            self.events.lock().unwrap().push(format!("err {page_num}"));
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_batch_start(3);
        cb.on_page_start(1, 1, 3);
        cb.on_page_complete(1, 1, 3, Some("INV1"));
        cb.on_page_error(2, 2, 3, "HTTP 500");
        cb.on_batch_complete(3, 2);
    }

    #[test]
    fn recording_callback_sees_overridden_events_only() {
        let cb = RecordingCallback::default();
        cb.on_batch_start(2);
        cb.on_page_start(1, 1, 2);
        cb.on_page_complete(1, 1, 2, Some("A-100"));
        cb.on_page_start(2, 2, 2);
        cb.on_page_error(2, 2, 2, "timeout");
        cb.on_batch_complete(2, 1);

        let events = cb.events.lock().unwrap().clone();
        assert_eq!(events, vec!["start 2", "ok 1 A-100", "err 2"]);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_batch_start(10);
        cb.on_page_complete(1, 1, 10, None);
    }
}
