//! Batch-level integration tests.
//!
//! A scripted in-process `PageExtractor` stands in for the model, so these
//! run without pdfium or network access.

use edgequake_invoice::{
    aggregate, export, process_pages, Column, ExtractionConfig, ExtractionProgressCallback,
    InvoiceOcrError, PageError, PageExtractor,
};
use edgequake_llm::ImageData;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Test helpers ─────────────────────────────────────────────────────────────

enum Script {
    Reply(&'static str),
    Fail(PageError),
    Hang,
}

/// Answers each page from a fixed script and records call order.
struct ScriptedExtractor {
    script: HashMap<usize, Script>,
    calls: Mutex<Vec<usize>>,
}

impl ScriptedExtractor {
    fn new(script: impl IntoIterator<Item = (usize, Script)>) -> Self {
        Self {
            script: script.into_iter().collect(),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl PageExtractor for ScriptedExtractor {
    async fn extract_page(&self, page_num: usize, _image: &ImageData) -> Result<String, PageError> {
        self.calls.lock().unwrap().push(page_num);
        match self.script.get(&page_num) {
            Some(Script::Reply(text)) => Ok(text.to_string()),
            Some(Script::Fail(e)) => Err(e.clone()),
            Some(Script::Hang) => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok("{}".to_string())
            }
            None => Err(PageError::Request {
                page: page_num,
                detail: "unscripted page".to_string(),
            }),
        }
    }
}

fn pages(nums: &[usize]) -> Vec<(usize, ImageData)> {
    nums.iter()
        .map(|&n| (n, ImageData::new("aGVsbG8=", "image/png")))
        .collect()
}

fn fast_config() -> ExtractionConfig {
    ExtractionConfig::builder()
        .page_delay_ms(0)
        .api_timeout_secs(5)
        .build()
        .unwrap()
}

#[derive(Default)]
struct RecordingCallback {
    events: Mutex<Vec<String>>,
}

impl ExtractionProgressCallback for RecordingCallback {
    fn on_page_start(&self, page_num: usize, position: usize, total: usize) {
        self.events
            .lock()
            .unwrap()
            .push(format!("start p{page_num} {position}/{total}"));
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
    fn on_batch_complete(&self, total: usize, succeeded: usize) {
        self.events.lock().unwrap().push(format!("done {succeeded}/{total}"));
    }
}

const PAGE_ONE: &str = r#"Here is the data:
```json
{
  "document_type": "ใบกำกับภาษี/Tax Invoice",
  "invoice_number": "A-100",
  "invoice_date": "04/01/25",
  "vendor_name": "ACME",
  "line_items": [],
  "grand_total": 3,210.00,
  "has_signature": false,
}
```"#;

const PAGE_THREE: &str = r#"{"invoice_number": "A-100", "document_type": null,
  "line_items": [{"No.": 1, "Description": "Rental", "Quantity": 1, "Unit Price": 3000, "Amount": 3000}],
  "has_signature": true}"#;

// ── End-to-end batch ─────────────────────────────────────────────────────────

#[tokio::test]
async fn failed_middle_page_keeps_batch_and_table_shape() {
    let extractor = ScriptedExtractor::new([
        (1, Script::Reply(PAGE_ONE)),
        (
            2,
            Script::Fail(PageError::Timeout {
                page: 2,
                secs: 120,
            }),
        ),
        (3, Script::Reply(PAGE_THREE)),
    ]);

    let results = process_pages(&extractor, &pages(&[1, 2, 3]), &fast_config()).await;

    // Raw JSON: one entry per page, exactly one tagged with an error.
    let json = export::to_json_value(&results).unwrap();
    let records = json["results"].as_array().unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records.iter().filter(|r| r.get("error").is_some()).count(), 1);
    assert_eq!(records[2]["line_items"][0]["Description"], "Rental");

    // Table: a single A-100 row spanning pages 1 and 3.
    let table = aggregate(&results);
    let a100: Vec<_> = table
        .groups
        .iter()
        .filter(|g| g.invoice_number == "A-100")
        .collect();
    assert_eq!(a100.len(), 1);
    let g = a100[0];
    assert_eq!(g.cell(Column::Page), "1, 3");
    assert_eq!(g.cell(Column::GrandTotal), "3210.0");
    assert_eq!(g.cell(Column::HasSignature), "true");
    assert_eq!(g.cell(Column::DocumentType), "ใบกำกับภาษี/Tax Invoice");
    assert_eq!(g.cell(Column::Description), "Rental");

    // The failed page carries its error text in the error column.
    assert!(table.columns.contains(&Column::Error));
    let err_row = table.group("ERROR_2").unwrap();
    assert_eq!(err_row.cell(Column::Error), "Page 2: request timed out after 120s");
    assert_eq!(err_row.cell(Column::DocumentType), "Error");
    assert_eq!(g.cell(Column::Error), "");

    // Groups ordered by first page.
    let order: Vec<&str> = table.groups.iter().map(|g| g.invoice_number.as_str()).collect();
    assert_eq!(order, vec!["A-100", "ERROR_2"]);
}

#[tokio::test]
async fn pages_without_invoice_numbers_give_empty_table_full_json() {
    let extractor = ScriptedExtractor::new([
        (1, Script::Reply("I cannot read this page.")),
        (2, Script::Reply(r#"{"vendor_name": "ACME", "invoice_number": null}"#)),
        (3, Script::Reply(r#"{"document_type": "Receipt"}"#)),
    ]);

    let results = process_pages(&extractor, &pages(&[1, 2, 3]), &fast_config()).await;
    assert_eq!(results.len(), 3);
    assert!(results[0].is_error());
    assert_eq!(results[0].error.as_deref(), Some("Page 1: No JSON"));

    // Page 1's sentinel still groups under ERROR_1; drop it to model a batch
    // where nothing carries an invoice number.
    let table = aggregate(&results[1..]);
    assert!(table.is_empty());
    assert!(matches!(
        export::to_csv_bytes(&table),
        Err(InvoiceOcrError::NothingToExport)
    ));

    let json = export::to_json_value(&results).unwrap();
    assert_eq!(json["results"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn every_page_failing_still_returns_every_page() {
    let extractor = ScriptedExtractor::new([
        (4, Script::Fail(PageError::HttpStatus { page: 4, status: 429 })),
        (5, Script::Fail(PageError::HttpStatus { page: 5, status: 500 })),
    ]);
    let results = process_pages(&extractor, &pages(&[4, 5]), &fast_config()).await;

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.is_error()));
    let keys: Vec<_> = results.iter().filter_map(|r| r.invoice_key()).collect();
    assert_eq!(keys, vec!["ERROR_4", "ERROR_5"]);

    let table = aggregate(&results);
    assert_eq!(table.len(), 2);
    assert_eq!(table.groups[0].cell(Column::Error), "Page 4: HTTP 429");
}

// ── Loop behaviour ───────────────────────────────────────────────────────────

#[tokio::test]
async fn pages_are_called_in_order_with_matching_events() {
    let cb = Arc::new(RecordingCallback::default());
    let config = ExtractionConfig::builder()
        .page_delay_ms(0)
        .progress_callback(cb.clone() as Arc<dyn ExtractionProgressCallback>)
        .build()
        .unwrap();

    let extractor = ScriptedExtractor::new([
        (1, Script::Reply(r#"{"invoice_number": "X"}"#)),
        (2, Script::Fail(PageError::Request { page: 2, detail: "reset".into() })),
        (3, Script::Reply(r#"{"vendor_name": "Y"}"#)),
    ]);
    let results = process_pages(&extractor, &pages(&[1, 2, 3]), &config).await;

    assert_eq!(*extractor.calls.lock().unwrap(), vec![1, 2, 3]);
    let page_order: Vec<usize> = results.iter().map(|r| r.page).collect();
    assert_eq!(page_order, vec![1, 2, 3]);

    let events = cb.events.lock().unwrap().clone();
    assert_eq!(
        events,
        vec![
            "start p1 1/3",
            "ok 1 X",
            "start p2 2/3",
            "err 2",
            "start p3 3/3",
            "ok 3 -",
            "done 2/3",
        ]
    );
}

#[tokio::test]
async fn sub_range_events_report_batch_position() {
    let cb = Arc::new(RecordingCallback::default());
    let config = ExtractionConfig::builder()
        .page_delay_ms(0)
        .progress_callback(cb.clone() as Arc<dyn ExtractionProgressCallback>)
        .build()
        .unwrap();

    let extractor = ScriptedExtractor::new([
        (5, Script::Reply(r#"{"invoice_number": "B-5"}"#)),
        (6, Script::Reply(r#"{"invoice_number": "B-5"}"#)),
        (7, Script::Fail(PageError::HttpStatus { page: 7, status: 503 })),
    ]);
    process_pages(&extractor, &pages(&[5, 6, 7]), &config).await;

    let starts: Vec<String> = cb
        .events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| e.starts_with("start"))
        .cloned()
        .collect();
    assert_eq!(starts, vec!["start p5 1/3", "start p6 2/3", "start p7 3/3"]);
}

#[tokio::test]
async fn slow_page_becomes_timeout_sentinel() {
    let config = ExtractionConfig::builder()
        .page_delay_ms(0)
        .api_timeout_secs(1)
        .build()
        .unwrap();
    let extractor = ScriptedExtractor::new([
        (1, Script::Hang),
        (2, Script::Reply(r#"{"invoice_number": "B"}"#)),
    ]);

    let results = process_pages(&extractor, &pages(&[1, 2]), &config).await;
    assert_eq!(
        results[0].error.as_deref(),
        Some("Page 1: request timed out after 1s")
    );
    assert_eq!(results[1].invoice_key().as_deref(), Some("B"));
}

#[tokio::test]
async fn delay_applies_after_every_page() {
    let config = ExtractionConfig::builder()
        .page_delay_ms(50)
        .build()
        .unwrap();
    let extractor = ScriptedExtractor::new([
        (1, Script::Reply("{}")),
        (2, Script::Fail(PageError::NoJson { page: 2 })),
    ]);

    let started = std::time::Instant::now();
    process_pages(&extractor, &pages(&[1, 2]), &config).await;
    assert!(started.elapsed() >= Duration::from_millis(100));
}

// ── CSV output ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn csv_projects_fixed_columns_without_item_numbers() {
    let extractor = ScriptedExtractor::new([(1, Script::Reply(PAGE_THREE))]);
    let results = process_pages(&extractor, &pages(&[1]), &fast_config()).await;

    let bytes = export::to_csv_bytes(&aggregate(&results)).unwrap();
    let text = String::from_utf8(bytes).unwrap();
    let header = text.trim_start_matches('\u{FEFF}').lines().next().unwrap().to_string();
    assert_eq!(
        header,
        "page,document_type,invoice_number,Description,Quantity,Unit Price,Amount,has_signature"
    );
}
