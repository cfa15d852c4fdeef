//! Result types: per-page records and batch-level output.

use crate::error::PageError;
use crate::pipeline::aggregate::{self, InvoiceTable};
use crate::pipeline::sanitize;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// One row of a line-item table; keys are not fixed across rows.
pub type LineItem = Map<String, Value>;

/// `document_type` used on sentinel records.
pub const ERROR_DOCUMENT_TYPE: &str = "Error";

/// Top-level key holding the free-text "everything else" data.
///
/// Kept on the record for debugging but stripped from every emitted report.
pub const ADDITIONAL_INFORMATION_KEY: &str = "additional_information";

/// Structured outcome of extracting one document page.
///
/// Core fields are `Some(Value::Null)` when the model sent an explicit
/// `null` and `None` when the key was absent; the distinction decides
/// whether the column exists in the tabular report.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PageResult {
    /// 1-indexed page number.
    #[serde(default)]
    pub page: usize,

    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub document_type: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub invoice_number: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub invoice_date: Option<Value>,

    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub vendor_name: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub vendor_tax_id: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub vendor_address: Option<Value>,

    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub customer_tax_id: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub customer_address: Option<Value>,

    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub sub_total: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub vat_amount: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub grand_total: Option<Value>,

    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub has_tax_invoice: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub has_signature: Option<Value>,

    /// Line-item rows in page order.
    #[serde(
        default,
        deserialize_with = "lenient_line_items",
        skip_serializing_if = "Option::is_none"
    )]
    pub line_items: Option<Vec<LineItem>>,

    /// Set on sentinel records, or when the model itself reported an error.
    #[serde(default, deserialize_with = "lenient_error", skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Every other key the model returned.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PageResult {
    /// Build a record from a sanitised JSON object.
    ///
    /// Key variants are canonicalised first; the model's own `page` key (if
    /// any) is replaced by `page_num`.
    pub fn from_extracted(page_num: usize, object: Map<String, Value>) -> Result<Self, serde_json::Error> {
        let mut object = sanitize::normalize_record(object);
        object.remove("page");
        let mut result: PageResult = serde_json::from_value(Value::Object(object))?;
        result.page = page_num;
        Ok(result)
    }

    /// Sentinel record for a page whose extraction failed.
    pub fn failed(error: &PageError) -> Self {
        let page = error.page();
        Self {
            page,
            document_type: Some(Value::String(ERROR_DOCUMENT_TYPE.to_string())),
            invoice_number: Some(Value::String(format!("ERROR_{page}"))),
            error: Some(error.to_string()),
            ..Default::default()
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Invoice identifier as a grouping key. `None` when absent or null.
    pub fn invoice_key(&self) -> Option<String> {
        self.invoice_number.as_ref().and_then(aggregate::cell_text)
    }

    /// Line items, empty when the model sent none.
    pub fn items(&self) -> &[LineItem] {
        self.line_items.as_deref().unwrap_or_default()
    }

    /// Copy of this record without the free-text additional-information
    /// column, as emitted in the JSON report.
    pub fn without_non_essential(&self) -> Self {
        let mut copy = self.clone();
        copy.extra.remove(ADDITIONAL_INFORMATION_KEY);
        copy
    }

    /// Scalar (non-line-item) fields as a flat row, in a stable order.
    ///
    /// Absent core fields are omitted; explicit nulls are kept.
    pub fn scalar_fields(&self) -> Map<String, Value> {
        let mut row = Map::new();
        let core = [
            ("document_type", &self.document_type),
            ("invoice_number", &self.invoice_number),
            ("invoice_date", &self.invoice_date),
            ("vendor_name", &self.vendor_name),
            ("vendor_tax_id", &self.vendor_tax_id),
            ("vendor_address", &self.vendor_address),
            ("customer_name", &self.customer_name),
            ("customer_tax_id", &self.customer_tax_id),
            ("customer_address", &self.customer_address),
            ("sub_total", &self.sub_total),
            ("vat_amount", &self.vat_amount),
            ("grand_total", &self.grand_total),
            ("has_tax_invoice", &self.has_tax_invoice),
            ("has_signature", &self.has_signature),
        ];
        for (key, value) in core {
            if let Some(v) = value {
                row.insert(key.to_string(), v.clone());
            }
        }
        for (key, value) in &self.extra {
            row.insert(key.clone(), value.clone());
        }
        if let Some(ref e) = self.error {
            row.insert("error".to_string(), Value::String(e.clone()));
        }
        row
    }
}

/// Deserialize a present key (including an explicit `null`) as `Some`.
fn present<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(d).map(Some)
}

/// Accept whatever the model put under `line_items`; unusable shapes become
/// an empty list instead of failing the whole page.
fn lenient_line_items<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<LineItem>>, D::Error> {
    let value = Value::deserialize(d)?;
    Ok(Some(sanitize::coerce_line_items(value)))
}

/// Accept any `error` value: strings verbatim, null as absent, anything else
/// as compact JSON text.
fn lenient_error<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    })
}

/// PDF metadata returned by [`crate::inspect`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub page_count: usize,
    pub title: Option<String>,
    pub author: Option<String>,
    pub producer: Option<String>,
    pub pdf_version: String,
}

/// Timing and page counts for one batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchStats {
    /// Pages in the requested range.
    pub requested_pages: usize,
    /// Pages that produced a parsed record.
    pub succeeded_pages: usize,
    /// Pages recorded as sentinel errors.
    pub failed_pages: usize,
    pub render_duration_ms: u64,
    pub extraction_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Everything one batch produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutput {
    /// One record per requested page, ascending page order.
    pub results: Vec<PageResult>,
    pub info: DocumentInfo,
    pub stats: BatchStats,
}

impl BatchOutput {
    /// Aggregate the per-page records into the one-row-per-invoice table.
    pub fn table(&self) -> InvoiceTable {
        aggregate::aggregate(&self.results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn explicit_null_is_present_missing_is_absent() {
        let r = PageResult::from_extracted(1, object(json!({"vendor_name": null}))).unwrap();
        assert_eq!(r.vendor_name, Some(Value::Null));
        assert_eq!(r.customer_name, None);
        assert!(r.scalar_fields().contains_key("vendor_name"));
        assert!(!r.scalar_fields().contains_key("customer_name"));
    }

    #[test]
    fn unknown_keys_land_in_extra() {
        let r = PageResult::from_extracted(
            3,
            object(json!({"invoice_number": "INV1", "po_number": "PO-9", "page": 99})),
        )
        .unwrap();
        assert_eq!(r.page, 3);
        assert_eq!(r.extra.get("po_number"), Some(&json!("PO-9")));
        assert!(!r.extra.contains_key("page"));
    }

    #[test]
    fn sentinel_record_shape() {
        let r = PageResult::failed(&PageError::HttpStatus {
            page: 4,
            status: 500,
        });
        assert_eq!(r.page, 4);
        assert_eq!(r.invoice_key().as_deref(), Some("ERROR_4"));
        assert_eq!(r.document_type, Some(json!("Error")));
        assert!(r.error.as_deref().unwrap().contains("HTTP 500"));

        let serialised = serde_json::to_value(&r).unwrap();
        let keys: Vec<&String> = serialised.as_object().unwrap().keys().collect();
        assert_eq!(keys.len(), 4, "got keys {keys:?}");
    }

    #[test]
    fn numeric_invoice_number_is_stringified_key() {
        let r = PageResult::from_extracted(1, object(json!({"invoice_number": 4104085}))).unwrap();
        assert_eq!(r.invoice_key().as_deref(), Some("4104085"));
    }

    #[test]
    fn non_string_error_from_model_keeps_the_page() {
        let r = PageResult::from_extracted(
            6,
            object(json!({"invoice_number": "A-9", "vendor_name": "ACME", "error": {"code": 7}})),
        )
        .unwrap();
        assert_eq!(r.error.as_deref(), Some(r#"{"code":7}"#));
        assert_eq!(r.vendor_name, Some(json!("ACME")));
        assert_eq!(r.invoice_key().as_deref(), Some("A-9"));

        let r = PageResult::from_extracted(6, object(json!({"error": 404}))).unwrap();
        assert_eq!(r.error.as_deref(), Some("404"));
        let r = PageResult::from_extracted(6, object(json!({"error": null}))).unwrap();
        assert!(!r.is_error());
    }

    #[test]
    fn additional_information_is_stripped() {
        let r = PageResult::from_extracted(
            1,
            object(json!({"invoice_number": "A", "Additional Information": {"bank": "KBank"}})),
        )
        .unwrap();
        assert!(r.extra.contains_key(ADDITIONAL_INFORMATION_KEY));
        assert!(!r.without_non_essential().extra.contains_key(ADDITIONAL_INFORMATION_KEY));
    }

    #[test]
    fn line_items_round_trip_through_raw_view() {
        let r = PageResult::from_extracted(
            2,
            object(json!({"invoice_number": "A", "line_items": [{"Description": "Paper"}]})),
        )
        .unwrap();
        let raw = serde_json::to_value(&r).unwrap();
        assert_eq!(raw["line_items"][0]["Description"], json!("Paper"));
        assert_eq!(raw["page"], json!(2));
    }
}
