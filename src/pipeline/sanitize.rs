//! Response sanitising: free-form model text → one JSON object → [`PageResult`].
//!
//! ## Why is sanitising necessary?
//!
//! Even with an explicit schema in the prompt, vision models return JSON that
//! is *almost* valid:
//!
//! - wrapped in a ```` ```json ```` fence, or preceded by a sentence of prose
//! - amounts printed with digit-group separators (`"grand_total": 3,210.00`)
//! - a trailing comma after the last key or array element
//! - key names in a different casing (`"Invoice Number"`, `"Unit price"`)
//!   or the bilingual header printed on the page (`"จำนวนเงิน / Amount"`)
//!
//! The passes below are deterministic and idempotent: running them on JSON
//! that is already valid leaves it byte-for-byte unchanged.
//!
//! ## Order
//!
//! 1. Locate the candidate object (fenced block first, then first `{` to last `}`)
//! 2. Strip digit-group separators from bare numbers that follow a `"key":`
//! 3. Drop commas directly before `}` / `]`
//!
//! Steps 2 and 3 track string literals (including `\"` escapes) and never
//! edit text inside one.
//! 4. Parse; anything but an object is a miss
//! 5. Canonicalise top-level and line-item key names

use crate::error::PageError;
use crate::output::{LineItem, PageResult, ADDITIONAL_INFORMATION_KEY};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

/// Turn one raw model response into a page record.
///
/// # Errors
/// [`PageError::NoJson`] when no object can be located or parsed, and
/// [`PageError::MalformedResponse`] when the object does not fit the
/// record shape.
pub fn page_result_from_response(page_num: usize, text: &str) -> Result<PageResult, PageError> {
    let object = parse_json_object(text).ok_or(PageError::NoJson { page: page_num })?;
    PageResult::from_extracted(page_num, object).map_err(|e| PageError::MalformedResponse {
        page: page_num,
        detail: e.to_string(),
    })
}

/// Locate, repair and parse the JSON object embedded in `text`.
pub fn parse_json_object(text: &str) -> Option<Map<String, Value>> {
    let candidate = extract_json_candidate(text)?;
    let repaired = repair_json(candidate);
    match serde_json::from_str::<Value>(&repaired) {
        Ok(Value::Object(map)) => Some(map),
        Ok(_) => None,
        Err(e) => {
            debug!("Candidate JSON did not parse after repair: {}", e);
            None
        }
    }
}

// ── Step 1: Locate the candidate ─────────────────────────────────────────────

static RE_FENCED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(\{.*?\})\s*```").unwrap());

static RE_BRACED: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{.*\}").unwrap());

/// Return the first fenced JSON object, else the span from the first `{` to
/// the last `}`.
pub fn extract_json_candidate(text: &str) -> Option<&str> {
    if let Some(caps) = RE_FENCED.captures(text) {
        return caps.get(1).map(|m| m.as_str());
    }
    RE_BRACED.find(text).map(|m| m.as_str())
}

// ── Steps 2–3: Repair ────────────────────────────────────────────────────────

/// Apply both textual repairs in order.
///
/// Both passes scan the text once and only act outside string literals.
pub fn repair_json(candidate: &str) -> String {
    let s = strip_numeric_separators(candidate);
    remove_trailing_commas(&s)
}

/// Tracks whether a byte scan is inside a JSON string literal.
///
/// Structural characters are ASCII and never occur inside a UTF-8
/// multi-byte sequence, so scanning bytes is safe.
#[derive(Default)]
struct StringScanner {
    in_string: bool,
    escaped: bool,
}

impl StringScanner {
    /// Advance past `b`. Returns `true` when `b` is structural text, i.e.
    /// outside any string literal (quote characters themselves count as
    /// string text).
    fn structural(&mut self, b: u8) -> bool {
        if self.in_string {
            if self.escaped {
                self.escaped = false;
            } else if b == b'\\' {
                self.escaped = true;
            } else if b == b'"' {
                self.in_string = false;
            }
            false
        } else if b == b'"' {
            self.in_string = true;
            false
        } else {
            true
        }
    }
}

/// A number with at least one `,ddd` group, anchored at the value start.
static RE_GROUPED_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^-?[0-9]{1,3}(?:,[0-9]{3})+(?:\.[0-9]+)?").unwrap());

/// The grouped number at the start of `rest`, unless more digits follow it
/// (`1,2345` is not `1,234`).
fn grouped_number_at(rest: &str) -> Option<&str> {
    let m = RE_GROUPED_NUMBER.find(rest)?;
    let next = rest.as_bytes().get(m.end());
    (!next.is_some_and(u8::is_ascii_digit)).then(|| m.as_str())
}

/// Remove digit-group separators from bare numbers that are object values.
///
/// Only a number token directly after a structural `:` is touched; text
/// inside string literals is copied unchanged.
pub fn strip_numeric_separators(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = String::with_capacity(input.len());
    let mut scanner = StringScanner::default();
    let mut after_colon = false;
    let mut copied = 0;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if !scanner.structural(b) {
            after_colon = false;
            i += 1;
            continue;
        }
        match b {
            b':' => after_colon = true,
            b if b.is_ascii_whitespace() => {}
            b'-' | b'0'..=b'9' if after_colon => {
                after_colon = false;
                if let Some(number) = grouped_number_at(&input[i..]) {
                    out.push_str(&input[copied..i]);
                    out.push_str(&number.replace(',', ""));
                    i += number.len();
                    copied = i;
                    continue;
                }
            }
            _ => after_colon = false,
        }
        i += 1;
    }
    out.push_str(&input[copied..]);
    out
}

/// Drop a comma (or run of commas) that directly precedes `}` or `]`,
/// together with the whitespace between them.
pub fn remove_trailing_commas(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = String::with_capacity(input.len());
    let mut scanner = StringScanner::default();
    let mut copied = 0;
    let mut i = 0;

    while i < bytes.len() {
        if scanner.structural(bytes[i]) && bytes[i] == b',' {
            let close = bytes[i..]
                .iter()
                .position(|b| !(b.is_ascii_whitespace() || *b == b','))
                .map(|offset| i + offset)
                .filter(|&j| matches!(bytes[j], b'}' | b']'));
            if let Some(j) = close {
                out.push_str(&input[copied..i]);
                copied = j;
                i = j;
                continue;
            }
        }
        i += 1;
    }
    out.push_str(&input[copied..]);
    out
}

// ── Step 5: Key canonicalisation ─────────────────────────────────────────────

fn fold_key(key: &str) -> String {
    key.trim()
        .trim_end_matches(':')
        .trim()
        .to_lowercase()
        .replace([' ', '-'], "_")
}

/// Canonical name for a top-level key, or `None` for keys kept verbatim.
pub fn canonical_field_key(key: &str) -> Option<&'static str> {
    let canonical = match fold_key(key).as_str() {
        "page" => "page",
        "document_type" | "doc_type" => "document_type",
        "invoice_number" | "invoice_no" | "tax_invoice_number" | "tax_invoice_no" => {
            "invoice_number"
        }
        "invoice_date" | "tax_invoice_date" => "invoice_date",
        "vendor_name" => "vendor_name",
        "vendor_tax_id" => "vendor_tax_id",
        "vendor_address" => "vendor_address",
        "customer_name" => "customer_name",
        "customer_tax_id" => "customer_tax_id",
        "customer_address" => "customer_address",
        "sub_total" | "subtotal" => "sub_total",
        "vat_amount" | "vat" => "vat_amount",
        "grand_total" | "total_amount" => "grand_total",
        "has_tax_invoice" | "tax_invoice" => "has_tax_invoice",
        "has_signature" | "authorized_signature" | "authorised_signature" => "has_signature",
        "line_items" | "lineitems" => "line_items",
        "additional_information" | "additional_info" | "additional_data" => {
            ADDITIONAL_INFORMATION_KEY
        }
        "error" => "error",
        _ => return None,
    };
    Some(canonical)
}

/// Canonical name for a line-item column, or `None` for keys kept verbatim.
///
/// Bilingual headers (`"รายละเอียด / Description"`) are matched on the part
/// after the last `/`.
pub fn canonical_item_key(key: &str) -> Option<&'static str> {
    fn lookup(folded: &str) -> Option<&'static str> {
        let canonical = match folded {
            "no." | "no" | "#" | "item_no." | "item_no" | "item_number" => "No.",
            "description" | "item_description" | "details" => "Description",
            "quantity" | "qty" | "qty." => "Quantity",
            "unit_price" | "unitprice" | "price_per_unit" | "price" => "Unit Price",
            "amount" | "line_total" => "Amount",
            _ => return None,
        };
        Some(canonical)
    }

    lookup(&fold_key(key)).or_else(|| {
        key.rsplit_once('/')
            .and_then(|(_, english)| lookup(&fold_key(english)))
    })
}

/// Rename keys to their canonical form.
///
/// Keys already in canonical form win over variants that fold to the same
/// name; among variants the first non-null value wins.
fn canonicalise_keys(
    object: Map<String, Value>,
    canonical: impl Fn(&str) -> Option<&'static str>,
) -> Map<String, Value> {
    let mut out = Map::new();
    let mut variants = Vec::new();

    for (key, value) in object {
        match canonical(&key) {
            Some(c) if c != key => variants.push((c.to_string(), value)),
            _ => {
                out.insert(key, value);
            }
        }
    }

    for (key, value) in variants {
        let occupied = out.get(&key).is_some_and(|v| !v.is_null());
        if !occupied {
            out.insert(key, value);
        }
    }
    out
}

/// Coerce whatever the model put under `line_items` into rows with
/// canonical column names.
///
/// A JSON-encoded string is parsed; other non-array values and non-object
/// array entries are dropped.
pub fn coerce_line_items(value: Value) -> Vec<LineItem> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(row) => Some(canonicalise_keys(row, canonical_item_key)),
                _ => None,
            })
            .collect(),
        Value::String(s) => match serde_json::from_str::<Value>(&s) {
            Ok(inner @ Value::Array(_)) => coerce_line_items(inner),
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

/// Canonicalise top-level keys and line items of a parsed page object.
pub fn normalize_record(object: Map<String, Value>) -> Map<String, Value> {
    let mut object = canonicalise_keys(object, canonical_field_key);
    if let Some(items) = object.remove("line_items") {
        let rows = coerce_line_items(items).into_iter().map(Value::Object).collect();
        object.insert("line_items".to_string(), Value::Array(rows));
    }
    object
}
