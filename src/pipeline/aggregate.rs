//! Aggregation: per-page records → one row per invoice.
//!
//! ## Algorithm
//!
//! ```text
//! PageResult ─▶ flatten ─▶ rows ─▶ group by invoice_number ─▶ reduce ─▶ sort ─▶ project
//!               (1 row per line item,          (per-column policy)  (min page)
//!                or 1 row if none)
//! ```
//!
//! Each column is reduced by exactly one [`Reduction`], looked up in
//! [`REDUCTION_POLICY`]. The table is the only place that decides how a
//! column merges; adding a column means adding one line there.
//!
//! Rows without an invoice number never reach a group. They are still part
//! of the raw per-page results, which this module never modifies.

use crate::output::PageResult;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

/// A column of the aggregated report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Column {
    Page,
    DocumentType,
    InvoiceNumber,
    InvoiceDate,
    VendorName,
    VendorTaxId,
    VendorAddress,
    CustomerName,
    CustomerTaxId,
    CustomerAddress,
    ItemNumber,
    Description,
    Quantity,
    UnitPrice,
    Amount,
    SubTotal,
    VatAmount,
    GrandTotal,
    HasTaxInvoice,
    HasSignature,
    Error,
}

impl Column {
    /// Key of this column in the flattened rows, also used as CSV header.
    pub fn key(self) -> &'static str {
        match self {
            Column::Page => "page",
            Column::DocumentType => "document_type",
            Column::InvoiceNumber => "invoice_number",
            Column::InvoiceDate => "invoice_date",
            Column::VendorName => "vendor_name",
            Column::VendorTaxId => "vendor_tax_id",
            Column::VendorAddress => "vendor_address",
            Column::CustomerName => "customer_name",
            Column::CustomerTaxId => "customer_tax_id",
            Column::CustomerAddress => "customer_address",
            Column::ItemNumber => "No.",
            Column::Description => "Description",
            Column::Quantity => "Quantity",
            Column::UnitPrice => "Unit Price",
            Column::Amount => "Amount",
            Column::SubTotal => "sub_total",
            Column::VatAmount => "vat_amount",
            Column::GrandTotal => "grand_total",
            Column::HasTaxInvoice => "has_tax_invoice",
            Column::HasSignature => "has_signature",
            Column::Error => "error",
        }
    }
}

/// How the rows of one invoice collapse into a single cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduction {
    /// The grouping key itself.
    Key,
    /// First non-null value in row order.
    First,
    /// Last non-null value in row order.
    Last,
    /// Every non-null value in row order, one per line.
    JoinLines,
    /// Compact page-range label of the group's pages.
    PageRange,
}

/// Per-column reduction policy.
///
/// `has_signature` is last-wins: the signature usually sits on the final
/// page of a multi-page invoice.
pub const REDUCTION_POLICY: &[(Column, Reduction)] = &[
    (Column::Page, Reduction::PageRange),
    (Column::InvoiceNumber, Reduction::Key),
    (Column::DocumentType, Reduction::First),
    (Column::InvoiceDate, Reduction::First),
    (Column::VendorName, Reduction::First),
    (Column::VendorTaxId, Reduction::First),
    (Column::VendorAddress, Reduction::First),
    (Column::CustomerName, Reduction::First),
    (Column::CustomerTaxId, Reduction::First),
    (Column::CustomerAddress, Reduction::First),
    (Column::SubTotal, Reduction::First),
    (Column::VatAmount, Reduction::First),
    (Column::GrandTotal, Reduction::First),
    (Column::HasTaxInvoice, Reduction::First),
    (Column::HasSignature, Reduction::Last),
    (Column::ItemNumber, Reduction::JoinLines),
    (Column::Description, Reduction::JoinLines),
    (Column::Quantity, Reduction::JoinLines),
    (Column::UnitPrice, Reduction::JoinLines),
    (Column::Amount, Reduction::JoinLines),
    (Column::Error, Reduction::JoinLines),
];

/// Output column order. Columns absent from every row are skipped.
pub const PROJECTION: &[Column] = &[
    Column::Page,
    Column::DocumentType,
    Column::InvoiceNumber,
    Column::InvoiceDate,
    Column::VendorName,
    Column::VendorTaxId,
    Column::VendorAddress,
    Column::CustomerName,
    Column::CustomerTaxId,
    Column::CustomerAddress,
    Column::Description,
    Column::Quantity,
    Column::UnitPrice,
    Column::Amount,
    Column::SubTotal,
    Column::VatAmount,
    Column::GrandTotal,
    Column::HasTaxInvoice,
    Column::HasSignature,
    Column::Error,
];

/// Rows merged under one invoice identifier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvoiceGroup {
    pub invoice_number: String,
    /// Contributing pages, ascending and unique.
    pub pages: Vec<usize>,
    /// Reduced value per column present in the input.
    pub values: BTreeMap<Column, Value>,
}

impl InvoiceGroup {
    /// Compact page-range label, e.g. `"3-5, 7"`.
    pub fn page_label(&self) -> String {
        format_page_ranges(&self.pages)
    }

    /// Smallest contributing page.
    pub fn first_page(&self) -> usize {
        self.pages.first().copied().unwrap_or(0)
    }

    pub fn get(&self, column: Column) -> Option<&Value> {
        self.values.get(&column)
    }

    /// Cell text for CSV: nulls and missing columns render empty.
    pub fn cell(&self, column: Column) -> String {
        self.get(column).and_then(cell_text).unwrap_or_default()
    }
}

/// The projected one-row-per-invoice table.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InvoiceTable {
    /// Projected columns in output order.
    pub columns: Vec<Column>,
    /// Groups ordered by their first page.
    pub groups: Vec<InvoiceGroup>,
}

impl InvoiceTable {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn headers(&self) -> Vec<&'static str> {
        self.columns.iter().map(|c| c.key()).collect()
    }

    /// Row-major cell text in `columns` order.
    pub fn records(&self) -> Vec<Vec<String>> {
        self.groups
            .iter()
            .map(|g| self.columns.iter().map(|&c| g.cell(c)).collect())
            .collect()
    }

    /// Group for a given invoice number.
    pub fn group(&self, invoice_number: &str) -> Option<&InvoiceGroup> {
        self.groups.iter().find(|g| g.invoice_number == invoice_number)
    }
}

/// Stringify a scalar for grouping and display. `None` for null.
pub fn cell_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

// ── Step 1: Flatten ──────────────────────────────────────────────────────────

/// One row per line item (item keys override scalar keys), or a single row
/// of scalars when the page has no items. Every row carries `page`.
pub fn flatten(results: &[PageResult]) -> Vec<Map<String, Value>> {
    let mut rows = Vec::with_capacity(results.len());
    for result in results {
        let scalars = result.scalar_fields();
        let page = Value::from(result.page);

        if result.items().is_empty() {
            let mut row = scalars;
            row.insert("page".to_string(), page);
            rows.push(row);
            continue;
        }

        for item in result.items() {
            let mut row = scalars.clone();
            for (key, value) in item {
                row.insert(key.clone(), value.clone());
            }
            row.insert("page".to_string(), page.clone());
            rows.push(row);
        }
    }
    rows
}

// ── Steps 2–6: Group, reduce, sort, project ──────────────────────────────────

/// Aggregate per-page records into the projected invoice table.
///
/// Returns an empty table when no row carries an `invoice_number` column.
pub fn aggregate(results: &[PageResult]) -> InvoiceTable {
    let rows = flatten(results);
    let present: BTreeSet<&str> = rows.iter().flat_map(|r| r.keys().map(String::as_str)).collect();

    if !present.contains(Column::InvoiceNumber.key()) {
        debug!("No invoice_number column in {} rows; table is empty", rows.len());
        return InvoiceTable::default();
    }

    // Insertion-ordered grouping; ties on first page keep first-seen order.
    // Keyed on the value's JSON text, so `100` and `"100"` stay apart.
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut grouped: Vec<(String, Vec<&Map<String, Value>>)> = Vec::new();
    for row in &rows {
        let Some(invoice) = row.get(Column::InvoiceNumber.key()).filter(|v| !v.is_null()) else {
            continue;
        };
        let identity = invoice.to_string();
        match index.get(&identity) {
            Some(&i) => grouped[i].1.push(row),
            None => {
                index.insert(identity, grouped.len());
                grouped.push((cell_text(invoice).unwrap_or_default(), vec![row]));
            }
        }
    }

    let mut groups: Vec<InvoiceGroup> = grouped
        .into_iter()
        .map(|(key, members)| reduce_group(key, &members, &present))
        .collect();
    groups.sort_by_key(InvoiceGroup::first_page);

    let columns = PROJECTION
        .iter()
        .copied()
        .filter(|c| present.contains(c.key()))
        .collect();

    debug!("Aggregated {} rows into {} invoices", rows.len(), groups.len());
    InvoiceTable { columns, groups }
}

fn reduce_group(
    invoice_number: String,
    rows: &[&Map<String, Value>],
    present: &BTreeSet<&str>,
) -> InvoiceGroup {
    let mut pages: Vec<usize> = rows
        .iter()
        .filter_map(|r| r.get("page").and_then(Value::as_u64))
        .map(|p| p as usize)
        .collect();
    pages.sort_unstable();
    pages.dedup();

    let mut values = BTreeMap::new();
    for &(column, reduction) in REDUCTION_POLICY {
        let key = column.key();
        if !present.contains(key) {
            continue;
        }
        let non_null = || rows.iter().filter_map(move |r| r.get(key)).filter(|v| !v.is_null());
        let value = match reduction {
            Reduction::Key => Value::String(invoice_number.clone()),
            Reduction::PageRange => Value::String(format_page_ranges(&pages)),
            Reduction::First => non_null().next().cloned().unwrap_or(Value::Null),
            Reduction::Last => non_null().last().cloned().unwrap_or(Value::Null),
            Reduction::JoinLines => Value::String(
                non_null().filter_map(cell_text).collect::<Vec<_>>().join("\n"),
            ),
        };
        values.insert(column, value);
    }

    InvoiceGroup {
        invoice_number,
        pages,
        values,
    }
}

// ── Page-range formatting ────────────────────────────────────────────────────

/// Render page numbers as a compact range list: `[1,2,3,5,6,8]` → `"1-3, 5-6, 8"`.
///
/// Input order and duplicates do not matter; empty input gives `""`.
pub fn format_page_ranges(pages: &[usize]) -> String {
    let mut pages = pages.to_vec();
    pages.sort_unstable();
    pages.dedup();

    let Some((&first, rest)) = pages.split_first() else {
        return String::new();
    };

    let mut ranges = Vec::new();
    let (mut start, mut end) = (first, first);
    for &p in rest {
        if p == end + 1 {
            end = p;
        } else {
            ranges.push(render_run(start, end));
            start = p;
            end = p;
        }
    }
    ranges.push(render_run(start, end));
    ranges.join(", ")
}

fn render_run(start: usize, end: usize) -> String {
    if start == end {
        start.to_string()
    } else {
        format!("{start}-{end}")
    }
}
