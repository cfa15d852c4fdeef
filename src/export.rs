//! Report emission: the aggregated CSV table and the raw JSON results.

use crate::error::InvoiceOcrError;
use crate::output::PageResult;
use crate::pipeline::aggregate::InvoiceTable;
use serde_json::{json, Value};
use std::io::Write;

/// UTF-8 byte-order mark; spreadsheet apps need it to read Thai text.
pub const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Serialise the table as BOM-prefixed CSV.
///
/// # Errors
/// [`InvoiceOcrError::NothingToExport`] when the table has no rows.
pub fn to_csv_bytes(table: &InvoiceTable) -> Result<Vec<u8>, InvoiceOcrError> {
    let mut buf = Vec::new();
    write_csv(&mut buf, table)?;
    Ok(buf)
}

/// Stream the BOM-prefixed CSV table into `out`.
pub fn write_csv<W: Write>(mut out: W, table: &InvoiceTable) -> Result<(), InvoiceOcrError> {
    if table.is_empty() {
        return Err(InvoiceOcrError::NothingToExport);
    }

    out.write_all(UTF8_BOM)
        .map_err(|e| InvoiceOcrError::Csv(e.into()))?;

    let mut wtr = csv::Writer::from_writer(out);
    wtr.write_record(table.headers())?;
    for record in table.records() {
        wtr.write_record(&record)?;
    }
    wtr.flush().map_err(|e| InvoiceOcrError::Csv(e.into()))?;
    Ok(())
}

/// `{"results": [...]}` with the free-text column stripped from each record.
pub fn to_json_value(results: &[PageResult]) -> Result<Value, InvoiceOcrError> {
    let records = results
        .iter()
        .map(|r| serde_json::to_value(r.without_non_essential()))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "results": records }))
}

/// Pretty-printed [`to_json_value`].
pub fn to_json_string(results: &[PageResult]) -> Result<String, InvoiceOcrError> {
    Ok(serde_json::to_string_pretty(&to_json_value(results)?)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PageError;
    use crate::pipeline::aggregate::aggregate;
    use serde_json::Map;

    fn page(n: usize, v: Value) -> PageResult {
        let Value::Object(m) = v else { unreachable!() };
        PageResult::from_extracted(n, m).unwrap()
    }

    #[test]
    fn csv_has_bom_header_and_multiline_cells() {
        let results = vec![page(
            1,
            json!({
                "invoice_number": "A-100",
                "vendor_name": "บริษัท ทดสอบ",
                "line_items": [{"Description": "Paper"}, {"Description": "Ink"}]
            }),
        )];
        let bytes = to_csv_bytes(&aggregate(&results)).unwrap();
        assert!(bytes.starts_with(UTF8_BOM));

        let text = std::str::from_utf8(&bytes[UTF8_BOM.len()..]).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("page,invoice_number,vendor_name,Description"));
        assert!(text.contains("\"Paper\nInk\""));
        assert!(text.contains("บริษัท ทดสอบ"));
    }

    #[test]
    fn empty_table_is_nothing_to_export() {
        let results = vec![page(1, json!({"vendor_name": "X"}))];
        let err = to_csv_bytes(&aggregate(&results)).unwrap_err();
        assert!(matches!(err, InvoiceOcrError::NothingToExport));
        assert!(err.is_client_error());
    }

    #[test]
    fn json_wraps_results_and_strips_additional_information() {
        let results = vec![
            page(
                1,
                json!({"invoice_number": "A", "additional_information": {"bank": "KBank"}}),
            ),
            PageResult::failed(&PageError::NoJson { page: 2 }),
        ];
        let value = to_json_value(&results).unwrap();
        let records = value["results"].as_array().unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].get("additional_information").is_none());
        assert_eq!(records[1]["invoice_number"], json!("ERROR_2"));
        assert_eq!(records[1]["error"], json!("Page 2: No JSON"));
    }

    #[test]
    fn empty_results_still_produce_json() {
        let s = to_json_string(&[]).unwrap();
        let v: Map<String, Value> = serde_json::from_str(&s).unwrap();
        assert_eq!(v["results"], json!([]));
    }
}
