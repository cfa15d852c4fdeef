//! Extraction instruction sent with every page image.
//!
//! The key names requested here are the ones the sanitizer and aggregator
//! expect; renaming a key in the prompt without updating
//! [`crate::pipeline::sanitize`] silently empties that CSV column.

/// Default instruction describing the target JSON schema.
///
/// Used when [`crate::config::ExtractionConfig::prompt`] is `None`.
pub const INVOICE_EXTRACTION_PROMPT: &str = r#"You are an expert AI assistant specialized in comprehensive and highly accurate document data extraction. Your task is to process one page of a tax invoice with an inconsistent, challenging layout and extract ALL available information.

Layouts vary: labels and values are often split across lines or far apart. Use contextual and spatial understanding, not fixed templates.

Return exactly ONE JSON object following this schema:

1. CORE FIELDS (top level)
   - `document_type`: e.g. "ใบกำกับภาษี/Tax Invoice", "ใบเสร็จรับเงิน/Receipt"
   - `invoice_number`: the main tax invoice number
   - `invoice_date`: the primary date of the invoice
   - `vendor_name`, `vendor_tax_id`, `vendor_address`: the issuer
   - `customer_name`, `customer_tax_id`, `customer_address`: the recipient
   - `sub_total`, `vat_amount`, `grand_total`: the financial summary, as plain numbers

2. LINE ITEMS
   - `line_items`: an array of objects, one per row of the main product/service table
   - Use exactly these keys, even if the printed headers are in Thai or worded differently:
     - `No.`        item number, if available
     - `Description` product or service name/description
     - `Quantity`   amount or unit count
     - `Unit Price` price per unit
     - `Amount`     total for that line
   - If a row has no value for one of these keys, include the key with `null`.

3. ADDITIONAL DATA
   - `additional_information`: an object with every other key-value pair visible on the page.

4. DOCUMENT CHECKS
   - `has_tax_invoice`: true if the page clearly states it is a tax invoice (e.g. the phrase "ใบกำกับภาษี").
   - `has_signature`: true if there is a visible signature, signature-like scribble, or stamp.

Example:

```json
{
  "document_type": "ใบกำกับภาษี/Tax Invoice",
  "invoice_number": "4104085",
  "invoice_date": "04/01/25",
  "vendor_name": "RICOH SERVICES (THAILAND) LIMITED",
  "vendor_tax_id": "0105531026179",
  "vendor_address": "341 Onnuj Road, Kwaeng Prawet, Khet Prawet, Bangkok 10250",
  "customer_name": "บริษัท แมงโก้ คอนซัลแตนท์ จำกัด",
  "customer_tax_id": "0105551067687",
  "customer_address": "555 Rasa Tower 1, Phahonyothin Road, Chatuchak, Bangkok 10900",
  "line_items": [
    {"No.": 1, "Description": "ค่าเช่า/Rental Charge", "Quantity": 1, "Unit Price": 3000.00, "Amount": 3000.00}
  ],
  "sub_total": 3000.00,
  "vat_amount": 210.00,
  "grand_total": 3210.00,
  "has_tax_invoice": true,
  "has_signature": true
}
```

Output ONLY the JSON object. No commentary."#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_names_every_projected_key() {
        for key in [
            "document_type",
            "invoice_number",
            "invoice_date",
            "vendor_tax_id",
            "customer_address",
            "line_items",
            "Unit Price",
            "grand_total",
            "has_tax_invoice",
            "has_signature",
        ] {
            assert!(
                INVOICE_EXTRACTION_PROMPT.contains(key),
                "prompt is missing `{key}`"
            );
        }
    }
}
