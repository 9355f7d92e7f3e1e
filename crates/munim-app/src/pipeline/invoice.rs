//! Invoice extraction requests and reconciled invoice records.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{Map, Value};

/// Media kind of one input document, recognized by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Png,
    Jpeg,
    Webp,
}

impl DocumentKind {
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Webp => "image/webp",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "webp" => Some(Self::Webp),
            _ => None,
        }
    }

    /// Images can travel several to a call; PDFs are always sent alone.
    pub fn is_image(self) -> bool {
        !matches!(self, Self::Pdf)
    }
}

impl std::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mime_type())
    }
}

/// One logical document queued for extraction.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub id: String,
    pub bytes: Arc<[u8]>,
    pub kind: DocumentKind,
}

impl ExtractionRequest {
    pub fn new(id: impl Into<String>, bytes: impl Into<Arc<[u8]>>, kind: DocumentKind) -> Self {
        Self {
            id: id.into(),
            bytes: bytes.into(),
            kind,
        }
    }
}

/// Reconciled output for one [`ExtractionRequest`]. Exactly one record exists
/// per submitted request; failures carry an error description with null
/// fields instead of aborting the batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvoiceRecord {
    pub identifier: String,
    pub party_name: Option<String>,
    pub party_gstin: Option<String>,
    pub tax_invoice_no: Option<String>,
    pub invoice_date: Option<String>,
    pub taxable_value: Option<Decimal>,
    pub cgst: Option<Decimal>,
    pub sgst: Option<Decimal>,
    pub igst: Option<Decimal>,
    pub invoice_value: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl InvoiceRecord {
    pub fn empty(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            party_name: None,
            party_gstin: None,
            tax_invoice_no: None,
            invoice_date: None,
            taxable_value: None,
            cgst: None,
            sgst: None,
            igst: None,
            invoice_value: None,
            error: None,
        }
    }

    pub fn failed(identifier: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::empty(identifier)
        }
    }

    /// Builds a record from one parsed response object. Keys are matched after
    /// normalization, so `"PARTY NAME"`, `"party_name"` and `"Party Name:"`
    /// all land in the same field.
    pub fn from_object(identifier: &str, object: &Map<String, Value>) -> Self {
        let fields: BTreeMap<String, &Value> = object
            .iter()
            .map(|(key, value)| (normalize_key(key), value))
            .collect();

        Self {
            identifier: identifier.to_string(),
            party_name: text_field(&fields, &["party_name", "party", "seller_name"]),
            party_gstin: text_field(&fields, &["party_gstin", "gstin", "gst_no", "gst_number"]),
            tax_invoice_no: text_field(
                &fields,
                &["tax_invoice_no", "invoice_no", "invoice_number", "bill_no"],
            ),
            invoice_date: text_field(&fields, &["invoice_date", "date", "bill_date"]),
            taxable_value: amount_field(&fields, &["taxable_value", "taxable_amount"]),
            cgst: amount_field(&fields, &["cgst", "cgst_amount"]),
            sgst: amount_field(&fields, &["sgst", "sgst_amount"]),
            igst: amount_field(&fields, &["igst", "igst_amount"]),
            invoice_value: amount_field(
                &fields,
                &["invoice_value", "total_value", "invoice_total", "grand_total"],
            ),
            error: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Lowercases a response key and collapses every separator run to a single
/// underscore: `"TAX INVOICE NO."` becomes `"tax_invoice_no"`.
fn normalize_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut pending_separator = false;
    for ch in key.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_separator && !out.is_empty() {
                out.push('_');
            }
            pending_separator = false;
            out.push(ch.to_ascii_lowercase());
        } else {
            pending_separator = true;
        }
    }
    out
}

fn text_field(fields: &BTreeMap<String, &Value>, names: &[&str]) -> Option<String> {
    for name in names {
        match fields.get(*name) {
            Some(Value::String(s)) => {
                let trimmed = s.trim();
                if !trimmed.is_empty() && !is_missing_marker(trimmed) {
                    return Some(trimmed.to_string());
                }
            }
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

fn amount_field(fields: &BTreeMap<String, &Value>, names: &[&str]) -> Option<Decimal> {
    for name in names {
        if let Some(amount) = fields.get(*name).and_then(|value| parse_amount(value)) {
            return Some(amount);
        }
    }
    None
}

/// Parses a monetary value from a JSON number or a string, tolerating currency
/// symbols and digit-group separators (`"₹1,18,000.00"` parses to 118000.00).
pub fn parse_amount(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        Value::String(s) => {
            let cleaned = amount_cleanup().replace_all(s, "");
            Decimal::from_str(&cleaned).ok()
        }
        _ => None,
    }
}

fn is_missing_marker(text: &str) -> bool {
    matches!(
        text.to_ascii_lowercase().as_str(),
        "null" | "none" | "n/a" | "na" | "nil" | "-"
    )
}

fn amount_cleanup() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^0-9.\-]").expect("static amount pattern"))
}
