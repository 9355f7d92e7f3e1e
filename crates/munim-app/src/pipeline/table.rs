//! Tabular CSV export with a fixed, always-present column set.

use rust_decimal::Decimal;

use super::invoice::InvoiceRecord;

/// Column order is part of the export contract; downstream spreadsheets key
/// on these headers.
pub const CSV_COLUMNS: [&str; 11] = [
    "identifier",
    "party_name",
    "party_gstin",
    "tax_invoice_no",
    "invoice_date",
    "taxable_value",
    "cgst",
    "sgst",
    "igst",
    "invoice_value",
    "error",
];

/// Renders one row per record. Missing fields become empty cells; the column
/// set never varies with the data.
pub fn render_csv(records: &[InvoiceRecord]) -> String {
    let mut out = String::new();
    out.push_str(&CSV_COLUMNS.join(","));
    out.push('\n');

    for record in records {
        let cells = [
            escape_cell(&record.identifier),
            text_cell(record.party_name.as_deref()),
            text_cell(record.party_gstin.as_deref()),
            text_cell(record.tax_invoice_no.as_deref()),
            text_cell(record.invoice_date.as_deref()),
            amount_cell(record.taxable_value),
            amount_cell(record.cgst),
            amount_cell(record.sgst),
            amount_cell(record.igst),
            amount_cell(record.invoice_value),
            text_cell(record.error.as_deref()),
        ];
        out.push_str(&cells.join(","));
        out.push('\n');
    }

    out
}

fn text_cell(value: Option<&str>) -> String {
    value.map(escape_cell).unwrap_or_default()
}

fn amount_cell(value: Option<Decimal>) -> String {
    value.map(|amount| amount.to_string()).unwrap_or_default()
}

fn escape_cell(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_stable_for_empty_input() {
        let rendered = render_csv(&[]);
        assert_eq!(
            rendered,
            "identifier,party_name,party_gstin,tax_invoice_no,invoice_date,taxable_value,cgst,sgst,igst,invoice_value,error\n"
        );
    }

    #[test]
    fn missing_fields_render_as_empty_cells() {
        let record = InvoiceRecord::failed("a.png", "backend unreachable");
        let rendered = render_csv(&[record]);
        let row = rendered.lines().nth(1).unwrap();
        assert_eq!(row, "a.png,,,,,,,,,,backend unreachable");
    }

    #[test]
    fn cells_with_commas_and_quotes_are_quoted() {
        let mut record = InvoiceRecord::empty("a.png");
        record.party_name = Some("Sharma, \"Traders\"".to_string());
        let rendered = render_csv(&[record]);
        assert!(rendered.contains("\"Sharma, \"\"Traders\"\"\""));
    }

    #[test]
    fn amounts_render_without_grouping() {
        let mut record = InvoiceRecord::empty("a.png");
        record.invoice_value = Some(Decimal::new(11800050, 2));
        let rendered = render_csv(&[record]);
        assert!(rendered.contains(",118000.50"));
    }
}
