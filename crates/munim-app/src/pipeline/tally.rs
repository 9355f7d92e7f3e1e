//! Deduplicated double-entry voucher generation and Tally import XML.

use std::collections::BTreeSet;

use bon::Builder;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use strum::Display;
use tracing::debug;

use super::invoice::InvoiceRecord;

/// Ledger labels for the three GST components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum TaxKind {
    Cgst,
    Sgst,
    Igst,
}

/// Export parameters supplied by the caller.
#[derive(Debug, Clone, Builder)]
pub struct VoucherOptions {
    /// Company the import file is addressed to.
    #[builder(into)]
    pub company: String,
    /// Counterparty ledger used when a record carries no party name.
    #[builder(into, default = String::from("Sundry Debtors"))]
    pub counterparty: String,
    /// Voucher type, doubling as the revenue ledger name.
    #[builder(into, default = String::from("Sales"))]
    pub voucher_type: String,
}

/// One signed ledger entry. Debits are positive, credits negative; every
/// voucher's entries sum to zero.
#[derive(Debug, Clone, PartialEq)]
pub struct VoucherLine {
    pub ledger: String,
    pub amount: Decimal,
    pub debit: bool,
    pub bill_ref: Option<BillRef>,
}

/// Open-item reference attached to the debit line.
#[derive(Debug, Clone, PartialEq)]
pub struct BillRef {
    pub name: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Voucher {
    pub number: String,
    pub date: NaiveDate,
    pub party_ledger: String,
    pub narration: String,
    pub lines: Vec<VoucherLine>,
}

impl Voucher {
    pub fn balance(&self) -> Decimal {
        self.lines.iter().map(|line| line.amount).sum()
    }
}

/// Builds one voucher per distinct non-empty invoice number, first occurrence
/// winning. Error records and records without an invoice number are skipped.
pub fn build_vouchers(records: &[InvoiceRecord], options: &VoucherOptions) -> Vec<Voucher> {
    let mut seen = BTreeSet::new();
    let mut vouchers = Vec::new();

    for record in records {
        if record.is_error() {
            continue;
        }
        let Some(number) = record
            .tax_invoice_no
            .as_deref()
            .map(str::trim)
            .filter(|number| !number.is_empty())
        else {
            continue;
        };
        if !seen.insert(number.to_string()) {
            debug!(invoice = number, "duplicate invoice number skipped");
            continue;
        }
        vouchers.push(voucher_for(number, record, options));
    }

    vouchers
}

/// The debit amount is derived as the sum of the credit-side components, so
/// the zero-balance invariant holds even when the printed total disagrees
/// with the component fields.
fn voucher_for(number: &str, record: &InvoiceRecord, options: &VoucherOptions) -> Voucher {
    let mut credits = Vec::new();
    if let Some(taxable) = record.taxable_value {
        credits.push(VoucherLine {
            ledger: options.voucher_type.clone(),
            amount: -taxable,
            debit: false,
            bill_ref: None,
        });
    }
    for (kind, component) in [
        (TaxKind::Cgst, record.cgst),
        (TaxKind::Sgst, record.sgst),
        (TaxKind::Igst, record.igst),
    ] {
        if let Some(tax) = component
            && tax > Decimal::ZERO
        {
            credits.push(VoucherLine {
                ledger: kind.to_string(),
                amount: -tax,
                debit: false,
                bill_ref: None,
            });
        }
    }

    let debit_total: Decimal = credits.iter().map(|line| -line.amount).sum();
    let party_ledger = record
        .party_name
        .clone()
        .unwrap_or_else(|| options.counterparty.clone());

    let narration = match record.invoice_date.as_deref() {
        Some(date) => format!("Against Tax Invoice {number} dated {date}"),
        None => format!("Against Tax Invoice {number}"),
    };

    let mut lines = vec![VoucherLine {
        ledger: party_ledger.clone(),
        amount: debit_total,
        debit: true,
        bill_ref: Some(BillRef {
            name: number.to_string(),
            amount: debit_total,
        }),
    }];
    lines.extend(credits);

    Voucher {
        number: number.to_string(),
        date: voucher_date(record.invoice_date.as_deref()),
        party_ledger,
        narration,
        lines,
    }
}

const DATE_FORMATS: [&str; 9] = [
    "%d-%m-%Y",
    "%d/%m/%Y",
    "%d.%m.%Y",
    "%d-%m-%y",
    "%d/%m/%y",
    "%d-%b-%Y",
    "%d %b %Y",
    "%d %B %Y",
    "%Y-%m-%d",
];

/// Day-month-year text to a calendar date. Unreadable dates fall back to the
/// financial-year opening date rather than failing the export.
fn voucher_date(raw: Option<&str>) -> NaiveDate {
    raw.and_then(normalize_date).unwrap_or_else(placeholder_date)
}

fn normalize_date(text: &str) -> Option<NaiveDate> {
    let trimmed = text.trim();
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(trimmed, format).ok())
}

fn placeholder_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 4, 1).unwrap_or_default()
}

/// Renders the Tally import envelope. Amounts flip sign on the way out, since
/// Tally writes debits as negative values with `ISDEEMEDPOSITIVE` set.
pub fn render_tally_xml(vouchers: &[Voucher], options: &VoucherOptions) -> String {
    let mut xml = String::new();
    xml.push_str("<ENVELOPE>\n");
    xml.push_str(" <HEADER>\n  <TALLYREQUEST>Import Data</TALLYREQUEST>\n </HEADER>\n");
    xml.push_str(" <BODY>\n  <IMPORTDATA>\n   <REQUESTDESC>\n    <REPORTNAME>Vouchers</REPORTNAME>\n");
    xml.push_str("    <STATICVARIABLES>\n     <SVCURRENTCOMPANY>");
    xml.push_str(&escape_xml(&options.company));
    xml.push_str("</SVCURRENTCOMPANY>\n    </STATICVARIABLES>\n   </REQUESTDESC>\n");
    xml.push_str("   <REQUESTDATA>\n");

    for voucher in vouchers {
        render_voucher(&mut xml, voucher, options);
    }

    xml.push_str("   </REQUESTDATA>\n  </IMPORTDATA>\n </BODY>\n</ENVELOPE>\n");
    xml
}

fn render_voucher(xml: &mut String, voucher: &Voucher, options: &VoucherOptions) {
    let voucher_type = escape_xml(&options.voucher_type);
    xml.push_str("    <TALLYMESSAGE xmlns:UDF=\"TallyUDF\">\n");
    xml.push_str(&format!(
        "     <VOUCHER VCHTYPE=\"{voucher_type}\" ACTION=\"Create\">\n"
    ));
    xml.push_str(&format!(
        "      <DATE>{}</DATE>\n",
        voucher.date.format("%Y%m%d")
    ));
    xml.push_str(&format!(
        "      <VOUCHERTYPENAME>{voucher_type}</VOUCHERTYPENAME>\n"
    ));
    xml.push_str(&format!(
        "      <VOUCHERNUMBER>{}</VOUCHERNUMBER>\n",
        escape_xml(&voucher.number)
    ));
    xml.push_str(&format!(
        "      <PARTYLEDGERNAME>{}</PARTYLEDGERNAME>\n",
        escape_xml(&voucher.party_ledger)
    ));
    xml.push_str(&format!(
        "      <NARRATION>{}</NARRATION>\n",
        escape_xml(&voucher.narration)
    ));

    for line in &voucher.lines {
        let deemed = if line.debit { "Yes" } else { "No" };
        xml.push_str("      <ALLLEDGERENTRIES.LIST>\n");
        xml.push_str(&format!(
            "       <LEDGERNAME>{}</LEDGERNAME>\n",
            escape_xml(&line.ledger)
        ));
        xml.push_str(&format!(
            "       <ISDEEMEDPOSITIVE>{deemed}</ISDEEMEDPOSITIVE>\n"
        ));
        xml.push_str(&format!(
            "       <AMOUNT>{}</AMOUNT>\n",
            tally_amount(line.amount)
        ));
        if let Some(bill_ref) = &line.bill_ref {
            xml.push_str("       <BILLALLOCATIONS.LIST>\n");
            xml.push_str(&format!(
                "        <NAME>{}</NAME>\n",
                escape_xml(&bill_ref.name)
            ));
            xml.push_str("        <BILLTYPE>New Ref</BILLTYPE>\n");
            xml.push_str(&format!(
                "        <AMOUNT>{}</AMOUNT>\n",
                tally_amount(bill_ref.amount)
            ));
            xml.push_str("       </BILLALLOCATIONS.LIST>\n");
        }
        xml.push_str("      </ALLLEDGERENTRIES.LIST>\n");
    }

    xml.push_str("     </VOUCHER>\n");
    xml.push_str("    </TALLYMESSAGE>\n");
}

fn tally_amount(amount: Decimal) -> String {
    (-amount).round_dp(2).to_string()
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}
