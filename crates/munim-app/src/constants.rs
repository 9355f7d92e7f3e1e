//! Cross-cutting application constants.

/// Primary field-extraction prompt sent with every document.
pub const EXTRACTION_PROMPT: &str = "Extract the PARTY NAME, PARTY GSTIN, TAX INVOICE NO., INVOICE DATE, TAXABLE VALUE, CGST, SGST, IGST, INVOICE VALUE from this document. Provide the output in a clean JSON format.";

/// Prompt used when several images travel in one combined call. The model is
/// told to answer with one object per image, in input order.
pub const BATCH_EXTRACTION_PROMPT: &str = "Each attached image is a separate invoice. For every image, in the order given, extract the PARTY NAME, PARTY GSTIN, TAX INVOICE NO., INVOICE DATE, TAXABLE VALUE, CGST, SGST, IGST, INVOICE VALUE. Respond with a JSON array containing exactly one object per image, in the same order as the images.";

/// Increasingly generic prompts tried against the same model when the primary
/// prompt is rejected by a safety filter.
pub const SAFETY_FALLBACK_PROMPTS: &[&str] = &[
    "Read the attached business document and report the seller name, GST identification number, invoice number, invoice date, taxable amount, CGST, SGST, IGST and total amount as a JSON object.",
    "Describe the printed fields visible in the attached business document as a single JSON object with descriptive keys.",
];

/// Largest document payload accepted for inline upload.
pub const MAX_INLINE_DOCUMENT_BYTES: usize = 20 * 1024 * 1024;

/// Default model chain in priority order (rank 0 is tried first).
pub const DEFAULT_MODEL_CHAIN: &[(&str, &str)] = &[
    ("gemini-2.0-flash-exp", "Gemini 2.0 Flash (experimental)"),
    ("gemini-1.5-flash", "Gemini 1.5 Flash"),
    ("gemini-pro", "Gemini Pro"),
];
