//! Reconciles a freeform model response against the submitted document list.
//!
//! The model answers with JSON of uncertain shape: a fenced array, a bare
//! object, prose around either, or nothing usable at all. Whatever comes back,
//! the caller receives exactly one record per expected identifier, in order.
//! Parse problems degrade into per-record error descriptions and never
//! propagate as errors.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::invoice::InvoiceRecord;

pub const PARSE_FAILURE_ERROR: &str = "failed to parse AI response";

/// Maps `response_text` onto `expected_identifiers`, trying strategies in
/// order: array span with positional mapping, single-object span broadcast to
/// every identifier, then an error record per identifier.
pub fn reconcile(response_text: &str, expected_identifiers: &[String]) -> Vec<InvoiceRecord> {
    if let Some(items) = parse_array_span(response_text)
        && !items.is_empty()
    {
        return map_positional(&items, expected_identifiers);
    }

    if let Some(object) = parse_object_span(response_text) {
        debug!(
            expected = expected_identifiers.len(),
            "single-object response broadcast to every identifier"
        );
        return expected_identifiers
            .iter()
            .map(|id| InvoiceRecord::from_object(id, &object))
            .collect();
    }

    warn!(
        expected = expected_identifiers.len(),
        "response not parseable as JSON, emitting error records"
    );
    expected_identifiers
        .iter()
        .map(|id| InvoiceRecord::failed(id.clone(), PARSE_FAILURE_ERROR))
        .collect()
}

/// Positional mapping. A response shorter than the identifier list cycles
/// through its items (index modulo item count) so no identifier is left
/// without a record; a longer response has its tail ignored.
fn map_positional(items: &[Value], ids: &[String]) -> Vec<InvoiceRecord> {
    if items.len() < ids.len() {
        debug!(
            items = items.len(),
            expected = ids.len(),
            "response undercounts inputs, cycling items"
        );
    }

    ids.iter()
        .enumerate()
        .map(|(index, id)| match &items[index % items.len()] {
            Value::Object(map) => InvoiceRecord::from_object(id, map),
            _ => InvoiceRecord::failed(id.clone(), "response item is not an object"),
        })
        .collect()
}

fn parse_array_span(text: &str) -> Option<Vec<Value>> {
    let span = bracket_span(text, '[', ']')?;
    serde_json::from_str(span).ok()
}

fn parse_object_span(text: &str) -> Option<Map<String, Value>> {
    let span = bracket_span(text, '{', '}')?;
    match serde_json::from_str(span).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// Widest span from the first `open` to the last `close`. Skips over markdown
/// fences and prose around the JSON body.
fn bracket_span(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn fenced_array_maps_positionally() {
        let text = "Here you go:\n```json\n[{\"party_name\":\"A\"},{\"party_name\":\"B\"}]\n```";
        let records = reconcile(text, &ids(&["one.png", "two.png"]));
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].party_name.as_deref(), Some("A"));
        assert_eq!(records[1].party_name.as_deref(), Some("B"));
        assert_eq!(records[1].identifier, "two.png");
    }

    #[test]
    fn longer_array_ignores_tail() {
        let text = "[{\"party_name\":\"A\"},{\"party_name\":\"B\"},{\"party_name\":\"C\"}]";
        let records = reconcile(text, &ids(&["only.png"]));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].party_name.as_deref(), Some("A"));
    }

    #[test]
    fn non_object_items_become_error_records() {
        let records = reconcile("[4, {\"party_name\":\"B\"}]", &ids(&["a.png", "b.png"]));
        assert_eq!(records.len(), 2);
        assert!(records[0].is_error());
        assert_eq!(records[1].party_name.as_deref(), Some("B"));
    }

    #[test]
    fn empty_array_falls_through_to_error_records() {
        let records = reconcile("[]", &ids(&["a.png"]));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].error.as_deref(), Some(PARSE_FAILURE_ERROR));
    }

    #[test]
    fn garbage_yields_error_record_per_id() {
        let records = reconcile("sorry, I cannot help with that", &ids(&["a.png", "b.pdf"]));
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(InvoiceRecord::is_error));
        assert_eq!(records[0].identifier, "a.png");
        assert_eq!(records[1].identifier, "b.pdf");
    }

    #[test]
    fn empty_text_yields_error_record_per_id() {
        let records = reconcile("", &ids(&["a.png", "b.pdf"]));
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(InvoiceRecord::is_error));
        assert_eq!(records[0].error.as_deref(), Some(PARSE_FAILURE_ERROR));
        assert_eq!(records[1].identifier, "b.pdf");
    }

    #[test]
    fn no_identifiers_yields_no_records() {
        assert!(reconcile("[{\"party_name\":\"A\"}]", &[]).is_empty());
    }

    #[test]
    fn bracket_span_requires_ordered_pair() {
        assert_eq!(bracket_span("} nope {", '{', '}'), None);
        assert_eq!(bracket_span("a [1, 2] b", '[', ']'), Some("[1, 2]"));
    }
}
