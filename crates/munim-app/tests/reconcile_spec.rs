use munim_app::pipeline::reconcile;

fn ids(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

#[test]
fn short_arrays_cycle_over_the_identifier_list() {
    let identifiers = ids(&["a.png", "b.png", "c.png", "d.png", "e.png"]);
    let response = r#"[{"tax_invoice_no": "INV-1"}, {"tax_invoice_no": "INV-2"}]"#;

    let records = reconcile(response, &identifiers);

    assert_eq!(records.len(), 5);
    let numbers: Vec<Option<&str>> = records
        .iter()
        .map(|record| record.tax_invoice_no.as_deref())
        .collect();
    assert_eq!(
        numbers,
        vec![
            Some("INV-1"),
            Some("INV-2"),
            Some("INV-1"),
            Some("INV-2"),
            Some("INV-1"),
        ]
    );
    assert!(records.iter().all(|record| !record.is_error()));
}

#[test]
fn single_object_broadcasts_to_every_identifier() {
    let identifiers = ids(&["a.png", "b.png"]);
    let response = "Here is the result:\n```json\n{\"party_name\": \"Acme Traders\"}\n```";

    let records = reconcile(response, &identifiers);

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].identifier, "a.png");
    assert_eq!(records[1].identifier, "b.png");
    assert!(records
        .iter()
        .all(|record| record.party_name.as_deref() == Some("Acme Traders")));
}

#[test]
fn prose_without_json_marks_every_identifier_failed() {
    let identifiers = ids(&["a.png", "b.png", "c.png"]);

    let records = reconcile("I could not read these documents.", &identifiers);

    assert_eq!(records.len(), 3);
    assert!(records
        .iter()
        .all(|record| record.error.as_deref() == Some(reconcile::PARSE_FAILURE_ERROR)));
}
