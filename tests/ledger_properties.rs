use std::path::Path;

use invoice_desk::export::{ExportOptions, format_amount};
use invoice_desk::model::STATUS_COMPLETED;
use invoice_desk::store::FsBlobStore;
use invoice_desk::{Database, ErrorKind, Invoice, InvoiceDesk, InvoicePatch};

fn open_desk(dir: &Path) -> InvoiceDesk<FsBlobStore> {
    let db = Database::open(&dir.join("invoices.sqlite")).expect("open database");
    InvoiceDesk::new(db, FsBlobStore::new(dir.join("uploads")))
}

fn upload(desk: &InvoiceDesk<FsBlobStore>, name: &str) -> Invoice {
    desk.upload(name, "pdf", name.as_bytes()).expect("upload")
}

fn patch(desk: &InvoiceDesk<FsBlobStore>, id: &str, body: &str) -> Invoice {
    let patch = InvoicePatch::from_json(body).expect("patch body");
    desk.db().update_invoice(id, &patch).expect("update")
}

fn csv_lines(bytes: &[u8]) -> Vec<String> {
    assert!(bytes.starts_with(b"\xEF\xBB\xBF"), "export starts with a BOM");
    String::from_utf8(bytes[3..].to_vec())
        .expect("utf8 export")
        .split("\r\n")
        .map(ToOwned::to_owned)
        .collect()
}

#[test]
fn travel_and_meals_example_totals() {
    let temp = tempfile::tempdir().expect("tempdir");
    let desk = open_desk(temp.path());

    let a = upload(&desk, "a.pdf");
    let b = upload(&desk, "b.pdf");
    let c = upload(&desk, "c.pdf");
    let d = upload(&desk, "d.pdf");
    patch(&desk, &a.id, r#"{"category":"Travel","amount":100.00,"status":"completed"}"#);
    patch(&desk, &b.id, r#"{"category":"Travel","amount":50.50,"status":"completed"}"#);
    patch(&desk, &c.id, r#"{"category":"Meals","amount":20.00,"status":"completed"}"#);
    patch(&desk, &d.id, r#"{"category":"Travel","amount":999.0}"#);

    let report = desk.export(&ExportOptions::default()).expect("export");
    assert_eq!(report.invoice_count, 3);
    assert_eq!(format_amount(report.grand_total), "170.50");
    assert!(report.filename.starts_with("invoices_export_"));
    assert!(report.filename.ends_with(".csv"));

    let lines = csv_lines(&report.bytes);
    assert_eq!(
        lines,
        vec![
            "Category,Filename,Amount (RMB),Attachments,Notes,Created At".to_string(),
            format!("Meals,c.pdf,20.00,,,{}", c.created_at),
            "Meals subtotal,,20.00,,,".to_string(),
            String::new(),
            format!("Travel,a.pdf,100.00,,,{}", a.created_at),
            format!("Travel,b.pdf,50.50,,,{}", b.created_at),
            "Travel subtotal,,150.50,,,".to_string(),
            String::new(),
            "Total,,170.50,,,".to_string(),
            String::new(),
        ]
    );
    assert!(!lines.iter().any(|line| line.contains("d.pdf")));
}

#[test]
fn manual_labels_precede_graph_attachments() {
    let temp = tempfile::tempdir().expect("tempdir");
    let desk = open_desk(temp.path());

    let x = upload(&desk, "x.pdf");
    let y = upload(&desk, "boarding_pass.pdf");
    patch(
        &desk,
        &x.id,
        r#"{"manual_attachment_labels":["receipt.jpg"],"status":"completed","amount":10}"#,
    );
    desk.db().add_attachment(&x.id, &y.id).expect("attach");

    let report = desk.export(&ExportOptions::default()).expect("export");
    let row = &report.sections[0].rows[0];
    assert_eq!(row.display_name, "x.pdf");
    assert_eq!(row.attachments, "receipt.jpg, boarding_pass.pdf");
    assert_eq!(report.sections[0].category, "Uncategorized");

    let lines = csv_lines(&report.bytes);
    assert_eq!(
        lines[1],
        format!(
            "Uncategorized,x.pdf,10.00,\"receipt.jpg, boarding_pass.pdf\",,{}",
            x.created_at
        )
    );
}

#[test]
fn export_without_completed_invoices_fails() {
    let temp = tempfile::tempdir().expect("tempdir");
    let desk = open_desk(temp.path());

    let err = desk
        .export(&ExportOptions::default())
        .expect_err("empty store");
    assert_eq!(err.kind(), ErrorKind::NothingToExport);

    upload(&desk, "pending.pdf");
    let err = desk
        .export(&ExportOptions::default())
        .expect_err("only pending");
    assert_eq!(err.kind(), ErrorKind::NothingToExport);
}

#[test]
fn export_is_stable_and_totals_are_consistent() {
    let temp = tempfile::tempdir().expect("tempdir");
    let desk = open_desk(temp.path());

    let amounts = [0.1, 0.2, 0.3, 19.99, 5.005, 1e-3];
    let categories = ["Office", "Travel", "Office", "", "Meals", "Travel"];
    for (idx, (amount, category)) in amounts.iter().zip(categories).enumerate() {
        let invoice = upload(&desk, &format!("{idx}.pdf"));
        let body = serde_json::json!({
            "amount": amount,
            "category": category,
            "status": STATUS_COMPLETED,
        })
        .to_string();
        patch(&desk, &invoice.id, &body);
    }
    upload(&desk, "no-amount.pdf");
    let no_amount = desk
        .db()
        .list_invoices(None)
        .expect("list")
        .into_iter()
        .find(|inv| inv.display_name == "no-amount.pdf")
        .expect("seeded");
    patch(&desk, &no_amount.id, r#"{"status":"completed","category":"Office"}"#);

    let first = desk.export(&ExportOptions::default()).expect("first export");
    let second = desk.export(&ExportOptions::default()).expect("second export");
    assert_eq!(csv_lines(&first.bytes), csv_lines(&second.bytes));
    assert_eq!(first.grand_total, second.grand_total);

    let subtotal_sum: f64 = first.sections.iter().map(|s| s.subtotal).sum();
    let amount_sum: f64 = amounts.iter().sum();
    assert_eq!(format_amount(first.grand_total), format_amount(subtotal_sum));
    assert_eq!(format_amount(first.grand_total), format_amount(amount_sum));
    assert_eq!(first.invoice_count, amounts.len() + 1);
}

#[test]
fn deleting_an_endpoint_leaves_no_orphan_edges() {
    let temp = tempfile::tempdir().expect("tempdir");
    let desk = open_desk(temp.path());

    let owner = upload(&desk, "owner.pdf");
    let middle = upload(&desk, "middle.pdf");
    let leaf = upload(&desk, "leaf.pdf");
    desk.db().add_attachment(&owner.id, &middle.id).expect("owner -> middle");
    desk.db().add_attachment(&middle.id, &leaf.id).expect("middle -> leaf");
    desk.db().add_attachment(&leaf.id, &middle.id).expect("leaf -> middle");

    desk.delete(&middle.id).expect("delete middle");

    assert!(desk.db().outgoing_attachments(&owner.id).expect("out").is_empty());
    assert!(desk.db().incoming_attachments(&leaf.id).expect("in").is_empty());
    assert!(desk.db().outgoing_attachments(&leaf.id).expect("out").is_empty());
    assert!(desk.db().all_attachment_targets().expect("targets").is_empty());
    assert!(!temp.path().join("uploads").join(&middle.stored_key).exists());
}

#[test]
fn directed_edges_in_both_directions_coexist() {
    let temp = tempfile::tempdir().expect("tempdir");
    let desk = open_desk(temp.path());
    let a = upload(&desk, "a.pdf");
    let b = upload(&desk, "b.pdf");

    desk.db().add_attachment(&a.id, &b.id).expect("a -> b");
    let err = desk.db().add_attachment(&a.id, &b.id).expect_err("duplicate");
    assert_eq!(err.kind(), ErrorKind::Conflict);
    desk.db().add_attachment(&b.id, &a.id).expect("b -> a");

    let view = desk.attachment_view(&a.id).expect("view");
    assert_eq!(view.attachments.len(), 1);
    assert_eq!(view.attached_to.len(), 1);
    assert_eq!(view.attachments[0].id, b.id);
    assert_eq!(view.attached_to[0].id, b.id);
}

#[test]
fn database_survives_close_and_reopen() {
    let temp = tempfile::tempdir().expect("tempdir");
    let desk = open_desk(temp.path());
    let a = upload(&desk, "a.pdf");
    let b = upload(&desk, "b.pdf");
    desk.db().add_attachment(&a.id, &b.id).expect("attach");
    desk.close().expect("close");

    let desk = open_desk(temp.path());
    assert_eq!(desk.db().list_invoices(None).expect("list").len(), 2);
    let (_, bytes) = desk.read_file(&a.id).expect("file");
    assert_eq!(bytes, b"a.pdf");
    assert_eq!(
        desk.db().outgoing_attachments(&a.id).expect("out")[0].id,
        b.id
    );
}
