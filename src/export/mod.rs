//! Categorized ledger of completed invoices.
//!
//! Rows are grouped by category (sorted by label), chronological within a
//! category, followed by a subtotal and a blank line; a grand total closes
//! the table. Category labels are trimmed before grouping, so `"Travel "`
//! and `"Travel"` share a section, and a missing or blank label falls under
//! the uncategorized label. Amounts are summed unrounded and formatted with
//! two decimals only when rendered.

use std::collections::{BTreeMap, HashMap};
use std::io;

use chrono::{DateTime, Local};
use tracing::info;

use crate::db::Database;
use crate::error::{InvoiceError, Result};
use crate::model::Invoice;

pub const DEFAULT_UNCATEGORIZED_LABEL: &str = "Uncategorized";
pub const HEADER: [&str; 6] = [
    "Category",
    "Filename",
    "Amount (RMB)",
    "Attachments",
    "Notes",
    "Created At",
];
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";
const ATTACHMENT_SEPARATOR: &str = ", ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Csv,
    /// Spreadsheet tools open the CSV body directly; no binary workbook.
    Excel,
}

impl ExportFormat {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "excel" | "xlsx" => Ok(Self::Excel),
            other => Err(InvoiceError::validation(format!(
                "unsupported export format `{other}`"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportOptions {
    pub format: ExportFormat,
    pub uncategorized_label: String,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            format: ExportFormat::Csv,
            uncategorized_label: DEFAULT_UNCATEGORIZED_LABEL.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LedgerRow {
    pub category: String,
    pub display_name: String,
    pub amount: f64,
    pub attachments: String,
    pub notes: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategorySection {
    pub category: String,
    pub rows: Vec<LedgerRow>,
    pub subtotal: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportReport {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub sections: Vec<CategorySection>,
    pub grand_total: f64,
    pub invoice_count: usize,
}

pub fn export_completed(
    db: &Database,
    options: &ExportOptions,
    now: DateTime<Local>,
) -> Result<ExportReport> {
    let snapshot = db.snapshot()?;
    let invoices = db.completed_invoices()?;
    if invoices.is_empty() {
        return Err(InvoiceError::NothingToExport);
    }
    let ids = invoices
        .iter()
        .map(|invoice| invoice.id.clone())
        .collect::<Vec<_>>();
    let graph_names = db.attachment_names_for(&ids)?;
    snapshot.commit()?;

    let invoice_count = invoices.len();
    let (sections, grand_total) =
        build_sections(invoices, &graph_names, &options.uncategorized_label);
    let bytes = render_csv(&sections, grand_total)?;

    info!(
        invoices = invoice_count,
        categories = sections.len(),
        grand_total,
        "export rendered"
    );
    Ok(ExportReport {
        filename: export_filename(now),
        bytes,
        sections,
        grand_total,
        invoice_count,
    })
}

/// Groups invoices (given in chronological order) by category label.
/// Returns the sections and the grand total accumulated row by row.
pub fn build_sections(
    invoices: Vec<Invoice>,
    graph_names: &HashMap<String, Vec<String>>,
    uncategorized_label: &str,
) -> (Vec<CategorySection>, f64) {
    let mut grouped: BTreeMap<String, Vec<Invoice>> = BTreeMap::new();
    for invoice in invoices {
        let label = match invoice.category.as_deref().map(str::trim) {
            Some(category) if !category.is_empty() => category.to_string(),
            _ => uncategorized_label.to_string(),
        };
        grouped.entry(label).or_default().push(invoice);
    }

    let mut grand_total = 0.0;
    let mut sections = Vec::with_capacity(grouped.len());
    for (category, members) in grouped {
        let mut subtotal = 0.0;
        let mut rows = Vec::with_capacity(members.len());
        for invoice in members {
            let amount = invoice.amount.unwrap_or(0.0);
            subtotal += amount;
            grand_total += amount;

            let graph = graph_names
                .get(&invoice.id)
                .map(Vec::as_slice)
                .unwrap_or_default();
            rows.push(LedgerRow {
                category: category.clone(),
                attachments: combined_attachments(
                    invoice.manual_attachment_labels.as_deref(),
                    graph,
                ),
                display_name: invoice.display_name,
                amount,
                notes: invoice.notes.unwrap_or_default(),
                created_at: invoice.created_at,
            });
        }
        sections.push(CategorySection {
            category,
            rows,
            subtotal,
        });
    }
    (sections, grand_total)
}

/// Manual labels first, then graph-resolved names; neither deduplicated.
pub fn combined_attachments(manual: Option<&[String]>, graph: &[String]) -> String {
    manual
        .unwrap_or_default()
        .iter()
        .chain(graph)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(ATTACHMENT_SEPARATOR)
}

pub fn render_csv(sections: &[CategorySection], grand_total: f64) -> Result<Vec<u8>> {
    let mut out = UTF8_BOM.to_vec();
    write_block(&mut out, |writer| writer.write_record(HEADER))?;
    for section in sections {
        write_block(&mut out, |writer| {
            for row in &section.rows {
                writer.write_record([
                    row.category.as_str(),
                    row.display_name.as_str(),
                    format_amount(row.amount).as_str(),
                    row.attachments.as_str(),
                    row.notes.as_str(),
                    row.created_at.as_str(),
                ])?;
            }
            writer.write_record([
                format!("{} subtotal", section.category).as_str(),
                "",
                format_amount(section.subtotal).as_str(),
                "",
                "",
                "",
            ])
        })?;
        // csv has no zero-field record; the separator goes in raw.
        out.extend_from_slice(b"\r\n");
    }
    write_block(&mut out, |writer| {
        writer.write_record(["Total", "", format_amount(grand_total).as_str(), "", "", ""])
    })?;
    Ok(out)
}

fn write_block<F>(out: &mut Vec<u8>, fill: F) -> Result<()>
where
    F: FnOnce(&mut csv::Writer<&mut Vec<u8>>) -> csv::Result<()>,
{
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::CRLF)
        .from_writer(out);
    fill(&mut writer).map_err(io::Error::from)?;
    writer.flush()?;
    Ok(())
}

pub fn format_amount(amount: f64) -> String {
    format!("{amount:.2}")
}

pub fn export_filename(now: DateTime<Local>) -> String {
    format!("invoices_export_{}.csv", now.format("%Y%m%d_%H%M%S"))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::{Local, TimeZone};

    use super::{
        HEADER, build_sections, combined_attachments, export_filename, format_amount, render_csv,
    };
    use crate::model::Invoice;

    fn invoice(id: &str, category: Option<&str>, amount: Option<f64>) -> Invoice {
        Invoice {
            id: id.to_string(),
            stored_key: format!("{id}.pdf"),
            display_name: format!("{id}.pdf"),
            file_type: "pdf".to_string(),
            status: "completed".to_string(),
            category: category.map(ToOwned::to_owned),
            amount,
            manual_attachment_labels: None,
            notes: None,
            created_at: format!("2026-01-01T00:00:0{}Z", id.len()),
            updated_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn sections_sorted_by_label_with_blank_and_missing_coalesced() {
        let invoices = vec![
            invoice("t1", Some("Travel"), Some(100.0)),
            invoice("n1", None, None),
            invoice("m1", Some("Meals"), Some(20.0)),
            invoice("e1", Some("  "), Some(5.0)),
            invoice("t2", Some("Travel"), Some(50.5)),
        ];

        let (sections, total) = build_sections(invoices, &HashMap::new(), "Uncategorized");
        let labels = sections
            .iter()
            .map(|s| s.category.as_str())
            .collect::<Vec<_>>();
        assert_eq!(labels, vec!["Meals", "Travel", "Uncategorized"]);

        let travel = &sections[1];
        let order = travel
            .rows
            .iter()
            .map(|row| row.display_name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(order, vec!["t1.pdf", "t2.pdf"]);
        assert_eq!(format_amount(travel.subtotal), "150.50");

        let uncategorized = &sections[2];
        assert_eq!(uncategorized.rows.len(), 2);
        assert_eq!(uncategorized.rows[0].amount, 0.0);
        assert_eq!(format_amount(uncategorized.subtotal), "5.00");
        assert_eq!(format_amount(total), "175.50");
    }

    #[test]
    fn padded_labels_share_a_section() {
        let invoices = vec![
            invoice("t1", Some("Travel "), Some(1.0)),
            invoice("t2", Some(" Travel"), Some(2.0)),
        ];
        let (sections, _) = build_sections(invoices, &HashMap::new(), "Uncategorized");
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].category, "Travel");
        assert_eq!(sections[0].rows.len(), 2);
    }

    #[test]
    fn blank_separator_follows_each_subtotal_only() {
        let invoices = vec![
            invoice("a1", Some("Office"), Some(1.0)),
            invoice("a2", Some("Office"), Some(2.0)),
        ];
        let (sections, total) = build_sections(invoices, &HashMap::new(), "Uncategorized");
        let bytes = render_csv(&sections, total).expect("render");
        let expected = concat!(
            "\u{feff}Category,Filename,Amount (RMB),Attachments,Notes,Created At\r\n",
            "Office,a1.pdf,1.00,,,2026-01-01T00:00:02Z\r\n",
            "Office,a2.pdf,2.00,,,2026-01-01T00:00:02Z\r\n",
            "Office subtotal,,3.00,,,\r\n",
            "\r\n",
            "Total,,3.00,,,\r\n",
        );
        assert_eq!(String::from_utf8(bytes).expect("utf8"), expected);
    }

    #[test]
    fn combined_attachments_concatenates_manual_then_graph() {
        let manual = vec!["receipt.jpg".to_string()];
        let graph = vec!["boarding_pass.pdf".to_string()];
        assert_eq!(
            combined_attachments(Some(&manual), &graph),
            "receipt.jpg, boarding_pass.pdf"
        );
        assert_eq!(combined_attachments(None, &graph), "boarding_pass.pdf");
        assert_eq!(combined_attachments(None, &[]), "");

        let same = vec!["x.pdf".to_string()];
        assert_eq!(combined_attachments(Some(&same), &same), "x.pdf, x.pdf");
    }

    #[test]
    fn rendered_table_has_bom_header_subtotals_and_total() {
        let invoices = vec![
            invoice("m1", Some("Meals"), Some(20.0)),
            invoice("t1", Some("Travel"), Some(1.25)),
        ];
        let (sections, total) = build_sections(invoices, &HashMap::new(), "Uncategorized");
        let bytes = render_csv(&sections, total).expect("render");

        assert!(bytes.starts_with(b"\xEF\xBB\xBF"));
        let text = String::from_utf8(bytes[3..].to_vec()).expect("utf8");
        let lines = text.split("\r\n").collect::<Vec<_>>();
        assert_eq!(lines[0], HEADER.join(","));
        assert_eq!(lines[1], "Meals,m1.pdf,20.00,,,2026-01-01T00:00:02Z");
        assert_eq!(lines[2], "Meals subtotal,,20.00,,,");
        assert_eq!(lines[3], "");
        assert_eq!(lines[4], "Travel,t1.pdf,1.25,,,2026-01-01T00:00:02Z");
        assert_eq!(lines[5], "Travel subtotal,,1.25,,,");
        assert_eq!(lines[6], "");
        assert_eq!(lines[7], "Total,,21.25,,,");
        assert_eq!(lines[8], "");
        assert_eq!(lines.len(), 9);
    }

    #[test]
    fn fields_with_commas_are_quoted() {
        let mut with_labels = invoice("x", Some("Travel"), Some(1.0));
        with_labels.manual_attachment_labels = Some(vec!["a.jpg".into(), "b.jpg".into()]);
        with_labels.notes = Some("line \"quoted\"".into());
        let (sections, total) = build_sections(vec![with_labels], &HashMap::new(), "U");
        let text = String::from_utf8(render_csv(&sections, total).expect("render")[3..].to_vec())
            .expect("utf8");
        assert!(text.contains(r#"Travel,x.pdf,1.00,"a.jpg, b.jpg","line ""quoted""","#));
    }

    #[test]
    fn filename_is_stamped_with_local_datetime() {
        let now = Local
            .with_ymd_and_hms(2026, 10, 19, 8, 5, 9)
            .single()
            .expect("unambiguous local time");
        assert_eq!(export_filename(now), "invoices_export_20261019_080509.csv");
    }
}
