use std::collections::{BTreeSet, HashMap};

use rusqlite::params;
use tracing::info;
use uuid::Uuid;

use crate::db::invoices::{INVOICE_COLUMNS, invoice_exists_on, invoice_from_row};
use crate::db::{Database, now_timestamp};
use crate::error::{EdgeSide, InvoiceError, Result};
use crate::model::{AttachmentEdge, AttachmentView, Invoice};

impl Database {
    pub fn add_attachment(&self, invoice_id: &str, attachment_id: &str) -> Result<AttachmentEdge> {
        if invoice_id == attachment_id {
            return Err(InvoiceError::SelfReference {
                id: invoice_id.to_string(),
            });
        }
        if attachment_id.trim().is_empty() {
            return Err(InvoiceError::validation("attachment_id is required"));
        }

        let tx = self.conn.unchecked_transaction()?;
        if !invoice_exists_on(&tx, invoice_id)? {
            return Err(InvoiceError::EndpointNotFound {
                side: EdgeSide::Owner,
                id: invoice_id.to_string(),
            });
        }
        if !invoice_exists_on(&tx, attachment_id)? {
            return Err(InvoiceError::EndpointNotFound {
                side: EdgeSide::Attachment,
                id: attachment_id.to_string(),
            });
        }
        let existing: i64 = tx.query_row(
            "SELECT COUNT(*) FROM attachment_edges WHERE invoice_id = ?1 AND attachment_id = ?2",
            params![invoice_id, attachment_id],
            |row| row.get(0),
        )?;
        if existing > 0 {
            return Err(InvoiceError::DuplicateAttachment {
                invoice_id: invoice_id.to_string(),
                attachment_id: attachment_id.to_string(),
            });
        }

        let edge = AttachmentEdge {
            id: Uuid::new_v4().to_string(),
            invoice_id: invoice_id.to_string(),
            attachment_id: attachment_id.to_string(),
            created_at: now_timestamp(),
        };
        tx.execute(
            "INSERT INTO attachment_edges (id, invoice_id, attachment_id, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![edge.id, edge.invoice_id, edge.attachment_id, edge.created_at],
        )?;
        tx.commit()?;

        info!(invoice_id, attachment_id, "attachment added");
        Ok(edge)
    }

    pub fn remove_attachment(&self, invoice_id: &str, attachment_id: &str) -> Result<()> {
        let removed = self.conn.execute(
            "DELETE FROM attachment_edges WHERE invoice_id = ?1 AND attachment_id = ?2",
            params![invoice_id, attachment_id],
        )?;
        if removed == 0 {
            return Err(InvoiceError::EdgeNotFound {
                invoice_id: invoice_id.to_string(),
                attachment_id: attachment_id.to_string(),
            });
        }
        info!(invoice_id, attachment_id, "attachment removed");
        Ok(())
    }

    /// Invoices that `invoice_id` references, most recent edge first.
    pub fn outgoing_attachments(&self, invoice_id: &str) -> Result<Vec<Invoice>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {INVOICE_COLUMNS}
             FROM attachment_edges e
             JOIN invoices i ON i.id = e.attachment_id
             WHERE e.invoice_id = ?1
             ORDER BY e.created_at DESC, e.rowid DESC"
        ))?;
        let rows = stmt.query_map(params![invoice_id], invoice_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Invoices that reference `invoice_id`, most recent edge first.
    pub fn incoming_attachments(&self, invoice_id: &str) -> Result<Vec<Invoice>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {INVOICE_COLUMNS}
             FROM attachment_edges e
             JOIN invoices i ON i.id = e.invoice_id
             WHERE e.attachment_id = ?1
             ORDER BY e.created_at DESC, e.rowid DESC"
        ))?;
        let rows = stmt.query_map(params![invoice_id], invoice_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn attachment_view(&self, invoice_id: &str) -> Result<AttachmentView> {
        Ok(AttachmentView {
            attachments: self.outgoing_attachments(invoice_id)?,
            attached_to: self.incoming_attachments(invoice_id)?,
        })
    }

    pub fn all_attachment_targets(&self) -> Result<BTreeSet<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT attachment_id FROM attachment_edges")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<rusqlite::Result<BTreeSet<_>>>()?)
    }

    /// Display names of each id's outgoing attachments, in the order the
    /// edges were created. One statement regardless of how many ids.
    pub fn attachment_names_for(&self, invoice_ids: &[String]) -> Result<HashMap<String, Vec<String>>> {
        let mut out: HashMap<String, Vec<String>> = HashMap::new();
        if invoice_ids.is_empty() {
            return Ok(out);
        }

        let ids_json = serde_json::to_string(invoice_ids)
            .map_err(|err| InvoiceError::validation(err.to_string()))?;
        let mut stmt = self.conn.prepare(
            "SELECT e.invoice_id, i.display_name
             FROM attachment_edges e
             JOIN invoices i ON i.id = e.attachment_id
             WHERE e.invoice_id IN (SELECT value FROM json_each(?1))
             ORDER BY e.created_at ASC, e.rowid ASC",
        )?;
        let mut rows = stmt.query(params![ids_json])?;
        while let Some(row) = rows.next()? {
            let owner: String = row.get(0)?;
            let name: String = row.get(1)?;
            out.entry(owner).or_default().push(name);
        }
        Ok(out)
    }
}
