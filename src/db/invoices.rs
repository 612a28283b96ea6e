use rusqlite::{Connection, OptionalExtension, Row, params};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::{Database, now_timestamp};
use crate::error::{InvoiceError, Result};
use crate::model::{Invoice, InvoicePatch, NewInvoice, STATUS_COMPLETED, STATUS_PENDING};

pub(crate) const INVOICE_COLUMNS: &str = "i.id, i.stored_key, i.display_name, i.file_type, \
     i.status, i.category, i.amount, i.manual_attachment_labels, i.notes, i.created_at, \
     i.updated_at";

impl Database {
    pub fn create_invoice(&self, new: &NewInvoice) -> Result<Invoice> {
        let id = Uuid::new_v4().to_string();
        let now = now_timestamp();
        self.conn.execute(
            "INSERT INTO invoices (
                id, stored_key, display_name, file_type, status, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                id,
                new.stored_key,
                new.display_name,
                new.file_type,
                STATUS_PENDING,
                now
            ],
        )?;
        info!(invoice_id = %id, stored_key = %new.stored_key, "invoice created");

        Ok(Invoice {
            id,
            stored_key: new.stored_key.clone(),
            display_name: new.display_name.clone(),
            file_type: new.file_type.clone(),
            status: STATUS_PENDING.to_string(),
            category: None,
            amount: None,
            manual_attachment_labels: None,
            notes: None,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    pub fn get_invoice(&self, id: &str) -> Result<Invoice> {
        self.find_invoice(id)?
            .ok_or_else(|| InvoiceError::InvoiceNotFound { id: id.to_string() })
    }

    pub fn find_invoice(&self, id: &str) -> Result<Option<Invoice>> {
        Ok(find_invoice_on(&self.conn, id)?)
    }

    pub fn list_invoices(&self, status: Option<&str>) -> Result<Vec<Invoice>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {INVOICE_COLUMNS}
             FROM invoices i
             WHERE ?1 IS NULL OR i.status = ?1
             ORDER BY i.created_at DESC, i.rowid DESC"
        ))?;
        let rows = stmt.query_map(params![status], invoice_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn completed_invoices(&self) -> Result<Vec<Invoice>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {INVOICE_COLUMNS}
             FROM invoices i
             WHERE i.status = ?1
             ORDER BY i.created_at ASC, i.rowid ASC"
        ))?;
        let rows = stmt.query_map(params![STATUS_COMPLETED], invoice_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn update_invoice(&self, id: &str, patch: &InvoicePatch) -> Result<Invoice> {
        patch.validate()?;
        let labels = match patch.labels_for_storage() {
            Some(Some(labels)) => Some(Some(
                serde_json::to_string(labels)
                    .map_err(|err| InvoiceError::validation(err.to_string()))?,
            )),
            Some(None) => Some(None),
            None => None,
        };

        if patch.is_empty() {
            debug!(invoice_id = %id, "empty patch only refreshes updated_at");
        }

        let tx = self.conn.unchecked_transaction()?;
        let changed = tx.execute(
            "UPDATE invoices SET
                category = CASE WHEN ?2 THEN ?3 ELSE category END,
                amount = CASE WHEN ?4 THEN ?5 ELSE amount END,
                manual_attachment_labels = CASE WHEN ?6 THEN ?7 ELSE manual_attachment_labels END,
                notes = CASE WHEN ?8 THEN ?9 ELSE notes END,
                status = COALESCE(?10, status),
                updated_at = MAX(updated_at, ?11)
             WHERE id = ?1",
            params![
                id,
                patch.category.is_some(),
                patch.category.clone().flatten(),
                patch.amount.is_some(),
                patch.amount.flatten(),
                labels.is_some(),
                labels.flatten(),
                patch.notes.is_some(),
                patch.notes.clone().flatten(),
                patch.status,
                now_timestamp(),
            ],
        )?;
        if changed == 0 {
            return Err(InvoiceError::InvoiceNotFound { id: id.to_string() });
        }
        let updated = find_invoice_on(&tx, id)?
            .ok_or_else(|| InvoiceError::InvoiceNotFound { id: id.to_string() })?;
        tx.commit()?;

        info!(invoice_id = %id, status = %updated.status, "invoice updated");
        Ok(updated)
    }

    pub fn delete_invoice(&self, id: &str) -> Result<Invoice> {
        let tx = self.conn.unchecked_transaction()?;
        let invoice = find_invoice_on(&tx, id)?
            .ok_or_else(|| InvoiceError::InvoiceNotFound { id: id.to_string() })?;
        let edges = tx.execute(
            "DELETE FROM attachment_edges WHERE invoice_id = ?1 OR attachment_id = ?1",
            params![id],
        )?;
        tx.execute("DELETE FROM invoices WHERE id = ?1", params![id])?;
        tx.commit()?;

        info!(invoice_id = %id, removed_edges = edges, "invoice deleted");
        Ok(invoice)
    }
}

pub(crate) fn find_invoice_on(conn: &Connection, id: &str) -> rusqlite::Result<Option<Invoice>> {
    conn.query_row(
        &format!("SELECT {INVOICE_COLUMNS} FROM invoices i WHERE i.id = ?1"),
        params![id],
        invoice_from_row,
    )
    .optional()
}

pub(crate) fn invoice_exists_on(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM invoices WHERE id = ?1",
        params![id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub(crate) fn invoice_from_row(row: &Row<'_>) -> rusqlite::Result<Invoice> {
    let labels: Option<String> = row.get(7)?;
    Ok(Invoice {
        id: row.get(0)?,
        stored_key: row.get(1)?,
        display_name: row.get(2)?,
        file_type: row.get(3)?,
        status: row.get(4)?,
        category: row.get(5)?,
        amount: row.get(6)?,
        manual_attachment_labels: labels.as_deref().and_then(decode_labels),
        notes: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

// Labels are a JSON string array. Older rows may hold other JSON or plain
// text; those are kept as a single label.
fn decode_labels(raw: &str) -> Option<Vec<String>> {
    if raw.is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Null) => None,
        Ok(Value::Array(items)) => Some(
            items
                .into_iter()
                .map(|item| match item {
                    Value::String(text) => text,
                    other => other.to_string(),
                })
                .collect(),
        ),
        Ok(Value::String(text)) => Some(vec![text]),
        Ok(other) => Some(vec![other.to_string()]),
        Err(_) => Some(vec![raw.to_string()]),
    }
}
