use chrono::Local;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::db::Database;
use crate::error::{InvoiceError, Result};
use crate::export::{ExportOptions, ExportReport, export_completed};
use crate::model::{AttachmentView, Invoice, NewInvoice};
use crate::store::BlobStore;

/// Invoice row plus whether some other invoice lists it as an attachment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvoiceListing {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub is_attachment: bool,
}

/// Composes the database and the blob store for operations that touch both.
pub struct InvoiceDesk<S> {
    db: Database,
    blobs: S,
}

impl<S: BlobStore> InvoiceDesk<S> {
    pub fn new(db: Database, blobs: S) -> Self {
        Self { db, blobs }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn blobs(&self) -> &S {
        &self.blobs
    }

    pub fn close(self) -> Result<()> {
        self.db.close()
    }

    /// Saves the content under a fresh key, then records the invoice. A
    /// crash between the two leaves an unreferenced blob behind.
    pub fn upload(&self, display_name: &str, file_type: &str, bytes: &[u8]) -> Result<Invoice> {
        let stored_key = format!("{}.{file_type}", Uuid::new_v4());
        self.blobs.save(&stored_key, bytes)?;
        self.db.create_invoice(&NewInvoice {
            stored_key,
            display_name: display_name.to_string(),
            file_type: file_type.to_string(),
        })
    }

    pub fn delete(&self, id: &str) -> Result<Invoice> {
        let invoice = self.db.get_invoice(id)?;
        self.blobs.delete(&invoice.stored_key)?;
        self.db.delete_invoice(id)
    }

    pub fn read_file(&self, id: &str) -> Result<(Invoice, Vec<u8>)> {
        let invoice = self.db.get_invoice(id)?;
        let bytes = self
            .blobs
            .read(&invoice.stored_key)?
            .ok_or_else(|| InvoiceError::BlobNotFound { id: id.to_string() })?;
        Ok((invoice, bytes))
    }

    pub fn list_with_flags(&self, status: Option<&str>) -> Result<Vec<InvoiceListing>> {
        let targets = self.db.all_attachment_targets()?;
        Ok(self
            .db
            .list_invoices(status)?
            .into_iter()
            .map(|invoice| InvoiceListing {
                is_attachment: targets.contains(&invoice.id),
                invoice,
            })
            .collect())
    }

    pub fn attachment_view(&self, id: &str) -> Result<AttachmentView> {
        self.db.attachment_view(id)
    }

    pub fn export(&self, options: &ExportOptions) -> Result<ExportReport> {
        let report = export_completed(&self.db, options, Local::now())?;
        info!(filename = %report.filename, bytes = report.bytes.len(), "export ready");
        Ok(report)
    }
}
