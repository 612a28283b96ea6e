use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{InvoiceError, Result};

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_COMPLETED: &str = "completed";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Invoice {
    pub id: String,
    pub stored_key: String,
    pub display_name: String,
    pub file_type: String,
    pub status: String,
    pub category: Option<String>,
    pub amount: Option<f64>,
    pub manual_attachment_labels: Option<Vec<String>>,
    pub notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewInvoice {
    pub stored_key: String,
    pub display_name: String,
    pub file_type: String,
}

/// Field set for a partial update.
///
/// The outer `Option` records presence in the request body; the inner one is
/// the value, where `None` clears the column. `status` cannot be cleared.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct InvoicePatch {
    #[serde(default, deserialize_with = "present")]
    pub category: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub amount: Option<Option<f64>>,
    #[serde(default, alias = "attachments", deserialize_with = "present")]
    pub manual_attachment_labels: Option<Option<Vec<String>>>,
    #[serde(default, deserialize_with = "present")]
    pub notes: Option<Option<String>>,
    #[serde(default)]
    pub status: Option<String>,
}

fn present<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl InvoicePatch {
    pub fn from_json(body: &str) -> Result<Self> {
        let invalid = |err: serde_json::Error| {
            InvoiceError::validation(format!("invalid update body: {err}"))
        };
        let value: serde_json::Value = serde_json::from_str(body).map_err(invalid)?;
        if !value.is_object() {
            return Err(InvoiceError::validation(
                "invalid update body: expected a JSON object",
            ));
        }
        let patch: Self = serde_json::from_value(value).map_err(invalid)?;
        patch.validate()?;
        Ok(patch)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(Some(amount)) = self.amount {
            if !amount.is_finite() {
                return Err(InvoiceError::validation("amount must be a finite number"));
            }
        }
        if let Some(status) = &self.status {
            if status.trim().is_empty() {
                return Err(InvoiceError::validation("status must not be empty"));
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.category.is_none()
            && self.amount.is_none()
            && self.manual_attachment_labels.is_none()
            && self.notes.is_none()
            && self.status.is_none()
    }

    /// Labels as they should be stored: an empty list clears the column.
    pub(crate) fn labels_for_storage(&self) -> Option<Option<&[String]>> {
        self.manual_attachment_labels.as_ref().map(|labels| {
            labels
                .as_deref()
                .filter(|labels| !labels.is_empty())
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttachmentEdge {
    pub id: String,
    pub invoice_id: String,
    pub attachment_id: String,
    pub created_at: String,
}

/// Both directions of the attachment graph around one invoice.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttachmentView {
    pub attachments: Vec<Invoice>,
    pub attached_to: Vec<Invoice>,
}
