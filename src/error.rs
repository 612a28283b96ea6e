use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeSide {
    Owner,
    Attachment,
}

impl fmt::Display for EdgeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Owner => f.write_str("owner"),
            Self::Attachment => f.write_str("attachment"),
        }
    }
}

/// Failure classes surfaced to the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Validation,
    Conflict,
    NothingToExport,
    StorageFailure,
}

#[derive(Debug, thiserror::Error)]
pub enum InvoiceError {
    #[error("invoice `{id}` not found")]
    InvoiceNotFound { id: String },

    #[error("{side} invoice `{id}` not found")]
    EndpointNotFound { side: EdgeSide, id: String },

    #[error("attachment edge `{invoice_id}` -> `{attachment_id}` not found")]
    EdgeNotFound {
        invoice_id: String,
        attachment_id: String,
    },

    #[error("file for invoice `{id}` not found")]
    BlobNotFound { id: String },

    #[error("{0}")]
    Validation(String),

    #[error("invoice `{id}` cannot be attached to itself")]
    SelfReference { id: String },

    #[error("invoice `{attachment_id}` is already attached to `{invoice_id}`")]
    DuplicateAttachment {
        invoice_id: String,
        attachment_id: String,
    },

    #[error("no completed invoices to export")]
    NothingToExport,

    #[error("blob storage failure: {0}")]
    Storage(#[from] std::io::Error),

    #[error("database failure: {0}")]
    Database(#[from] rusqlite::Error),
}

impl InvoiceError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvoiceNotFound { .. }
            | Self::EndpointNotFound { .. }
            | Self::EdgeNotFound { .. }
            | Self::BlobNotFound { .. } => ErrorKind::NotFound,
            Self::Validation(_) | Self::SelfReference { .. } => ErrorKind::Validation,
            Self::DuplicateAttachment { .. } => ErrorKind::Conflict,
            Self::NothingToExport => ErrorKind::NothingToExport,
            Self::Storage(_) | Self::Database(_) => ErrorKind::StorageFailure,
        }
    }
}

pub type Result<T, E = InvoiceError> = std::result::Result<T, E>;
