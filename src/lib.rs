pub mod config;
pub mod db;
pub mod desk;
pub mod error;
pub mod export;
pub mod model;
pub mod store;
pub mod telemetry;
pub mod upload;

pub use db::Database;
pub use desk::InvoiceDesk;
pub use error::{ErrorKind, InvoiceError};
pub use model::{AttachmentEdge, AttachmentView, Invoice, InvoicePatch, NewInvoice};
