use crate::error::{InvoiceError, Result};

pub const DEFAULT_ALLOWED_EXTENSIONS: [&str; 7] = ["pdf", "png", "jpg", "jpeg", "gif", "bmp", "webp"];
pub const DEFAULT_MAX_FILE_SIZE: u64 = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPolicy {
    pub allowed_extensions: Vec<String>,
    pub max_file_size: u64,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

/// An upload that passed the policy checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedUpload {
    pub display_name: String,
    pub file_type: String,
}

impl UploadPolicy {
    pub fn check(&self, filename: &str, size: u64) -> Result<AcceptedUpload> {
        let display_name = sanitize_display_name(filename);
        if display_name.is_empty() {
            return Err(InvoiceError::validation("no file selected"));
        }

        let file_type = display_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.trim().to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .ok_or_else(|| InvoiceError::validation("file type not allowed"))?;
        if !self.allowed_extensions.iter().any(|ext| *ext == file_type) {
            return Err(InvoiceError::validation(format!(
                "file type `{file_type}` not allowed"
            )));
        }

        if size > self.max_file_size {
            return Err(InvoiceError::validation(format!(
                "file is {size} bytes; the limit is {} bytes",
                self.max_file_size
            )));
        }

        Ok(AcceptedUpload {
            display_name,
            file_type,
        })
    }
}

/// Final path component of a client-supplied name, without control
/// characters or surrounding whitespace. Non-ASCII names are kept.
pub fn sanitize_display_name(raw: &str) -> String {
    let last = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned = last
        .chars()
        .filter(|ch| !ch.is_control())
        .collect::<String>();
    let trimmed = cleaned.trim();
    if trimmed == "." || trimmed == ".." {
        String::new()
    } else {
        trimmed.to_string()
    }
}
