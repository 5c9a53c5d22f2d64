use std::path::Path;

use crate::config::Config;
use crate::error::UploadError;
use crate::spreadsheet::SpreadsheetFormat;

/// What an upload may contain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPolicy {
    pub allowed_extensions: Vec<String>,
    pub max_upload_bytes: u64,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl UploadPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            allowed_extensions: config.allowed_extensions.clone(),
            max_upload_bytes: config.max_upload_bytes,
        }
    }

    /// Checks one file by name and size.
    pub fn check(&self, name: &str, size: u64) -> Result<SpreadsheetFormat, UploadError> {
        let extension = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();

        let format = SpreadsheetFormat::from_extension(&extension)
            .filter(|_| self.allowed_extensions.iter().any(|a| *a == extension))
            .ok_or_else(|| UploadError::UnsupportedType {
                name: name.to_string(),
                allowed: self.allowed_extensions.join(", "),
            })?;

        if size == 0 {
            return Err(UploadError::Empty(name.to_string()));
        }
        if size > self.max_upload_bytes {
            return Err(UploadError::TooLarge {
                name: name.to_string(),
                size,
                limit: self.max_upload_bytes,
            });
        }

        Ok(format)
    }
}

/// MIME type recorded on the file row.
pub fn mime_type_for(name: &str) -> Option<String> {
    mime_guess::from_path(name).first_raw().map(str::to_string)
}
