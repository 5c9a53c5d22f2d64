//! Spreadsheet ingestion: turns an uploaded CSV or XLSX file into typed
//! student route rows.

pub mod delimited;
pub mod record;
pub mod xlsx;

use std::io::{Read, Seek};
use std::path::Path;

use crate::error::SpreadsheetError;

pub use record::{normalize_header, RawRecord, StudentRouteRow};

/// Readable, seekable byte source (XLSX needs random access into the zip).
pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpreadsheetFormat {
    Csv,
    Xlsx,
}

impl SpreadsheetFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "csv" => Some(Self::Csv),
            "xlsx" => Some(Self::Xlsx),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Xlsx => "xlsx",
        }
    }
}

/// The cell grid of one sheet: the header row and the non-blank data rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SheetTable {
    /// Normalized header names.
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl SheetTable {
    /// Builds a table from raw lines; the first non-blank line is the header.
    pub fn from_lines<I>(lines: I) -> Result<Self, SpreadsheetError>
    where
        I: IntoIterator<Item = Vec<String>>,
    {
        let mut lines = lines
            .into_iter()
            .filter(|line| line.iter().any(|cell| !cell.trim().is_empty()));

        let headers = lines
            .next()
            .ok_or(SpreadsheetError::MissingHeader)?
            .iter()
            .map(|h| normalize_header(h))
            .collect();

        Ok(Self {
            headers,
            rows: lines.collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Consumes the table into raw field-name/value records, in sheet order.
    pub fn into_records(self) -> impl Iterator<Item = RawRecord> {
        let headers = self.headers;
        self.rows
            .into_iter()
            .map(move |values| RawRecord::zip(&headers, values))
    }

    /// Consumes the table into typed rows, in sheet order.
    pub fn into_rows(self) -> impl Iterator<Item = StudentRouteRow> {
        self.into_records().map(|raw| StudentRouteRow::from_raw(&raw))
    }
}

pub trait SheetReader: Send + Sync {
    fn read(&self, source: &mut dyn ReadSeek) -> Result<SheetTable, SpreadsheetError>;
    fn supports(&self, format: SpreadsheetFormat) -> bool;
}

pub struct ReaderRegistry {
    readers: Vec<Box<dyn SheetReader>>,
}

impl ReaderRegistry {
    pub fn new() -> Self {
        Self {
            readers: vec![
                Box::new(delimited::CsvReader::new()),
                Box::new(xlsx::XlsxReader::new()),
            ],
        }
    }

    pub fn read(
        &self,
        format: SpreadsheetFormat,
        source: &mut dyn ReadSeek,
    ) -> Result<SheetTable, SpreadsheetError> {
        for reader in &self.readers {
            if reader.supports(format) {
                return reader.read(source);
            }
        }

        Err(SpreadsheetError::UnsupportedFormat(
            format.extension().to_string(),
        ))
    }

    /// Reads a file from disk, choosing the reader by extension.
    pub fn read_path(&self, path: &Path) -> Result<SheetTable, SpreadsheetError> {
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let format = SpreadsheetFormat::from_extension(extension)
            .ok_or_else(|| SpreadsheetError::UnsupportedFormat(extension.to_string()))?;

        let mut file = std::fs::File::open(path).map_err(|e| SpreadsheetError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        self.read(format, &mut file)
    }
}

impl Default for ReaderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
