use crate::error::SpreadsheetError;
use crate::spreadsheet::{ReadSeek, SheetReader, SheetTable, SpreadsheetFormat};

/// Comma-separated reader. Lines may have fewer (or more) cells than the
/// header; the record zip handles the difference.
pub struct CsvReader;

impl CsvReader {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CsvReader {
    fn default() -> Self {
        Self::new()
    }
}

impl SheetReader for CsvReader {
    fn read(&self, source: &mut dyn ReadSeek) -> Result<SheetTable, SpreadsheetError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(source);

        let mut lines = Vec::new();
        for record in reader.records() {
            let record = record?;
            lines.push(record.iter().map(|cell| cell.to_string()).collect());
        }

        SheetTable::from_lines(lines)
    }

    fn supports(&self, format: SpreadsheetFormat) -> bool {
        matches!(format, SpreadsheetFormat::Csv)
    }
}
