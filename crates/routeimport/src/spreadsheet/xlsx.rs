use std::io::{Read, Seek};

use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::{BytesRef, BytesStart, Event};
use quick_xml::Reader;

use crate::error::SpreadsheetError;
use crate::spreadsheet::{ReadSeek, SheetReader, SheetTable, SpreadsheetFormat};

const SHARED_STRINGS: &str = "xl/sharedStrings.xml";
const FIRST_SHEET: &str = "xl/worksheets/sheet1.xml";

/// Office Open XML workbook reader. Reads the first worksheet only.
pub struct XlsxReader;

impl XlsxReader {
    pub fn new() -> Self {
        Self
    }
}

impl Default for XlsxReader {
    fn default() -> Self {
        Self::new()
    }
}

impl SheetReader for XlsxReader {
    fn read(&self, source: &mut dyn ReadSeek) -> Result<SheetTable, SpreadsheetError> {
        let mut archive = zip::ZipArchive::new(source)
            .map_err(|e| SpreadsheetError::Xlsx(format!("Failed to open workbook: {}", e)))?;

        let shared = match read_entry(&mut archive, SHARED_STRINGS)? {
            Some(xml) => parse_shared_strings(&xml)?,
            None => Vec::new(),
        };

        let sheet_name = first_sheet_name(&archive)
            .ok_or_else(|| SpreadsheetError::Xlsx("Workbook has no worksheets".to_string()))?;
        let sheet_xml = read_entry(&mut archive, &sheet_name)?.ok_or_else(|| {
            SpreadsheetError::Xlsx(format!("Failed to find {}", sheet_name))
        })?;

        SheetTable::from_lines(parse_sheet(&sheet_xml, &shared)?)
    }

    fn supports(&self, format: SpreadsheetFormat) -> bool {
        matches!(format, SpreadsheetFormat::Xlsx)
    }
}

fn first_sheet_name<R: Read + Seek>(archive: &zip::ZipArchive<R>) -> Option<String> {
    let mut sheets: Vec<&str> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/") && n.ends_with(".xml"))
        .collect();
    if sheets.contains(&FIRST_SHEET) {
        return Some(FIRST_SHEET.to_string());
    }
    sheets.sort_unstable();
    sheets.first().map(|s| s.to_string())
}

fn read_entry<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
    name: &str,
) -> Result<Option<String>, SpreadsheetError> {
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => {
            return Err(SpreadsheetError::Xlsx(format!(
                "Failed to open {}: {}",
                name, e
            )))
        }
    };

    let mut xml = String::new();
    entry
        .read_to_string(&mut xml)
        .map_err(|e| SpreadsheetError::Xlsx(format!("Failed to read {}: {}", name, e)))?;
    Ok(Some(xml))
}

fn xml_error(e: quick_xml::Error) -> SpreadsheetError {
    SpreadsheetError::Xlsx(format!("XML parsing error: {}", e))
}

/// Text of an entity reference such as `&amp;` or `&#233;`. Unknown
/// entities resolve to nothing.
fn entity_text(e: &BytesRef<'_>) -> String {
    if let Ok(Some(c)) = e.resolve_char_ref() {
        return c.to_string();
    }
    e.decode()
        .ok()
        .and_then(|name| resolve_predefined_entity(&name))
        .unwrap_or_default()
        .to_string()
}

/// Parses `sharedStrings.xml` into the string table, one entry per `<si>`.
/// Rich-text runs are concatenated; phonetic hints (`<rPh>`) are skipped.
fn parse_shared_strings(xml: &str) -> Result<Vec<String>, SpreadsheetError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_item = false;
    let mut in_text = false;
    let mut in_phonetic = false;

    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(ref e) => match e.local_name().as_ref() {
                b"si" => {
                    in_item = true;
                    current.clear();
                }
                b"t" => in_text = true,
                b"rPh" => in_phonetic = true,
                _ => {}
            },
            Event::End(ref e) => match e.local_name().as_ref() {
                b"si" => {
                    in_item = false;
                    strings.push(std::mem::take(&mut current));
                }
                b"t" => in_text = false,
                b"rPh" => in_phonetic = false,
                _ => {}
            },
            Event::Empty(ref e) if e.local_name().as_ref() == b"si" => {
                strings.push(String::new());
            }
            Event::Text(e) => {
                if in_item && in_text && !in_phonetic {
                    current.push_str(&e.decode().unwrap_or_default());
                }
            }
            Event::GeneralRef(e) => {
                if in_item && in_text && !in_phonetic {
                    current.push_str(&entity_text(&e));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(strings)
}

#[derive(Default)]
struct PendingCell {
    column: usize,
    kind: Option<String>,
    value: String,
}

/// Converts a cell reference such as `C12` or `AB3` into a zero-based column.
fn column_index(reference: &str) -> Option<usize> {
    let letters: Vec<u8> = reference
        .bytes()
        .take_while(|b| b.is_ascii_alphabetic())
        .collect();
    if letters.is_empty() {
        return None;
    }
    let mut index = 0usize;
    for b in letters {
        index = index * 26 + (b.to_ascii_uppercase() - b'A' + 1) as usize;
    }
    Some(index - 1)
}

fn attribute(e: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == name)
        .map(|a| String::from_utf8_lossy(&a.value).into_owned())
}

fn resolve_cell(cell: &PendingCell, shared: &[String]) -> Result<String, SpreadsheetError> {
    let value = match cell.kind.as_deref() {
        Some("s") => {
            let index: usize = cell.value.trim().parse().map_err(|_| {
                SpreadsheetError::Xlsx(format!("Invalid shared string index '{}'", cell.value))
            })?;
            shared.get(index).cloned().ok_or_else(|| {
                SpreadsheetError::Xlsx(format!("Shared string {} out of range", index))
            })?
        }
        // Excel booleans are stored as 1/0; present them the way a CSV export would.
        Some("b") => {
            if cell.value.trim() == "1" {
                "TRUE".to_string()
            } else {
                "FALSE".to_string()
            }
        }
        _ => cell.value.clone(),
    };
    Ok(value)
}

/// Parses a worksheet into lines of cells. Missing cells inside a line are
/// filled with empty strings so values keep their column position.
fn parse_sheet(xml: &str, shared: &[String]) -> Result<Vec<Vec<String>>, SpreadsheetError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut lines: Vec<Vec<String>> = Vec::new();
    let mut line: Option<Vec<String>> = None;
    let mut cell: Option<PendingCell> = None;
    let mut in_value = false;

    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(ref e) => match e.local_name().as_ref() {
                b"row" => line = Some(Vec::new()),
                b"c" => {
                    let next_column = line.as_ref().map(|l| l.len()).unwrap_or(0);
                    let column = attribute(e, b"r")
                        .and_then(|r| column_index(&r))
                        .unwrap_or(next_column);
                    cell = Some(PendingCell {
                        column,
                        kind: attribute(e, b"t"),
                        value: String::new(),
                    });
                }
                b"v" | b"t" => in_value = cell.is_some(),
                _ => {}
            },
            Event::Empty(ref e) if e.local_name().as_ref() == b"row" => {
                lines.push(Vec::new());
            }
            Event::Text(e) => {
                if in_value {
                    if let Some(cell) = cell.as_mut() {
                        cell.value.push_str(&e.decode().unwrap_or_default());
                    }
                }
            }
            Event::GeneralRef(e) => {
                if in_value {
                    if let Some(cell) = cell.as_mut() {
                        cell.value.push_str(&entity_text(&e));
                    }
                }
            }
            Event::End(ref e) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    if let (Some(done), Some(current)) = (cell.take(), line.as_mut()) {
                        let value = resolve_cell(&done, shared)?;
                        if current.len() <= done.column {
                            current.resize(done.column + 1, String::new());
                        }
                        current[done.column] = value;
                    }
                }
                b"row" => {
                    if let Some(done) = line.take() {
                        lines.push(done);
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(lines)
}
