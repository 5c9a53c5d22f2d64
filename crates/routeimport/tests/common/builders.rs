//! Builders for import rows and the spreadsheets that carry them.

#![allow(dead_code)]

use std::io::{Cursor, Write};

use routeimport::SpecialNeed;

const BASE_COLUMNS: [&str; 9] = [
    "Student ID",
    "Student First Name",
    "Student Last Name",
    "Route ID",
    "Run Index",
    "UGeocode__",
    "Run Freq",
    "Sch Code",
    "Sch Name",
];

/// One data line of an import sheet.
#[derive(Debug, Clone, Default)]
pub struct RowBuilder {
    student_id: String,
    first_name: String,
    last_name: String,
    route_id: String,
    run_index: String,
    geocode: String,
    frequency: String,
    school_code: String,
    school_name: String,
    needs: Vec<SpecialNeed>,
}

impl RowBuilder {
    pub fn new(student_id: &str) -> Self {
        Self {
            student_id: student_id.to_string(),
            ..Default::default()
        }
    }

    pub fn name(mut self, first: &str, last: &str) -> Self {
        self.first_name = first.to_string();
        self.last_name = last.to_string();
        self
    }

    /// Route, run and geocode in one go.
    pub fn run(mut self, route: &str, run: &str, geocode: &str) -> Self {
        self.route_id = route.to_string();
        self.run_index = run.to_string();
        self.geocode = geocode.to_string();
        self
    }

    pub fn frequency(mut self, frequency: &str) -> Self {
        self.frequency = frequency.to_string();
        self
    }

    pub fn school(mut self, code: &str, name: &str) -> Self {
        self.school_code = code.to_string();
        self.school_name = name.to_string();
        self
    }

    pub fn need(mut self, need: SpecialNeed) -> Self {
        self.needs.push(need);
        self
    }

    fn cells(&self) -> Vec<String> {
        let mut cells = vec![
            self.student_id.clone(),
            self.first_name.clone(),
            self.last_name.clone(),
            self.route_id.clone(),
            self.run_index.clone(),
            self.geocode.clone(),
            self.frequency.clone(),
            self.school_code.clone(),
            self.school_name.clone(),
        ];
        for need in SpecialNeed::ALL {
            let flag = if self.needs.contains(&need) { "TRUE" } else { "FALSE" };
            cells.push(flag.to_string());
        }
        cells
    }
}

fn header() -> Vec<String> {
    BASE_COLUMNS
        .iter()
        .map(|c| c.to_string())
        .chain(SpecialNeed::ALL.iter().map(|n| n.column().to_uppercase()))
        .collect()
}

fn quote(cell: &str) -> String {
    if cell.contains(',') || cell.contains('"') {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

/// A CSV sheet with the full header and one line per row.
pub fn csv(rows: &[RowBuilder]) -> Vec<u8> {
    let mut out = String::new();
    for line in std::iter::once(header()).chain(rows.iter().map(RowBuilder::cells)) {
        let cells: Vec<String> = line.iter().map(|c| quote(c)).collect();
        out.push_str(&cells.join(","));
        out.push('\n');
    }
    out.into_bytes()
}

fn escape_xml(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// A minimal single-sheet workbook using inline strings.
pub fn xlsx(rows: &[RowBuilder]) -> Vec<u8> {
    let mut sheet = String::from("<worksheet><sheetData>");
    for (i, line) in std::iter::once(header())
        .chain(rows.iter().map(RowBuilder::cells))
        .enumerate()
    {
        sheet.push_str(&format!("<row r=\"{}\">", i + 1));
        for cell in line {
            sheet.push_str(&format!(
                "<c t=\"inlineStr\"><is><t>{}</t></is></c>",
                escape_xml(&cell)
            ));
        }
        sheet.push_str("</row>");
    }
    sheet.push_str("</sheetData></worksheet>");

    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .start_file(
            "xl/worksheets/sheet1.xml",
            zip::write::SimpleFileOptions::default(),
        )
        .unwrap();
    writer.write_all(sheet.as_bytes()).unwrap();
    writer.finish().unwrap().into_inner()
}
