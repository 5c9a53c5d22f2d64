//! Header-to-field mapping for student route rows.

use serde::{Deserialize, Serialize};

use crate::special_needs::{coerce_flag, SpecialNeed, SpecialNeedFlags};

/// One data line of a sheet, zipped positionally against the header row.
///
/// A value is `None` when the line was shorter than the header.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    fields: Vec<(String, Option<String>)>,
}

impl RawRecord {
    pub fn zip(headers: &[String], values: Vec<String>) -> Self {
        let mut values = values.into_iter();
        let fields = headers
            .iter()
            .map(|name| (name.clone(), values.next()))
            .collect();
        Self { fields }
    }

    /// Value of the first field with this (normalized) name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .and_then(|(_, value)| value.as_deref())
    }

    pub fn fields(&self) -> &[(String, Option<String>)] {
        &self.fields
    }
}

/// Normalizes a header cell the way column names are matched.
///
/// Lowercases, collapses every run of non-alphanumeric characters into a
/// single `_` and strips leading/trailing separators, so "Route ID",
/// "route-id" and " ROUTE__ID " all become `route_id`.
pub fn normalize_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_sep = false;
    for c in raw.trim_start_matches('\u{feff}').chars() {
        if c.is_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.extend(c.to_lowercase());
        } else {
            pending_sep = true;
        }
    }
    out
}

/// A typed student route row as imported from a spreadsheet line.
///
/// Text fields are trimmed and default to empty; flags default to `false`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentRouteRow {
    pub student_id: String,
    pub student_last_name: String,
    pub student_first_name: String,
    pub student_dob: String,
    pub student_grade: String,
    /// School the student is enrolled at.
    pub cur_school_code: String,
    /// School of the trip assignment; may differ from `cur_school_code`.
    pub sch_code: String,
    pub sch_name: String,
    pub route_id: String,
    pub route_description: String,
    pub run_index: String,
    pub run_description: String,
    pub run_freq: String,
    pub stop_id: String,
    pub stop_description: String,
    pub stop_time: String,
    pub ugeocode: String,
    pub address: String,
    pub city: String,
    pub zip_code: String,
    pub special_needs: SpecialNeedFlags,
}

impl StudentRouteRow {
    pub fn from_raw(raw: &RawRecord) -> Self {
        let mut row = Self::default();
        for (name, value) in raw.fields() {
            row.apply(name, value.as_deref());
        }
        row
    }

    fn apply(&mut self, name: &str, value: Option<&str>) {
        if let Some(need) = SpecialNeed::from_column(name) {
            self.special_needs.set(need, coerce_flag(value));
            return;
        }

        let slot = match name {
            "student_id" => &mut self.student_id,
            "student_last_name" => &mut self.student_last_name,
            "student_first_name" => &mut self.student_first_name,
            "student_dob" => &mut self.student_dob,
            "student_grade" => &mut self.student_grade,
            "cur_school_code" => &mut self.cur_school_code,
            "sch_code" => &mut self.sch_code,
            "sch_name" => &mut self.sch_name,
            "route_id" => &mut self.route_id,
            "route_description" => &mut self.route_description,
            "run_index" => &mut self.run_index,
            "run_description" => &mut self.run_description,
            "run_freq" => &mut self.run_freq,
            "stop_id" => &mut self.stop_id,
            "stop_description" => &mut self.stop_description,
            "stop_time" => &mut self.stop_time,
            "ugeocode" | "geocode" => &mut self.ugeocode,
            "address" => &mut self.address,
            "city" => &mut self.city,
            "zip_code" => &mut self.zip_code,
            _ => return,
        };
        *slot = value.map(|v| v.trim().to_string()).unwrap_or_default();
    }
}
