//! The fixed special-need catalog and its mapping onto import columns.
//!
//! Each of the twelve flags in an import row corresponds to exactly one
//! catalog code. The mapping lives here as data so the parser, the row
//! store and the student validator all agree on it.

use serde::{Deserialize, Serialize};

/// Number of special-need flags carried by every import row.
pub const SPECIAL_NEED_COUNT: usize = 12;

/// A special need that can be flagged on an import row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SpecialNeed {
    Need1,
    Need2,
    Need3,
    Need4,
    Need5,
    Need6,
    Need7,
    Need8,
    Need9,
    Need10,
    Need11,
    OtherNeeds4,
}

impl SpecialNeed {
    /// All needs in column order.
    pub const ALL: [SpecialNeed; SPECIAL_NEED_COUNT] = [
        SpecialNeed::Need1,
        SpecialNeed::Need2,
        SpecialNeed::Need3,
        SpecialNeed::Need4,
        SpecialNeed::Need5,
        SpecialNeed::Need6,
        SpecialNeed::Need7,
        SpecialNeed::Need8,
        SpecialNeed::Need9,
        SpecialNeed::Need10,
        SpecialNeed::Need11,
        SpecialNeed::OtherNeeds4,
    ];

    /// Catalog code stored in the master `special_needs` table.
    pub fn code(self) -> &'static str {
        match self {
            SpecialNeed::Need1 => "SP-1",
            SpecialNeed::Need2 => "SP-2",
            SpecialNeed::Need3 => "SP-3",
            SpecialNeed::Need4 => "SP-4",
            SpecialNeed::Need5 => "SP-5",
            SpecialNeed::Need6 => "SP-6",
            SpecialNeed::Need7 => "SP-7",
            SpecialNeed::Need8 => "SP-8",
            SpecialNeed::Need9 => "SP-9",
            SpecialNeed::Need10 => "SP-10",
            SpecialNeed::Need11 => "SP-11",
            SpecialNeed::OtherNeeds4 => "STUOTHNEEDS4",
        }
    }

    /// Normalized spreadsheet header and `student_route_rows` column name.
    pub fn column(self) -> &'static str {
        match self {
            SpecialNeed::Need1 => "stuneeds_need1",
            SpecialNeed::Need2 => "stuneeds_need2",
            SpecialNeed::Need3 => "stuneeds_need3",
            SpecialNeed::Need4 => "stuneeds_need4",
            SpecialNeed::Need5 => "stuneeds_need5",
            SpecialNeed::Need6 => "stuneeds_need6",
            SpecialNeed::Need7 => "stuneeds_need7",
            SpecialNeed::Need8 => "stuneeds_need8",
            SpecialNeed::Need9 => "stuneeds_need9",
            SpecialNeed::Need10 => "stuneeds_need10",
            SpecialNeed::Need11 => "stuneeds_need11",
            SpecialNeed::OtherNeeds4 => "stuothneeds4",
        }
    }

    fn index(self) -> usize {
        self as usize
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|n| n.code() == code)
    }

    pub fn from_column(column: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|n| n.column() == column)
    }
}

impl std::fmt::Display for SpecialNeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// The twelve boolean flags of one import row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialNeedFlags([bool; SPECIAL_NEED_COUNT]);

impl SpecialNeedFlags {
    pub fn get(&self, need: SpecialNeed) -> bool {
        self.0[need.index()]
    }

    pub fn set(&mut self, need: SpecialNeed, value: bool) {
        self.0[need.index()] = value;
    }

    /// Catalog codes of every flag that is set, in column order.
    pub fn codes(&self) -> Vec<String> {
        SpecialNeed::ALL
            .into_iter()
            .filter(|need| self.get(*need))
            .map(|need| need.code().to_string())
            .collect()
    }
}

/// Coerces a raw cell into a flag.
///
/// Only a case-insensitive "TRUE" counts, compared on the raw cell without
/// trimming; blanks, "1", "yes", " true " and anything else are false.
pub fn coerce_flag(raw: Option<&str>) -> bool {
    raw.map(|v| v.to_uppercase() == "TRUE").unwrap_or(false)
}
