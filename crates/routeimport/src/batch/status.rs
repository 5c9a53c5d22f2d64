//! Batch, file and validation state machines.

use serde::{Deserialize, Serialize};

use crate::db::file_repo::StatusCounts;
use crate::db::DatabaseError;

macro_rules! string_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }

            /// Parses the value stored in the database.
            pub fn parse(value: &str) -> Result<Self, DatabaseError> {
                match value {
                    $($text => Ok($name::$variant),)+
                    other => Err(DatabaseError::UnknownValue {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    WaitingForUpload,
    Processing,
    Completed,
    Failed,
}

string_enum!(BatchStatus, "batch status", {
    WaitingForUpload => "waiting_for_upload",
    Processing => "processing",
    Completed => "completed",
    Failed => "failed",
});

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

string_enum!(FileStatus, "file status", {
    Pending => "pending",
    Processing => "processing",
    Completed => "completed",
    Failed => "failed",
});

impl FileStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, FileStatus::Completed | FileStatus::Failed)
    }
}

/// Outcome of the validation stage, tracked apart from the batch status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    NotRun,
    Running,
    Completed,
    Failed,
}

string_enum!(ValidationStatus, "validation status", {
    NotRun => "not_run",
    Running => "running",
    Completed => "completed",
    Failed => "failed",
});

/// Derives the batch status from its file counts.
///
/// Any failed file fails the batch; otherwise the batch is completed once
/// every file is. A batch with no files is still waiting for upload.
pub fn aggregate_status(counts: StatusCounts) -> BatchStatus {
    if counts.total == 0 {
        BatchStatus::WaitingForUpload
    } else if counts.failed > 0 {
        BatchStatus::Failed
    } else if counts.completed == counts.total {
        BatchStatus::Completed
    } else {
        BatchStatus::Processing
    }
}
