//! Broadcasting of import progress for real-time event streaming.

pub mod import_progress;

pub use import_progress::{FileContext, ImportPhase, ImportProgressBroadcaster, ImportProgressEvent};
