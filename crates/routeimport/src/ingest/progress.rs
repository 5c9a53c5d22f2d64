use std::sync::Mutex;

use crate::broadcast::import_progress::{
    FileContext, ImportPhase, ImportProgressBroadcaster, ImportProgressEvent,
};

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ImportProgressEvent);
}

/// No-op reporter for unit tests and headless runs.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ImportProgressEvent) {}
}

/// Forwards events to the broadcast channel.
pub struct BroadcastProgress {
    broadcaster: ImportProgressBroadcaster,
}

impl BroadcastProgress {
    pub fn new(broadcaster: ImportProgressBroadcaster) -> Self {
        Self { broadcaster }
    }
}

impl ProgressReporter for BroadcastProgress {
    fn report(&self, event: ImportProgressEvent) {
        self.broadcaster.send(event);
    }
}

/// Keeps every event in memory, in order.
#[derive(Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<ImportProgressEvent>>,
}

impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ImportProgressEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl ProgressReporter for RecordingProgress {
    fn report(&self, event: ImportProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Emits events for one file of a chain.
pub struct FileProgress<'a> {
    context: FileContext,
    reporter: &'a dyn ProgressReporter,
}

impl<'a> FileProgress<'a> {
    pub fn new(context: FileContext, reporter: &'a dyn ProgressReporter) -> Self {
        Self { context, reporter }
    }

    pub fn context(&self) -> &FileContext {
        &self.context
    }

    fn event(&self, phase: ImportPhase, message: String) -> ImportProgressEvent {
        ImportProgressEvent::new(&self.context.batch_id, phase, &message).with_file(&self.context)
    }

    pub fn phase(&self, phase: ImportPhase, message: &str) {
        let message = format!("{} ({}): {}", self.context.file_name, self.context.label(), message);
        self.reporter.report(self.event(phase, message));
    }

    pub fn records(&self, processed: i64, total: i64) {
        let message = format!(
            "{} ({}): {} of {} rows",
            self.context.file_name,
            self.context.label(),
            processed,
            total
        );
        self.reporter
            .report(self.event(ImportPhase::Ingesting, message).with_records(processed, total));
    }

    pub fn completed(&self, processed: i64) {
        let message = format!(
            "{} ({}): imported {} rows",
            self.context.file_name,
            self.context.label(),
            processed
        );
        self.reporter
            .report(self.event(ImportPhase::Completed, message).with_records(processed, processed));
    }

    pub fn failed(&self, processed: i64, total: i64, error: &str) {
        let message = format!("{} ({}): import failed", self.context.file_name, self.context.label());
        self.reporter.report(
            self.event(ImportPhase::Failed, message)
                .with_records(processed, total)
                .with_error(error),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> FileContext {
        FileContext {
            batch_id: "b1".to_string(),
            file_id: "f1".to_string(),
            file_name: "routes.csv".to_string(),
            position: 1,
            count: 2,
        }
    }

    #[test]
    fn test_file_progress_events() {
        let recorder = RecordingProgress::new();
        let progress = FileProgress::new(context(), &recorder);

        progress.phase(ImportPhase::Parsing, "Reading spreadsheet");
        progress.records(100, 250);
        progress.completed(250);

        let events = recorder.events();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].phase, ImportPhase::Parsing);
        assert_eq!(events[0].message, "routes.csv (file 1 of 2): Reading spreadsheet");
        assert_eq!(events[1].processed_records, 100);
        assert_eq!(events[1].total_records, 250);
        assert_eq!(events[2].phase, ImportPhase::Completed);
        assert!(events.iter().all(|e| e.file_id.as_deref() == Some("f1")));
    }

    #[test]
    fn test_failed_event_has_error() {
        let recorder = RecordingProgress::new();
        FileProgress::new(context(), &recorder).failed(0, 0, "bad header");

        let events = recorder.events();
        assert_eq!(events[0].phase, ImportPhase::Failed);
        assert_eq!(events[0].error.as_deref(), Some("bad header"));
    }

    #[test]
    fn test_broadcast_progress_forwards() {
        let broadcaster = ImportProgressBroadcaster::new(10);
        let mut rx = broadcaster.subscribe();
        let progress = BroadcastProgress::new(broadcaster);

        progress.report(ImportProgressEvent::new("b1", ImportPhase::Queued, "Queued"));
        assert_eq!(rx.try_recv().unwrap().phase, ImportPhase::Queued);
    }
}
