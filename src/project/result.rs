//! Per-run result types and statistics.
//!
//! [`ProcessResult`] collects one [`ModuleReport`] per rewritten module and the error of
//! every module that had to be skipped. It only reports what happened; a failure never
//! stops the remaining modules from being processed.

use std::path::{Path, PathBuf};

use crate::{compiler::EventLog, Error};

/// What happened to one module.
#[derive(Debug, Default)]
pub struct ModuleReport {
    /// The file the module was read from, `None` for in-memory rewrites
    pub path: Option<PathBuf>,
    /// Module name
    pub module: String,
    /// Some method body or the helper holder changed
    pub changed: bool,
    /// The rewritten image differed from the input and was stored
    pub written: bool,
    /// Every rewrite, skip and warning recorded for the module
    pub events: EventLog,
}

impl ModuleReport {
    /// One line describing the report, as logged at the end of a module.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.events.is_empty() {
            return format!("{}: unchanged", self.module);
        }
        let events = self.events.summary();
        if self.written {
            format!("{}: {events}, written", self.module)
        } else {
            format!("{}: {events}", self.module)
        }
    }
}

/// Outcome of [`crate::project::Rewriter::process`].
#[derive(Debug, Default)]
pub struct ProcessResult {
    /// Reports of the modules that were processed
    pub reports: Vec<ModuleReport>,
    /// Modules that were skipped (file path -> error message)
    pub failed_modules: Vec<(PathBuf, String)>,
    /// Number of modules that were locked by another process
    pub locked_count: usize,
}

impl ProcessResult {
    /// Create a new empty result.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if every module was processed.
    #[must_use]
    pub fn is_complete_success(&self) -> bool {
        self.failed_modules.is_empty()
    }

    /// Check if any module had to be skipped.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failed_modules.is_empty()
    }

    /// Number of processed modules.
    #[must_use]
    pub fn success_count(&self) -> usize {
        self.reports.len()
    }

    /// Number of skipped modules.
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.failed_modules.len()
    }

    /// Number of modules whose image was rewritten.
    #[must_use]
    pub fn written_count(&self) -> usize {
        self.reports.iter().filter(|report| report.written).count()
    }

    /// The report for `path`.
    #[must_use]
    pub fn report(&self, path: &Path) -> Option<&ModuleReport> {
        self.reports
            .iter()
            .find(|report| report.path.as_deref() == Some(path))
    }

    pub(crate) fn record_success(&mut self, report: ModuleReport) {
        self.reports.push(report);
    }

    pub(crate) fn record_failure(&mut self, path: &Path, error: &Error) {
        if matches!(error, Error::Locked(_)) {
            self.locked_count += 1;
        }
        self.failed_modules
            .push((path.to_path_buf(), error.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::EventKind;

    #[test]
    fn test_counts() {
        let mut result = ProcessResult::new();
        assert!(result.is_complete_success());

        result.record_success(ModuleReport {
            path: Some(PathBuf::from("a.dll")),
            module: "a".to_string(),
            changed: true,
            written: true,
            events: EventLog::new(),
        });
        result.record_failure(Path::new("b.dll"), &Error::Locked(PathBuf::from("b.dll")));

        assert_eq!(result.success_count(), 1);
        assert_eq!(result.failure_count(), 1);
        assert_eq!(result.written_count(), 1);
        assert_eq!(result.locked_count, 1);
        assert!(result.has_failures());
        assert!(result.report(Path::new("a.dll")).is_some());
        assert!(result.report(Path::new("b.dll")).is_none());
    }

    #[test]
    fn test_summary() {
        let mut report = ModuleReport {
            module: "App".to_string(),
            ..ModuleReport::default()
        };
        assert_eq!(report.summary(), "App: unchanged");

        report.events.record(EventKind::HandlersFlattened).message("Run");
        report.written = true;
        assert_eq!(report.summary(), "App: 1 methods flattened, written");
    }
}
