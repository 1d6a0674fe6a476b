//! Interactive failure reporting
//!
//! Components that need to tell the user about a failure receive an
//! [`ErrorReporter`] explicitly. The viewer plugs in [`LogErrorReporter`];
//! a GUI front end can substitute a modal dialog.

/// How serious a reported failure is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// The application keeps running with its previous state
    Warning,
    /// An operation failed and was abandoned
    Error,
    /// The application is about to shut down
    Fatal,
}

/// Sink for user-facing failure messages
pub trait ErrorReporter {
    /// Report a failure with a short title and a human-readable message
    fn report(&self, severity: Severity, title: &str, message: &str);
}

/// Reporter that writes messages to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogErrorReporter;

impl ErrorReporter for LogErrorReporter {
    fn report(&self, severity: Severity, title: &str, message: &str) {
        match severity {
            Severity::Warning => log::warn!("{title}: {message}"),
            Severity::Error | Severity::Fatal => log::error!("{title}: {message}"),
        }
    }
}
