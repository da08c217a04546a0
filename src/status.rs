//! Severity-tagged diagnostics shared by every ready check and installer

use bitflags::bitflags;
use std::fmt;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        f.write_str(label)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StatusFlags: u8 {
        /// Only shown when the user asks for detail
        const VERBOSE = 1 << 0;
        /// Confirms that an installed artifact matches what would be generated now
        const CONFIGURATION_UP_TO_DATE = 1 << 1;
    }
}

/// One finding of a ready check or install run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReportItem {
    pub status: String,
    pub recommendation: Option<String>,
    pub link: Option<String>,
    pub severity: Severity,
    pub flags: StatusFlags,
}

impl StatusReportItem {
    pub fn new(severity: Severity, status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            recommendation: None,
            link: None,
            severity,
            flags: StatusFlags::empty(),
        }
    }

    pub fn info(status: impl Into<String>) -> Self {
        Self::new(Severity::Info, status)
    }

    pub fn warning(status: impl Into<String>) -> Self {
        Self::new(Severity::Warning, status)
    }

    pub fn error(status: impl Into<String>) -> Self {
        Self::new(Severity::Error, status)
    }

    pub fn with_recommendation(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendation = Some(recommendation.into());
        self
    }

    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }

    pub fn with_flags(mut self, flags: StatusFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn is_up_to_date(&self) -> bool {
        self.flags.contains(StatusFlags::CONFIGURATION_UP_TO_DATE)
    }

    /// Emit the finding through tracing at the matching level
    pub fn log(&self) {
        match self.severity {
            Severity::Info => info!(status = %self.status, "Ready check"),
            Severity::Warning => warn!(status = %self.status, recommendation = ?self.recommendation, "Ready check"),
            Severity::Error => error!(status = %self.status, recommendation = ?self.recommendation, "Ready check"),
        }
    }
}

impl fmt::Display for StatusReportItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.severity, self.status)?;
        if let Some(recommendation) = &self.recommendation {
            write!(f, "\n    -> {recommendation}")?;
        }
        if let Some(link) = &self.link {
            write!(f, "\n    see {link}")?;
        }
        Ok(())
    }
}

/// Most severe finding, `None` for an empty report
pub fn worst(items: &[StatusReportItem]) -> Option<Severity> {
    items.iter().map(|i| i.severity).max()
}

/// Outcome of an install run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallationResult {
    Success,
    Fatal,
    Cancelled,
}

/// Receives install outcomes so a caller can surface them
pub trait InstallationCallbacks {
    /// Asked once before anything is written; returning false cancels the run
    fn confirm(&mut self, _summary: &str) -> bool {
        true
    }

    fn failure(&mut self, summary: &str, details: &[StatusReportItem]);

    fn success(&mut self, summary: &str, details: &[StatusReportItem]);
}

/// Callbacks that only log
#[derive(Debug, Default)]
pub struct LoggingCallbacks;

impl InstallationCallbacks for LoggingCallbacks {
    fn failure(&mut self, summary: &str, details: &[StatusReportItem]) {
        error!(summary = %summary, findings = details.len(), "Installation failed");
        for item in details {
            item.log();
        }
    }

    fn success(&mut self, summary: &str, details: &[StatusReportItem]) {
        info!(summary = %summary, findings = details.len(), "Installation succeeded");
    }
}

/// Callbacks that remember what they were told, for tests and batch reporting
#[derive(Debug, Default)]
pub struct RecordingCallbacks {
    pub failures: Vec<(String, Vec<StatusReportItem>)>,
    pub successes: Vec<String>,
    /// Answer every confirmation with "no"
    pub decline: bool,
}

impl InstallationCallbacks for RecordingCallbacks {
    fn confirm(&mut self, _summary: &str) -> bool {
        !self.decline
    }

    fn failure(&mut self, summary: &str, details: &[StatusReportItem]) {
        self.failures.push((summary.to_string(), details.to_vec()));
    }

    fn success(&mut self, summary: &str, _details: &[StatusReportItem]) {
        self.successes.push(summary.to_string());
    }
}
