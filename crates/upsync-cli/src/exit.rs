//! Process exit codes

use std::process::ExitCode;

use upsync_sync::engine::{CacheStatus, RunOutcome, RunReport};

/// How the process ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Everything uploaded, or nothing to do
    Success = 0,
    /// Configuration could not be loaded, the client could not be built,
    /// the source tree could not be scanned, or the run was interrupted
    SetupFailed = 1,
    /// Every rejection was an authorization failure
    AuthFailure = 2,
    /// Invalid flags or configuration values
    InvalidOptions = 3,
    /// Uploads finished but the fingerprint cache was not written
    CacheWriteFailed = 4,
    /// Some files were rejected
    CompletedWithRejections = 5,
}

impl ExitStatus {
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Map a finished run to an exit status
    ///
    /// A failed cache write outranks rejections.
    pub fn from_report(report: &RunReport) -> Self {
        if report.outcome == RunOutcome::Cancelled {
            return ExitStatus::SetupFailed;
        }
        if matches!(report.cache, CacheStatus::WriteFailed { .. }) {
            return ExitStatus::CacheWriteFailed;
        }
        match report.outcome {
            RunOutcome::CompletedWithRejections if report.uploads.all_rejections_auth() => {
                ExitStatus::AuthFailure
            }
            RunOutcome::CompletedWithRejections => ExitStatus::CompletedWithRejections,
            _ => ExitStatus::Success,
        }
    }
}

impl From<ExitStatus> for ExitCode {
    fn from(status: ExitStatus) -> Self {
        ExitCode::from(status.code())
    }
}
