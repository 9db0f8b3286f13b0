use std::{cmp::Ordering, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::BatchError;

/// Lifecycle status of a job or step execution.
///
/// Variants are declared from the least to the most severe, which gives the
/// ordering used by [`BatchStatus::upgrade_to`] and [`BatchStatus::max`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    /// The execution has successfully completed.
    Completed,
    /// Status of an execution prior to its start.
    Starting,
    /// The execution is running.
    Started,
    /// A stop was requested; waiting for the current step to reach a checkpoint.
    Stopping,
    /// The execution has been stopped by request.
    Stopped,
    /// The execution has failed.
    Failed,
    /// The execution did not stop properly and must not be restarted.
    Abandoned,
    /// The execution is in an uncertain state.
    Unknown,
}

impl BatchStatus {
    /// Returns the more severe of the two statuses.
    pub fn max(self, other: BatchStatus) -> BatchStatus {
        std::cmp::max(self, other)
    }

    pub fn is_running(&self) -> bool {
        matches!(
            self,
            BatchStatus::Starting | BatchStatus::Started | BatchStatus::Stopping
        )
    }

    /// `true` for `Failed` and anything more severe.
    pub fn is_unsuccessful(&self) -> bool {
        *self >= BatchStatus::Failed
    }

    pub fn is_greater_than(&self, other: BatchStatus) -> bool {
        *self > other
    }

    pub fn is_less_than(&self, other: BatchStatus) -> bool {
        *self < other
    }

    /// Computes the status to move to when `other` is reported against `self`.
    ///
    /// Once either status is past `Started`, the most severe one wins. Below that,
    /// `Completed` wins over the transient statuses.
    pub fn upgrade_to(self, other: BatchStatus) -> BatchStatus {
        if self.is_greater_than(BatchStatus::Started) || other.is_greater_than(BatchStatus::Started)
        {
            return self.max(other);
        }
        if self == BatchStatus::Completed || other == BatchStatus::Completed {
            return BatchStatus::Completed;
        }
        self.max(other)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Completed => "COMPLETED",
            BatchStatus::Starting => "STARTING",
            BatchStatus::Started => "STARTED",
            BatchStatus::Stopping => "STOPPING",
            BatchStatus::Stopped => "STOPPED",
            BatchStatus::Failed => "FAILED",
            BatchStatus::Abandoned => "ABANDONED",
            BatchStatus::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchStatus {
    type Err = BatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "COMPLETED" => Ok(BatchStatus::Completed),
            "STARTING" => Ok(BatchStatus::Starting),
            "STARTED" => Ok(BatchStatus::Started),
            "STOPPING" => Ok(BatchStatus::Stopping),
            "STOPPED" => Ok(BatchStatus::Stopped),
            "FAILED" => Ok(BatchStatus::Failed),
            "ABANDONED" => Ok(BatchStatus::Abandoned),
            "UNKNOWN" => Ok(BatchStatus::Unknown),
            other => Err(BatchError::InvalidArgument(format!(
                "Unknown batch status: {}",
                other
            ))),
        }
    }
}

pub const EXECUTING: &str = "EXECUTING";
pub const COMPLETED: &str = "COMPLETED";
pub const NOOP: &str = "NOOP";
pub const STOPPED: &str = "STOPPED";
pub const FAILED: &str = "FAILED";
pub const UNKNOWN: &str = "UNKNOWN";

/// Outcome reported by a finished (or running) execution.
///
/// Unlike [`BatchStatus`], exit codes are open: any string is a valid code and
/// custom codes rank above every well-known one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExitStatus {
    exit_code: String,
    exit_description: String,
}

impl ExitStatus {
    pub fn new(exit_code: impl Into<String>) -> Self {
        Self::with_description(exit_code, "")
    }

    pub fn with_description(exit_code: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            exit_code: exit_code.into(),
            exit_description: description.into(),
        }
    }

    pub fn executing() -> Self {
        Self::new(EXECUTING)
    }

    pub fn completed() -> Self {
        Self::new(COMPLETED)
    }

    pub fn noop() -> Self {
        Self::new(NOOP)
    }

    pub fn stopped() -> Self {
        Self::new(STOPPED)
    }

    pub fn failed() -> Self {
        Self::new(FAILED)
    }

    pub fn unknown() -> Self {
        Self::new(UNKNOWN)
    }

    pub fn exit_code(&self) -> &str {
        &self.exit_code
    }

    pub fn exit_description(&self) -> &str {
        &self.exit_description
    }

    /// An exit status is still running while it is `EXECUTING` or `UNKNOWN`.
    pub fn is_running(&self) -> bool {
        self.exit_code == EXECUTING || self.exit_code == UNKNOWN
    }

    /// Combines two exit statuses: the more severe code wins and descriptions are joined.
    pub fn and(&self, other: &ExitStatus) -> ExitStatus {
        let mut result = self.add_exit_description(&other.exit_description);
        if self.cmp(other) == Ordering::Less {
            result = result.replace_exit_code(&other.exit_code);
        }
        result
    }

    pub fn add_exit_description(&self, description: &str) -> ExitStatus {
        if description.is_empty() || description == self.exit_description {
            return self.clone();
        }
        let exit_description = if self.exit_description.is_empty() {
            description.to_string()
        } else {
            format!("{}; {}", self.exit_description, description)
        };
        ExitStatus {
            exit_code: self.exit_code.clone(),
            exit_description,
        }
    }

    pub fn replace_exit_code(&self, exit_code: &str) -> ExitStatus {
        ExitStatus {
            exit_code: exit_code.to_string(),
            exit_description: self.exit_description.clone(),
        }
    }

    /// Returns a copy whose description holds at most `max_length` characters.
    pub fn truncated(&self, max_length: usize) -> ExitStatus {
        if self.exit_description.chars().count() <= max_length {
            return self.clone();
        }
        ExitStatus {
            exit_code: self.exit_code.clone(),
            exit_description: self.exit_description.chars().take(max_length).collect(),
        }
    }

    fn severity(&self) -> u8 {
        match self.exit_code.as_str() {
            EXECUTING => 1,
            COMPLETED => 2,
            NOOP => 3,
            STOPPED => 4,
            FAILED => 5,
            UNKNOWN => 6,
            _ => 7,
        }
    }
}

impl Default for ExitStatus {
    fn default() -> Self {
        ExitStatus::unknown()
    }
}

impl PartialOrd for ExitStatus {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ExitStatus {
    fn cmp(&self, other: &Self) -> Ordering {
        self.severity()
            .cmp(&other.severity())
            .then_with(|| self.exit_code.cmp(&other.exit_code))
    }
}

impl From<BatchStatus> for ExitStatus {
    fn from(status: BatchStatus) -> Self {
        match status {
            BatchStatus::Completed => ExitStatus::completed(),
            BatchStatus::Starting | BatchStatus::Started => ExitStatus::executing(),
            BatchStatus::Stopping | BatchStatus::Stopped => ExitStatus::stopped(),
            BatchStatus::Failed | BatchStatus::Abandoned => ExitStatus::failed(),
            BatchStatus::Unknown => ExitStatus::unknown(),
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "exitCode={};exitDescription={}",
            self.exit_code, self.exit_description
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upgrade_takes_max_past_started() {
        assert_eq!(
            BatchStatus::Stopping.upgrade_to(BatchStatus::Stopped),
            BatchStatus::Stopped
        );
        assert_eq!(
            BatchStatus::Completed.upgrade_to(BatchStatus::Failed),
            BatchStatus::Failed
        );
        assert_eq!(
            BatchStatus::Failed.upgrade_to(BatchStatus::Started),
            BatchStatus::Failed
        );
    }

    #[test]
    fn upgrade_prefers_completed_below_started() {
        assert_eq!(
            BatchStatus::Started.upgrade_to(BatchStatus::Completed),
            BatchStatus::Completed
        );
        assert_eq!(
            BatchStatus::Starting.upgrade_to(BatchStatus::Started),
            BatchStatus::Started
        );
    }

    #[test]
    fn running_and_unsuccessful() {
        assert!(BatchStatus::Starting.is_running());
        assert!(BatchStatus::Stopping.is_running());
        assert!(!BatchStatus::Stopped.is_running());
        assert!(BatchStatus::Abandoned.is_unsuccessful());
        assert!(!BatchStatus::Stopped.is_unsuccessful());
    }

    #[test]
    fn parse_round_trips_display() -> Result<(), BatchError> {
        let status: BatchStatus = "ABANDONED".parse()?;
        assert_eq!(status, BatchStatus::Abandoned);
        assert_eq!(status.to_string(), "ABANDONED");
        assert!("RUNNING".parse::<BatchStatus>().is_err());
        Ok(())
    }

    #[test]
    fn and_keeps_most_severe_code() {
        let completed = ExitStatus::with_description(COMPLETED, "step one");
        let failed = ExitStatus::with_description(FAILED, "boom");

        let combined = completed.and(&failed);
        assert_eq!(combined.exit_code(), FAILED);
        assert_eq!(combined.exit_description(), "step one; boom");

        let custom = ExitStatus::new("CUSTOM");
        assert_eq!(failed.and(&custom).exit_code(), "CUSTOM");
        assert_eq!(custom.and(&failed).exit_code(), "CUSTOM");
    }

    #[test]
    fn truncated_limits_description() {
        let status = ExitStatus::with_description(FAILED, "abcdef");
        assert_eq!(status.truncated(3).exit_description(), "abc");
        assert_eq!(status.truncated(10), status);
    }
}
