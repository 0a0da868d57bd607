//! Statement stage machine
//!
//! A statement's stage is derived from its three persisted status columns.
//! `transition` is the single place that decides which stage changes are
//! legal; the orchestrator consults it before every status write.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{BankStatement, JobKind, MatchingStatus, OcrStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementStage {
    /// Recorded, OCR job not yet queued (never persisted)
    Uploaded,
    OcrPending,
    OcrProcessing,
    OcrCompleted,
    OcrFailed,
    MatchingPending,
    MatchingProcessing,
    MatchingCompleted,
    MatchingSkipped,
    MatchingFailed,
    AccountMatchingPending,
    AccountMatchingProcessing,
    AccountMatchingCompleted,
    AccountMatchingSkipped,
    AccountMatchingFailed,
}

/// Something that happened to a statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageEvent {
    OcrQueued,
    OcrStarted,
    OcrSucceeded,
    OcrFailed,
    MatchingQueued,
    MatchingStarted,
    MatchingCompleted,
    MatchingSkipped,
    MatchingFailed,
    AccountMatchingQueued,
    AccountMatchingStarted,
    AccountMatchingCompleted,
    AccountMatchingSkipped,
    AccountMatchingFailed,
    /// Administrative retry of a failed OCR stage
    OcrRetried,
    /// Forced new transaction matching pass
    RematchRequested,
    /// Administrative retry of a failed account matching stage
    AccountMatchingRetried,
}

impl StatementStage {
    /// Derive the stage from the persisted status columns
    pub fn of(statement: &BankStatement) -> Self {
        use MatchingStatus as M;

        match (
            statement.ocr_status,
            statement.matching_status,
            statement.account_matching_status,
        ) {
            (OcrStatus::Pending, _, _) => Self::OcrPending,
            (OcrStatus::Processing, _, _) => Self::OcrProcessing,
            (OcrStatus::Failed, _, _) => Self::OcrFailed,
            (OcrStatus::Completed, None, _) => Self::OcrCompleted,
            (OcrStatus::Completed, Some(M::Pending), _) => Self::MatchingPending,
            (OcrStatus::Completed, Some(M::Processing), _) => Self::MatchingProcessing,
            (OcrStatus::Completed, Some(matching), None) => match matching {
                M::Skipped => Self::MatchingSkipped,
                M::Failed => Self::MatchingFailed,
                _ => Self::MatchingCompleted,
            },
            (OcrStatus::Completed, Some(_), Some(account)) => match account {
                M::Pending => Self::AccountMatchingPending,
                M::Processing => Self::AccountMatchingProcessing,
                M::Completed => Self::AccountMatchingCompleted,
                M::Skipped => Self::AccountMatchingSkipped,
                M::Failed => Self::AccountMatchingFailed,
            },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploaded => "uploaded",
            Self::OcrPending => "ocr_pending",
            Self::OcrProcessing => "ocr_processing",
            Self::OcrCompleted => "ocr_completed",
            Self::OcrFailed => "ocr_failed",
            Self::MatchingPending => "matching_pending",
            Self::MatchingProcessing => "matching_processing",
            Self::MatchingCompleted => "matching_completed",
            Self::MatchingSkipped => "matching_skipped",
            Self::MatchingFailed => "matching_failed",
            Self::AccountMatchingPending => "account_matching_pending",
            Self::AccountMatchingProcessing => "account_matching_processing",
            Self::AccountMatchingCompleted => "account_matching_completed",
            Self::AccountMatchingSkipped => "account_matching_skipped",
            Self::AccountMatchingFailed => "account_matching_failed",
        }
    }

    /// No further work will happen without an explicit retry or rematch
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::OcrFailed
                | Self::AccountMatchingCompleted
                | Self::AccountMatchingSkipped
                | Self::AccountMatchingFailed
        )
    }

    /// Transaction matching has finished (completed, skipped, or failed)
    pub fn matching_is_terminal(&self) -> bool {
        matches!(
            self,
            Self::MatchingCompleted
                | Self::MatchingSkipped
                | Self::MatchingFailed
                | Self::AccountMatchingPending
                | Self::AccountMatchingProcessing
                | Self::AccountMatchingCompleted
                | Self::AccountMatchingSkipped
                | Self::AccountMatchingFailed
        )
    }

    /// The job that would advance this stage, if any
    pub fn pending_job(&self) -> Option<JobKind> {
        match self {
            Self::Uploaded | Self::OcrPending => Some(JobKind::ProcessOcr),
            Self::MatchingPending => Some(JobKind::MatchTransactions),
            Self::AccountMatchingPending => Some(JobKind::MatchAccounts),
            _ => None,
        }
    }
}

impl std::fmt::Display for StatementStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Apply an event to a stage
///
/// Returns `Conflict` for transitions the pipeline does not allow.
pub fn transition(stage: StatementStage, event: StageEvent) -> Result<StatementStage> {
    use StageEvent as E;
    use StatementStage as S;

    let next = match (stage, event) {
        (S::Uploaded, E::OcrQueued) => S::OcrPending,
        (S::OcrPending, E::OcrStarted) => S::OcrProcessing,
        (S::OcrProcessing, E::OcrSucceeded) => S::OcrCompleted,
        (S::OcrProcessing, E::OcrFailed) => S::OcrFailed,
        (S::OcrFailed, E::OcrRetried) => S::OcrPending,

        (S::OcrCompleted, E::MatchingQueued) => S::MatchingPending,
        (S::MatchingPending, E::MatchingStarted) => S::MatchingProcessing,
        (S::MatchingPending | S::MatchingProcessing, E::MatchingSkipped) => S::MatchingSkipped,
        (S::MatchingProcessing, E::MatchingCompleted) => S::MatchingCompleted,
        (S::MatchingProcessing, E::MatchingFailed) => S::MatchingFailed,

        (S::MatchingCompleted | S::MatchingSkipped | S::MatchingFailed, E::AccountMatchingQueued) => {
            S::AccountMatchingPending
        }
        (S::AccountMatchingPending, E::AccountMatchingStarted) => S::AccountMatchingProcessing,
        (S::AccountMatchingPending | S::AccountMatchingProcessing, E::AccountMatchingSkipped) => {
            S::AccountMatchingSkipped
        }
        (S::AccountMatchingProcessing, E::AccountMatchingCompleted) => S::AccountMatchingCompleted,
        (S::AccountMatchingProcessing, E::AccountMatchingFailed) => S::AccountMatchingFailed,
        (S::AccountMatchingFailed | S::AccountMatchingSkipped, E::AccountMatchingRetried) => {
            S::AccountMatchingPending
        }

        // A rematch is allowed once OCR is done and nothing is in flight
        (
            S::OcrCompleted
            | S::MatchingCompleted
            | S::MatchingSkipped
            | S::MatchingFailed
            | S::AccountMatchingCompleted
            | S::AccountMatchingSkipped
            | S::AccountMatchingFailed,
            E::RematchRequested,
        ) => S::MatchingPending,

        (from, event) => {
            return Err(Error::Conflict(format!(
                "Statement in stage {} cannot take event {:?}",
                from, event
            )))
        }
    };
    Ok(next)
}
