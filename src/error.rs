use thiserror::Error;

/// Core failure taxonomy. Per-participant failures (timeout, nonzero exit,
/// unknown participant) are recovered by the retry controller; the fatal
/// variants abort the session with partial files preserved.
#[derive(Debug, Error)]
pub enum ConclaveError {
    #[error("adapter for participant '{participant}' timed out after {timeout_secs}s")]
    AdapterTimeout {
        participant: String,
        timeout_secs: u64,
    },

    #[error("adapter for participant '{participant}' exited with status {status}")]
    AdapterNonZeroExit { participant: String, status: i32 },

    #[error("unknown participant '{0}': no adapter is registered under that id")]
    UnknownParticipant(String),

    #[error("invalid structured response: {0}")]
    InvalidStructuredResponse(String),

    #[error("resolution derivation failed: {0}")]
    ResolutionDerivationFailed(String),

    #[error(
        "position tally sums to {tally_total} but the session has {participant_count} participants"
    )]
    TallyInvariantViolation {
        tally_total: usize,
        participant_count: usize,
    },

    #[error("context budget of {budget} chars cannot fit the history for round {round}")]
    BudgetUnsatisfiable { budget: usize, round: u32 },
}

impl ConclaveError {
    /// Fatal errors abort the whole session; everything else is recovered
    /// locally (retry-then-degrade, or truncation for the budget case).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ConclaveError::ResolutionDerivationFailed(_)
                | ConclaveError::TallyInvariantViolation { .. }
        )
    }

    /// Whether the retry controller should re-attempt after this error.
    /// Unknown participants never resolve by retrying: the registry is
    /// immutable after startup.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConclaveError::AdapterTimeout { .. } | ConclaveError::AdapterNonZeroExit { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Adapter,
    Session,
    Extraction,
    Consensus,
    Input,
    Internal,
}

impl ErrorCategory {
    pub fn code(self) -> &'static str {
        match self {
            ErrorCategory::Adapter => "ADAPTER",
            ErrorCategory::Session => "SESSION",
            ErrorCategory::Extraction => "EXTRACTION",
            ErrorCategory::Consensus => "CONSENSUS",
            ErrorCategory::Input => "INPUT",
            ErrorCategory::Internal => "INTERNAL",
        }
    }

    pub fn hint(self) -> &'static str {
        match self {
            ErrorCategory::Adapter => {
                "Check participant adapter commands with 'conclave doctor' and raise --adapter-timeout-secs for slow agents."
            }
            ErrorCategory::Session => {
                "Check --sessions-root permissions and that the session directory was not removed mid-run."
            }
            ErrorCategory::Extraction => {
                "The agent did not return usable structured data. Partial files are preserved in the session directory for inspection."
            }
            ErrorCategory::Consensus => {
                "The judicial vote could not be established. Inspect position_analysis_raw.md in the session directory."
            }
            ErrorCategory::Input => "Run conclave --help and correct command arguments.",
            ErrorCategory::Internal => {
                "Retry with RUST_LOG=debug. If it persists, capture logs and open an issue."
            }
        }
    }
}

pub fn categorize_error(err: &anyhow::Error) -> ErrorCategory {
    if let Some(core) = err.downcast_ref::<ConclaveError>() {
        return match core {
            ConclaveError::AdapterTimeout { .. }
            | ConclaveError::AdapterNonZeroExit { .. }
            | ConclaveError::UnknownParticipant(_) => ErrorCategory::Adapter,
            ConclaveError::InvalidStructuredResponse(_) => ErrorCategory::Extraction,
            ConclaveError::ResolutionDerivationFailed(_)
            | ConclaveError::TallyInvariantViolation { .. } => ErrorCategory::Consensus,
            ConclaveError::BudgetUnsatisfiable { .. } => ErrorCategory::Session,
        };
    }

    let msg = format!("{err:#}").to_ascii_lowercase();

    if msg.contains("adapter") || msg.contains("participant") || msg.contains("timed out") {
        return ErrorCategory::Adapter;
    }

    if msg.contains("invalid value")
        || msg.contains("unknown argument")
        || msg.contains("out of range")
        || msg.contains("profile")
        || msg.contains("persona")
        || msg.contains("topic")
    {
        return ErrorCategory::Input;
    }

    if msg.contains("session") || msg.contains("transcript") || msg.contains("metadata") {
        return ErrorCategory::Session;
    }

    if msg.contains("structured") || msg.contains("json") {
        return ErrorCategory::Extraction;
    }

    ErrorCategory::Internal
}

pub fn format_cli_error(err: &anyhow::Error) -> String {
    let category = categorize_error(err);
    format!("[{}] {:#}\nHint: {}", category.code(), err, category.hint())
}
