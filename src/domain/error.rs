//! Domain error types.

use chrono::NaiveDate;

/// Top-level error type for weightsim.
#[derive(Debug, thiserror::Error)]
pub enum WeightsimError {
    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("invalid trading calendar: {reason}")]
    CalendarInvalid { reason: String },

    #[error("invalid input in {source_name}: {reason}")]
    InvalidInput { source_name: String, reason: String },

    #[error("data error: {reason}")]
    Data { reason: String },

    #[error("no data: {reason}")]
    NoData { reason: String },

    /// A weight overlay post-condition failed. Fatal for the affected
    /// (strategy, date) unit; never corrected silently.
    #[error("invariant violation in {strategy} on {date}: {reason}")]
    InvariantViolation {
        strategy: String,
        date: NaiveDate,
        reason: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl WeightsimError {
    pub fn invalid_input(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        WeightsimError::InvalidInput {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }

    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, WeightsimError::InvariantViolation { .. })
    }
}

impl From<&WeightsimError> for std::process::ExitCode {
    fn from(err: &WeightsimError) -> Self {
        let code: u8 = match err {
            WeightsimError::Io(_) => 1,
            WeightsimError::ConfigParse { .. }
            | WeightsimError::ConfigMissing { .. }
            | WeightsimError::ConfigInvalid { .. } => 2,
            WeightsimError::Data { .. }
            | WeightsimError::InvalidInput { .. }
            | WeightsimError::CalendarInvalid { .. } => 3,
            WeightsimError::InvariantViolation { .. } => 4,
            WeightsimError::NoData { .. } => 5,
        };
        std::process::ExitCode::from(code)
    }
}
