use thiserror::Error;

/// Errors raised by the kinetics engine.
///
/// Construction and integration failures are structural and abort the run.
/// Fit failures only abort the fitting call that raised them.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum KineticsError {
    #[error("missing rate constant `{key}`")]
    MissingRateConstant { key: String },

    #[error("invalid value for `{key}`: {reason}")]
    InvalidParameterValue { key: String, reason: String },

    #[error("{stage} integration did not converge: {message}")]
    SolverNotConverged { stage: String, message: String },

    #[error("lifetime fit is infeasible: {reason}")]
    FitBoundsInfeasible { reason: String },

    #[error("unsupported state count {states}; expected 2, 3, 4 or 5")]
    UnsupportedVariant { states: usize },

    #[error("failed to read `{path}`: {message}")]
    Io { path: String, message: String },
}

impl KineticsError {
    pub(crate) fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameterValue {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn infeasible(reason: impl Into<String>) -> Self {
        Self::FitBoundsInfeasible {
            reason: reason.into(),
        }
    }

    /// True for errors that invalidate the whole run rather than one fit.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, KineticsError::FitBoundsInfeasible { .. })
    }
}

pub type Result<T> = std::result::Result<T, KineticsError>;

#[cfg(test)]
mod tests {
    use super::KineticsError;

    #[test]
    fn messages_name_the_offending_key() {
        let err = KineticsError::MissingRateConstant {
            key: "k_fls1s0".to_string(),
        };
        assert_eq!(err.to_string(), "missing rate constant `k_fls1s0`");

        let err = KineticsError::invalid("k_bad", "not a number: notanumber");
        assert!(err.to_string().contains("k_bad"));
        assert!(err.is_fatal());
    }

    #[test]
    fn only_fit_errors_are_recoverable() {
        assert!(!KineticsError::infeasible("empty series").is_fatal());
        assert!(KineticsError::UnsupportedVariant { states: 6 }.is_fatal());
    }
}
