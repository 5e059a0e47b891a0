use thiserror::Error;

// Unified error type for kryst-bddc

#[derive(Error, Debug, Clone, PartialEq)]
pub enum KError {
    #[error("configuration error: {0}")]
    ConfigurationError(String),
    #[error("singular factorization of the {context} (zero pivot at {pivot})")]
    SingularFactorization { context: &'static str, pivot: usize },
    #[error("dimension mismatch for {what}: expected {expected}, found {found}")]
    DimensionMismatch { what: &'static str, expected: usize, found: usize },
    #[error("communication error: {0}")]
    CommunicationError(String),
    #[error("preconditioner used before setup")]
    NotSetUp,
    #[error("solve error: {0}")]
    SolveError(String),
    #[error("indefinite matrix detected (p^T A p <= 0)")]
    IndefiniteMatrix,
    #[error("indefinite preconditioner detected (beta < 0)")]
    IndefinitePreconditioner,
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
}

impl KError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        KError::ConfigurationError(msg.into())
    }

    /// Checks `found == expected`, naming the offending object otherwise.
    pub(crate) fn check_dim(what: &'static str, expected: usize, found: usize) -> Result<(), KError> {
        if expected == found {
            Ok(())
        } else {
            Err(KError::DimensionMismatch { what, expected, found })
        }
    }
}
