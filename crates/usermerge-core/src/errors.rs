//! Error facility for the merge engine.
//!
//! Provides a structured error type with a stable kind taxonomy. Each kind
//! maps to a stable error code usable for programmatic handling, testing,
//! and log inspection.

/// Result type alias using MergeError
pub type Result<T> = std::result::Result<T, MergeError>;

/// Canonical error kind taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeErrorKind {
    // Preconditions
    /// Target and source identity keys are equal
    SameIdentity,
    InvalidInput,
    NotFound,

    // Configuration
    Configuration,
    /// The database reports no transaction support but transactions are required
    TransactionUnsupported,

    // Storage
    /// A uniqueness constraint was violated by a bulk mutation
    ConstraintViolation,
    Persistence,
    Serialization,

    // Internal
    Internal,
}

impl MergeErrorKind {
    /// Get the stable error code for this kind
    pub fn code(&self) -> &'static str {
        match self {
            MergeErrorKind::SameIdentity => "ERR_SAME_IDENTITY",
            MergeErrorKind::InvalidInput => "ERR_INVALID_INPUT",
            MergeErrorKind::NotFound => "ERR_NOT_FOUND",
            MergeErrorKind::Configuration => "ERR_CONFIGURATION",
            MergeErrorKind::TransactionUnsupported => "ERR_TRANSACTION_UNSUPPORTED",
            MergeErrorKind::ConstraintViolation => "ERR_CONSTRAINT_VIOLATION",
            MergeErrorKind::Persistence => "ERR_PERSISTENCE",
            MergeErrorKind::Serialization => "ERR_SERIALIZATION",
            MergeErrorKind::Internal => "ERR_INTERNAL",
        }
    }
}

/// Canonical structured error type
///
/// Carries a kind for classification plus optional operation and table
/// context for diagnostics. Built fluently:
///
/// ```
/// use usermerge_core::errors::{MergeError, MergeErrorKind};
///
/// let err = MergeError::new(MergeErrorKind::Persistence)
///     .with_op("bulk_update")
///     .with_table("enrolments")
///     .with_message("statement failed");
/// assert_eq!(err.code(), "ERR_PERSISTENCE");
/// ```
#[derive(Debug, Clone)]
pub struct MergeError {
    kind: MergeErrorKind,
    op: Option<String>,
    table: Option<String>,
    message: String,
    source: Option<Box<MergeError>>,
}

impl MergeError {
    /// Create a new error with the specified kind
    pub fn new(kind: MergeErrorKind) -> Self {
        Self {
            kind,
            op: None,
            table: None,
            message: String::new(),
            source: None,
        }
    }

    /// Add operation context
    pub fn with_op(mut self, op: impl Into<String>) -> Self {
        self.op = Some(op.into());
        self
    }

    /// Add table context
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Add custom message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Add source error
    pub fn with_source(mut self, source: MergeError) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Get the error kind
    pub fn kind(&self) -> MergeErrorKind {
        self.kind
    }

    /// Get the stable error code
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// Get the operation context, if any
    pub fn op(&self) -> Option<&str> {
        self.op.as_deref()
    }

    /// Get the table context, if any
    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the source error, if any
    pub fn source_error(&self) -> Option<&MergeError> {
        self.source.as_deref()
    }
}

impl std::fmt::Display for MergeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.code())?;
        if let Some(op) = &self.op {
            write!(f, " in operation '{}'", op)?;
        }
        if let Some(table) = &self.table {
            write!(f, " on table '{}'", table)?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        if let Some(source) = &self.source {
            write!(f, " (caused by: {})", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for MergeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|s| s.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Create a configuration error
pub fn configuration_error(reason: impl Into<String>) -> MergeError {
    MergeError::new(MergeErrorKind::Configuration).with_message(reason)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(MergeErrorKind::SameIdentity.code(), "ERR_SAME_IDENTITY");
        assert_eq!(
            MergeErrorKind::ConstraintViolation.code(),
            "ERR_CONSTRAINT_VIOLATION"
        );
        assert_eq!(
            MergeErrorKind::TransactionUnsupported.code(),
            "ERR_TRANSACTION_UNSUPPORTED"
        );
    }

    #[test]
    fn test_display_includes_context() {
        let err = MergeError::new(MergeErrorKind::Persistence)
            .with_op("bulk_update")
            .with_table("enrolments")
            .with_message("disk full");
        let s = err.to_string();
        assert!(s.contains("ERR_PERSISTENCE"));
        assert!(s.contains("bulk_update"));
        assert!(s.contains("enrolments"));
        assert!(s.contains("disk full"));
    }

    #[test]
    fn test_source_chain() {
        let inner = MergeError::new(MergeErrorKind::Persistence).with_message("io error");
        let outer = MergeError::new(MergeErrorKind::Internal).with_source(inner);
        assert!(outer.source_error().is_some());
        assert!(outer.to_string().contains("caused by"));
    }
}
