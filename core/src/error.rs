use std::fmt;

/// Result alias for document store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Failure kinds surfaced by the document store.
///
/// Conditional failures (`NotFound`, `AlreadyExists`, `ConditionNotMet`) are
/// ordinary outcomes that callers are expected to match on and translate into
/// domain results. `InvalidArgument` and `UnknownField` indicate programming
/// errors and should propagate. `Corrupt` means the backing store violated
/// the one-document-per-id invariant; no caller recovers from it.
#[derive(Debug)]
pub enum StoreError {
    /// Caller passed contradictory or ill-typed arguments.
    InvalidArgument { reason: String },
    /// The referenced document does not exist.
    NotFound { collection: String, id: String },
    /// Insert hit a duplicate id.
    AlreadyExists { collection: String, id: String },
    /// A conditional write matched zero documents.
    ConditionNotMet { collection: String, id: String },
    /// Default lookup or reset on a field with no declared default.
    UnknownField { collection: String, field: String },
    /// An id-constrained write matched more than one document.
    Corrupt {
        collection: String,
        id: String,
        matched: u64,
    },
    /// The backing store itself failed.
    Backend(anyhow::Error),
}

impl StoreError {
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        StoreError::InvalidArgument {
            reason: reason.into(),
        }
    }

    pub fn not_found(collection: impl Into<String>, id: impl Into<String>) -> Self {
        StoreError::NotFound {
            collection: collection.into(),
            id: id.into(),
        }
    }

    pub fn already_exists(collection: impl Into<String>, id: impl Into<String>) -> Self {
        StoreError::AlreadyExists {
            collection: collection.into(),
            id: id.into(),
        }
    }

    pub fn condition_not_met(collection: impl Into<String>, id: impl Into<String>) -> Self {
        StoreError::ConditionNotMet {
            collection: collection.into(),
            id: id.into(),
        }
    }

    pub fn unknown_field(collection: impl Into<String>, field: impl Into<String>) -> Self {
        StoreError::UnknownField {
            collection: collection.into(),
            field: field.into(),
        }
    }

    pub fn corrupt(collection: impl Into<String>, id: impl Into<String>, matched: u64) -> Self {
        StoreError::Corrupt {
            collection: collection.into(),
            id: id.into(),
            matched,
        }
    }

    pub fn backend(err: impl Into<anyhow::Error>) -> Self {
        StoreError::Backend(err.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists { .. })
    }

    pub fn is_condition_not_met(&self) -> bool {
        matches!(self, StoreError::ConditionNotMet { .. })
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::InvalidArgument { reason } => {
                write!(f, "invalid argument: {reason}")
            }
            StoreError::NotFound { collection, id } => {
                write!(f, "document not found: {collection}/{id}")
            }
            StoreError::AlreadyExists { collection, id } => {
                write!(f, "document already exists: {collection}/{id}")
            }
            StoreError::ConditionNotMet { collection, id } => {
                write!(f, "condition not met for {collection}/{id}")
            }
            StoreError::UnknownField { collection, field } => {
                write!(f, "no declared default for field {field} in {collection}")
            }
            StoreError::Corrupt {
                collection,
                id,
                matched,
            } => {
                write!(
                    f,
                    "store corruption: {matched} documents matched id {id} in {collection}"
                )
            }
            StoreError::Backend(err) => write!(f, "store backend error: {err}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Backend(err) => err.source(),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Backend(err.into())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Backend(err.into())
    }
}
