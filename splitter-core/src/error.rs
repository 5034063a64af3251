use thiserror::Error;

/// Errors a [`crate::PodStore`] implementation may return.
///
/// Two kinds only, matched by meaning rather than by source: callers decide
/// what a `NoEntries` means at their own call site (a missed capture
/// candidate versus a lost compare-and-set race).
#[derive(Error, Debug)]
pub enum StoreError {
    /// A conditional query or CAS found no matching record.
    #[error("no matching pod record")]
    NoEntries,
    /// Any other failure from the store: network, serialization, internal.
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::RowNotFound => StoreError::NoEntries,
            other => StoreError::Storage(other.to_string()),
        }
    }
}

/// Error returned by an application-supplied post-adoption callback.
#[derive(Error, Debug)]
#[error("splitter callback failed: {0}")]
pub struct CallbackError(pub String);
