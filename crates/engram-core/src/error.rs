//! Error taxonomy
//!
//! Every failure in the crate is one of these variants, so callers can match
//! broadly (`Err(e)`) or narrowly (`Err(Error::AgentNotFound(_))`). Inputs are
//! validated at API boundaries and rejected before any write; storage errors
//! keep the driver error as their source.

/// Crate-wide error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed caller input: empty identifier, non-finite numeric,
    /// out-of-range rating, invalid round tuple
    #[error("invalid input for `{field}`: {reason}")]
    InvalidInput {
        /// Offending field name
        field: &'static str,
        /// What was wrong with it
        reason: String,
    },

    /// Agent identifier unknown to the registry
    #[error("agent not found: {0}")]
    AgentNotFound(String),

    /// Backing-store I/O, constraint violation, or transaction rollback
    #[error("storage failure: {context}")]
    Storage {
        /// What the store was doing when it failed
        context: String,
        /// Underlying driver error
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Extractor exhausted its retries or returned unparseable output
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// Pool acquisition timeout or closed connection; retriable
    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// Bad configuration at construction
    #[error("configuration invalid for `{field}`: {reason}")]
    ConfigurationInvalid {
        /// Offending config key
        field: &'static str,
        /// What was wrong with it
        reason: String,
    },

    /// An optional strategy was requested but its backing dependency is absent
    #[error("dependency missing: {0}")]
    DependencyMissing(String),
}

impl Error {
    /// Shorthand for an [`Error::InvalidInput`]
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Error::InvalidInput {
            field,
            reason: reason.into(),
        }
    }

    /// Shorthand for an [`Error::ConfigurationInvalid`]
    pub fn config(field: &'static str, reason: impl Into<String>) -> Self {
        Error::ConfigurationInvalid {
            field,
            reason: reason.into(),
        }
    }

    /// Wrap a driver error with the operation that hit it
    pub fn storage(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Error::Storage {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::storage("sqlite", e)
    }
}

#[cfg(feature = "postgres")]
impl From<postgres::Error> for Error {
    fn from(e: postgres::Error) -> Self {
        Error::storage("postgres", e)
    }
}

#[cfg(feature = "mysql")]
impl From<mysql::Error> for Error {
    fn from(e: mysql::Error) -> Self {
        Error::storage("mysql", e)
    }
}

#[cfg(any(feature = "postgres", feature = "mysql"))]
impl From<r2d2::Error> for Error {
    fn from(e: r2d2::Error) -> Self {
        Error::ResourceUnavailable(e.to_string())
    }
}

/// Crate-wide result type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_input_names_the_field() {
        let err = Error::invalid("owner", "must not be empty");
        assert!(err.to_string().contains("owner"));
        assert!(err.to_string().contains("must not be empty"));
    }

    #[test]
    fn storage_error_preserves_cause() {
        let cause = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err = Error::storage("upsert_node", cause);
        let source = std::error::Error::source(&err).expect("source preserved");
        assert!(source.to_string().contains("disk gone"));
    }
}
