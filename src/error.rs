//! Error types for dynsel.

use thiserror::Error;

/// Boxed error produced by a resource, a submitted callable or a wait object.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur when selecting resources or waiting on submissions.
///
/// Usage errors (everything except [`DsError::Resource`]) abort only the call
/// that triggered them; the policy stays usable afterwards.
#[derive(Debug, Error)]
pub enum DsError {
    /// Selection or submission on a deferred policy before `initialize`.
    #[error("policy is not initialized")]
    NotInitialized,

    /// `initialize` called on a policy that already has a universe.
    #[error("policy is already initialized")]
    AlreadyInitialized,

    /// An explicit offset is outside the universe.
    #[error("resource index {index} is out of range for a universe of {len} resources")]
    InvalidResourceIndex { index: usize, len: usize },

    /// A keyed policy was asked to select without a function key.
    #[error("this policy requires a function key for selection")]
    MissingFunctionKey,

    /// Selection against a universe with zero resources.
    #[error("cannot select from an empty universe")]
    EmptyUniverse,

    /// Waiting on a submission that has already been reaped.
    #[error("submission {0} has already been waited on")]
    DoubleWait(u64),

    /// Error raised by a resource, a submitted callable or its wait object.
    #[error(transparent)]
    Resource(BoxError),

    /// Error extracting configuration from figment.
    #[error("configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Error building a queue thread pool.
    #[error("failed to build queue thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl DsError {
    /// Wrap an error coming from outside the selection runtime.
    pub fn resource(err: impl Into<BoxError>) -> Self {
        DsError::Resource(err.into())
    }

    /// Whether this error was caused by misuse of the selection API rather
    /// than by a resource or the configuration.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            DsError::NotInitialized
                | DsError::AlreadyInitialized
                | DsError::InvalidResourceIndex { .. }
                | DsError::MissingFunctionKey
                | DsError::EmptyUniverse
                | DsError::DoubleWait(_)
        )
    }
}

/// Result type alias for dynsel operations.
pub type Result<T> = std::result::Result<T, DsError>;
