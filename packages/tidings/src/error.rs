use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

/// Errors surfaced by waits and by momentary states that carry an issue.
///
/// The type is cheap to clone because a cached momentary state hands the same issue to every
/// reader that observes it.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The wait was interrupted, either because the awaiting context was cancelled or because
    /// the promise was cancelled (explicitly or by dropping every handle to it).
    #[error("the operation was cancelled")]
    Cancelled,

    /// The state has never received a real value.
    #[error("the state has not been initialized with a value")]
    Uninitialized,

    /// An error produced by user code (a transform or combine function, or an explicit
    /// [`Promise::fail()`][crate::Promise::fail]), stored verbatim.
    #[error("{0}")]
    Failed(Arc<dyn StdError + Send + Sync>),
}

impl Error {
    /// Wraps an arbitrary error so it can be carried through promises and momentary states.
    ///
    /// # Example
    ///
    /// ```rust
    /// use tidings::Error;
    ///
    /// let error = Error::failed("sensor offline");
    /// assert_eq!(error.to_string(), "sensor offline");
    /// ```
    pub fn failed(error: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self::Failed(Arc::from(error.into()))
    }

    /// Whether this error represents a cancelled wait.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether this error represents a state that never received a value.
    #[must_use]
    pub fn is_uninitialized(&self) -> bool {
        matches!(self, Self::Uninitialized)
    }

    /// Returns the wrapped user error, if this is a [`Error::Failed`].
    #[must_use]
    pub fn as_failure(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        match self {
            Self::Failed(inner) => Some(&**inner),
            Self::Cancelled | Self::Uninitialized => None,
        }
    }
}

/// A specialized `Result` type for tidings operations, returning the crate's [`Error`] type
/// as the error value.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Error: Send, Sync, Clone, fmt::Debug);

    #[derive(Debug)]
    struct SensorOffline;

    impl fmt::Display for SensorOffline {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "sensor offline")
        }
    }

    impl StdError for SensorOffline {}

    #[test]
    fn failed_keeps_original_error() {
        let error = Error::failed(SensorOffline);

        let inner = error.as_failure().unwrap();
        assert!(inner.downcast_ref::<SensorOffline>().is_some());
        assert_eq!(error.to_string(), "sensor offline");
    }

    #[test]
    fn clones_share_the_failure() {
        let error = Error::failed(SensorOffline);
        let clone = error.clone();

        match (error, clone) {
            (Error::Failed(a), Error::Failed(b)) => assert!(Arc::ptr_eq(&a, &b)),
            _ => panic!("expected two failures"),
        }
    }

    #[test]
    fn kind_predicates() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::Cancelled.is_uninitialized());
        assert!(Error::Uninitialized.is_uninitialized());
        assert!(Error::Uninitialized.as_failure().is_none());
        assert!(!Error::failed("boom").is_cancelled());
    }
}
