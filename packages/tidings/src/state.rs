use std::future::Future;

use crate::{Error, Generation, Result};

/// Immutable snapshot of an observable source: either a value or the issue that prevented
/// one from being produced, stamped with the generation it was observed at.
///
/// # Example
///
/// ```rust
/// use tidings::{Error, Generation, MomentaryState};
///
/// let generation = Generation::next();
///
/// let ok = MomentaryState::capture(generation, || Ok(5));
/// assert_eq!(*ok.value().unwrap(), 5);
/// assert_eq!(ok.generation(), generation);
///
/// let failed = MomentaryState::<u32>::capture(generation, || Err(Error::failed("no reading")));
/// assert_eq!(failed.value().unwrap_err().to_string(), "no reading");
/// ```
#[derive(Clone, Debug)]
#[expect(
    clippy::exhaustive_enums,
    reason = "a state is either a value or an issue, there is no third outcome"
)]
pub enum MomentaryState<V> {
    /// A value was available.
    Value {
        /// The observed value.
        value: V,
        /// When it was observed.
        generation: Generation,
    },

    /// No value could be produced.
    Issue {
        /// Why no value could be produced.
        error: Error,
        /// When the failure was observed.
        generation: Generation,
    },
}

impl<V> MomentaryState<V> {
    /// A value observed at `generation`.
    #[must_use]
    pub const fn new(value: V, generation: Generation) -> Self {
        Self::Value { value, generation }
    }

    /// An issue observed at `generation`.
    #[must_use]
    pub const fn issue(error: Error, generation: Generation) -> Self {
        Self::Issue { error, generation }
    }

    /// The state of a source that never received a value.
    #[must_use]
    pub const fn uninitialized() -> Self {
        Self::Issue {
            error: Error::Uninitialized,
            generation: Generation::UNINITIALIZED,
        }
    }

    /// Runs a fallible computation and captures its outcome at `generation`.
    pub fn capture<F>(generation: Generation, compute: F) -> Self
    where
        F: FnOnce() -> Result<V>,
    {
        match compute() {
            Ok(value) => Self::Value { value, generation },
            Err(error) => Self::Issue { error, generation },
        }
    }

    /// Runs a fallible computation and captures its outcome at a freshly minted generation.
    pub fn capture_next<F>(compute: F) -> Self
    where
        F: FnOnce() -> Result<V>,
    {
        Self::capture(Generation::next(), compute)
    }

    /// Awaits a fallible computation and captures its outcome at `generation`.
    pub async fn capture_async<F>(generation: Generation, compute: F) -> Self
    where
        F: Future<Output = Result<V>>,
    {
        match compute.await {
            Ok(value) => Self::Value { value, generation },
            Err(error) => Self::Issue { error, generation },
        }
    }

    /// The generation this state was observed at.
    #[must_use]
    pub const fn generation(&self) -> Generation {
        match self {
            Self::Value { generation, .. } | Self::Issue { generation, .. } => *generation,
        }
    }

    /// The value, or a clone of the stored issue.
    pub fn value(&self) -> Result<&V> {
        match self {
            Self::Value { value, .. } => Ok(value),
            Self::Issue { error, .. } => Err(error.clone()),
        }
    }

    /// The value, or the stored issue.
    pub fn into_value(self) -> Result<V> {
        match self {
            Self::Value { value, .. } => Ok(value),
            Self::Issue { error, .. } => Err(error),
        }
    }

    /// Whether this state carries a value.
    #[must_use]
    pub const fn is_value(&self) -> bool {
        matches!(self, Self::Value { .. })
    }

    /// Whether this is the state of a source that never received a value.
    #[must_use]
    pub fn is_uninitialized(&self) -> bool {
        match self {
            Self::Issue { error, .. } => error.is_uninitialized(),
            Self::Value { .. } => false,
        }
    }
}

impl<V> Default for MomentaryState<V> {
    fn default() -> Self {
        Self::uninitialized()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use futures::executor::block_on;
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(MomentaryState<String>: Send, Sync, Clone);

    #[test]
    fn uninitialized_state() {
        let state = MomentaryState::<u32>::uninitialized();

        assert!(state.is_uninitialized());
        assert!(!state.is_value());
        assert_eq!(state.generation(), Generation::UNINITIALIZED);
        assert!(state.value().unwrap_err().is_uninitialized());
        assert!(MomentaryState::<u32>::default().is_uninitialized());
    }

    #[test]
    fn capture_next_mints_fresh_generation() {
        let before = Generation::next();
        let state = MomentaryState::capture_next(|| Ok("hello"));
        let after = Generation::next();

        assert!(state.generation() > before);
        assert!(state.generation() < after);
        assert_eq!(state.into_value().unwrap(), "hello");
    }

    #[test]
    fn capture_keeps_issue_and_generation() {
        let generation = Generation::next();
        let state = MomentaryState::<u32>::capture(generation, || Err(Error::failed("broken")));

        assert_eq!(state.generation(), generation);
        assert!(!state.is_uninitialized());

        let error = state.into_value().unwrap_err();
        assert_eq!(error.to_string(), "broken");
    }

    #[test]
    fn capture_async_awaits_computation() {
        let generation = Generation::next();
        let state = block_on(MomentaryState::capture_async(generation, async { Ok(3_u8) }));

        assert_eq!(*state.value().unwrap(), 3);
        assert_eq!(state.generation(), generation);
    }
}
