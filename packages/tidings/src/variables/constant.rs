use std::any::type_name;
use std::fmt;

use futures::FutureExt;
use futures::future::{BoxFuture, ready};
use tracing::trace;

use crate::{Error, Generation, MomentaryState, Promise, Updatable};

/// An observable value that never changes.
///
/// Useful wherever an [`Updatable`] is expected but the value is fixed. Waiting for an update
/// of a constant that has already been observed ends with
/// [`Error::Cancelled`][crate::Error::Cancelled], as no update can ever arrive.
#[derive(Clone)]
pub struct Constant<V>
where
    V: Clone + Send + Sync + 'static,
{
    state: MomentaryState<V>,
}

impl<V> Constant<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// A constant value, stamped with a fresh generation.
    #[must_use]
    pub fn new(value: V) -> Self {
        Self {
            state: MomentaryState::new(value, Generation::next()),
        }
    }

    /// A constant issue, stamped with a fresh generation.
    #[must_use]
    pub fn issue(error: Error) -> Self {
        Self {
            state: MomentaryState::issue(error, Generation::next()),
        }
    }

    /// A constant that never receives a value.
    #[must_use]
    pub fn uninitialized() -> Self {
        Self {
            state: MomentaryState::uninitialized(),
        }
    }
}

impl<V> Updatable for Constant<V>
where
    V: Clone + Send + Sync + 'static,
{
    type Value = V;

    fn generation(&self) -> Generation {
        self.state.generation()
    }

    fn state(&self) -> BoxFuture<'_, MomentaryState<V>> {
        ready(self.state.clone()).boxed()
    }

    fn notify_on_update(&self, promise: Promise<()>, from: Generation) {
        if self.state.generation() > from {
            promise.fulfill(());
            return;
        }

        // Dropping the promise resolves the wait as cancelled unless another source holds it.
        trace!(
            value_type = type_name::<V>(),
            "constant will never update, releasing waiter"
        );
    }
}

impl<V> fmt::Debug for Constant<V>
where
    V: Clone + fmt::Debug + Send + Sync + 'static,
{
    #[cfg_attr(test, mutants::skip)] // No API contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use futures::executor::block_on;
    use static_assertions::assert_impl_all;
    use testing::with_watchdog;

    use super::*;
    use crate::UpdatableExt;

    assert_impl_all!(Constant<String>: Send, Sync, Clone);

    #[test]
    fn value_constant() {
        let constant = Constant::new(12);

        assert!(!constant.generation().is_uninitialized());
        assert_eq!(block_on(constant.value()).unwrap(), 12);
    }

    #[test]
    fn issue_constant() {
        let constant = Constant::<u8>::issue(Error::failed("no sensor"));

        assert!(!constant.generation().is_uninitialized());
        assert_eq!(block_on(constant.value()).unwrap_err().to_string(), "no sensor");
    }

    #[test]
    fn uninitialized_constant() {
        let constant = Constant::<u8>::uninitialized();

        assert_eq!(constant.generation(), Generation::UNINITIALIZED);
        assert!(block_on(constant.value()).unwrap_err().is_uninitialized());
    }

    #[test]
    fn never_notifies_from_current_generation() {
        with_watchdog(|| {
            let constant = Constant::new("still");

            let result = block_on(constant.wait_for_update());
            assert!(result.unwrap_err().is_cancelled());
        });
    }

    #[test]
    fn notifies_from_older_generation() {
        with_watchdog(|| {
            let constant = Constant::new("still");

            block_on(constant.wait_for_update_from(Generation::UNINITIALIZED)).unwrap();
        });
    }
}
