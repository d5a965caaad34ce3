use std::any::type_name;
use std::fmt;
use std::future::Future;

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::variables::{Derivation, Derived};
use crate::{Generation, MomentaryState, Promise, Result, Updatable};

/// Derivation that maps the state of one source with a synchronous function.
pub struct Transform<S, F> {
    source: S,
    transform: F,
}

impl<S, F, T> Derivation for Transform<S, F>
where
    S: Updatable + 'static,
    F: Fn(MomentaryState<S::Value>) -> Result<T> + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    type Value = T;

    fn generation(&self) -> Generation {
        self.source.generation()
    }

    fn compute(&self) -> BoxFuture<'_, MomentaryState<T>> {
        async move {
            let state = self.source.state().await;
            let generation = state.generation();

            MomentaryState::capture(generation, || (self.transform)(state))
        }
        .boxed()
    }

    fn notify_on_update(&self, promise: Promise<()>, from: Generation) {
        self.source.notify_on_update(promise, from);
    }
}

impl<S, F> fmt::Debug for Transform<S, F> {
    #[cfg_attr(test, mutants::skip)] // No API contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>()).finish_non_exhaustive()
    }
}

/// Derivation that maps the state of one source with an asynchronous function.
pub struct TransformAsync<S, F> {
    source: S,
    transform: F,
}

impl<S, F, Fut, T> Derivation for TransformAsync<S, F>
where
    S: Updatable + 'static,
    F: Fn(MomentaryState<S::Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    type Value = T;

    fn generation(&self) -> Generation {
        self.source.generation()
    }

    fn compute(&self) -> BoxFuture<'_, MomentaryState<T>> {
        async move {
            let state = self.source.state().await;
            let generation = state.generation();

            MomentaryState::capture_async(generation, (self.transform)(state)).await
        }
        .boxed()
    }

    fn notify_on_update(&self, promise: Promise<()>, from: Generation) {
        self.source.notify_on_update(promise, from);
    }
}

impl<S, F> fmt::Debug for TransformAsync<S, F> {
    #[cfg_attr(test, mutants::skip)] // No API contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>()).finish_non_exhaustive()
    }
}

/// A variable computed from one source with a synchronous function.
pub type Transformed<S, F> = Derived<Transform<S, F>>;

/// A variable computed from one source with an asynchronous function.
pub type TransformedAsync<S, F> = Derived<TransformAsync<S, F>>;

/// Maps a source through `transform`, which receives the full source state.
///
/// The result (value or error) carries the source state's generation and is cached until the
/// source updates.
///
/// # Example
///
/// ```rust
/// use tidings::{UpdatableExt, Variable, transformed};
/// # use futures::executor::block_on;
///
/// # block_on(async {
/// let celsius = Variable::new(100.0_f64);
/// let fahrenheit = transformed(celsius.clone(), |c| Ok(c.into_value()? * 9.0 / 5.0 + 32.0));
///
/// assert_eq!(fahrenheit.value().await.unwrap(), 212.0);
/// # });
/// ```
#[must_use]
pub fn transformed<S, F, T>(source: S, transform: F) -> Transformed<S, F>
where
    S: Updatable + 'static,
    F: Fn(MomentaryState<S::Value>) -> Result<T> + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    Derived::new(Transform { source, transform })
}

/// Maps a source through the asynchronous `transform`, which receives the full source state.
///
/// Behaves like [`transformed()`]; the transform runs on the task of whichever reader
/// triggered the recomputation.
#[must_use]
pub fn transformed_async<S, F, Fut, T>(source: S, transform: F) -> TransformedAsync<S, F>
where
    S: Updatable + 'static,
    F: Fn(MomentaryState<S::Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    Derived::new(TransformAsync { source, transform })
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use futures::executor::block_on;
    use static_assertions::assert_impl_all;
    use testing::with_watchdog;

    use super::*;
    use crate::{Constant, Error, UpdatableExt, Variable, future};

    type Doubled = Transformed<Variable<u32>, fn(MomentaryState<u32>) -> Result<u32>>;

    assert_impl_all!(Doubled: Send, Sync, Clone);

    #[test]
    fn follows_source() {
        with_watchdog(|| {
            let source = Variable::new(2_u32);
            let doubled = source
                .clone()
                .transformed(|state| Ok(state.into_value()? * 2));

            assert_eq!(block_on(doubled.value()).unwrap(), 4);

            source.set(21);
            assert_eq!(block_on(doubled.value()).unwrap(), 42);
            assert_eq!(doubled.generation(), source.generation());
        });
    }

    #[test]
    fn recomputes_only_after_source_update() {
        with_watchdog(|| {
            let calls = Arc::new(AtomicUsize::new(0));
            let source = Variable::new("a");

            let upper = transformed(source.clone(), {
                let calls = Arc::clone(&calls);
                move |state| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(state.into_value()?.to_uppercase())
                }
            });

            assert_eq!(block_on(upper.value()).unwrap(), "A");
            assert_eq!(block_on(upper.value()).unwrap(), "A");
            assert_eq!(calls.load(Ordering::SeqCst), 1);

            source.set("b");
            assert_eq!(block_on(upper.value()).unwrap(), "B");
            assert_eq!(calls.load(Ordering::SeqCst), 2);
        });
    }

    #[test]
    fn transform_can_recover_from_issues() {
        with_watchdog(|| {
            let source = Constant::<u8>::issue(Error::failed("offline"));
            let with_default = transformed(source, |state| Ok(state.into_value().unwrap_or(0)));

            assert_eq!(block_on(with_default.value()).unwrap(), 0);
        });
    }

    #[test]
    fn transform_errors_become_issues() {
        with_watchdog(|| {
            let source = Variable::new(-1_i32);
            let root = transformed(source.clone(), |state| {
                let value = state.into_value()?;
                u32::try_from(value).map_err(Error::failed)
            });

            assert!(block_on(root.value()).is_err());

            source.set(9);
            assert_eq!(block_on(root.value()).unwrap(), 9);
        });
    }

    // Resolved from another thread to exercise a real suspension.
    async fn square_elsewhere(state: MomentaryState<u64>) -> Result<u64> {
        let value = state.into_value()?;

        future(move |promise| {
            thread::spawn(move || {
                promise.fulfill(value * value);
            });
        })
        .await
    }

    #[test]
    fn async_transform_follows_source() {
        with_watchdog(|| {
            let source = Variable::new(5_u64);

            let squared = source.clone().transformed_async(square_elsewhere);

            assert_eq!(block_on(squared.value()).unwrap(), 25);

            source.set(6);
            assert_eq!(block_on(squared.value()).unwrap(), 36);
        });
    }
}
