//! Single-resolution cancellable completions.
//!
//! A [`Completion`] is the awaiting side and a [`Promise`] is the resolving side of one
//! suspension. The pair is created by [`future()`], which hands the promise to an operation
//! once the completion has installed its waker.

use std::any::type_name;
use std::fmt;
use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use futures::future::{BoxFuture, pending};
use parking_lot::Mutex;
use tracing::trace;

use crate::{Error, Result};

type CancellationHandler = Box<dyn FnOnce() + Send>;

/// State of the shared core behind a promise and its completion.
enum State<T> {
    /// Not resolved yet. The completion may or may not have been polled.
    Pending {
        waker: Option<Waker>,
        on_cancel: Option<CancellationHandler>,
    },

    /// Resolved but the completion has not yet picked up the outcome.
    Resolved(Result<T>),

    /// The completion has returned the outcome.
    Consumed,
}

/// What a winning resolution took out of the pending state. Acted upon after unlocking.
struct Settled {
    waker: Option<Waker>,
    on_cancel: Option<CancellationHandler>,
}

impl Settled {
    fn wake(&mut self) {
        if let Some(waker) = self.waker.take() {
            waker.wake();
        }
    }
}

pub(crate) struct Core<T> {
    state: Mutex<State<T>>,

    // Kept apart from `state` so drivers can resolve the promise while being polled.
    drivers: Mutex<Vec<BoxFuture<'static, ()>>>,
}

impl<T> Core<T>
where
    T: Send + 'static,
{
    fn new() -> Self {
        Self {
            state: Mutex::new(State::Pending {
                waker: None,
                on_cancel: None,
            }),
            drivers: Mutex::new(Vec::new()),
        }
    }

    /// Takes the pending state out and replaces it with the outcome, if we are first.
    #[cfg_attr(test, mutants::skip)] // Critical primitive - causes test timeouts if tampered.
    fn settle(&self, outcome: Result<T>) -> Option<Settled> {
        let previous = {
            let mut state = self.state.lock();

            if !matches!(*state, State::Pending { .. }) {
                return None;
            }

            mem::replace(&mut *state, State::Resolved(outcome))
        };

        match previous {
            State::Pending { waker, on_cancel } => Some(Settled { waker, on_cancel }),
            _ => unreachable!("we are re-matching an already matched pattern"),
        }
    }

    fn fulfill(&self, value: T) -> bool {
        let Some(mut settled) = self.settle(Ok(value)) else {
            return false;
        };

        settled.wake();
        // A handler that will never run is dropped here, outside the lock.
        true
    }

    fn fail(&self, error: Error) -> bool {
        let Some(mut settled) = self.settle(Err(error)) else {
            return false;
        };

        settled.wake();
        true
    }

    fn cancel(&self) -> bool {
        let Some(mut settled) = self.settle(Err(Error::Cancelled)) else {
            return false;
        };

        settled.wake();

        if let Some(handler) = settled.on_cancel.take() {
            handler();
        }

        true
    }

    fn is_resolved(&self) -> bool {
        !matches!(*self.state.lock(), State::Pending { .. })
    }

    fn set_cancellation_handler(&self, handler: CancellationHandler) {
        let mut state = self.state.lock();

        match &mut *state {
            State::Pending { on_cancel, .. } => {
                *on_cancel = Some(match on_cancel.take() {
                    None => handler,
                    Some(previous) => Box::new(move || {
                        previous();
                        handler();
                    }),
                });
            }
            State::Resolved(_) | State::Consumed => {
                drop(state);
                handler();
            }
        }
    }

    fn attach_driver(&self, driver: BoxFuture<'static, ()>) {
        let waker = match &*self.state.lock() {
            State::Pending { waker, .. } => waker.clone(),
            State::Resolved(_) | State::Consumed => return,
        };

        self.drivers.lock().push(driver);

        // The completion may have finished (and cleared its drivers) between our check and
        // the push. Drivers may hold the promise, so leaving one behind would leak the core.
        if self.is_resolved() {
            drop(self.take_drivers());
            return;
        }

        if let Some(waker) = waker {
            waker.wake();
        }
    }

    fn take_drivers(&self) -> Vec<BoxFuture<'static, ()>> {
        mem::take(&mut *self.drivers.lock())
    }

    #[cfg_attr(test, mutants::skip)] // Critical for code execution to occur in async contexts.
    fn poll_drivers(&self, cx: &mut Context<'_>) {
        let mut drivers = self.take_drivers();

        if drivers.is_empty() {
            return;
        }

        drivers.retain_mut(|driver| driver.as_mut().poll(cx).is_pending());

        // Drivers attached while we were polling land behind the ones we already had.
        let mut slot = self.drivers.lock();
        drivers.append(&mut slot);
        *slot = drivers;
    }

    // We are intended to be polled via Future::poll, so we have an equivalent signature here.
    #[cfg_attr(test, mutants::skip)] // Critical for code execution to occur in async contexts.
    fn poll_outcome(&self, waker: &Waker) -> Option<Result<T>> {
        let mut state = self.state.lock();

        match &mut *state {
            State::Pending {
                waker: stored_waker,
                ..
            } => {
                match stored_waker {
                    Some(existing) if existing.will_wake(waker) => {}
                    _ => *stored_waker = Some(waker.clone()),
                }

                None
            }
            State::Resolved(_) => match mem::replace(&mut *state, State::Consumed) {
                State::Resolved(outcome) => Some(outcome),
                _ => unreachable!("we are re-matching an already matched pattern"),
            },
            State::Consumed => {
                // The futures API contract allows us to panic in this situation.
                panic!("completion polled after its outcome was already returned");
            }
        }
    }
}

/// Drops together with the last [`Promise`] clone and cancels anything still pending.
struct Resolver<T>
where
    T: Send + 'static,
{
    core: Arc<Core<T>>,
}

impl<T> Drop for Resolver<T>
where
    T: Send + 'static,
{
    fn drop(&mut self) {
        if self.core.cancel() {
            trace!(
                value_type = type_name::<T>(),
                "promise dropped without resolution, cancelled"
            );
        }
    }
}

/// The resolving side of a [`Completion`].
///
/// Exactly one of [`fulfill()`][Self::fulfill], [`fail()`][Self::fail] and
/// [`cancel()`][Self::cancel] takes effect; every later call is a no-op. Clones share the same
/// resolution, which lets one promise be registered with several sources where the first to
/// notify wins.
///
/// When the last clone of an unresolved promise is dropped, the promise resolves as
/// cancelled, so a waiter can never be left dangling.
///
/// # Example
///
/// ```rust
/// use tidings::future;
/// # use futures::executor::block_on;
///
/// # block_on(async {
/// let value = future(|promise| {
///     promise.fulfill(42);
///     promise.fulfill(99);
///     promise.cancel();
/// })
/// .await
/// .unwrap();
///
/// assert_eq!(value, 42);
/// # });
/// ```
pub struct Promise<T>
where
    T: Send + 'static,
{
    resolver: Arc<Resolver<T>>,
}

impl<T> Promise<T>
where
    T: Send + 'static,
{
    fn new(core: Arc<Core<T>>) -> Self {
        Self {
            resolver: Arc::new(Resolver { core }),
        }
    }

    /// Resolves the promise with a value, unless it is already resolved.
    ///
    /// Returns whether this call resolved the promise.
    #[expect(clippy::must_use_candidate, reason = "callers rarely care who won the race")]
    pub fn fulfill(&self, value: T) -> bool {
        self.resolver.core.fulfill(value)
    }

    /// Resolves the promise with an error, unless it is already resolved.
    ///
    /// Returns whether this call resolved the promise.
    #[expect(clippy::must_use_candidate, reason = "callers rarely care who won the race")]
    pub fn fail(&self, error: Error) -> bool {
        self.resolver.core.fail(error)
    }

    /// Resolves the promise as cancelled and runs the cancellation handler, unless the promise
    /// is already resolved.
    ///
    /// Returns whether this call resolved the promise.
    #[expect(clippy::must_use_candidate, reason = "callers rarely care who won the race")]
    pub fn cancel(&self) -> bool {
        self.resolver.core.cancel()
    }

    /// Whether the promise has already been resolved in any way.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.resolver.core.is_resolved()
    }

    /// Registers a side effect to run if the promise gets cancelled.
    ///
    /// If the promise is already resolved, the handler runs immediately on the calling thread.
    /// If a handler is already registered, both run on cancellation, oldest first. Fulfilling
    /// or failing the promise discards the handler without running it.
    pub fn set_cancellation_handler<H>(&self, handler: H)
    where
        H: FnOnce() + Send + 'static,
    {
        self.resolver.core.set_cancellation_handler(Box::new(handler));
    }

    /// Attaches a future that the waiting [`Completion`] polls until the promise resolves.
    ///
    /// This lets work that must happen before the promise resolves (a sleep, for example) run
    /// on the waiter's own task without this crate owning an executor. When the wait ends for
    /// any reason, the driver is dropped, which cancels it.
    ///
    /// A driver attached to an already resolved promise is dropped immediately.
    ///
    /// # Example
    ///
    /// ```rust
    /// use tidings::future;
    /// # use futures::executor::block_on;
    ///
    /// # block_on(async {
    /// let value = future(|promise| {
    ///     let resolver = promise.clone();
    ///     promise.drive(async move {
    ///         resolver.fulfill("driven");
    ///     });
    /// })
    /// .await
    /// .unwrap();
    ///
    /// assert_eq!(value, "driven");
    /// # });
    /// ```
    pub fn drive<D>(&self, driver: D)
    where
        D: Future<Output = ()> + Send + 'static,
    {
        self.resolver.core.attach_driver(Box::pin(driver));
    }
}

impl<T> Clone for Promise<T>
where
    T: Send + 'static,
{
    fn clone(&self) -> Self {
        Self {
            resolver: Arc::clone(&self.resolver),
        }
    }
}

impl<T> fmt::Debug for Promise<T>
where
    T: Send + 'static,
{
    #[cfg_attr(test, mutants::skip)] // No API contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("resolved", &self.is_resolved())
            .finish_non_exhaustive()
    }
}

type Operation<'a, T> = Box<dyn FnOnce(Promise<T>) + Send + 'a>;

/// The awaiting side of a [`Promise`], created by [`future()`].
///
/// Resolves to `Ok(value)` when fulfilled, to the error when failed and to
/// [`Error::Cancelled`] when cancelled. Dropping a completion before it resolves cancels its
/// promise, running any registered cancellation handler.
#[must_use = "futures do nothing unless awaited"]
pub struct Completion<'a, T>
where
    T: Send + 'static,
{
    core: Arc<Core<T>>,

    // Present until the first poll has installed the waker and handed out the promise.
    operation: Option<Operation<'a, T>>,
}

impl<T> Future for Completion<'_, T>
where
    T: Send + 'static,
{
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if let Some(operation) = this.operation.take() {
            // The waiting slot must exist before anyone can resolve the promise.
            let installed = this.core.poll_outcome(cx.waker());
            debug_assert!(installed.is_none(), "nobody can resolve an unpublished promise");

            operation(Promise::new(Arc::clone(&this.core)));
        }

        this.core.poll_drivers(cx);

        this.core
            .poll_outcome(cx.waker())
            .map_or(Poll::Pending, Poll::Ready)
    }
}

impl<T> Drop for Completion<'_, T>
where
    T: Send + 'static,
{
    fn drop(&mut self) {
        if self.core.cancel() {
            trace!(
                value_type = type_name::<T>(),
                "completion dropped while waiting, promise cancelled"
            );
        }

        // Drivers may own promise clones; releasing them breaks the cycle back to the core.
        drop(self.core.take_drivers());
    }
}

impl<T> fmt::Debug for Completion<'_, T>
where
    T: Send + 'static,
{
    #[cfg_attr(test, mutants::skip)] // No API contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("started", &self.operation.is_none())
            .field("resolved", &self.core.is_resolved())
            .finish_non_exhaustive()
    }
}

/// Suspends until the promise handed to `operation` is resolved.
///
/// The operation runs exactly once, on the first poll, after the completion is ready to be
/// woken. It may resolve the promise synchronously, store it for later, register it with
/// sources that notify it, or drop it (which resolves the wait as cancelled).
///
/// # Example
///
/// ```rust
/// use std::thread;
///
/// use tidings::future;
/// # use futures::executor::block_on;
///
/// # block_on(async {
/// let value = future(|promise| {
///     thread::spawn(move || {
///         promise.fulfill(7);
///     });
/// })
/// .await
/// .unwrap();
///
/// assert_eq!(value, 7);
/// # });
/// ```
pub fn future<'a, T, F>(operation: F) -> Completion<'a, T>
where
    T: Send + 'static,
    F: FnOnce(Promise<T>) + Send + 'a,
{
    Completion {
        core: Arc::new(Core::new()),
        operation: Some(Box::new(operation)),
    }
}

/// Suspends until cancelled.
///
/// The returned completion never resolves on its own; it ends with [`Error::Cancelled`] only
/// when dropped or when wrapped by a cancelled
/// [`CancellationToken`][crate::CancellationToken].
pub fn never<T>() -> Completion<'static, T>
where
    T: Send + 'static,
{
    future(|promise: Promise<T>| {
        let keep_alive = promise.clone();
        promise.drive(async move {
            pending::<()>().await;
            drop(keep_alive);
        });
    })
}
