//! Explicit cooperative cancellation.
//!
//! Dropping a future is the native way to cancel it in Rust, and every wait in this crate
//! reacts to that by cancelling its promise. A [`CancellationToken`] adds the other half: a
//! value that can be handed to whoever decides that a wait is no longer wanted, without
//! giving them ownership of the future itself.

use std::any::type_name;
use std::fmt;
use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;
use tracing::trace;

use crate::{Error, Result, never};

#[derive(Debug, Default)]
struct TokenState {
    cancelled: bool,
    next_registration: u64,
    waiting: Vec<(u64, Waker)>,
}

/// Cancels every wait that was wrapped with it, now or in the future.
///
/// Clones share the same cancellation: cancelling any clone cancels them all.
///
/// # Example
///
/// ```rust
/// use tidings::{CancellationToken, never};
/// # use futures::executor::block_on;
///
/// # block_on(async {
/// let token = CancellationToken::new();
/// let wait = token.run_until_cancelled(never::<u32>());
///
/// token.cancel();
///
/// assert!(wait.await.unwrap_err().is_cancelled());
/// # });
/// ```
#[derive(Clone, Default)]
pub struct CancellationToken {
    state: Arc<Mutex<TokenState>>,
}

impl CancellationToken {
    /// Creates a token that is not yet cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the token, waking every wait wrapped with it. Idempotent.
    pub fn cancel(&self) {
        let waiting = {
            let mut state = self.state.lock();

            if state.cancelled {
                return;
            }

            state.cancelled = true;
            mem::take(&mut state.waiting)
        };

        trace!(waiting = waiting.len(), "cancellation token fired");

        for (_, waker) in waiting {
            waker.wake();
        }
    }

    /// Whether [`cancel()`][Self::cancel] has been called on this token or any clone.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.lock().cancelled
    }

    /// Wraps a wait so that it ends with [`Error::Cancelled`] once this token is cancelled.
    ///
    /// On cancellation the inner future is dropped, which cancels whatever promise it was
    /// waiting on and runs the cancellation handlers registered for it. If the token is
    /// already cancelled, the inner future is never polled.
    pub fn run_until_cancelled<F, T>(&self, wait: F) -> Cancellable<F>
    where
        F: Future<Output = Result<T>>,
    {
        Cancellable {
            token: self.clone(),
            inner: Some(Box::pin(wait)),
            registration: None,
        }
    }

    /// Suspends until the token is cancelled.
    pub async fn cancelled(&self) {
        // The wait can only end through the token.
        let outcome = self.run_until_cancelled(never::<()>()).await;
        debug_assert!(outcome.is_err());
    }

    /// Returns `true` if cancelled, otherwise (re)registers the waker under `registration`.
    fn register(&self, registration: &mut Option<u64>, waker: &Waker) -> bool {
        let mut state = self.state.lock();

        if state.cancelled {
            return true;
        }

        if let Some(id) = *registration {
            if let Some((_, existing)) = state.waiting.iter_mut().find(|(key, _)| *key == id) {
                if !existing.will_wake(waker) {
                    existing.clone_from(waker);
                }

                return false;
            }
        }

        let id = state.next_registration;
        state.next_registration = state.next_registration.wrapping_add(1);
        state.waiting.push((id, waker.clone()));
        *registration = Some(id);

        false
    }

    fn unregister(&self, registration: &mut Option<u64>) {
        if let Some(id) = registration.take() {
            self.state.lock().waiting.retain(|(key, _)| *key != id);
        }
    }
}

impl fmt::Debug for CancellationToken {
    #[cfg_attr(test, mutants::skip)] // No API contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();

        f.debug_struct(type_name::<Self>())
            .field("cancelled", &state.cancelled)
            .field("waiting", &state.waiting.len())
            .finish()
    }
}

/// A wait that also ends when its [`CancellationToken`] is cancelled.
///
/// Created by [`CancellationToken::run_until_cancelled()`].
#[must_use = "futures do nothing unless awaited"]
pub struct Cancellable<F> {
    token: CancellationToken,

    // `None` once the wait has ended, which drops (and thereby cancels) the inner future.
    inner: Option<Pin<Box<F>>>,

    registration: Option<u64>,
}

impl<F, T> Future for Cancellable<F>
where
    F: Future<Output = Result<T>>,
{
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        assert!(
            this.inner.is_some(),
            "cancellable wait polled after completion"
        );

        if this.token.register(&mut this.registration, cx.waker()) {
            this.inner = None;
            this.registration = None;
            return Poll::Ready(Err(Error::Cancelled));
        }

        let Some(inner) = this.inner.as_mut() else {
            unreachable!("checked above");
        };

        match inner.as_mut().poll(cx) {
            Poll::Ready(outcome) => {
                this.inner = None;
                this.token.unregister(&mut this.registration);
                Poll::Ready(outcome)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<F> Drop for Cancellable<F> {
    fn drop(&mut self) {
        self.token.unregister(&mut self.registration);
    }
}

impl<F> fmt::Debug for Cancellable<F> {
    #[cfg_attr(test, mutants::skip)] // No API contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("token", &self.token)
            .field("finished", &self.inner.is_none())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    use futures::executor::block_on;
    use futures::task::noop_waker_ref;
    use static_assertions::assert_impl_all;
    use testing::with_watchdog;

    use super::*;
    use crate::{Promise, future};

    assert_impl_all!(CancellationToken: Send, Sync, Clone);
    assert_impl_all!(Cancellable<crate::Completion<'static, u32>>: Send, Unpin);

    #[test]
    fn passes_through_result_when_not_cancelled() {
        with_watchdog(|| {
            let token = CancellationToken::new();

            let value = block_on(token.run_until_cancelled(future(|promise| {
                promise.fulfill(42);
            })));

            assert_eq!(value.unwrap(), 42);
            assert!(!token.is_cancelled());
        });
    }

    #[test]
    fn already_cancelled_token_never_starts_the_wait() {
        with_watchdog(|| {
            let token = CancellationToken::new();
            token.cancel();

            let started = Arc::new(AtomicUsize::new(0));
            let result = block_on(token.run_until_cancelled(future::<u32, _>({
                let started = Arc::clone(&started);
                move |_| {
                    started.fetch_add(1, Ordering::SeqCst);
                }
            })));

            assert!(result.unwrap_err().is_cancelled());
            assert_eq!(started.load(Ordering::SeqCst), 0);
        });
    }

    #[test]
    fn cancelling_pending_future_runs_handler_once() {
        with_watchdog(|| {
            let token = CancellationToken::new();
            let runs = Arc::new(AtomicUsize::new(0));
            let stash: Arc<Mutex<Option<Promise<u32>>>> = Arc::new(Mutex::new(None));

            let canceller = thread::spawn({
                let token = token.clone();
                move || {
                    thread::sleep(Duration::from_millis(10));
                    token.cancel();
                    token.cancel();
                }
            });

            let result = block_on(token.run_until_cancelled(future({
                let runs = Arc::clone(&runs);
                let stash = Arc::clone(&stash);
                move |promise: Promise<u32>| {
                    promise.set_cancellation_handler(move || {
                        runs.fetch_add(1, Ordering::SeqCst);
                    });
                    *stash.lock() = Some(promise);
                }
            })));

            canceller.join().unwrap();

            assert!(result.unwrap_err().is_cancelled());
            assert_eq!(runs.load(Ordering::SeqCst), 1);
            assert!(stash.lock().as_ref().unwrap().is_resolved());
        });
    }

    #[test]
    fn cancelled_wakes_up_after_cancel() {
        with_watchdog(|| {
            let token = CancellationToken::new();

            let canceller = thread::spawn({
                let token = token.clone();
                move || {
                    thread::sleep(Duration::from_millis(10));
                    token.cancel();
                }
            });

            block_on(token.cancelled());
            canceller.join().unwrap();

            assert!(token.is_cancelled());
        });
    }

    #[test]
    fn finished_waits_unregister() {
        with_watchdog(|| {
            let token = CancellationToken::new();

            for i in 0..10 {
                let value = block_on(token.run_until_cancelled(future(move |promise| {
                    promise.fulfill(i);
                })));
                assert_eq!(value.unwrap(), i);
            }

            assert!(token.state.lock().waiting.is_empty());
        });
    }

    #[test]
    fn repolling_keeps_one_registration() {
        let token = CancellationToken::new();
        let mut wait = token.run_until_cancelled(never::<u8>());
        let mut cx = Context::from_waker(noop_waker_ref());

        for _ in 0..5 {
            assert!(Pin::new(&mut wait).poll(&mut cx).is_pending());
        }

        assert_eq!(token.state.lock().waiting.len(), 1);

        token.cancel();
        assert!(matches!(
            Pin::new(&mut wait).poll(&mut cx),
            Poll::Ready(Err(Error::Cancelled))
        ));
    }
}
