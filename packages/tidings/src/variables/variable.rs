use std::any::type_name;
use std::fmt;
use std::mem;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, ready};
use parking_lot::Mutex;

use crate::generation::AtomicGeneration;
use crate::waiters::WaiterList;
use crate::{Generation, MomentaryState, Promise, Updatable};

struct Cell<V> {
    value: V,
    waiting: WaiterList<()>,
}

struct Inner<V> {
    cell: Mutex<Cell<V>>,

    // Only ever written while `cell` is locked, so a waiter registering under the lock can
    // never miss an update. Read without the lock.
    generation: AtomicGeneration,
}

impl<V> Drop for Inner<V> {
    fn drop(&mut self) {
        // No update can arrive any more.
        self.cell.get_mut().waiting.take().cancel();
    }
}

/// An owned observable value.
///
/// Every write bumps the generation, even when the new value equals the old one, and wakes
/// everyone waiting for an update. Cloning a `Variable` clones a handle to the same value.
///
/// # Example
///
/// ```rust
/// use tidings::{Updatable, UpdatableExt, Variable};
/// # use futures::executor::block_on;
///
/// let temperature = Variable::new(20.0);
/// let before = temperature.generation();
///
/// temperature.mutate(|t| *t += 1.5);
///
/// assert_eq!(temperature.get(), 21.5);
/// assert!(temperature.generation() > before);
/// # block_on(async {
/// assert_eq!(temperature.value().await.unwrap(), 21.5);
/// # });
/// ```
pub struct Variable<V>
where
    V: Clone + Send + Sync + 'static,
{
    inner: Arc<Inner<V>>,
}

impl<V> Variable<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates a variable holding `value` at a fresh generation.
    #[must_use]
    pub fn new(value: V) -> Self {
        Self {
            inner: Arc::new(Inner {
                cell: Mutex::new(Cell {
                    value,
                    waiting: WaiterList::new(),
                }),
                generation: AtomicGeneration::new(Generation::next()),
            }),
        }
    }

    /// A clone of the current value. Has no side effects.
    #[must_use]
    pub fn get(&self) -> V {
        self.inner.cell.lock().value.clone()
    }

    /// Calls `f` with a reference to the current value.
    ///
    /// The variable is locked for the duration of the call; `f` must not access the same
    /// variable.
    pub fn with<R>(&self, f: impl FnOnce(&V) -> R) -> R {
        f(&self.inner.cell.lock().value)
    }

    /// Replaces the value.
    pub fn set(&self, value: V) {
        self.replace(value);
    }

    /// Replaces the value, returning the previous one.
    pub fn replace(&self, value: V) -> V {
        self.mutate(|current| mem::replace(current, value))
    }

    /// Modifies the value in place and notifies waiters.
    ///
    /// The variable is locked for the duration of the call; `f` must not access the same
    /// variable.
    pub fn mutate<R>(&self, f: impl FnOnce(&mut V) -> R) -> R {
        let (result, waiting) = {
            let mut cell = self.inner.cell.lock();

            let result = f(&mut cell.value);
            self.inner.generation.update();

            (result, cell.waiting.take())
        };

        waiting.fulfill(&());

        result
    }
}

impl<V> Updatable for Variable<V>
where
    V: Clone + Send + Sync + 'static,
{
    type Value = V;

    fn generation(&self) -> Generation {
        self.inner.generation.current()
    }

    fn state(&self) -> BoxFuture<'_, MomentaryState<V>> {
        let state = {
            let cell = self.inner.cell.lock();
            MomentaryState::new(cell.value.clone(), self.inner.generation.current())
        };

        ready(state).boxed()
    }

    fn notify_on_update(&self, promise: Promise<()>, from: Generation) {
        let mut cell = self.inner.cell.lock();

        if self.inner.generation.current() > from {
            drop(cell);
            promise.fulfill(());
        } else {
            cell.waiting.link(promise);
        }
    }
}

impl<V> Clone for Variable<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> Default for Variable<V>
where
    V: Clone + Default + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(V::default())
    }
}

impl<V> fmt::Debug for Variable<V>
where
    V: Clone + fmt::Debug + Send + Sync + 'static,
{
    #[cfg_attr(test, mutants::skip)] // No API contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cell = self.inner.cell.lock();

        f.debug_struct(type_name::<Self>())
            .field("value", &cell.value)
            .field("generation", &self.inner.generation.current())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::Context;
    use std::thread;
    use std::time::Duration;

    use futures::executor::block_on;
    use futures::task::noop_waker_ref;
    use static_assertions::assert_impl_all;
    use testing::with_watchdog;

    use super::*;
    use crate::{UpdatableExt, future, merged};

    assert_impl_all!(Variable<String>: Send, Sync, Clone);

    #[test]
    fn every_write_bumps_generation() {
        let variable = Variable::new(1);
        let mut previous = variable.generation();

        variable.set(1);
        assert!(variable.generation() > previous);
        previous = variable.generation();

        assert_eq!(variable.replace(2), 1);
        assert!(variable.generation() > previous);
        previous = variable.generation();

        let doubled = variable.mutate(|value| {
            *value *= 2;
            *value
        });
        assert_eq!(doubled, 4);
        assert!(variable.generation() > previous);
    }

    #[test]
    fn reads_have_no_side_effects() {
        let variable = Variable::new(String::from("text"));
        let generation = variable.generation();

        assert_eq!(variable.get(), "text");
        assert_eq!(variable.with(String::len), 4);
        let state = block_on(variable.state());

        assert_eq!(state.generation(), generation);
        assert_eq!(variable.generation(), generation);
    }

    #[test]
    fn waiters_are_woken_once_with_new_value_visible() {
        with_watchdog(|| {
            let variable = Variable::new(0);
            let from = variable.generation();

            let readers = (0..4)
                .map(|_| {
                    let variable = variable.clone();
                    thread::spawn(move || {
                        block_on(variable.wait_for_update_from(from)).unwrap();
                        variable.get()
                    })
                })
                .collect::<Vec<_>>();

            thread::sleep(Duration::from_millis(10));
            variable.set(5);

            for reader in readers {
                assert_eq!(reader.join().unwrap(), 5);
            }
        });
    }

    #[test]
    fn registration_after_update_is_fulfilled_immediately() {
        let variable = Variable::new('a');
        let from = variable.generation();
        variable.set('b');

        let fulfilled = Arc::new(AtomicUsize::new(0));
        let mut wait = future({
            let variable = variable.clone();
            let fulfilled = Arc::clone(&fulfilled);
            move |promise: Promise<()>| {
                variable.notify_on_update(promise.clone(), from);
                if promise.is_resolved() {
                    fulfilled.fetch_add(1, Ordering::SeqCst);
                }
            }
        });

        let mut cx = Context::from_waker(noop_waker_ref());
        assert!(Pin::new(&mut wait).poll(&mut cx).is_ready());
        assert_eq!(fulfilled.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_last_handle_cancels_waiters() {
        with_watchdog(|| {
            let variable = Variable::new(0_u8);

            let mut wait = future({
                let variable = variable.clone();
                move |promise| variable.notify_on_next_update(promise)
            });

            let mut cx = Context::from_waker(noop_waker_ref());
            assert!(Pin::new(&mut wait).poll(&mut cx).is_pending());

            drop(variable);

            assert!(block_on(wait).unwrap_err().is_cancelled());
        });
    }

    #[test]
    fn quiet_source_of_merge_does_not_accumulate_waiters() {
        with_watchdog(|| {
            let busy = Variable::new(0_u32);
            let quiet = Variable::new(0_u32);
            let either = merged(quiet.clone(), busy.clone());
            let mut updates = either.updates();

            for value in 1..=2_000 {
                let writer = thread::spawn({
                    let busy = busy.clone();
                    move || busy.set(value)
                });

                // Waits from the last seen generation; whether the write lands before or after
                // registration, the quiet source ends up holding a resolved promise.
                block_on(updates.next_update()).unwrap();
                writer.join().unwrap();
            }

            assert!(quiet.inner.cell.lock().waiting.len() <= 8);
            assert!(busy.inner.cell.lock().waiting.len() <= 8);
        });
    }

    #[test]
    fn concurrent_writers_keep_every_update() {
        with_watchdog(|| {
            let variable = Variable::new(0_u32);

            let writers = (0..8)
                .map(|_| {
                    let variable = variable.clone();
                    thread::spawn(move || {
                        for _ in 0..1000 {
                            variable.mutate(|value| *value += 1);
                        }
                    })
                })
                .collect::<Vec<_>>();

            for writer in writers {
                writer.join().unwrap();
            }

            assert_eq!(variable.get(), 8000);
        });
    }
}
