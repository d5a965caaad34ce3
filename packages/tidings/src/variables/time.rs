use std::any::type_name;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, LazyLock};
use std::thread;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use futures::FutureExt;
use futures::future::{BoxFuture, ready};
use tracing::trace;

use crate::{Generation, MomentaryState, Promise, Updatable};

/// A point in time, in nanoseconds since an arbitrary fixed epoch.
pub type TimeNanos = u64;

type Clock = Arc<dyn Fn() -> TimeNanos + Send + Sync>;
type Sleep = Arc<dyn Fn(Duration) -> BoxFuture<'static, ()> + Send + Sync>;

static EPOCH: LazyLock<Instant> = LazyLock::new(Instant::now);

fn monotonic_now() -> TimeNanos {
    u64::try_from(EPOCH.elapsed().as_nanos()).unwrap_or(u64::MAX)
}

/// Sleeps on a helper thread so that no particular async runtime is required.
///
/// Dropping the returned future wakes the helper thread early.
fn thread_sleep(duration: Duration) -> BoxFuture<'static, ()> {
    let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
    let (done_tx, done_rx) = oneshot::channel::<()>();

    thread::Builder::new()
        .name("tidings-sleep".to_string())
        .spawn(move || {
            // Ends on timeout or as soon as the sleeping future (holding the sender) is gone.
            _ = cancel_rx.recv_timeout(duration);
            drop(done_tx.send(()));
        })
        .expect("failed to spawn sleep thread: thread spawning failure is not supported");

    async move {
        let _cancel_on_drop = cancel_tx;
        _ = done_rx.await;
    }
    .boxed()
}

fn nanos(duration: Duration) -> TimeNanos {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

/// The first fire time after `fire_at` that is not before `now`, at least one period ahead.
fn next_fire_time(fire_at: TimeNanos, now: TimeNanos, period: TimeNanos) -> TimeNanos {
    let periods = now.saturating_sub(fire_at).div_ceil(period).max(1);
    fire_at.saturating_add(periods.saturating_mul(period))
}

/// When the source fires next, together with the generation its last firing published.
///
/// Both move in one atomic swap, so whoever sees the new fire time also sees the generation.
#[derive(Debug)]
struct Schedule {
    fire_at: TimeNanos,
    generation: Generation,
}

struct Inner {
    period: TimeNanos,
    schedule: ArcSwap<Schedule>,
    clock: Clock,
    sleep: Sleep,
}

impl Inner {
    /// The schedule in effect at `now`, firing first if `now` has reached the fire time.
    #[cfg_attr(test, mutants::skip)] // Critical primitive - causes test timeouts if tampered.
    fn schedule_at(&self, now: TimeNanos) -> Arc<Schedule> {
        loop {
            let current = self.schedule.load_full();

            if current.fire_at > now {
                return current;
            }

            let next = Arc::new(Schedule {
                fire_at: next_fire_time(current.fire_at, now, self.period),
                generation: Generation::next(),
            });

            // Only the reader whose swap lands publishes its generation. Losers retry against
            // the winner's schedule, which normally is no longer due.
            let previous = self.schedule.compare_and_swap(&current, Arc::clone(&next));

            if Arc::ptr_eq(&*previous, &current) {
                trace!(
                    generation = %next.generation,
                    fire_at = current.fire_at,
                    next_fire_at = next.fire_at,
                    "periodic source fired"
                );

                return next;
            }
        }
    }
}

/// A pseudo-source whose generation advances once per period.
///
/// Its value is the current time, in nanoseconds, and cannot be set. The generation is
/// advanced lazily, when read after the period has elapsed; a reader that comes back after
/// many periods sees a single new generation, not one per missed period.
///
/// Waiting for an update sleeps until the next period boundary. The sleep is attached to the
/// waiting promise, so it runs on the waiter's task and is cancelled along with the wait.
///
/// Cloning a `TimeVariable` clones a handle to the same source.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
///
/// use tidings::{TimeVariable, Updatable, UpdatableExt};
/// # use futures::executor::block_on;
///
/// let ticks = TimeVariable::builder(Duration::from_millis(10))
///     .start_immediately(false)
///     .build();
///
/// let before = ticks.generation();
/// # block_on(async {
/// ticks.wait_for_update().await.unwrap();
/// # });
/// assert!(ticks.generation() > before);
/// ```
#[derive(Clone)]
pub struct TimeVariable {
    inner: Arc<Inner>,
}

impl TimeVariable {
    /// A periodic source with the default clock and sleep, firing immediately.
    ///
    /// # Panics
    ///
    /// Panics if `period` is zero.
    #[must_use]
    pub fn new(period: Duration) -> Self {
        Self::builder(period).build()
    }

    /// Starts configuring a periodic source.
    ///
    /// # Panics
    ///
    /// Panics if `period` is zero.
    #[must_use]
    pub fn builder(period: Duration) -> TimeVariableBuilder {
        TimeVariableBuilder::new(period)
    }

    /// The period between generation updates.
    #[must_use]
    pub fn period(&self) -> Duration {
        Duration::from_nanos(self.inner.period)
    }

    fn now(&self) -> TimeNanos {
        (self.inner.clock)()
    }
}

impl Updatable for TimeVariable {
    type Value = TimeNanos;

    fn generation(&self) -> Generation {
        self.inner.schedule_at(self.now()).generation
    }

    fn state(&self) -> BoxFuture<'_, MomentaryState<TimeNanos>> {
        let now = self.now();
        let schedule = self.inner.schedule_at(now);

        ready(MomentaryState::new(now, schedule.generation)).boxed()
    }

    fn notify_on_update(&self, promise: Promise<()>, from: Generation) {
        let now = self.now();
        let schedule = self.inner.schedule_at(now);

        if schedule.generation > from {
            promise.fulfill(());
            return;
        }

        let remaining = schedule.fire_at.saturating_sub(now);
        let sleep = (self.inner.sleep)(Duration::from_nanos(remaining));
        let resolver = promise.clone();

        promise.drive(async move {
            sleep.await;
            resolver.fulfill(());
        });
    }
}

impl fmt::Debug for TimeVariable {
    #[cfg_attr(test, mutants::skip)] // No API contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let schedule = self.inner.schedule.load();

        f.debug_struct(type_name::<Self>())
            .field("period", &self.period())
            .field("fire_at", &schedule.fire_at)
            .field("generation", &schedule.generation)
            .finish_non_exhaustive()
    }
}

/// Configures a [`TimeVariable`].
///
/// Created by [`TimeVariable::builder()`].
pub struct TimeVariableBuilder {
    period: TimeNanos,
    start_immediately: bool,
    clock: Option<Clock>,
    sleep: Option<Sleep>,
}

impl TimeVariableBuilder {
    fn new(period: Duration) -> Self {
        assert!(!period.is_zero(), "a periodic source needs a non-zero period");

        Self {
            period: nanos(period),
            start_immediately: true,
            clock: None,
            sleep: None,
        }
    }

    /// Whether the first update is due right away (the default) or only after one period.
    #[must_use]
    pub fn start_immediately(mut self, start_immediately: bool) -> Self {
        self.start_immediately = start_immediately;
        self
    }

    /// Replaces the clock the source reads its value and schedule from.
    ///
    /// The clock must be monotonic. By default, nanoseconds elapsed since the first use of the
    /// default clock in this process are used.
    #[must_use]
    pub fn clock<C>(mut self, clock: C) -> Self
    where
        C: Fn() -> TimeNanos + Send + Sync + 'static,
    {
        self.clock = Some(Arc::new(clock));
        self
    }

    /// Replaces the function used to wait for the next period boundary.
    ///
    /// The returned future is dropped if the wait is cancelled. By default, the sleep happens
    /// on a short-lived helper thread, which makes the source independent of any async
    /// runtime; pass the runtime's own timer here where one is available.
    #[must_use]
    pub fn sleep<S, F>(mut self, sleep: S) -> Self
    where
        S: Fn(Duration) -> F + Send + Sync + 'static,
        F: Future<Output = ()> + Send + 'static,
    {
        self.sleep = Some(Arc::new(move |duration| sleep(duration).boxed()));
        self
    }

    /// Creates the source.
    #[must_use]
    pub fn build(self) -> TimeVariable {
        let clock = self.clock.unwrap_or_else(|| Arc::new(monotonic_now));
        let sleep = self.sleep.unwrap_or_else(|| Arc::new(thread_sleep));

        let now = clock();
        let fire_at = if self.start_immediately {
            now
        } else {
            now.saturating_add(self.period)
        };

        TimeVariable {
            inner: Arc::new(Inner {
                period: self.period,
                schedule: ArcSwap::from_pointee(Schedule {
                    fire_at,
                    generation: Generation::next(),
                }),
                clock,
                sleep,
            }),
        }
    }
}

impl fmt::Debug for TimeVariableBuilder {
    #[cfg_attr(test, mutants::skip)] // No API contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("period", &self.period)
            .field("start_immediately", &self.start_immediately)
            .field("custom_clock", &self.clock.is_some())
            .field("custom_sleep", &self.sleep.is_some())
            .finish()
    }
}
