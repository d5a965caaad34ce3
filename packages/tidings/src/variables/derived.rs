use std::any::type_name;
use std::fmt;
use std::sync::{Arc, Weak};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared, ready};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::{Generation, MomentaryState, Promise, Updatable};

/// How a [`Derived`] variable obtains its state from its sources.
///
/// [`merged()`][crate::merged], [`combined()`][crate::combined],
/// [`transformed()`][crate::transformed] and [`transformed_async()`][crate::transformed_async]
/// are derivations; implement this trait to build others on the same caching machinery.
pub trait Derivation: Send + Sync + 'static {
    /// The type of value derived.
    type Value: Clone + Send + Sync + 'static;

    /// The generation the derived state would have if computed right now.
    ///
    /// Must be derived from the sources' generations only. A candidate state is accepted if
    /// its generation equals this value at the moment of installation.
    fn generation(&self) -> Generation;

    /// Computes a candidate state from the sources, stamped with the generation of the source
    /// states it was computed from.
    fn compute(&self) -> BoxFuture<'_, MomentaryState<Self::Value>>;

    /// Arranges for `promise` to be fulfilled once any source updates beyond `from`.
    fn notify_on_update(&self, promise: Promise<()>, from: Generation);
}

type Recomputation<V> = Shared<BoxFuture<'static, MomentaryState<V>>>;

struct Cache<V>
where
    V: Clone + Send + Sync + 'static,
{
    settled: MomentaryState<V>,

    // At most one recomputation is in flight; every reader that misses the cache awaits it.
    running: Option<Recomputation<V>>,
}

/// A variable whose state is computed from other updatable sources and cached.
///
/// Reading the state returns the cached value if it is still current (its generation equals
/// the one computed from the sources). Otherwise one recomputation is started and shared by
/// every concurrent reader. If a source changes while the recomputation is running, the
/// result is discarded and the recomputation repeats, so the cache never holds a state that
/// does not match its sources.
///
/// The recomputation does not keep the variable alive: dropping the last handle drops the
/// cache and, with it, any recomputation nobody is awaiting.
pub struct Derived<D>
where
    D: Derivation,
{
    derivation: Arc<D>,
    cache: Arc<Mutex<Cache<D::Value>>>,
}

impl<D> Derived<D>
where
    D: Derivation,
{
    /// Wraps a derivation with a cache of its last settled state.
    #[must_use]
    pub fn new(derivation: D) -> Self {
        Self {
            derivation: Arc::new(derivation),
            cache: Arc::new(Mutex::new(Cache {
                settled: MomentaryState::uninitialized(),
                running: None,
            })),
        }
    }
}

impl<D> Updatable for Derived<D>
where
    D: Derivation,
{
    type Value = D::Value;

    fn generation(&self) -> Generation {
        self.derivation.generation()
    }

    fn state(&self) -> BoxFuture<'_, MomentaryState<D::Value>> {
        let running = {
            let mut cache = self.cache.lock();

            if cache.settled.generation() == self.derivation.generation() {
                return ready(cache.settled.clone()).boxed();
            }

            match &cache.running {
                Some(running) => running.clone(),
                None => {
                    trace!(
                        derivation = type_name::<D>(),
                        settled = %cache.settled.generation(),
                        "derived state stale, starting recomputation"
                    );

                    let running = recompute(
                        Arc::clone(&self.derivation),
                        Arc::downgrade(&self.cache),
                    )
                    .boxed()
                    .shared();

                    cache.running = Some(running.clone());
                    running
                }
            }
        };

        running.boxed()
    }

    fn notify_on_update(&self, promise: Promise<()>, from: Generation) {
        self.derivation.notify_on_update(promise, from);
    }
}

async fn recompute<D>(
    derivation: Arc<D>,
    cache: Weak<Mutex<Cache<D::Value>>>,
) -> MomentaryState<D::Value>
where
    D: Derivation,
{
    let mut attempts: u32 = 0;

    loop {
        attempts = attempts.saturating_add(1);

        let candidate = derivation.compute().await;

        if try_install(&*derivation, &cache, &candidate) {
            if attempts > 1 {
                debug!(
                    derivation = type_name::<D>(),
                    attempts,
                    generation = %candidate.generation(),
                    "derived state settled after sources changed during recomputation"
                );
            }

            return candidate;
        }

        trace!(
            derivation = type_name::<D>(),
            attempts,
            candidate = %candidate.generation(),
            "sources changed during recomputation, retrying"
        );
    }
}

/// Installs `candidate` as the settled state if it still matches the sources.
///
/// Returns `false` if the candidate is stale and must be recomputed. A cache that no longer
/// exists accepts anything, as nobody will read it again.
#[cfg_attr(test, mutants::skip)] // Critical primitive - causes test timeouts if tampered.
fn try_install<D>(
    derivation: &D,
    cache: &Weak<Mutex<Cache<D::Value>>>,
    candidate: &MomentaryState<D::Value>,
) -> bool
where
    D: Derivation,
{
    let Some(cache) = cache.upgrade() else {
        return true;
    };

    let mut cache = cache.lock();

    if candidate.generation() != derivation.generation() {
        return false;
    }

    debug_assert!(
        cache.settled.generation() <= candidate.generation(),
        "settled state can only move forward"
    );

    cache.settled = candidate.clone();
    cache.running = None;

    true
}

/// Registers `promise` with both sources, the one with the higher generation first.
///
/// Whichever source updates first fulfills the promise; the other registration becomes a
/// no-op.
pub(crate) fn notify_on_either<A, B>(a: &A, b: &B, promise: Promise<()>, from: Generation)
where
    A: Updatable,
    B: Updatable,
{
    if a.generation() > b.generation() {
        a.notify_on_update(promise.clone(), from);
        b.notify_on_update(promise, from);
    } else {
        b.notify_on_update(promise.clone(), from);
        a.notify_on_update(promise, from);
    }
}

impl<D> Clone for Derived<D>
where
    D: Derivation,
{
    fn clone(&self) -> Self {
        Self {
            derivation: Arc::clone(&self.derivation),
            cache: Arc::clone(&self.cache),
        }
    }
}

impl<D> fmt::Debug for Derived<D>
where
    D: Derivation,
{
    #[cfg_attr(test, mutants::skip)] // No API contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cache = self.cache.lock();

        f.debug_struct(type_name::<Self>())
            .field("settled", &cache.settled.generation())
            .field("recomputing", &cache.running.is_some())
            .finish_non_exhaustive()
    }
}
