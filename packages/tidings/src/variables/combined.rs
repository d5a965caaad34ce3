use std::any::type_name;
use std::fmt;

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::variables::derived::notify_on_either;
use crate::variables::{Derivation, Derived};
use crate::{Generation, MomentaryState, Promise, Result, Updatable};

/// Derivation that computes a value from the states of two sources.
pub struct Combine<A, B, F> {
    a: A,
    b: B,
    combine: F,
}

impl<A, B, F, C> Derivation for Combine<A, B, F>
where
    A: Updatable + 'static,
    B: Updatable + 'static,
    F: Fn(&MomentaryState<A::Value>, &MomentaryState<B::Value>) -> Result<C>
        + Send
        + Sync
        + 'static,
    C: Clone + Send + Sync + 'static,
{
    type Value = C;

    fn generation(&self) -> Generation {
        self.a.generation().max(self.b.generation())
    }

    fn compute(&self) -> BoxFuture<'_, MomentaryState<C>> {
        async move {
            let a = self.a.state().await;
            let b = self.b.state().await;

            let generation = a.generation().max(b.generation());
            MomentaryState::capture(generation, || (self.combine)(&a, &b))
        }
        .boxed()
    }

    fn notify_on_update(&self, promise: Promise<()>, from: Generation) {
        notify_on_either(&self.a, &self.b, promise, from);
    }
}

impl<A, B, F> fmt::Debug for Combine<A, B, F> {
    #[cfg_attr(test, mutants::skip)] // No API contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>()).finish_non_exhaustive()
    }
}

/// A variable computed from the states of two sources.
pub type Combined<A, B, F> = Derived<Combine<A, B, F>>;

/// Combines two sources, possibly of different value types, with a function of both states.
///
/// `combine` receives the full states, so it decides how issues in either source propagate.
/// Its result (value or error) is captured at the higher of the two source generations and
/// cached until either source updates, so it runs at most once per distinct pair of source
/// generations no matter how many readers there are.
///
/// # Example
///
/// ```rust
/// use tidings::{UpdatableExt, Variable, combined};
/// # use futures::executor::block_on;
///
/// # block_on(async {
/// let width = Variable::new(3_u32);
/// let height = Variable::new(4_u32);
/// let area = combined(width.clone(), height.clone(), |w, h| Ok(*w.value()? * *h.value()?));
///
/// assert_eq!(area.value().await.unwrap(), 12);
///
/// height.set(10);
/// assert_eq!(area.value().await.unwrap(), 30);
/// # });
/// ```
#[must_use]
pub fn combined<A, B, F, C>(a: A, b: B, combine: F) -> Combined<A, B, F>
where
    A: Updatable + 'static,
    B: Updatable + 'static,
    F: Fn(&MomentaryState<A::Value>, &MomentaryState<B::Value>) -> Result<C>
        + Send
        + Sync
        + 'static,
    C: Clone + Send + Sync + 'static,
{
    Derived::new(Combine { a, b, combine })
}
