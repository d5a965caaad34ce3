use std::any::type_name;
use std::fmt;

use futures::future::BoxFuture;

use crate::variables::derived::notify_on_either;
use crate::variables::{Derivation, Derived};
use crate::{Generation, MomentaryState, Promise, Updatable};

/// Derivation that follows whichever of two sources changed most recently.
pub struct Merge<A, B> {
    a: A,
    b: B,
}

impl<A, B> Derivation for Merge<A, B>
where
    A: Updatable + 'static,
    B: Updatable<Value = A::Value> + 'static,
{
    type Value = A::Value;

    fn generation(&self) -> Generation {
        self.a.generation().max(self.b.generation())
    }

    fn compute(&self) -> BoxFuture<'_, MomentaryState<A::Value>> {
        if self.a.generation() > self.b.generation() {
            self.a.state()
        } else {
            self.b.state()
        }
    }

    fn notify_on_update(&self, promise: Promise<()>, from: Generation) {
        notify_on_either(&self.a, &self.b, promise, from);
    }
}

impl<A, B> fmt::Debug for Merge<A, B> {
    #[cfg_attr(test, mutants::skip)] // No API contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>()).finish_non_exhaustive()
    }
}

/// A variable holding the state of whichever of two sources was updated last.
pub type Merged<A, B> = Derived<Merge<A, B>>;

/// Merges two sources of the same value type.
///
/// The merged generation is the higher of the two source generations and the merged state is
/// the state of the source with that generation (`b` when they are equal).
///
/// # Example
///
/// ```rust
/// use tidings::{UpdatableExt, Variable, merged};
/// # use futures::executor::block_on;
///
/// # block_on(async {
/// let local = Variable::new("local default");
/// let remote = Variable::new("remote default");
/// let effective = merged(local.clone(), remote.clone());
///
/// assert_eq!(effective.value().await.unwrap(), "remote default");
///
/// local.set("local override");
/// assert_eq!(effective.value().await.unwrap(), "local override");
/// # });
/// ```
#[must_use]
pub fn merged<A, B>(a: A, b: B) -> Merged<A, B>
where
    A: Updatable + 'static,
    B: Updatable<Value = A::Value> + 'static,
{
    Derived::new(Merge { a, b })
}
