//! The observable-variable capability.
//!
//! Anything that holds a value which changes over time can implement [`Updatable`]: it exposes
//! a cheap [`generation()`][Updatable::generation] to detect change, an asynchronous
//! [`state()`][Updatable::state] to read the value, and
//! [`notify_on_update()`][Updatable::notify_on_update] to be told about the next change.
//! Everything else ([`UpdatableExt`]) is built on those three operations.

use std::any::type_name;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt};

use crate::variables::{
    Combined, Merged, Transformed, TransformedAsync, combined, merged, transformed,
    transformed_async,
};
use crate::{Completion, Generation, MomentaryState, Promise, Result, future};

/// A value that changes over time and tells interested parties when it does.
///
/// The trait is object safe; see [`AnyUpdatable`] for the type-erased handle.
pub trait Updatable: Send + Sync {
    /// The type of value held.
    type Value: Clone + Send + Sync + 'static;

    /// The generation of the current state. Cheap and synchronous.
    ///
    /// A change of generation means the state may have changed; the same generation means it
    /// has not.
    fn generation(&self) -> Generation;

    /// The current state.
    ///
    /// Derived variables may have to recompute it, which is why this is asynchronous.
    fn state(&self) -> BoxFuture<'_, MomentaryState<Self::Value>>;

    /// Fulfills `promise` once the generation is newer than `from`.
    ///
    /// If it already is, the promise is fulfilled immediately. Implementations that can never
    /// change drop the promise, which resolves the wait as cancelled.
    fn notify_on_update(&self, promise: Promise<()>, from: Generation);
}

impl<U> Updatable for Arc<U>
where
    U: Updatable + ?Sized,
{
    type Value = U::Value;

    fn generation(&self) -> Generation {
        (**self).generation()
    }

    fn state(&self) -> BoxFuture<'_, MomentaryState<Self::Value>> {
        (**self).state()
    }

    fn notify_on_update(&self, promise: Promise<()>, from: Generation) {
        (**self).notify_on_update(promise, from);
    }
}

/// Conveniences and combinators available on every [`Updatable`].
pub trait UpdatableExt: Updatable {
    /// The current value, or the issue stored in the current state.
    fn value(&self) -> BoxFuture<'_, Result<Self::Value>> {
        self.state().map(MomentaryState::into_value).boxed()
    }

    /// Fulfills `promise` on the first update after the current generation.
    fn notify_on_next_update(&self, promise: Promise<()>) {
        self.notify_on_update(promise, self.generation());
    }

    /// Suspends until the generation is newer than the one current at the time of this call.
    fn wait_for_update(&self) -> Completion<'_, ()> {
        self.wait_for_update_from(self.generation())
    }

    /// Suspends until the generation is newer than `from`.
    ///
    /// Returns immediately if it already is.
    fn wait_for_update_from(&self, from: Generation) -> Completion<'_, ()> {
        future(move |promise| self.notify_on_update(promise, from))
    }

    /// A sequence of states, starting with the current one and continuing with each update.
    fn updates(&self) -> Updates<Self>
    where
        Self: Clone + Sized,
    {
        Updates::new(self.clone())
    }

    /// Erases the concrete type.
    fn into_any(self) -> AnyUpdatable<Self::Value>
    where
        Self: Sized + 'static,
    {
        AnyUpdatable::new(self)
    }

    /// See [`merged()`].
    fn merged<B>(self, other: B) -> Merged<Self, B>
    where
        Self: Sized + 'static,
        B: Updatable<Value = Self::Value> + 'static,
    {
        merged(self, other)
    }

    /// See [`combined()`].
    fn combined<B, F, C>(self, other: B, combine: F) -> Combined<Self, B, F>
    where
        Self: Sized + 'static,
        B: Updatable + 'static,
        F: Fn(&MomentaryState<Self::Value>, &MomentaryState<B::Value>) -> Result<C>
            + Send
            + Sync
            + 'static,
        C: Clone + Send + Sync + 'static,
    {
        combined(self, other, combine)
    }

    /// See [`transformed()`].
    fn transformed<F, T>(self, transform: F) -> Transformed<Self, F>
    where
        Self: Sized + 'static,
        F: Fn(MomentaryState<Self::Value>) -> Result<T> + Send + Sync + 'static,
        T: Clone + Send + Sync + 'static,
    {
        transformed(self, transform)
    }

    /// See [`transformed_async()`].
    fn transformed_async<F, Fut, T>(self, transform: F) -> TransformedAsync<Self, F>
    where
        Self: Sized + 'static,
        F: Fn(MomentaryState<Self::Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Clone + Send + Sync + 'static,
    {
        transformed_async(self, transform)
    }
}

impl<U> UpdatableExt for U where U: Updatable + ?Sized {}

/// A type-erased, cloneable [`Updatable`] handle.
///
/// Generic combinators keep their concrete types; this is the one place to go when
/// heterogeneous sources need to be stored together.
pub struct AnyUpdatable<V>
where
    V: Clone + Send + Sync + 'static,
{
    inner: Arc<dyn Updatable<Value = V>>,
}

impl<V> AnyUpdatable<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Erases the type of `source`.
    #[must_use]
    pub fn new<U>(source: U) -> Self
    where
        U: Updatable<Value = V> + 'static,
    {
        Self {
            inner: Arc::new(source),
        }
    }
}

impl<V> Updatable for AnyUpdatable<V>
where
    V: Clone + Send + Sync + 'static,
{
    type Value = V;

    fn generation(&self) -> Generation {
        self.inner.generation()
    }

    fn state(&self) -> BoxFuture<'_, MomentaryState<V>> {
        self.inner.state()
    }

    fn notify_on_update(&self, promise: Promise<()>, from: Generation) {
        self.inner.notify_on_update(promise, from);
    }
}

impl<V> Clone for AnyUpdatable<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> fmt::Debug for AnyUpdatable<V>
where
    V: Clone + Send + Sync + 'static,
{
    #[cfg_attr(test, mutants::skip)] // No API contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}

/// The successive states of an [`Updatable`], one per observed update.
///
/// Each `Updates` tracks its own last-seen generation, starting from "never seen anything",
/// so the first state returned is the current one. Created by
/// [`UpdatableExt::updates()`].
///
/// # Example
///
/// ```rust
/// use tidings::{UpdatableExt, Variable};
/// # use futures::executor::block_on;
///
/// # block_on(async {
/// let variable = Variable::new(1);
/// let mut updates = variable.updates();
///
/// assert_eq!(updates.next_update().await.unwrap().into_value().unwrap(), 1);
///
/// variable.set(2);
/// assert_eq!(updates.next_update().await.unwrap().into_value().unwrap(), 2);
/// # });
/// ```
pub struct Updates<U> {
    source: U,
    seen: Generation,
}

impl<U> Updates<U>
where
    U: Updatable,
{
    /// Starts observing `source`, beginning with its current state.
    pub fn new(source: U) -> Self {
        Self {
            source,
            seen: Generation::UNINITIALIZED,
        }
    }

    /// Suspends until the source has a state newer than the last one returned, then returns it.
    ///
    /// Fails with [`Error::Cancelled`][crate::Error::Cancelled] if the source can never update
    /// again (a [`Constant`][crate::Constant] that has already been observed, for example).
    pub async fn next_update(&mut self) -> Result<MomentaryState<U::Value>> {
        self.source.wait_for_update_from(self.seen).await?;

        let state = self.source.state().await;
        self.seen = state.generation();

        Ok(state)
    }

    /// Converts the sequence into a stream of states.
    ///
    /// The stream ends once the source can no longer update.
    pub fn into_stream(self) -> BoxStream<'static, MomentaryState<U::Value>>
    where
        U: 'static,
    {
        stream::unfold(self, next_in_stream).boxed()
    }
}

async fn next_in_stream<U>(
    mut updates: Updates<U>,
) -> Option<(MomentaryState<U::Value>, Updates<U>)>
where
    U: Updatable,
{
    let state = updates.next_update().await.ok()?;
    Some((state, updates))
}

impl<U> fmt::Debug for Updates<U> {
    #[cfg_attr(test, mutants::skip)] // No API contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("seen", &self.seen)
            .finish_non_exhaustive()
    }
}
