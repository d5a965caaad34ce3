use std::any::type_name;
use std::fmt;
use std::mem;

use crate::Promise;

/// Lists shorter than this are never pruned.
const MIN_PRUNE_LEN: usize = 8;

struct Link<T>
where
    T: Send + 'static,
{
    promise: Promise<T>,
    next: Option<Box<Link<T>>>,
}

/// Chain of promises waiting for the same event.
///
/// Delivery order is unspecified - this is a broadcast, not a queue. Walking the chain is
/// iterative, so arbitrarily many waiters can be registered without risking the stack.
///
/// Dropping a non-empty list drops its promises, which cancels any that are still pending.
///
/// A promise registered with several lists is usually resolved through only one of them.
/// The others drop such promises when the list has doubled in length since it was last
/// pruned, so a list never holds more than about twice its pending waiters.
pub(crate) struct WaiterList<T>
where
    T: Send + 'static,
{
    head: Option<Box<Link<T>>>,
    len: usize,
    prune_at: usize,
}

impl<T> WaiterList<T>
where
    T: Send + 'static,
{
    pub(crate) const fn new() -> Self {
        Self {
            head: None,
            len: 0,
            prune_at: MIN_PRUNE_LEN,
        }
    }

    /// Prepends a waiter, unless it has already been resolved elsewhere.
    pub(crate) fn link(&mut self, promise: Promise<T>) {
        if promise.is_resolved() {
            return;
        }

        if self.len >= self.prune_at {
            self.retain_pending();
            self.prune_at = self.len.saturating_mul(2).max(MIN_PRUNE_LEN);
        }

        self.head = Some(Box::new(Link {
            promise,
            next: self.head.take(),
        }));
        self.len = self.len.saturating_add(1);
    }

    /// Drops the waiters that have been resolved, keeping the order of the others.
    fn retain_pending(&mut self) {
        let mut cursor = self.head.take();
        let mut tail = &mut self.head;
        let mut len: usize = 0;

        while let Some(mut link) = cursor {
            cursor = link.next.take();

            if !link.promise.is_resolved() {
                tail = &mut tail.insert(link).next;
                len = len.saturating_add(1);
            }
        }

        self.len = len;
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[cfg_attr(test, mutants::skip)] // Only used for diagnostics and assertions.
    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Detaches the whole chain, leaving this list empty.
    ///
    /// This is how a resolution takes the waiters out of a critical section before
    /// notifying them outside of it.
    pub(crate) fn take(&mut self) -> Self {
        mem::replace(self, Self::new())
    }

    fn for_each(mut self, mut f: impl FnMut(Promise<T>)) {
        let mut cursor = self.head.take();

        while let Some(link) = cursor {
            let Link { promise, next } = *link;
            cursor = next;
            f(promise);
        }
    }

    /// Fulfills every waiter with a clone of `value`.
    pub(crate) fn fulfill(self, value: &T)
    where
        T: Clone,
    {
        self.for_each(|promise| {
            promise.fulfill(value.clone());
        });
    }

    /// Cancels every waiter.
    pub(crate) fn cancel(self) {
        self.for_each(|promise| {
            promise.cancel();
        });
    }
}

impl<T> Drop for WaiterList<T>
where
    T: Send + 'static,
{
    fn drop(&mut self) {
        let mut cursor = self.head.take();

        while let Some(mut link) = cursor {
            cursor = link.next.take();
        }
    }
}

impl<T> Default for WaiterList<T>
where
    T: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for WaiterList<T>
where
    T: Send + 'static,
{
    #[cfg_attr(test, mutants::skip)] // No API contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}
