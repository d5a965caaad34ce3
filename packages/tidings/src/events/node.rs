use std::any::type_name;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::waiters::WaiterList;
use crate::{Completion, Promise, future};

/// What a node resolves to: the payload of one send plus the node that follows it.
pub(crate) struct Delivered<P>
where
    P: Clone + Send + Sync + 'static,
{
    pub(crate) payload: P,
    pub(crate) next: Arc<Node<P>>,
}

impl<P> Clone for Delivered<P>
where
    P: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            payload: self.payload.clone(),
            next: Arc::clone(&self.next),
        }
    }
}

struct NodeState<P>
where
    P: Clone + Send + Sync + 'static,
{
    delivered: Option<Delivered<P>>,
    waiting: WaiterList<Delivered<P>>,
}

/// One link of a broadcast chain: "the next event on this topic".
///
/// A node starts out undelivered (the frontier) and is delivered exactly once, by the send
/// that replaced it as the frontier. Readers that arrive early register in the node's waiter
/// list; readers that arrive late take the delivered pair directly.
pub(crate) struct Node<P>
where
    P: Clone + Send + Sync + 'static,
{
    state: Mutex<NodeState<P>>,
}

impl<P> Node<P>
where
    P: Clone + Send + Sync + 'static,
{
    pub(crate) const fn new() -> Self {
        Self {
            state: Mutex::new(NodeState {
                delivered: None,
                waiting: WaiterList::new(),
            }),
        }
    }

    /// Delivers the pair into this node and wakes everyone waiting for it.
    ///
    /// Only the send that swapped this node out of the frontier slot may call this.
    #[cfg_attr(test, mutants::skip)] // Critical primitive - causes test timeouts if tampered.
    pub(crate) fn deliver(&self, delivered: Delivered<P>) {
        let waiting = {
            let mut state = self.state.lock();

            debug_assert!(
                state.delivered.is_none(),
                "a chain node can only be delivered once"
            );

            state.delivered = Some(delivered.clone());
            state.waiting.take()
        };

        waiting.fulfill(&delivered);
    }

    /// The delivered pair, if this node is no longer the frontier.
    pub(crate) fn delivered(&self) -> Option<Delivered<P>> {
        self.state.lock().delivered.clone()
    }

    /// Suspends until this node is delivered.
    ///
    /// Dropping the returned completion cancels only this wait; the node and its eventual
    /// delivery are unaffected.
    pub(crate) fn wait(self: &Arc<Self>) -> Completion<'static, Delivered<P>> {
        let node = Arc::clone(self);

        future(move |promise: Promise<Delivered<P>>| {
            let mut state = node.state.lock();

            if let Some(delivered) = state.delivered.clone() {
                drop(state);
                promise.fulfill(delivered);
            } else {
                state.waiting.link(promise);
            }
        })
    }
}

impl<P> Drop for Node<P>
where
    P: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        // Unlink the tail one node at a time instead of letting each drop recurse into the
        // next. Stops at the first node someone else still holds.
        let mut next = self.state.get_mut().delivered.take().map(|d| d.next);

        while let Some(node) = next {
            next = Arc::into_inner(node)
                .and_then(|mut node| node.state.get_mut().delivered.take().map(|d| d.next));
        }
    }
}

impl<P> fmt::Debug for Node<P>
where
    P: Clone + Send + Sync + 'static,
{
    #[cfg_attr(test, mutants::skip)] // No API contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();

        f.debug_struct(type_name::<Self>())
            .field("delivered", &state.delivered.is_some())
            .field("waiting", &!state.waiting.is_empty())
            .finish()
    }
}
