use std::any::type_name;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::Result;
use crate::events::EventSubscription;
use crate::events::node::{Delivered, Node};

/// A broadcast topic: every subscription sees every event sent after it subscribed, once and
/// in order, no matter how many threads send concurrently.
///
/// Sending never blocks and never waits for consumers. Cloning an `EventList` clones a handle
/// to the same topic.
///
/// # Retention
///
/// Events are kept alive for as long as the slowest live subscription has not read them. A
/// subscription that is never read keeps every later event in memory; drop subscriptions you
/// no longer consume, or call [`EventSubscription::flush_events()`] to skip ahead.
///
/// # Example
///
/// ```rust
/// use tidings::EventList;
/// # use futures::executor::block_on;
///
/// # block_on(async {
/// let list = EventList::new();
/// let mut subscription = list.subscribe();
///
/// list.send("first");
/// list.send("second");
///
/// assert_eq!(subscription.next_event().await.unwrap(), "first");
/// assert_eq!(subscription.next_event().await.unwrap(), "second");
/// # });
/// ```
pub struct EventList<P>
where
    P: Clone + Send + Sync + 'static,
{
    frontier: Arc<ArcSwap<Node<P>>>,
}

impl<P> EventList<P>
where
    P: Clone + Send + Sync + 'static,
{
    /// Creates an empty topic.
    #[must_use]
    pub fn new() -> Self {
        Self {
            frontier: Arc::new(ArcSwap::from_pointee(Node::new())),
        }
    }

    /// Broadcasts `payload` to every current subscription.
    #[cfg_attr(test, mutants::skip)] // Critical primitive - causes test timeouts if tampered.
    pub fn send(&self, payload: P) {
        let next = Arc::new(Node::new());

        // The swap decides the order of concurrent sends; whoever swaps out a node is the only
        // one that ever delivers into it.
        let previous = self.frontier.swap(Arc::clone(&next));

        previous.deliver(Delivered { payload, next });
    }

    /// Starts reading the topic from the next event sent after this call.
    #[must_use]
    pub fn subscribe(&self) -> EventSubscription<P> {
        EventSubscription::new(self.clone(), self.frontier())
    }

    /// Suspends until the next event sent after this call.
    ///
    /// The subscription point is taken when `next()` is called, not when the returned future
    /// is first polled.
    pub fn next(&self) -> impl Future<Output = Result<P>> + Send + 'static {
        let mut subscription = self.subscribe();

        async move { subscription.next_event().await }
    }

    pub(crate) fn frontier(&self) -> Arc<Node<P>> {
        self.frontier.load_full()
    }
}

impl<P> Clone for EventList<P>
where
    P: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            frontier: Arc::clone(&self.frontier),
        }
    }
}

impl<P> Default for EventList<P>
where
    P: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<P> fmt::Debug for EventList<P>
where
    P: Clone + Send + Sync + 'static,
{
    #[cfg_attr(test, mutants::skip)] // No API contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>()).finish_non_exhaustive()
    }
}
