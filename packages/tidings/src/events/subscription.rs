use std::any::type_name;
use std::fmt;
use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use tracing::trace;

use crate::Result;
use crate::events::EventList;
use crate::events::node::Node;

/// A read cursor into an [`EventList`].
///
/// Created by [`EventList::subscribe()`]. Yields every event sent after the subscription was
/// created (or last flushed), exactly once and in send order.
pub struct EventSubscription<P>
where
    P: Clone + Send + Sync + 'static,
{
    list: EventList<P>,

    // The first node this subscription has not read yet.
    cursor: Arc<Node<P>>,
}

impl<P> EventSubscription<P>
where
    P: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(list: EventList<P>, cursor: Arc<Node<P>>) -> Self {
        Self { list, cursor }
    }

    /// Returns the next unread event, suspending until one is sent.
    ///
    /// The cursor only advances once an event has been returned. If the returned future is
    /// dropped (or cancelled through a [`CancellationToken`][crate::CancellationToken])
    /// before that, no event is lost: the next call sees the same event.
    pub async fn next_event(&mut self) -> Result<P> {
        let delivered = match self.cursor.delivered() {
            Some(delivered) => delivered,
            None => self.cursor.wait().await?,
        };

        self.cursor = delivered.next;
        Ok(delivered.payload)
    }

    /// Returns the next unread event if one has already been sent, without waiting.
    pub fn try_next_event(&mut self) -> Option<P> {
        let delivered = self.cursor.delivered()?;

        self.cursor = delivered.next;
        Some(delivered.payload)
    }

    /// Skips every event that has been sent but not yet read.
    pub fn flush_events(&mut self) {
        self.cursor = self.list.frontier();

        trace!(payload_type = type_name::<P>(), "subscription flushed to frontier");
    }

    /// Converts the subscription into a stream of its events.
    ///
    /// The stream never ends on its own; drop it to stop consuming.
    pub fn into_stream(self) -> BoxStream<'static, P> {
        stream::unfold(self, next_in_stream).boxed()
    }
}

async fn next_in_stream<P>(
    mut subscription: EventSubscription<P>,
) -> Option<(P, EventSubscription<P>)>
where
    P: Clone + Send + Sync + 'static,
{
    let payload = subscription.next_event().await.ok()?;
    Some((payload, subscription))
}

impl<P> fmt::Debug for EventSubscription<P>
where
    P: Clone + Send + Sync + 'static,
{
    #[cfg_attr(test, mutants::skip)] // No API contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("cursor", &self.cursor)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::pin::pin;
    use std::task::{Context, Poll};
    use std::thread;

    use futures::executor::block_on;
    use futures::task::noop_waker_ref;
    use static_assertions::assert_impl_all;
    use testing::with_watchdog;

    use super::*;
    use crate::CancellationToken;

    assert_impl_all!(EventSubscription<String>: Send, Sync);

    #[test]
    fn reads_in_send_order() {
        with_watchdog(|| {
            let list = EventList::new();
            let mut subscription = list.subscribe();

            for i in 0..100 {
                list.send(i);
            }

            for i in 0..100 {
                assert_eq!(block_on(subscription.next_event()).unwrap(), i);
            }

            assert!(subscription.try_next_event().is_none());
        });
    }

    #[test]
    fn waits_for_send_from_another_thread() {
        with_watchdog(|| {
            let list = EventList::new();
            let mut subscription = list.subscribe();

            let sender = thread::spawn({
                let list = list.clone();
                move || {
                    list.send("hello");
                }
            });

            assert_eq!(block_on(subscription.next_event()).unwrap(), "hello");
            sender.join().unwrap();
        });
    }

    #[test]
    fn dropped_read_loses_nothing() {
        with_watchdog(|| {
            let list = EventList::new();
            let mut subscription = list.subscribe();

            {
                let mut read = pin!(subscription.next_event());
                let mut cx = Context::from_waker(noop_waker_ref());
                assert!(read.as_mut().poll(&mut cx).is_pending());
            }

            list.send(5);

            assert_eq!(block_on(subscription.next_event()).unwrap(), 5);
        });
    }

    #[test]
    fn cancelled_read_loses_nothing() {
        with_watchdog(|| {
            let list = EventList::new();
            let mut subscription = list.subscribe();

            let token = CancellationToken::new();
            token.cancel();

            let result = block_on(token.run_until_cancelled(subscription.next_event()));
            assert!(result.unwrap_err().is_cancelled());

            list.send(6);
            assert_eq!(block_on(subscription.next_event()).unwrap(), 6);
        });
    }

    #[test]
    fn flush_skips_unread_events() {
        with_watchdog(|| {
            let list = EventList::new();
            let mut subscription = list.subscribe();

            list.send(1);
            list.send(2);
            subscription.flush_events();
            list.send(3);

            assert_eq!(block_on(subscription.next_event()).unwrap(), 3);
        });
    }

    #[test]
    fn stream_yields_events() {
        with_watchdog(|| {
            let list = EventList::new();
            let stream = list.subscribe().into_stream();

            list.send(10);
            list.send(20);
            list.send(30);

            let received = block_on(stream.take(3).collect::<Vec<_>>());
            assert_eq!(received, vec![10, 20, 30]);
        });
    }

    #[test]
    fn pending_poll_does_not_advance() {
        let list = EventList::<u8>::new();
        let mut subscription = list.subscribe();
        let mut cx = Context::from_waker(noop_waker_ref());

        let mut read = pin!(subscription.next_event());
        assert!(read.as_mut().poll(&mut cx).is_pending());

        list.send(1);
        assert!(matches!(read.as_mut().poll(&mut cx), Poll::Ready(Ok(1))));
    }
}
