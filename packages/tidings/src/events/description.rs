use std::convert::Infallible;
use std::future::Future;

use crate::Result;
use crate::events::{EventList, EventSubscription};

/// Binds a process-wide broadcast topic to a payload type.
///
/// Implement it with the [`event!`][crate::event] macro, which declares a marker type and the
/// lazily created static topic behind it. Code that prefers an injected dependency can take
/// an [`EventList`] instead and be handed [`list()`][Self::list] by the caller.
pub trait EventDescription {
    /// What each event carries.
    type Payload: Clone + Send + Sync + 'static;

    /// The topic of this event type.
    fn list() -> &'static EventList<Self::Payload>;

    /// Broadcasts an event to every current subscription.
    fn send(payload: Self::Payload) {
        Self::list().send(payload);
    }

    /// Suspends until the next event sent after this call.
    fn next() -> impl Future<Output = Result<Self::Payload>> + Send + 'static {
        Self::list().next()
    }

    /// Starts reading events sent after this call.
    #[must_use]
    fn subscribe() -> EventSubscription<Self::Payload> {
        Self::list().subscribe()
    }

    /// Runs `handler` for every event sent after this call.
    ///
    /// The returned future only ends when it is cancelled, either by dropping it or through a
    /// [`CancellationToken`][crate::CancellationToken].
    fn subscribe_with<H>(mut handler: H) -> impl Future<Output = Result<Infallible>> + Send
    where
        H: FnMut(Self::Payload) + Send,
    {
        let mut subscription = Self::subscribe();

        async move {
            loop {
                handler(subscription.next_event().await?);
            }
        }
    }
}

/// Declares an event type with its own process-wide topic.
///
/// The declared type is a unit struct implementing [`EventDescription`]. Its topic is created
/// the first time it is used and lives for the rest of the process.
///
/// # Example
///
/// ```rust
/// use tidings::{EventDescription, event};
/// # use futures::executor::block_on;
///
/// event! {
///     /// The thermostat reported a new temperature.
///     pub TemperatureChanged => f64;
/// }
///
/// # block_on(async {
/// let mut readings = TemperatureChanged::subscribe();
///
/// TemperatureChanged::send(21.5);
///
/// assert_eq!(readings.next_event().await.unwrap(), 21.5);
/// # });
/// ```
#[macro_export]
macro_rules! event {
    ($(#[$meta:meta])* $vis:vis $name:ident => $payload:ty $(;)?) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Default)]
        $vis struct $name;

        impl $crate::EventDescription for $name {
            type Payload = $payload;

            fn list() -> &'static $crate::EventList<$payload> {
                static LIST: ::std::sync::LazyLock<$crate::EventList<$payload>> =
                    ::std::sync::LazyLock::new($crate::EventList::new);

                &LIST
            }
        }
    };
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::ptr;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    use futures::executor::block_on;
    use testing::with_watchdog;

    use super::*;
    use crate::CancellationToken;

    // Each test declares its own event type so that parallel tests never share a topic.

    #[test]
    fn declared_event_round_trip() {
        event! {
            DoorOpened => &'static str;
        }

        with_watchdog(|| {
            let mut subscription = DoorOpened::subscribe();

            DoorOpened::send("front");
            DoorOpened::send("back");

            assert_eq!(block_on(subscription.next_event()).unwrap(), "front");
            assert_eq!(block_on(subscription.next_event()).unwrap(), "back");
        });
    }

    #[test]
    fn declared_event_is_process_wide() {
        event! {
            LevelChanged => u32;
        }

        with_watchdog(|| {
            let next = LevelChanged::next();

            thread::spawn(|| LevelChanged::send(3)).join().unwrap();

            assert_eq!(block_on(next).unwrap(), 3);
            assert!(ptr::eq(LevelChanged::list(), LevelChanged::list()));
        });
    }

    #[test]
    fn subscribe_with_runs_until_cancelled() {
        event! {
            Tick => usize;
        }

        with_watchdog(|| {
            let seen = Arc::new(AtomicUsize::new(0));
            let token = CancellationToken::new();

            let handling = Tick::subscribe_with({
                let seen = Arc::clone(&seen);
                let token = token.clone();
                move |value| {
                    seen.fetch_add(value, Ordering::SeqCst);

                    if seen.load(Ordering::SeqCst) >= 6 {
                        token.cancel();
                    }
                }
            });

            let sender = thread::spawn(|| {
                thread::sleep(Duration::from_millis(10));
                for value in 1..=3 {
                    Tick::send(value);
                }
            });

            let result = block_on(token.run_until_cancelled(handling));
            sender.join().unwrap();

            assert!(result.unwrap_err().is_cancelled());
            assert_eq!(seen.load(Ordering::SeqCst), 6);
        });
    }
}
