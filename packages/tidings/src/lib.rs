#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Asynchronous coordination primitives: promises, broadcast events and observable variables.
//!
//! This crate provides the building blocks for code that reacts to change without being tied
//! to a particular async runtime. Everything here can be awaited from any executor and
//! resolved from any thread.
//!
//! # Quick start
//!
//! ```rust
//! use tidings::{UpdatableExt, Variable, merged, transformed};
//! # use futures::executor::block_on;
//!
//! # block_on(async {
//! let configured = Variable::new(10_u32);
//! let overridden = Variable::new(0_u32);
//!
//! // Whichever source changed most recently wins.
//! let effective = merged(configured.clone(), overridden.clone());
//! let label = transformed(effective, |state| Ok(format!("limit={}", state.into_value()?)));
//!
//! assert_eq!(label.value().await.unwrap(), "limit=0");
//!
//! configured.set(25);
//! assert_eq!(label.value().await.unwrap(), "limit=25");
//! # });
//! ```
//!
//! Broadcast events work the same way, through a shared topic:
//!
//! ```rust
//! use tidings::EventList;
//! # use futures::executor::block_on;
//!
//! # block_on(async {
//! let topic = EventList::new();
//! let mut subscription = topic.subscribe();
//!
//! topic.send("ready");
//! assert_eq!(subscription.next_event().await.unwrap(), "ready");
//! # });
//! ```
//!
//! # Key features
//!
//! - **Promises**: [`future()`] bridges callback-style code into a [`Completion`] that can be
//!   fulfilled, failed or cancelled from anywhere. Dropping a completion cancels the promise.
//! - **Events**: an [`EventList`] is a broadcast topic. Every [`EventSubscription`] sees every
//!   event sent after it was created, in order, and a cancelled read never loses an event.
//! - **Variables**: anything [`Updatable`] exposes a [`MomentaryState`] stamped with a
//!   [`Generation`] and can notify waiters when it changes. [`Variable`], [`Constant`] and
//!   [`TimeVariable`] hold or produce state; [`merged()`], [`combined()`], [`transformed()`]
//!   and [`transformed_async()`] derive it, recomputing only when a source changed.
//! - **Cancellation**: a [`CancellationToken`] interrupts any number of waits at once.
//!
//! # Cancellation
//!
//! Every wait in this crate ends with [`Error::Cancelled`] rather than hanging when the other
//! side goes away: when all handles to a promise are dropped or when the last handle to a
//! variable with waiters is dropped.

mod cancellation;
mod error;
mod events;
mod generation;
mod promise;
mod state;
mod updatable;
mod variables;
mod waiters;

pub use cancellation::*;
pub use error::*;
pub use events::*;
pub use generation::*;
pub use promise::{Completion, Promise, future, never};
pub use state::*;
pub use updatable::*;
pub use variables::*;
