//! Broadcast topics.
//!
//! A topic is a chain of nodes. The newest node (the frontier) is the event nobody has sent
//! yet. Sending swaps a fresh node into the frontier slot and delivers the payload, together
//! with a link to that fresh node, into the node it replaced. A subscription is nothing more
//! than a reference to the first node it has not read, so every subscription walks the same
//! chain at its own pace.

mod description;
mod list;
mod node;
mod subscription;

pub use description::*;
pub use list::*;
pub use subscription::*;
