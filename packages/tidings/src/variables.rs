//! Concrete [`Updatable`][crate::Updatable] implementations.
//!
//! [`Variable`] and [`Constant`] hold their own values, [`TimeVariable`] follows the clock,
//! and [`Derived`] variables compute their state from other sources: [`merged()`],
//! [`combined()`], [`transformed()`] and [`transformed_async()`].

mod combined;
mod constant;
mod derived;
mod merged;
mod time;
mod transformed;
mod variable;

pub use combined::*;
pub use constant::*;
pub use derived::{Derivation, Derived};
pub use merged::*;
pub use time::*;
pub use transformed::*;
pub use variable::*;
