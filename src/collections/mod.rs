//! Observable standard collections.
//!
//! Wrapping a `Vec`, an [`IndexMap`](indexmap::IndexMap) or an
//! [`IndexSet`](indexmap::IndexSet) gives a topic with journaled accessors
//! and mutators that announce exactly the keys they change. [`Promise`]
//! makes the outcome of a future observable, [`AsyncMonitor`] the progress
//! of many.

mod map;
mod monitor;
mod promise;
mod set;
mod vec;

pub use monitor::{Activity, AsyncMonitor, OperationId};
pub use promise::{Promise, PromiseState, Settlement};
