//! Observa — reactive observation of plain Rust values
//!
//! Wrap a value into a [`Topic`], attach [`Observer`]s to it and get told,
//! once per batch, when something you read from it has changed.
//!
//! - Reads and instrumented method calls are journaled while a recording
//!   [`Marker`] is open, and can be replayed later to check whether a
//!   derived result is still valid (see [`journal`] and [`Memo`]).
//! - Writes announce the changed keys. All changes made until the next
//!   delivery are coalesced into one [`NotifyEvent`] per observer.
//! - Instrumented methods ([`Query`], [`Command`]) also report a
//!   [`TrapEvent`] to the topic's observers synchronously, which may
//!   override the returned value.
//!
//! The engine is single-threaded: all state lives in thread locals, and
//! topics and observers are `!Send`.
//!
//! ```rust
//! use observa::{ObserverHandle, on, pulse, wrap};
//! use std::{cell::Cell, rc::Rc};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let counter = wrap(0u32);
//! let seen = Rc::new(Cell::new(0));
//! let observer = {
//!     let seen = seen.clone();
//!     ObserverHandle::from_fn(move |event| {
//!         if event.is_notify() {
//!             seen.set(seen.get() + 1);
//!         }
//!     })
//! };
//! on(&counter, &observer);
//!
//! counter.write("value", |v| *v += 1);
//! counter.write("value", |v| *v += 1);
//! pulse().await;
//! assert_eq!(seen.get(), 1);
//! # }
//! ```

mod config;
mod error;
mod event;
mod id;
mod key;
mod memo;
mod method;
mod notify_event;
mod observer;
mod pulse;
mod same;
mod subscription;
mod topic;
mod trap_event;

pub mod collections;
pub mod journal;
pub mod observers;

pub(crate) mod internal;

extern crate self as observa;

pub use collections::{AsyncMonitor, Promise, PromiseState};
pub use config::{Config, PanicPolicy, Schedule};
pub use error::Error;
pub use event::ReflectionEvent;
pub use id::{Generation, MethodId, ObserverId, TopicId};
pub use journal::{Accessor, JournalEntry, Marker, Recording, mark, recording, replay, unmark};
pub use key::Key;
pub use memo::{Memo, memo};
pub use method::{Command, Query, Thunk, thunk};
pub use notify_event::NotifyEvent;
pub use observer::{FnObserver, Observer, ObserverHandle};
pub use pulse::{Pulse, flush, pulse};
pub use same::Same;
pub use subscription::{clear, focus, freeze, has, is_observer_active, is_topic_active, observe, off, on, revoke};
pub use topic::{AnyTopic, AsTopic, Observable, Topic, generation, id, lookup, notify, reset, trace, wrap};
pub use trap_event::TrapEvent;

#[cfg(feature = "macros")]
pub use observa_macros::{Observable, traps};

pub type Result<T = ()> = std::result::Result<T, Error>;

/// Unique id of a delivered batch.
pub type EventId = u128;

/// Replace the engine configuration of the current thread.
///
/// Takes effect for the next scheduled batch.
pub fn configure(config: Config) {
    internal::dispatch::configure(config);
}

/// The engine configuration of the current thread.
pub fn config() -> Config {
    internal::dispatch::config()
}

pub mod prelude {
    pub use crate::event::ReflectionEvent;
    pub use crate::method::{Command, Query};
    pub use crate::observer::{Observer, ObserverHandle};
    pub use crate::pulse::pulse;
    pub use crate::subscription::{focus, off, on};
    pub use crate::topic::{AsTopic, Observable, Topic, wrap};
    #[cfg(feature = "macros")]
    pub use observa_macros::{Observable, traps};
}
