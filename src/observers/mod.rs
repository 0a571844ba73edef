//! Ready-to-use observer implementations.
//!
//! - [`Tracer`] - Logs every event it receives via `tracing`
//! - [`Recorder`] - Records delivered batches to a JSON Lines file (requires `recorder` feature)
//!
//! # Example
//!
//! ```rust
//! use observa::{ObserverHandle, observers::Tracer, on, wrap};
//!
//! let topic = wrap(0u32);
//! let tracer = ObserverHandle::new(Tracer);
//! on(&topic, &tracer);
//! ```

mod tracer;
pub use tracer::Tracer;

#[cfg(feature = "recorder")]
mod recorder;

#[cfg(feature = "recorder")]
pub use recorder::Recorder;
