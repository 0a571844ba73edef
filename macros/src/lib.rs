//! Procedural macros for the observa observation engine.
//!
//! - `#[derive(Observable)]`: Implements `observa::Observable` for a struct with named fields
//!   and generates a `{Name}Fields` trait of journaled getters and notifying setters for
//!   `observa::Topic<Name>`.
//! - `#[traps]`: On an inherent `impl` block, generates a `{Name}Traps` trait that calls the
//!   block's methods through a topic as instrumented queries (`&self`) and commands (`&mut self`).
//!
//! Usage:
//! ```rust,ignore
//! use observa::{Observable, traps, wrap};
//!
//! #[derive(Observable)]
//! struct Counter { count: u32 }
//!
//! #[traps]
//! impl Counter {
//!     #[trap(changes(count))]
//!     fn increment(&mut self) -> u32 { self.count += 1; self.count }
//! }
//!
//! let counter = wrap(Counter { count: 0 });
//! counter.set_count(5);
//! assert_eq!(counter.increment()?, 6);
//! ```
use proc_macro::TokenStream;

mod observable;
mod traps;

/// Derives `observa::Observable` and a `{Name}Fields` accessor trait.
///
/// Field options, in `#[observe(..)]`:
/// - `skip`: no accessors, and the field isn't one of the observable keys.
/// - `readonly`: getter only.
/// - `compare = path`: compare replayed reads with `path: fn(&T, &T) -> bool`
///   instead of `observa::Same`.
///
/// Every getter is journaled under the field name; every setter announces it.
/// `Option` fields also get a `delete_{field}` setter.
#[proc_macro_derive(Observable, attributes(observe))]
pub fn derive_observable(input: TokenStream) -> TokenStream {
    let input = syn::parse_macro_input!(input as syn::DeriveInput);
    observable::expand(input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

/// Generates a `{Name}Traps` trait from an inherent `impl` block.
///
/// Methods taking `&self` become instrumented queries and keep their return
/// type; methods taking `&mut self` become commands returning
/// `observa::Result<R>`. Associated functions and methods taking `self` by
/// value are left out.
///
/// Method options, in `#[trap(..)]`:
/// - `skip`: leave the method out.
/// - `changes(a, "b", ..)`: keys announced by a command. Without it every key
///   of the target is announced, which requires the target to be
///   `Observable`.
///
/// The trait is `pub` unless a visibility is given: `#[traps(pub(crate))]`.
#[proc_macro_attribute]
pub fn traps(attr: TokenStream, item: TokenStream) -> TokenStream {
    let item = syn::parse_macro_input!(item as syn::ItemImpl);
    traps::expand(attr.into(), item)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}
