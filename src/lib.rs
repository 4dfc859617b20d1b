//! # Gravec
//!
//! A graph-preserving, self-describing serialization library for Rust that
//! reconstructs arbitrary object graphs, shared references and cycles
//! included, from a compact binary stream.
//!
//! ## Overview
//!
//! Gravec is fundamentally different from tree-shaped serialization
//! libraries. Instead of flattening data into a value tree, Gravec tracks
//! the *identity* of every reference it writes: the first occurrence of an
//! object, array, string, or class descriptor is serialized in full and
//! assigned a stream handle, and every later occurrence collapses into a
//! four-byte back-reference. Decoding rebuilds the same shape, so two
//! fields that pointed at one object before encoding point at one object
//! after decoding.
//!
//! ### Key Features
//!
//! *   **Graph fidelity:** Shared references and reference cycles survive
//!     a round trip with their aliasing intact.
//! *   **Self-describing streams:** Every object travels behind a class
//!     descriptor carrying the class name, a structural fingerprint, and
//!     the full field layout. A reader never guesses at wire shape.
//! *   **Structural fingerprints:** A SHA-1 digest over a class's
//!     canonical structure pins writer and reader to the same layout;
//!     drift is detected at the first descriptor, not at the first
//!     corrupted field.
//! *   **Constructor bypass:** Decoded instances are allocated directly
//!     from their class template and populated slot by slot, level by
//!     level, most-super first.
//! *   **Custom hooks:** Classes may take over their own wire format, or
//!     augment the default field data with extra primitives and records.
//!     Custom data is framed so a reader without the hook can skip it.
//! *   **Substitution:** Per-class write-replace and read-resolve hooks,
//!     plus session-level replacement and resolution, swap values on
//!     their way through the engine.
//! *   **Validation:** Read hooks may queue callbacks that run once the
//!     whole graph is wired together, in priority order.
//!
//! ## Architecture
//!
//! ### The Value Model
//!
//! The engines operate on [`value::Value`], a dynamic representation of
//! one graph node: the eight primitive kinds, strings, typed arrays,
//! class-shaped objects, classes, descriptors, and null. Reference kinds
//! are reference-counted, and the encoder keys its handle table on
//! pointer identity, which is what makes aliasing observable.
//!
//! ### The Registry
//!
//! [`registry`] holds the process-wide class table. A class is described
//! once with a [`descriptor::ClassSpec`] builder and registered; both
//! engines then resolve stream names against it. Registration computes
//! the structural fingerprint unless the spec pins one explicitly.
//!
//! ### The Engines
//!
//! [`encoder::ObjectEncoder`] walks a value graph and emits records;
//! [`decoder::ObjectDecoder`] parses records and rebuilds the graph.
//! Both expose a primitive-data surface ([`encoder::DataOutput`] /
//! [`decoder::DataInput`]) that custom hooks write and read through,
//! with block-data framing handled underneath.
//!
//! ### The Typed Bridge
//!
//! `#[derive(GraphClass)]` maps a plain Rust struct onto the value model:
//! the class template registers itself on first use, and the struct
//! converts to and from value graphs without hand-written glue.
//!
//! ## Usage Patterns
//!
//! ### Basic Round Trip
//!
//! ```rust,ignore
//! use gravec::{Gravec, GraphClass};
//!
//! #[derive(GraphClass)]
//! #[graph(class = "demo.Point")]
//! struct Point {
//!     x: i32,
//!     y: i32,
//! }
//!
//! Gravec::save("point.gv", &Point { x: 3, y: 4 })?;
//! let p: Point = Gravec::read("point.gv")?;
//! ```
//!
//! ### Dynamic Graphs
//!
//! ```rust,ignore
//! use gravec::{ClassSpec, ObjectEncoder, ObjectDecoder, Value, registry};
//!
//! let class = registry::register(
//!     ClassSpec::new("demo.Node").field_int("id").field_object("next", "demo.Node"),
//! )?;
//! let node = Value::object(class.new_instance());
//! // a self-referential graph round-trips with its cycle intact
//! if let Value::Object(obj) = &node {
//!     obj.borrow_mut().set("next", node.clone())?;
//! }
//! let bytes = gravec::Gravec::to_bytes(&node)?;
//! let back = gravec::Gravec::from_bytes(&bytes)?;
//! ```
//!
//! ### Stream Inspection
//!
//! ```rust,ignore
//! use gravec::inspect::StreamInspector;
//!
//! let report = StreamInspector::inspect(&bytes)?;
//! println!("{}", serde_json::to_string_pretty(&report)?);
//! ```
//!
//! ### Safety and Error Handling
//!
//! Gravec is designed with safety as a priority:
//!
//! * **No Unsafe:** The crate is `#![deny(unsafe_code)]`.
//! * **No Panics:** No `unwrap()` or `panic!()` calls in the library
//!   (enforced by clippy lints).
//! * **Comprehensive Errors:** All failures correspond to a
//!   [`GravecError`] variant.
//! * **Hostile Input:** Malformed streams surface as errors, never as
//!   misparses that silently produce wrong values.

#![deny(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![warn(missing_docs)]

// --- PUBLIC API MODULES ---
pub mod api;
pub mod codec;
pub mod decoder;
pub mod descriptor;
pub mod encoder;
pub mod error;
pub mod inspect;
pub mod registry;
pub mod value;
pub mod wire;

// --- MACRO SUPPORT MODULES ---

/// Runtime utilities used by the derived code.
pub mod rt;

/// Internal re-exports for the macro to ensure dependencies are available.
#[doc(hidden)]
pub mod internal {
    pub use crate::descriptor::ClassSpec;
    pub use crate::error::{GravecError, Result};
    pub use crate::rt::{instance_of, runtime_class, FieldCodec, GraphClass};
    pub use crate::value::Value;
    pub use crate::wire::FieldTag;
}

// --- RE-EXPORTS ---

pub use api::Gravec;
pub use decoder::{DataInput, ObjectDecoder};
pub use descriptor::{ClassDescriptor, ClassSpec, FieldDesc};
pub use encoder::{DataOutput, ObjectEncoder};
pub use error::{GravecError, Result};
// The derive macro and the trait share a name; macros live in their
// own namespace, so both imports resolve.
pub use gravec_derive::GraphClass;
pub use rt::GraphClass;
pub use value::{ArrayInstance, ElementKind, Instance, Value};

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn header_is_written_before_any_record() {
        let encoder = ObjectEncoder::new(Vec::new()).unwrap();
        let bytes = encoder.into_inner().unwrap();
        assert_eq!(bytes, vec![0xAC, 0xED, 0x00, 0x05]);
    }
}
