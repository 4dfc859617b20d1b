//! Centralized error handling for gravec.
//!
//! Every failure a session can hit is represented as a [`GravecError`]
//! variant and propagated through the [`Result`] type; the library never
//! panics (enforced by `#![deny(clippy::panic)]` and
//! `#![deny(clippy::unwrap_used)]`).
//!
//! ## Error Taxonomy
//!
//! - **NotSerializable:** the type carries no serialization capability
//!   (no registered class, or a value kind that cannot travel on its own).
//! - **InvalidClass:** the class name is known but its compatibility
//!   fingerprint does not match the stream, or the descriptor is
//!   structurally malformed.
//! - **ClassNotFound:** the resolution hook cannot map a wire descriptor
//!   to any locally registered class.
//! - **StreamCorrupted:** bad header, unknown record marker, a missing
//!   end-of-block marker, or malformed UTF data.
//! - **OptionalData:** a typed value was requested while the stream is
//!   positioned inside custom block data, or the other way around.
//! - **NotActive:** a default-field operation was invoked outside an
//!   active encode/decode callback for that value.
//! - **WriteAborted:** the stream carries a captured failure from the
//!   writing side; decoding replays it instead of producing a value.
//! - **Io:** failure of the underlying octet sink/source.
//!
//! All of these are terminal to the current session: nothing is retried
//! internally, and the caller decides whether to abandon or start over
//! with a fresh session (and therefore a fresh handle table).
//!
//! ## Usage
//!
//! ```rust
//! use gravec::{GravecError, Result};
//!
//! fn check(err: &GravecError) {
//!     match err {
//!         GravecError::StreamCorrupted(msg) => eprintln!("bad stream: {msg}"),
//!         GravecError::Io(e) => eprintln!("I/O: {e}"),
//!         other => eprintln!("{other}"),
//!     }
//! }
//!
//! fn parse() -> Result<u32> {
//!     Err(GravecError::StreamCorrupted("unknown marker 0x42".into()))
//! }
//! # let _ = parse().map_err(|e| check(&e));
//! ```

use std::fmt;
use std::io;
use std::sync::Arc;

/// A specialized `Result` type for gravec operations.
pub type Result<T> = std::result::Result<T, GravecError>;

/// The master error enum covering all failure domains of a serialization
/// session.
///
/// The `Io` variant wraps the underlying `io::Error` in an `Arc` so the
/// whole enum stays `Clone` and can be stored or shared after a session
/// is abandoned.
#[derive(Debug, Clone)]
pub enum GravecError {
    /// The value's type carries no serialization capability.
    NotSerializable(String),

    /// The class is known locally but incompatible with the stream:
    /// fingerprint mismatch or a malformed descriptor.
    InvalidClass(String),

    /// No locally registered class matches the wire descriptor's name.
    ClassNotFound(String),

    /// The byte stream violates the wire protocol: bad header, unknown
    /// marker, missing end-of-block terminator, malformed modified UTF.
    StreamCorrupted(String),

    /// A typed read was attempted where only block data is available,
    /// or block data was requested past its end.
    OptionalData(String),

    /// A default-field operation was invoked outside an active
    /// encode/decode callback.
    NotActive(String),

    /// The stream carries an exception captured while it was written.
    /// The payload is the captured failure's message.
    WriteAborted(String),

    /// Low-level failure of the underlying octet sink or source.
    Io(Arc<io::Error>),
}

impl fmt::Display for GravecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotSerializable(s) => write!(f, "not serializable: {s}"),
            Self::InvalidClass(s) => write!(f, "invalid class: {s}"),
            Self::ClassNotFound(s) => write!(f, "class not found: {s}"),
            Self::StreamCorrupted(s) => write!(f, "stream corrupted: {s}"),
            Self::OptionalData(s) => write!(f, "optional data: {s}"),
            Self::NotActive(s) => write!(f, "not active: {s}"),
            Self::WriteAborted(s) => write!(f, "write aborted: {s}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for GravecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<io::Error> for GravecError {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_stay_cloneable() {
        let err: GravecError = io::Error::new(io::ErrorKind::UnexpectedEof, "eof").into();
        let copy = err.clone();
        assert!(matches!(copy, GravecError::Io(_)));
        assert!(copy.to_string().contains("eof"));
    }

    #[test]
    fn display_names_the_domain() {
        let err = GravecError::InvalidClass("demo.Point: fingerprint mismatch".into());
        assert_eq!(
            err.to_string(),
            "invalid class: demo.Point: fingerprint mismatch"
        );
    }
}
