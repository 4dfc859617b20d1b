//! Defines the physical binary layout of the gravec stream.
//!
//! # Layout
//! A stream opens with a fixed 4-byte header and then carries a sequence
//! of records, each introduced by a single marker byte:
//!
//! ```text
//! [Magic u16] [Version u16] [Record] [Record] ...
//! ```
//!
//! Structured records (objects, arrays, strings, class descriptors) are
//! interleaved with length-framed opaque *block data* written by custom
//! per-class hooks. Every reference-kind value is assigned a small
//! integer handle the first time it is written; later occurrences of the
//! same identity appear as a [`marker::REFERENCE`] record carrying that
//! handle.

/// Stream magic constant, written big-endian as the first two bytes.
pub const STREAM_MAGIC: u16 = 0xACED;

/// Stream format version, written big-endian after the magic.
pub const STREAM_VERSION: u16 = 5;

/// First assignable handle. Deliberately distinct from 0 so a handle can
/// never be confused with small sentinel values in a hex dump.
pub const BASE_WIRE_HANDLE: u32 = 0x7E_0000;

/// Capacity of the block-data buffer; frames at or under this size use
/// the short form ([`marker::BLOCKDATA`] + u8 length).
pub const MAX_BLOCK_SIZE: usize = 1024;

/// Record marker bytes.
///
/// Single-byte discriminants of the record enumeration. Any other value
/// in marker position is a stream corruption.
pub mod marker {
    /// The null reference.
    pub const NULL: u8 = 0x70;
    /// Back-reference to an already written value, followed by a u32 handle.
    pub const REFERENCE: u8 = 0x71;
    /// Inline class descriptor (name, fingerprint, flags, fields).
    pub const CLASSDESC: u8 = 0x72;
    /// Composite instance.
    pub const OBJECT: u8 = 0x73;
    /// Length-prefixed modified-UTF text.
    pub const STRING: u8 = 0x74;
    /// Array with element count and per-element payload.
    pub const ARRAY: u8 = 0x75;
    /// A class used as a value (not an instance of it).
    pub const CLASS: u8 = 0x76;
    /// Short block-data frame: u8 byte count follows.
    pub const BLOCKDATA: u8 = 0x77;
    /// Terminator of a custom-data region.
    pub const ENDBLOCKDATA: u8 = 0x78;
    /// Handle table reset; numbering restarts at [`super::BASE_WIRE_HANDLE`].
    pub const RESET: u8 = 0x79;
    /// Long block-data frame: u32 byte count follows.
    pub const BLOCKDATA_LONG: u8 = 0x7A;
    /// A failure captured mid-write; the captured message record follows.
    pub const EXCEPTION: u8 = 0x7B;
}

/// Modifier bits used by the fingerprint computation.
pub mod modifier {
    /// Public.
    pub const PUBLIC: u32 = 0x0001;
    /// Private; private constructors/methods are excluded from digesting.
    pub const PRIVATE: u32 = 0x0002;
    /// Protected.
    pub const PROTECTED: u32 = 0x0004;
    /// Static.
    pub const STATIC: u32 = 0x0008;
    /// Final.
    pub const FINAL: u32 = 0x0010;
    /// Interface.
    pub const INTERFACE: u32 = 0x0200;
    /// Abstract.
    pub const ABSTRACT: u32 = 0x0400;

    /// Only these class modifier bits participate in the fingerprint.
    pub const CLASS_FILTER: u32 = PUBLIC | FINAL | INTERFACE | ABSTRACT;
}

/// Capability flags of a class descriptor, stored in one byte on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassFlags(u8);

impl ClassFlags {
    /// The class declares a custom write hook; its field data is followed
    /// by block data and an end marker.
    pub const WRITE_HOOK: u8 = 0x01;
    /// The class uses default field-by-field encoding.
    pub const FIELD_SERIAL: u8 = 0x02;
    /// The class fully owns its wire representation (mutually exclusive
    /// with `FIELD_SERIAL`).
    pub const EXTERNAL: u8 = 0x04;

    /// Builds the flag byte for a class.
    pub fn new(external: bool, write_hook: bool) -> Self {
        let mut byte = if external {
            Self::EXTERNAL
        } else {
            Self::FIELD_SERIAL
        };
        if write_hook {
            byte |= Self::WRITE_HOOK;
        }
        Self(byte)
    }

    /// Reconstructs flags from the wire byte.
    pub fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    /// True if the class owns its own wire representation.
    pub fn is_external(&self) -> bool {
        (self.0 & Self::EXTERNAL) != 0
    }

    /// True if the class uses field-by-field encoding.
    pub fn is_field_serial(&self) -> bool {
        (self.0 & Self::FIELD_SERIAL) != 0
    }

    /// True if a custom write hook produced block data for this level.
    pub fn has_write_hook(&self) -> bool {
        (self.0 & Self::WRITE_HOOK) != 0
    }

    /// Raw byte representation.
    pub fn as_u8(&self) -> u8 {
        self.0
    }
}

/// Wire tag of a serializable field, doubling as the first byte of the
/// field's type signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FieldTag {
    /// `i8`, signature `B`.
    Byte,
    /// `u16` code unit, signature `C`.
    Char,
    /// `f64`, signature `D`.
    Double,
    /// `f32`, signature `F`.
    Float,
    /// `i32`, signature `I`.
    Int,
    /// `i64`, signature `J`.
    Long,
    /// `i16`, signature `S`.
    Short,
    /// `bool`, signature `Z`.
    Boolean,
    /// Reference to a composite or string, signature `L<name>;`.
    Object,
    /// Reference to an array, signature `[<element>`.
    Array,
}

impl FieldTag {
    /// The tag byte written on the wire.
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Byte => b'B',
            Self::Char => b'C',
            Self::Double => b'D',
            Self::Float => b'F',
            Self::Int => b'I',
            Self::Long => b'J',
            Self::Short => b'S',
            Self::Boolean => b'Z',
            Self::Object => b'L',
            Self::Array => b'[',
        }
    }

    /// Parses a wire tag byte.
    pub fn from_u8(byte: u8) -> Option<Self> {
        Some(match byte {
            b'B' => Self::Byte,
            b'C' => Self::Char,
            b'D' => Self::Double,
            b'F' => Self::Float,
            b'I' => Self::Int,
            b'J' => Self::Long,
            b'S' => Self::Short,
            b'Z' => Self::Boolean,
            b'L' => Self::Object,
            b'[' => Self::Array,
            _ => return None,
        })
    }

    /// True for the eight fixed-width scalar tags.
    pub fn is_primitive(self) -> bool {
        !matches!(self, Self::Object | Self::Array)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_are_mutually_exclusive() {
        let plain = ClassFlags::new(false, false);
        assert!(plain.is_field_serial());
        assert!(!plain.is_external());

        let ext = ClassFlags::new(true, false);
        assert!(ext.is_external());
        assert!(!ext.is_field_serial());
    }

    #[test]
    fn tag_round_trip() {
        for byte in [b'B', b'C', b'D', b'F', b'I', b'J', b'S', b'Z', b'L', b'['] {
            let tag = FieldTag::from_u8(byte).expect("known tag");
            assert_eq!(tag.as_u8(), byte);
        }
        assert!(FieldTag::from_u8(b'Q').is_none());
    }

    #[test]
    fn marker_bytes_are_contiguous() {
        assert_eq!(marker::NULL, 0x70);
        assert_eq!(marker::EXCEPTION, 0x7B);
    }
}
