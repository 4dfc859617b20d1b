//! Octet collaborators and the primitive codec.
//!
//! The engines never talk to files or sockets directly: an encoding
//! session binds to an [`OctetSink`] and a decoding session to an
//! [`OctetSource`]. Both are blanket-implemented for the std I/O traits,
//! so a `Vec<u8>`, a `File` or a `Cursor` all work out of the box.
//!
//! Fixed-width primitives travel big-endian; floats are
//! bit-reinterpreted to their integer representation first. Text uses a
//! u16 big-endian byte-count prefix followed by *modified* UTF-8: the
//! standard 1/2/3-byte short forms, except that NUL is encoded as the
//! two-byte sequence `C0 80` so a literal zero byte never appears inside
//! string payloads.

use std::io;

use crate::error::{GravecError, Result};

/// Blocking byte sink an encoding session writes through.
pub trait OctetSink {
    /// Writes the whole buffer or fails.
    fn write_octets(&mut self, buf: &[u8]) -> Result<()>;

    /// Pushes buffered bytes toward the destination.
    fn flush_octets(&mut self) -> Result<()>;
}

impl<W: io::Write> OctetSink for W {
    fn write_octets(&mut self, buf: &[u8]) -> Result<()> {
        self.write_all(buf)?;
        Ok(())
    }

    fn flush_octets(&mut self) -> Result<()> {
        self.flush()?;
        Ok(())
    }
}

/// Blocking byte source a decoding session reads from.
pub trait OctetSource {
    /// Fills the whole buffer or fails; a short read is an error.
    fn read_octets(&mut self, buf: &mut [u8]) -> Result<()>;
}

impl<R: io::Read> OctetSource for R {
    fn read_octets(&mut self, buf: &mut [u8]) -> Result<()> {
        self.read_exact(buf)?;
        Ok(())
    }
}

// --- Big-endian append helpers (used by the fingerprint digest input) ---

/// Appends a big-endian u16.
pub fn push_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_be_bytes());
}

/// Appends a big-endian u32.
pub fn push_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

/// Appends a length-prefixed modified-UTF string, the same layout the
/// wire uses for class and field names.
pub fn push_utf(out: &mut Vec<u8>, s: &str) -> Result<()> {
    let bytes = to_mutf8(s);
    let len = u16::try_from(bytes.len()).map_err(|_| {
        GravecError::StreamCorrupted(format!("UTF payload of {} bytes exceeds u16", bytes.len()))
    })?;
    push_u16(out, len);
    out.extend_from_slice(&bytes);
    Ok(())
}

// --- Modified UTF-8 ---

/// Encodes a string as modified UTF-8 (without the length prefix).
///
/// Each UTF-16 code unit of the input is encoded independently in the
/// 1/2/3-byte short forms; NUL becomes `C0 80`.
pub fn to_mutf8(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len());
    for unit in s.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            // NUL and the two-byte range share the C0..DF form.
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | ((unit >> 6) as u8 & 0x1F));
                out.push(0x80 | (unit as u8 & 0x3F));
            }
            _ => {
                out.push(0xE0 | ((unit >> 12) as u8 & 0x0F));
                out.push(0x80 | ((unit >> 6) as u8 & 0x3F));
                out.push(0x80 | (unit as u8 & 0x3F));
            }
        }
    }
    out
}

/// Decodes modified UTF-8 bytes back into a string.
///
/// Fails with [`GravecError::StreamCorrupted`] on truncated sequences,
/// bad continuation bytes, or unpaired surrogates.
pub fn from_mutf8(bytes: &[u8]) -> Result<String> {
    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match b {
            0x00..=0x7F => {
                units.push(u16::from(b));
                i += 1;
            }
            0xC0..=0xDF => {
                let c = continuation(bytes, i + 1)?;
                units.push((u16::from(b & 0x1F) << 6) | u16::from(c));
                i += 2;
            }
            0xE0..=0xEF => {
                let c1 = continuation(bytes, i + 1)?;
                let c2 = continuation(bytes, i + 2)?;
                units.push((u16::from(b & 0x0F) << 12) | (u16::from(c1) << 6) | u16::from(c2));
                i += 3;
            }
            _ => {
                return Err(GravecError::StreamCorrupted(format!(
                    "malformed UTF lead byte {b:#04x} at offset {i}"
                )));
            }
        }
    }
    String::from_utf16(&units)
        .map_err(|_| GravecError::StreamCorrupted("unpaired UTF-16 surrogate in text".into()))
}

fn continuation(bytes: &[u8], at: usize) -> Result<u8> {
    match bytes.get(at) {
        Some(&b) if b & 0xC0 == 0x80 => Ok(b & 0x3F),
        Some(&b) => Err(GravecError::StreamCorrupted(format!(
            "malformed UTF continuation byte {b:#04x} at offset {at}"
        ))),
        None => Err(GravecError::StreamCorrupted(
            "truncated UTF sequence".into(),
        )),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn ascii_is_identity() {
        let bytes = to_mutf8("abc");
        assert_eq!(bytes, b"abc");
        assert_eq!(from_mutf8(&bytes).unwrap(), "abc");
    }

    #[test]
    fn nul_uses_two_byte_form() {
        let bytes = to_mutf8("a\u{0}b");
        assert_eq!(bytes, &[b'a', 0xC0, 0x80, b'b']);
        assert_eq!(from_mutf8(&bytes).unwrap(), "a\u{0}b");
    }

    #[test]
    fn multibyte_round_trip() {
        for s in ["péché", "数据流", "\u{7FF}\u{800}", "emoji \u{1F600} pair"] {
            let bytes = to_mutf8(s);
            assert!(!bytes.contains(&0));
            assert_eq!(from_mutf8(&bytes).unwrap(), s);
        }
    }

    #[test]
    fn truncated_sequence_is_corruption() {
        let err = from_mutf8(&[0xE4, 0xB8]).unwrap_err();
        assert!(matches!(err, GravecError::StreamCorrupted(_)));
    }

    #[test]
    fn utf_prefix_is_byte_count() {
        let mut out = Vec::new();
        push_utf(&mut out, "数").unwrap();
        // 3 payload bytes, not 1 character.
        assert_eq!(&out[..2], &[0, 3]);
        assert_eq!(out.len(), 5);
    }
}
