//! Tools for inspecting the physical structure of encoded streams.
//! Useful for debugging hook output and verifying what a peer actually
//! wrote.
//!
//! The inspector is registry-free: it reconstructs object layout from
//! the descriptors carried by the stream itself, so it can dump streams
//! for classes this process has never registered. Custom data regions
//! are reported as opaque block frames plus any nested records.

use std::rc::Rc;

use serde::Serialize;

use crate::codec::from_mutf8;
use crate::error::{GravecError, Result};
use crate::wire::{marker, ClassFlags, FieldTag, BASE_WIRE_HANDLE, STREAM_MAGIC, STREAM_VERSION};

/// A structural report of one encoded stream.
#[derive(Debug, Serialize)]
pub struct StreamReport {
    /// Format version from the header.
    pub version: u16,
    /// Total stream size in bytes.
    pub byte_len: usize,
    /// Top-level records in stream order.
    pub records: Vec<RecordInfo>,
}

/// One parsed record.
#[derive(Debug, Serialize)]
pub enum RecordInfo {
    /// A null reference.
    Null,
    /// A back-reference to an earlier handle.
    BackReference {
        /// The referenced handle.
        handle: u32,
    },
    /// A primitive value inside field or array data.
    Prim {
        /// Rendered value.
        value: String,
    },
    /// A string record.
    Str {
        /// Assigned handle.
        handle: u32,
        /// Decoded text.
        value: String,
    },
    /// A class descriptor record.
    ClassDesc {
        /// Assigned handle.
        handle: u32,
        /// Stream class name.
        name: String,
        /// Structural fingerprint, rendered in hex.
        fingerprint: String,
        /// Whether the class owns its wire format.
        external: bool,
        /// Whether a custom write hook produced this class's data.
        has_write_hook: bool,
        /// Declared fields.
        fields: Vec<FieldInfo>,
        /// Superclass descriptor, if any.
        super_desc: Option<Box<RecordInfo>>,
    },
    /// A class-as-value record.
    Class {
        /// Assigned handle.
        handle: u32,
        /// Class name.
        name: String,
    },
    /// An object record.
    Object {
        /// Assigned handle.
        handle: u32,
        /// Most-derived class name.
        class: String,
        /// Per-level field data, most-super first.
        levels: Vec<LevelInfo>,
    },
    /// An array record.
    Array {
        /// Assigned handle.
        handle: u32,
        /// Array class name.
        class: String,
        /// Element count.
        length: u32,
        /// Elements in index order.
        elements: Vec<RecordInfo>,
    },
    /// A primitive block-data frame.
    BlockData {
        /// Payload length in bytes.
        length: usize,
    },
    /// A handle-table reset.
    Reset,
    /// A writer-side failure captured in the stream.
    Exception {
        /// The writer's error text.
        message: String,
    },
}

/// A declared field in a descriptor record.
#[derive(Debug, Serialize)]
pub struct FieldInfo {
    /// Field name.
    pub name: String,
    /// Type signature.
    pub signature: String,
}

/// Field data for one level of an object's inheritance chain.
#[derive(Debug, Serialize)]
pub struct LevelInfo {
    /// Class name at this level.
    pub class: String,
    /// Plainly-encoded field values, empty when the level's data sits
    /// inside a custom region.
    pub fields: Vec<NamedValue>,
    /// Records and frames of the level's custom data region.
    pub custom: Vec<RecordInfo>,
}

/// A field name paired with its parsed value.
#[derive(Debug, Serialize)]
pub struct NamedValue {
    /// Field name.
    pub name: String,
    /// Parsed value.
    pub value: RecordInfo,
}

/// The stream inspector tool.
#[derive(Debug)]
pub struct StreamInspector;

impl StreamInspector {
    /// Parses a complete encoded stream into a structural report.
    pub fn inspect(bytes: &[u8]) -> Result<StreamReport> {
        let mut walker = Walker {
            buf: bytes,
            pos: 0,
            handles: Vec::new(),
        };
        let magic = walker.u16()?;
        if magic != STREAM_MAGIC {
            return Err(GravecError::StreamCorrupted(format!(
                "bad stream magic {magic:#06x}, expected {STREAM_MAGIC:#06x}"
            )));
        }
        let version = walker.u16()?;
        if version != STREAM_VERSION {
            return Err(GravecError::StreamCorrupted(format!(
                "unsupported stream version {version}, expected {STREAM_VERSION}"
            )));
        }
        let mut records = Vec::new();
        while !walker.done() {
            records.push(walker.record()?);
        }
        Ok(StreamReport {
            version,
            byte_len: bytes.len(),
            records,
        })
    }
}

struct DescMeta {
    name: String,
    flags: ClassFlags,
    fields: Vec<(FieldTag, String)>,
    super_desc: Option<Rc<DescMeta>>,
}

impl DescMeta {
    fn chain(self: &Rc<Self>) -> Vec<Rc<DescMeta>> {
        let mut chain = Vec::new();
        let mut cur = Some(self.clone());
        while let Some(d) = cur {
            chain.push(d.clone());
            cur = d.super_desc.clone();
        }
        chain.reverse();
        chain
    }
}

enum Handle {
    Desc(Rc<DescMeta>),
    Plain,
}

struct Walker<'a> {
    buf: &'a [u8],
    pos: usize,
    handles: Vec<Handle>,
}

impl Walker<'_> {
    fn done(&self) -> bool {
        self.pos == self.buf.len()
    }

    fn take(&mut self, n: usize) -> Result<&[u8]> {
        let end = self.pos.checked_add(n).filter(|&e| e <= self.buf.len());
        let end = end.ok_or_else(|| {
            GravecError::StreamCorrupted(format!("truncated stream at offset {}", self.pos))
        })?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        let mut a = [0u8; 8];
        a.copy_from_slice(b);
        Ok(u64::from_be_bytes(a))
    }

    fn utf(&mut self) -> Result<String> {
        let len = self.u16()? as usize;
        from_mutf8(self.take(len)?)
    }

    fn next_handle(&mut self, h: Handle) -> u32 {
        let n = BASE_WIRE_HANDLE + self.handles.len() as u32;
        self.handles.push(h);
        n
    }

    fn record(&mut self) -> Result<RecordInfo> {
        match self.u8()? {
            marker::NULL => Ok(RecordInfo::Null),
            marker::REFERENCE => Ok(RecordInfo::BackReference {
                handle: self.u32()?,
            }),
            marker::STRING => {
                let value = self.utf()?;
                let handle = self.next_handle(Handle::Plain);
                Ok(RecordInfo::Str { handle, value })
            }
            marker::CLASSDESC => Ok(self.class_desc()?.0),
            marker::CLASS => {
                let (_, meta) = self.desc_link()?;
                let name = meta
                    .as_ref()
                    .map(|m| m.name.clone())
                    .unwrap_or_else(|| "<null>".to_owned());
                let handle = self.next_handle(Handle::Plain);
                Ok(RecordInfo::Class { handle, name })
            }
            marker::OBJECT => self.object(),
            marker::ARRAY => self.array(),
            marker::BLOCKDATA => {
                let len = self.u8()? as usize;
                self.take(len)?;
                Ok(RecordInfo::BlockData { length: len })
            }
            marker::BLOCKDATA_LONG => {
                let len = self.u32()? as usize;
                self.take(len)?;
                Ok(RecordInfo::BlockData { length: len })
            }
            marker::RESET => {
                self.handles.clear();
                Ok(RecordInfo::Reset)
            }
            marker::EXCEPTION => {
                self.handles.clear();
                let payload = self.record()?;
                self.handles.clear();
                let message = match payload {
                    RecordInfo::Str { value, .. } => value,
                    other => format!("{other:?}"),
                };
                Ok(RecordInfo::Exception { message })
            }
            other => Err(GravecError::StreamCorrupted(format!(
                "unknown record marker {other:#04x} at offset {}",
                self.pos - 1
            ))),
        }
    }

    /// Parses a descriptor link: null, a back-reference, or an inline
    /// descriptor record.
    fn desc_link(&mut self) -> Result<(RecordInfo, Option<Rc<DescMeta>>)> {
        match self.u8()? {
            marker::NULL => Ok((RecordInfo::Null, None)),
            marker::REFERENCE => {
                let handle = self.u32()?;
                let idx = handle
                    .checked_sub(BASE_WIRE_HANDLE)
                    .map(|i| i as usize)
                    .filter(|&i| i < self.handles.len())
                    .ok_or_else(|| {
                        GravecError::StreamCorrupted(format!(
                            "back-reference to unknown handle {handle:#x}"
                        ))
                    })?;
                let meta = match &self.handles[idx] {
                    Handle::Desc(m) => Some(m.clone()),
                    Handle::Plain => None,
                };
                Ok((RecordInfo::BackReference { handle }, meta))
            }
            marker::CLASSDESC => {
                let (info, meta) = self.class_desc()?;
                Ok((info, Some(meta)))
            }
            other => Err(GravecError::StreamCorrupted(format!(
                "marker {other:#04x} where a class descriptor was expected"
            ))),
        }
    }

    fn class_desc(&mut self) -> Result<(RecordInfo, Rc<DescMeta>)> {
        let name = self.utf()?;
        let fingerprint = self.u64()?;
        let handle_slot = self.handles.len();
        let handle = self.next_handle(Handle::Plain);
        let flags = ClassFlags::from_byte(self.u8()?);
        let count = self.u16()?;
        let mut fields = Vec::with_capacity(count as usize);
        let mut meta_fields = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let tag_byte = self.u8()?;
            let tag = FieldTag::from_u8(tag_byte).ok_or_else(|| {
                GravecError::StreamCorrupted(format!("unknown field tag {tag_byte:#04x}"))
            })?;
            let field_name = self.utf()?;
            let signature = if tag.is_primitive() {
                (tag.as_u8() as char).to_string()
            } else {
                match self.record()? {
                    RecordInfo::Str { value, .. } => value,
                    RecordInfo::BackReference { handle } => format!("<handle {handle:#x}>"),
                    other => {
                        return Err(GravecError::StreamCorrupted(format!(
                            "{other:?} where a field type string was expected"
                        )))
                    }
                }
            };
            fields.push(FieldInfo {
                name: field_name.clone(),
                signature,
            });
            meta_fields.push((tag, field_name));
        }
        // Annotation region: always empty in streams this crate writes,
        // consumed here so foreign streams still parse.
        self.custom_region()?;
        let (super_info, super_meta) = self.desc_link()?;
        let meta = Rc::new(DescMeta {
            name: name.clone(),
            flags,
            fields: meta_fields,
            super_desc: super_meta,
        });
        self.handles[handle_slot] = Handle::Desc(meta.clone());
        let info = RecordInfo::ClassDesc {
            handle,
            name,
            fingerprint: format!("{fingerprint:#018x}"),
            external: flags.is_external(),
            has_write_hook: flags.has_write_hook(),
            fields,
            super_desc: (!matches!(super_info, RecordInfo::Null)).then(|| Box::new(super_info)),
        };
        Ok((info, meta))
    }

    /// Consumes a custom data region through its end marker.
    fn custom_region(&mut self) -> Result<Vec<RecordInfo>> {
        let mut region = Vec::new();
        loop {
            if self.buf.get(self.pos) == Some(&marker::ENDBLOCKDATA) {
                self.pos += 1;
                return Ok(region);
            }
            region.push(self.record()?);
        }
    }

    fn object(&mut self) -> Result<RecordInfo> {
        let (_, meta) = self.desc_link()?;
        let meta = meta.ok_or_else(|| {
            GravecError::StreamCorrupted("object record with a null descriptor".into())
        })?;
        let handle = self.next_handle(Handle::Plain);
        let mut levels = Vec::new();
        if meta.flags.is_external() {
            levels.push(LevelInfo {
                class: meta.name.clone(),
                fields: Vec::new(),
                custom: self.custom_region()?,
            });
        } else {
            for level in meta.chain() {
                if level.flags.has_write_hook() {
                    // Field data is buried in the region's frames.
                    levels.push(LevelInfo {
                        class: level.name.clone(),
                        fields: Vec::new(),
                        custom: self.custom_region()?,
                    });
                } else {
                    let mut values = Vec::new();
                    for (tag, fname) in &level.fields {
                        values.push(NamedValue {
                            name: fname.clone(),
                            value: self.field_value(*tag)?,
                        });
                    }
                    levels.push(LevelInfo {
                        class: level.name.clone(),
                        fields: values,
                        custom: Vec::new(),
                    });
                }
            }
        }
        Ok(RecordInfo::Object {
            handle,
            class: meta.name.clone(),
            levels,
        })
    }

    fn field_value(&mut self, tag: FieldTag) -> Result<RecordInfo> {
        if !tag.is_primitive() {
            return self.record();
        }
        let value = match tag {
            FieldTag::Boolean => (self.u8()? != 0).to_string(),
            FieldTag::Byte => (self.u8()? as i8).to_string(),
            FieldTag::Short => (self.u16()? as i16).to_string(),
            FieldTag::Char => format!("{:#06x}", self.u16()?),
            FieldTag::Int => (self.u32()? as i32).to_string(),
            FieldTag::Long => (self.u64()? as i64).to_string(),
            FieldTag::Float => f32::from_bits(self.u32()?).to_string(),
            FieldTag::Double => f64::from_bits(self.u64()?).to_string(),
            FieldTag::Object | FieldTag::Array => String::new(),
        };
        Ok(RecordInfo::Prim { value })
    }

    fn array(&mut self) -> Result<RecordInfo> {
        let (_, meta) = self.desc_link()?;
        let meta = meta.ok_or_else(|| {
            GravecError::StreamCorrupted("array record with a null descriptor".into())
        })?;
        let handle = self.next_handle(Handle::Plain);
        let elem_sig = meta.name.strip_prefix('[').ok_or_else(|| {
            GravecError::StreamCorrupted(format!("`{}` is not an array class", meta.name))
        })?;
        let tag = elem_sig
            .bytes()
            .next()
            .and_then(FieldTag::from_u8)
            .ok_or_else(|| {
                GravecError::StreamCorrupted(format!("malformed element signature `{elem_sig}`"))
            })?;
        let length = self.u32()?;
        let mut elements = Vec::with_capacity(length as usize);
        for _ in 0..length {
            elements.push(self.field_value(tag)?);
        }
        Ok(RecordInfo::Array {
            handle,
            class: meta.name.clone(),
            length,
            elements,
        })
    }
}
