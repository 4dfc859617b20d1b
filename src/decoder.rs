//! The read-side engine.
//!
//! An [`ObjectDecoder`] session binds to one octet source, validates the
//! stream header, and rebuilds value graphs record by record. The
//! session mirrors the write side:
//!
//! - every reference-kind value is appended to a **handle table** the
//!   moment its record starts, so a back-reference record can point at
//!   an object whose fields are still being read. This is what
//!   reconstructs cycles with true shared identity.
//! - a **block reader** unwraps length-prefixed block frames while a
//!   custom read hook runs; reading past the end of a level's custom
//!   data surfaces [`GravecError::OptionalData`] instead of misparsing
//!   the next record.
//! - objects are populated without running any constructor: an instance
//!   is allocated from its local class and its slots are filled level
//!   by level, most-super first.
//!
//! Streams carry descriptors, not code: every class named by the stream
//! must already be registered locally (or supplied by a class resolver),
//! and its structural fingerprint must match exactly.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use log::{debug, trace, warn};

use crate::codec::{from_mutf8, OctetSource};
use crate::error::{GravecError, Result};
use crate::registry::{self, RuntimeClass};
use crate::value::{ElementKind, ObjRef, Value};
use crate::wire::{
    marker, ClassFlags, FieldTag, BASE_WIRE_HANDLE, STREAM_MAGIC, STREAM_VERSION,
};

/// Primitive/block-data surface handed to custom read hooks.
///
/// Object-safe for the same reason as the write side: per-class hooks
/// are plain function pointers and cannot name the session's source
/// type.
pub trait DataInput {
    /// Fills `buf` with raw bytes.
    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()>;
    /// Reads one byte.
    fn read_u8(&mut self) -> Result<u8>;
    /// Reads an `i8`.
    fn read_i8(&mut self) -> Result<i8>;
    /// Reads a bool; any non-zero byte is true.
    fn read_bool(&mut self) -> Result<bool>;
    /// Reads a big-endian `u16`.
    fn read_u16(&mut self) -> Result<u16>;
    /// Reads a big-endian `i16`.
    fn read_i16(&mut self) -> Result<i16>;
    /// Reads a UTF-16 code unit.
    fn read_char(&mut self) -> Result<u16>;
    /// Reads a big-endian `u32`.
    fn read_u32(&mut self) -> Result<u32>;
    /// Reads a big-endian `i32`.
    fn read_i32(&mut self) -> Result<i32>;
    /// Reads a big-endian `u64`.
    fn read_u64(&mut self) -> Result<u64>;
    /// Reads a big-endian `i64`.
    fn read_i64(&mut self) -> Result<i64>;
    /// Reads an `f32` from its big-endian bit pattern.
    fn read_f32(&mut self) -> Result<f32>;
    /// Reads an `f64` from its big-endian bit pattern.
    fn read_f64(&mut self) -> Result<f64>;
    /// Reads a length-prefixed modified-UTF string.
    fn read_utf(&mut self) -> Result<String>;
    /// Recursively decodes a nested structured record.
    fn decode_value(&mut self) -> Result<Value>;
    /// Reads the current level's fields the default way. Only valid
    /// inside a custom read hook, and at most once per level.
    fn default_read(&mut self) -> Result<()>;
    /// Queues a validation callback to run after the outermost decode
    /// completes. Higher priority runs earlier; within one priority the
    /// most recent registration runs first. Only valid while an object
    /// is being read.
    fn register_validation(
        &mut self,
        priority: i32,
        hook: Box<dyn FnOnce() -> Result<()>>,
    ) -> Result<()>;
}

/// A class descriptor as it appeared on the wire, bound to the local
/// class it resolved to.
struct WireClass {
    name: String,
    flags: ClassFlags,
    // Field layout exactly as the writer declared it; field data is
    // read in this order and bound to local fields by name.
    fields: Vec<(FieldTag, String)>,
    local: Arc<RuntimeClass>,
    super_class: Option<Rc<RefCell<WireClass>>>,
}

enum HandleSlot {
    Value(Value),
    Desc(Rc<RefCell<WireClass>>),
}

struct ActiveRead {
    obj: ObjRef,
    // Both None while an external hook runs; default_read is
    // unavailable there.
    level: Option<usize>,
    wire: Option<Rc<RefCell<WireClass>>>,
    fields_read: bool,
}

struct BlockReader {
    buf: Vec<u8>,
    pos: usize,
    active: bool,
}

struct ValidationEntry {
    priority: i32,
    seq: u64,
    hook: Box<dyn FnOnce() -> Result<()>>,
}

/// The read-side session.
pub struct ObjectDecoder<R: OctetSource> {
    src: R,
    peeked: Option<u8>,
    handles: Vec<HandleSlot>,
    block: BlockReader,
    resolver: Option<Box<dyn FnMut(Value) -> Result<Value>>>,
    class_resolver: Option<Box<dyn FnMut(&str) -> Result<Arc<RuntimeClass>>>>,
    validations: Vec<ValidationEntry>,
    vseq: u64,
    cur: Option<ActiveRead>,
    depth: usize,
}

impl<R: OctetSource> ObjectDecoder<R> {
    /// Opens a session: binds the source and validates the 4-byte
    /// stream header.
    pub fn new(mut src: R) -> Result<Self> {
        let mut header = [0u8; 4];
        src.read_octets(&mut header)?;
        let magic = u16::from_be_bytes([header[0], header[1]]);
        let version = u16::from_be_bytes([header[2], header[3]]);
        if magic != STREAM_MAGIC {
            return Err(GravecError::StreamCorrupted(format!(
                "bad stream magic {magic:#06x}, expected {STREAM_MAGIC:#06x}"
            )));
        }
        if version != STREAM_VERSION {
            return Err(GravecError::StreamCorrupted(format!(
                "unsupported stream version {version}, expected {STREAM_VERSION}"
            )));
        }
        debug!("decode session opened");
        Ok(Self {
            src,
            peeked: None,
            handles: Vec::new(),
            block: BlockReader {
                buf: Vec::new(),
                pos: 0,
                active: true,
            },
            resolver: None,
            class_resolver: None,
            validations: Vec::new(),
            vseq: 0,
            cur: None,
            depth: 0,
        })
    }

    /// Installs the session-level resolution hook and enables
    /// substitution of decoded strings, arrays, and objects.
    pub fn set_resolver(&mut self, hook: Box<dyn FnMut(Value) -> Result<Value>>) {
        self.resolver = Some(hook);
    }

    /// Overrides how stream class names map to local classes. Without
    /// this the process-wide registry is consulted.
    pub fn set_class_resolver(
        &mut self,
        hook: Box<dyn FnMut(&str) -> Result<Arc<RuntimeClass>>>,
    ) {
        self.class_resolver = Some(hook);
    }

    /// Decodes one root value.
    ///
    /// After a successful outermost decode, queued validation callbacks
    /// run in priority order; a failing callback fails the decode. An
    /// exception record captured by the writer surfaces as
    /// [`GravecError::WriteAborted`].
    pub fn decode(&mut self) -> Result<Value> {
        let old = self.set_block_mode(false)?;
        let result = self.read_value();
        self.set_block_mode(old)?;
        if self.depth == 0 {
            match result {
                Ok(root) => {
                    self.run_validations()?;
                    return Ok(root);
                }
                Err(err) => {
                    self.validations.clear();
                    return Err(err);
                }
            }
        }
        result
    }

    /// Decodes a typed root through its generated vtable. Registers
    /// `T`'s class template first, so a session can read streams for
    /// types this process has never encoded.
    pub fn decode_root<T: crate::rt::GraphClass>(&mut self) -> Result<T> {
        crate::rt::runtime_class::<T>()?;
        let value = self.decode()?;
        T::from_value(&value)
    }

    /// Returns the underlying source.
    pub fn into_inner(self) -> R {
        self.src
    }

    // --- byte plumbing ---

    fn read_src(&mut self, out: &mut [u8]) -> Result<()> {
        if out.is_empty() {
            return Ok(());
        }
        let mut start = 0;
        if let Some(b) = self.peeked.take() {
            out[0] = b;
            start = 1;
        }
        if start < out.len() {
            self.src.read_octets(&mut out[start..])?;
        }
        Ok(())
    }

    fn refill_block(&mut self) -> Result<bool> {
        let mut m = [0u8; 1];
        self.read_src(&mut m)?;
        let len = match m[0] {
            marker::BLOCKDATA => {
                let mut l = [0u8; 1];
                self.read_src(&mut l)?;
                l[0] as usize
            }
            marker::BLOCKDATA_LONG => {
                let mut l = [0u8; 4];
                self.read_src(&mut l)?;
                u32::from_be_bytes(l) as usize
            }
            other => {
                self.peeked = Some(other);
                return Ok(false);
            }
        };
        let mut buf = std::mem::take(&mut self.block.buf);
        buf.resize(len, 0);
        let res = self.read_src(&mut buf);
        self.block.buf = buf;
        self.block.pos = 0;
        res.map(|()| true)
    }

    fn raw_read(&mut self, out: &mut [u8]) -> Result<()> {
        if !self.block.active {
            return self.read_src(out);
        }
        let mut filled = 0;
        while filled < out.len() {
            if self.block.pos == self.block.buf.len() && !self.refill_block()? {
                return Err(GravecError::OptionalData(format!(
                    "custom data exhausted with {} of {} bytes unread",
                    out.len() - filled,
                    out.len()
                )));
            }
            let avail = self.block.buf.len() - self.block.pos;
            let take = avail.min(out.len() - filled);
            out[filled..filled + take]
                .copy_from_slice(&self.block.buf[self.block.pos..self.block.pos + take]);
            self.block.pos += take;
            filled += take;
        }
        Ok(())
    }

    fn set_block_mode(&mut self, on: bool) -> Result<bool> {
        let prev = self.block.active;
        if prev == on {
            return Ok(prev);
        }
        if prev && self.block.pos < self.block.buf.len() {
            return Err(GravecError::OptionalData(format!(
                "{} bytes of primitive data remain in the current block",
                self.block.buf.len() - self.block.pos
            )));
        }
        self.block.buf.clear();
        self.block.pos = 0;
        self.block.active = on;
        Ok(prev)
    }

    /// Leaves block mode, discarding any bytes a hook left unread.
    fn end_block_discard(&mut self) {
        self.block.buf.clear();
        self.block.pos = 0;
        self.block.active = false;
    }

    fn get_u8(&mut self) -> Result<u8> {
        let mut b = [0u8; 1];
        self.raw_read(&mut b)?;
        Ok(b[0])
    }

    fn get_u16(&mut self) -> Result<u16> {
        let mut b = [0u8; 2];
        self.raw_read(&mut b)?;
        Ok(u16::from_be_bytes(b))
    }

    fn get_u32(&mut self) -> Result<u32> {
        let mut b = [0u8; 4];
        self.raw_read(&mut b)?;
        Ok(u32::from_be_bytes(b))
    }

    fn get_u64(&mut self) -> Result<u64> {
        let mut b = [0u8; 8];
        self.raw_read(&mut b)?;
        Ok(u64::from_be_bytes(b))
    }

    fn get_utf(&mut self) -> Result<String> {
        let len = self.get_u16()? as usize;
        let mut bytes = vec![0u8; len];
        self.raw_read(&mut bytes)?;
        from_mutf8(&bytes)
    }

    fn skip_direct(&mut self, mut n: usize) -> Result<()> {
        let mut scratch = [0u8; 256];
        while n > 0 {
            let take = n.min(scratch.len());
            self.read_src(&mut scratch[..take])?;
            n -= take;
        }
        Ok(())
    }

    // --- record parsing (block mode off) ---

    fn read_value(&mut self) -> Result<Value> {
        self.depth += 1;
        let res = self.read_value_inner();
        self.depth -= 1;
        res
    }

    fn read_value_inner(&mut self) -> Result<Value> {
        loop {
            let m = self.get_u8()?;
            return match m {
                marker::NULL => Ok(Value::Null),
                marker::REFERENCE => self.read_back_ref(),
                marker::STRING => self.read_string_record(),
                marker::CLASSDESC => {
                    let wc = self.read_new_class_desc()?;
                    let desc = wc.borrow().local.descriptor().clone();
                    Ok(Value::Desc(desc))
                }
                marker::CLASS => self.read_class_record(),
                marker::ARRAY => self.read_array(),
                marker::OBJECT => self.read_object(),
                marker::RESET => {
                    if self.depth > 1 {
                        return Err(GravecError::StreamCorrupted(
                            "reset record inside another record".into(),
                        ));
                    }
                    trace!("decode handle table reset");
                    self.handles.clear();
                    continue;
                }
                marker::EXCEPTION => {
                    self.handles.clear();
                    let payload = self.read_value()?;
                    self.handles.clear();
                    let msg = match payload {
                        Value::Str(s) => s.to_string(),
                        other => format!("non-string exception payload ({})", other.kind_name()),
                    };
                    warn!("stream carries a writer-side failure: {msg}");
                    Err(GravecError::WriteAborted(msg))
                }
                marker::BLOCKDATA | marker::BLOCKDATA_LONG => Err(GravecError::OptionalData(
                    "primitive block data where a record was expected".into(),
                )),
                marker::ENDBLOCKDATA => Err(GravecError::OptionalData(
                    "end of custom data where a record was expected".into(),
                )),
                other => Err(GravecError::StreamCorrupted(format!(
                    "unknown record marker {other:#04x}"
                ))),
            };
        }
    }

    fn assign_value(&mut self, value: Value) -> usize {
        let idx = self.handles.len();
        self.handles.push(HandleSlot::Value(value));
        idx
    }

    fn read_back_ref(&mut self) -> Result<Value> {
        let handle = self.get_u32()?;
        let idx = handle
            .checked_sub(BASE_WIRE_HANDLE)
            .map(|i| i as usize)
            .filter(|&i| i < self.handles.len())
            .ok_or_else(|| {
                GravecError::StreamCorrupted(format!("back-reference to unknown handle {handle:#x}"))
            })?;
        match &self.handles[idx] {
            HandleSlot::Value(v) => Ok(v.clone()),
            HandleSlot::Desc(wc) => {
                let desc = wc.borrow().local.descriptor().clone();
                Ok(Value::Desc(desc))
            }
        }
    }

    fn read_string_record(&mut self) -> Result<Value> {
        let s = self.get_utf()?;
        trace!("read string ({} chars)", s.len());
        let value = Value::string(&s);
        let idx = self.assign_value(value.clone());
        self.apply_resolver(value, idx)
    }

    fn read_class_record(&mut self) -> Result<Value> {
        let wc = self.read_class_desc()?.ok_or_else(|| {
            GravecError::StreamCorrupted("class record with a null descriptor".into())
        })?;
        let local = wc.borrow().local.clone();
        let value = Value::Class(local);
        self.assign_value(value.clone());
        Ok(value)
    }

    fn read_class_desc(&mut self) -> Result<Option<Rc<RefCell<WireClass>>>> {
        match self.get_u8()? {
            marker::NULL => Ok(None),
            marker::REFERENCE => {
                let handle = self.get_u32()?;
                let idx = handle
                    .checked_sub(BASE_WIRE_HANDLE)
                    .map(|i| i as usize)
                    .filter(|&i| i < self.handles.len())
                    .ok_or_else(|| {
                        GravecError::StreamCorrupted(format!(
                            "descriptor back-reference to unknown handle {handle:#x}"
                        ))
                    })?;
                match &self.handles[idx] {
                    HandleSlot::Desc(wc) => Ok(Some(wc.clone())),
                    HandleSlot::Value(_) => Err(GravecError::StreamCorrupted(format!(
                        "handle {handle:#x} is not a class descriptor"
                    ))),
                }
            }
            marker::CLASSDESC => self.read_new_class_desc().map(Some),
            other => Err(GravecError::StreamCorrupted(format!(
                "marker {other:#04x} where a class descriptor was expected"
            ))),
        }
    }

    fn read_new_class_desc(&mut self) -> Result<Rc<RefCell<WireClass>>> {
        let name = self.get_utf()?;
        let fingerprint = self.get_u64()?;
        trace!("read descriptor `{name}`");
        let local = self.resolve_class(&name)?;
        let expected = local.descriptor().fingerprint();
        if fingerprint != expected {
            return Err(GravecError::InvalidClass(format!(
                "`{name}`: stream fingerprint {fingerprint:#018x} does not match local \
                 {expected:#018x}"
            )));
        }
        let wc = Rc::new(RefCell::new(WireClass {
            name,
            flags: ClassFlags::from_byte(0),
            fields: Vec::new(),
            local,
            super_class: None,
        }));
        // Handle assigned before the field list, mirroring the writer.
        self.handles.push(HandleSlot::Desc(wc.clone()));
        let flags = ClassFlags::from_byte(self.get_u8()?);
        wc.borrow_mut().flags = flags;
        let count = self.get_u16()?;
        for _ in 0..count {
            let tag_byte = self.get_u8()?;
            let tag = FieldTag::from_u8(tag_byte).ok_or_else(|| {
                GravecError::StreamCorrupted(format!("unknown field tag {tag_byte:#04x}"))
            })?;
            let field_name = self.get_utf()?;
            if !tag.is_primitive() {
                // Type names travel as string records and may be
                // back-references; parsing keeps handle numbering
                // aligned.
                match self.read_value()? {
                    Value::Str(_) => {}
                    other => {
                        return Err(GravecError::StreamCorrupted(format!(
                            "{} where a field type string was expected",
                            other.kind_name()
                        )))
                    }
                }
            }
            wc.borrow_mut().fields.push((tag, field_name));
        }
        self.skip_custom_data()?;
        let sup = self.read_class_desc()?;
        wc.borrow_mut().super_class = sup;
        Ok(wc)
    }

    fn resolve_class(&mut self, name: &str) -> Result<Arc<RuntimeClass>> {
        match self.class_resolver.as_mut() {
            Some(hook) => hook(name),
            None => registry::resolve(name),
        }
    }

    /// Consumes a custom data region through its end marker. Block
    /// frames are skipped wholesale; structured records the local class
    /// never asked for are still parsed so handle numbering stays
    /// aligned with the writer.
    fn skip_custom_data(&mut self) -> Result<()> {
        loop {
            let mut m = [0u8; 1];
            self.read_src(&mut m)?;
            match m[0] {
                marker::ENDBLOCKDATA => return Ok(()),
                marker::BLOCKDATA => {
                    let mut l = [0u8; 1];
                    self.read_src(&mut l)?;
                    self.skip_direct(l[0] as usize)?;
                }
                marker::BLOCKDATA_LONG => {
                    let mut l = [0u8; 4];
                    self.read_src(&mut l)?;
                    self.skip_direct(u32::from_be_bytes(l) as usize)?;
                }
                other => {
                    self.peeked = Some(other);
                    self.read_value()?;
                }
            }
        }
    }

    fn read_array(&mut self) -> Result<Value> {
        let wc = self.read_class_desc()?.ok_or_else(|| {
            GravecError::StreamCorrupted("array record with a null descriptor".into())
        })?;
        let name = wc.borrow().name.clone();
        let elem_sig = name.strip_prefix('[').ok_or_else(|| {
            GravecError::StreamCorrupted(format!("`{name}` is not an array class"))
        })?;
        let elem = ElementKind::from_signature(elem_sig)?;
        let len = self.get_u32()? as usize;
        trace!("read array `{name}` len {len}");
        let value = Value::array(crate::value::ArrayInstance::new(elem.clone(), len));
        let idx = self.assign_value(value.clone());
        let prim = elem.tag().is_primitive();
        for i in 0..len {
            let elem_val = if prim {
                self.read_prim(elem.tag())?
            } else {
                self.read_value()?
            };
            if let Value::Array(arr) = &value {
                arr.borrow_mut().set(i, elem_val)?;
            }
        }
        self.apply_resolver(value, idx)
    }

    fn read_prim(&mut self, tag: FieldTag) -> Result<Value> {
        Ok(match tag {
            FieldTag::Boolean => Value::Boolean(self.get_u8()? != 0),
            FieldTag::Byte => Value::Byte(self.get_u8()? as i8),
            FieldTag::Short => Value::Short(self.get_u16()? as i16),
            FieldTag::Char => Value::Char(self.get_u16()?),
            FieldTag::Int => Value::Int(self.get_u32()? as i32),
            FieldTag::Long => Value::Long(self.get_u64()? as i64),
            FieldTag::Float => Value::Float(f32::from_bits(self.get_u32()?)),
            FieldTag::Double => Value::Double(f64::from_bits(self.get_u64()?)),
            FieldTag::Object | FieldTag::Array => {
                return Err(GravecError::StreamCorrupted(
                    "reference tag in a primitive slot".into(),
                ))
            }
        })
    }

    fn read_object(&mut self) -> Result<Value> {
        let wc = self.read_class_desc()?.ok_or_else(|| {
            GravecError::StreamCorrupted("object record with a null descriptor".into())
        })?;
        let (local, external) = {
            let w = wc.borrow();
            (w.local.clone(), w.flags.is_external())
        };
        trace!("read object `{}`", local.name());
        let obj = Rc::new(RefCell::new(local.new_instance()));
        let value = Value::Object(obj.clone());
        let idx = self.assign_value(value.clone());

        if external {
            let hook = local.read_hook().ok_or_else(|| {
                GravecError::InvalidClass(format!(
                    "`{}` owns its wire format but declares no read hook",
                    local.name()
                ))
            })?;
            let prev = self.cur.replace(ActiveRead {
                obj: obj.clone(),
                level: None,
                wire: None,
                fields_read: false,
            });
            self.set_block_mode(true)?;
            let hooked = hook(&obj, self);
            self.cur = prev;
            hooked?;
            self.end_block_discard();
            self.skip_custom_data()?;
            return self.resolve_object(value, idx, &local);
        }

        let wire_chain = Self::wire_chain(&wc);
        let local_chain = local.chain();
        if wire_chain.len() != local_chain.len() {
            return Err(GravecError::InvalidClass(format!(
                "`{}`: stream chain of {} levels does not match local chain of {}",
                local.name(),
                wire_chain.len(),
                local_chain.len()
            )));
        }
        for (level, wlevel) in wire_chain.iter().enumerate() {
            let rc = &local_chain[level];
            let (wname, has_custom) = {
                let w = wlevel.borrow();
                (w.name.clone(), w.flags.has_write_hook())
            };
            if wname != rc.name() {
                return Err(GravecError::InvalidClass(format!(
                    "stream level `{wname}` does not match local level `{}`",
                    rc.name()
                )));
            }
            if let Some(hook) = rc.read_hook() {
                let prev = self.cur.replace(ActiveRead {
                    obj: obj.clone(),
                    level: Some(level),
                    wire: Some(wlevel.clone()),
                    fields_read: false,
                });
                let hooked = if has_custom {
                    self.set_block_mode(true)?;
                    hook(&obj, self)
                } else {
                    // The writer recorded plain fields; the hook reads
                    // them through default_read with no region to skip.
                    hook(&obj, self)
                };
                self.cur = prev;
                hooked?;
                if has_custom {
                    self.end_block_discard();
                    self.skip_custom_data()?;
                }
            } else if has_custom {
                // Field data sits inside the region's frames; anything
                // the writer's hook appended after it is skipped.
                self.set_block_mode(true)?;
                self.read_level_fields(&obj, level, rc, wlevel)?;
                self.end_block_discard();
                self.skip_custom_data()?;
            } else {
                self.read_level_fields(&obj, level, rc, wlevel)?;
            }
        }
        self.resolve_object(value, idx, &local)
    }

    fn wire_chain(wc: &Rc<RefCell<WireClass>>) -> Vec<Rc<RefCell<WireClass>>> {
        let mut chain = vec![wc.clone()];
        let mut cur = wc.clone();
        loop {
            let sup = cur.borrow().super_class.clone();
            match sup {
                Some(s) => {
                    chain.push(s.clone());
                    cur = s;
                }
                None => break,
            }
        }
        chain.reverse();
        chain
    }

    /// Reads one level's field data in the wire descriptor's order and
    /// binds each value to the local field of the same name. Wire
    /// fields with no local counterpart are parsed and dropped.
    fn read_level_fields(
        &mut self,
        obj: &ObjRef,
        level: usize,
        rc: &Arc<RuntimeClass>,
        wire: &Rc<RefCell<WireClass>>,
    ) -> Result<()> {
        let wire_fields = wire.borrow().fields.clone();
        let desc = rc.descriptor().clone();
        for (tag, name) in &wire_fields {
            let v = if tag.is_primitive() {
                self.read_prim(*tag)?
            } else {
                let old = self.set_block_mode(false)?;
                let v = self.read_value()?;
                self.set_block_mode(old)?;
                v
            };
            if let Some(idx) = desc.field_index(name) {
                obj.borrow_mut().set_at(level, idx, v)?;
            }
        }
        Ok(())
    }

    /// Runs the per-class read-resolve hook and the session resolver;
    /// substitutions overwrite the handle slot so later back-references
    /// see the final value.
    fn resolve_object(
        &mut self,
        value: Value,
        idx: usize,
        local: &Arc<RuntimeClass>,
    ) -> Result<Value> {
        let mut current = value;
        if let Some(hook) = local.read_resolve() {
            let next = hook(current.clone())?;
            if !next.identity_eq(&current) {
                self.handles[idx] = HandleSlot::Value(next.clone());
                current = next;
            }
        }
        self.apply_resolver(current, idx)
    }

    fn apply_resolver(&mut self, value: Value, idx: usize) -> Result<Value> {
        let Some(resolver) = self.resolver.as_mut() else {
            return Ok(value);
        };
        let next = resolver(value.clone())?;
        if !next.identity_eq(&value) {
            self.handles[idx] = HandleSlot::Value(next.clone());
        }
        Ok(next)
    }

    fn run_validations(&mut self) -> Result<()> {
        if self.validations.is_empty() {
            return Ok(());
        }
        let mut pending = std::mem::take(&mut self.validations);
        pending.sort_by(|a, b| b.priority.cmp(&a.priority).then(b.seq.cmp(&a.seq)));
        debug!("running {} validation callbacks", pending.len());
        for entry in pending {
            (entry.hook)()?;
        }
        Ok(())
    }
}

impl<R: OctetSource> DataInput for ObjectDecoder<R> {
    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        self.raw_read(buf)
    }

    fn read_u8(&mut self) -> Result<u8> {
        self.get_u8()
    }

    fn read_i8(&mut self) -> Result<i8> {
        Ok(self.get_u8()? as i8)
    }

    fn read_bool(&mut self) -> Result<bool> {
        Ok(self.get_u8()? != 0)
    }

    fn read_u16(&mut self) -> Result<u16> {
        self.get_u16()
    }

    fn read_i16(&mut self) -> Result<i16> {
        Ok(self.get_u16()? as i16)
    }

    fn read_char(&mut self) -> Result<u16> {
        self.get_u16()
    }

    fn read_u32(&mut self) -> Result<u32> {
        self.get_u32()
    }

    fn read_i32(&mut self) -> Result<i32> {
        Ok(self.get_u32()? as i32)
    }

    fn read_u64(&mut self) -> Result<u64> {
        self.get_u64()
    }

    fn read_i64(&mut self) -> Result<i64> {
        Ok(self.get_u64()? as i64)
    }

    fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.get_u32()?))
    }

    fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.get_u64()?))
    }

    fn read_utf(&mut self) -> Result<String> {
        self.get_utf()
    }

    fn decode_value(&mut self) -> Result<Value> {
        let old = self.set_block_mode(false)?;
        let res = self.read_value();
        self.set_block_mode(old)?;
        res
    }

    fn default_read(&mut self) -> Result<()> {
        let (obj, level, wire) = {
            let ctx = self.cur.as_mut().ok_or_else(|| {
                GravecError::NotActive("default_read outside an active read hook".into())
            })?;
            let (level, wire) = ctx.level.zip(ctx.wire.clone()).ok_or_else(|| {
                GravecError::NotActive(
                    "default_read is not available to an external class".into(),
                )
            })?;
            if ctx.fields_read {
                return Err(GravecError::NotActive(
                    "fields for this level were already read".into(),
                ));
            }
            ctx.fields_read = true;
            (ctx.obj.clone(), level, wire)
        };
        let rc = {
            let inst = obj.borrow();
            inst.class().chain()[level].clone()
        };
        self.read_level_fields(&obj, level, &rc, &wire)
    }

    fn register_validation(
        &mut self,
        priority: i32,
        hook: Box<dyn FnOnce() -> Result<()>>,
    ) -> Result<()> {
        if self.cur.is_none() {
            return Err(GravecError::NotActive(
                "validation registered outside an object read".into(),
            ));
        }
        let seq = self.vseq;
        self.vseq += 1;
        self.validations.push(ValidationEntry {
            priority,
            seq,
            hook,
        });
        Ok(())
    }
}
