//! The write-side engine.
//!
//! An [`ObjectEncoder`] session binds to one octet sink, writes the
//! 4-byte stream header, and serializes value graphs handed to
//! [`ObjectEncoder::encode`]. Three pieces of session state make graph
//! encoding work:
//!
//! - the **handle table**: every reference-kind value gets a handle the
//!   first time it is written; later occurrences of the same identity
//!   short-circuit into a back-reference record. This is what makes a
//!   cyclic graph terminate in a finite stream.
//! - the **block-data buffer**: while a custom write hook runs, raw
//!   primitive writes are framed into length-prefixed block records so
//!   the reader can always skip to the end of a level's custom data.
//! - the **active-write context**: the (object, level) pair a hook is
//!   currently serializing, which is what `default_write` consumes.
//!
//! A session is single-threaded and sequential; concurrent encoders must
//! use separate sessions over separate sinks.

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use log::{debug, trace, warn};

use crate::codec::{to_mutf8, OctetSink};
use crate::descriptor::ClassDescriptor;
use crate::error::{GravecError, Result};
use crate::registry::{self, RuntimeClass};
use crate::value::{ObjRef, Value};
use crate::wire::{marker, BASE_WIRE_HANDLE, MAX_BLOCK_SIZE, STREAM_MAGIC, STREAM_VERSION};

/// Hard cap on chained write-replace substitutions for one value.
///
/// Replacement runs to a fixed point; a chain longer than this is
/// treated as non-terminating and rejected.
const MAX_REPLACE_PASSES: usize = 8;

/// Primitive/block-data surface handed to custom write hooks.
///
/// Object-safe so per-class hooks can be stored as plain function
/// pointers regardless of the session's sink type. While a hook runs,
/// the primitive writers frame their bytes into block data; outside a
/// hook they feed field data directly.
pub trait DataOutput {
    /// Writes raw bytes.
    fn write_bytes(&mut self, buf: &[u8]) -> Result<()>;
    /// Writes one byte.
    fn write_u8(&mut self, v: u8) -> Result<()>;
    /// Writes an `i8`.
    fn write_i8(&mut self, v: i8) -> Result<()>;
    /// Writes a bool as one byte.
    fn write_bool(&mut self, v: bool) -> Result<()>;
    /// Writes a big-endian `u16`.
    fn write_u16(&mut self, v: u16) -> Result<()>;
    /// Writes a big-endian `i16`.
    fn write_i16(&mut self, v: i16) -> Result<()>;
    /// Writes a UTF-16 code unit.
    fn write_char(&mut self, v: u16) -> Result<()>;
    /// Writes a big-endian `u32`.
    fn write_u32(&mut self, v: u32) -> Result<()>;
    /// Writes a big-endian `i32`.
    fn write_i32(&mut self, v: i32) -> Result<()>;
    /// Writes a big-endian `u64`.
    fn write_u64(&mut self, v: u64) -> Result<()>;
    /// Writes a big-endian `i64`.
    fn write_i64(&mut self, v: i64) -> Result<()>;
    /// Writes an `f32` as its big-endian bit pattern.
    fn write_f32(&mut self, v: f32) -> Result<()>;
    /// Writes an `f64` as its big-endian bit pattern.
    fn write_f64(&mut self, v: f64) -> Result<()>;
    /// Writes a length-prefixed modified-UTF string.
    fn write_utf(&mut self, s: &str) -> Result<()>;
    /// Recursively encodes a nested value as a structured record.
    fn encode_value(&mut self, v: &Value) -> Result<()>;
    /// Writes the current level's fields the default way. Only valid
    /// inside a custom write hook.
    fn default_write(&mut self) -> Result<()>;
}

#[derive(Clone)]
struct ActiveWrite {
    obj: ObjRef,
    level: usize,
}

struct HandleTable {
    map: HashMap<usize, u32>,
    // Assigned values are kept alive so a freed allocation can never be
    // re-keyed to a stale handle.
    keep: Vec<Value>,
    next: u32,
}

impl HandleTable {
    fn new() -> Self {
        Self {
            map: HashMap::new(),
            keep: Vec::new(),
            next: BASE_WIRE_HANDLE,
        }
    }

    fn lookup(&self, key: usize) -> Option<u32> {
        self.map.get(&key).copied()
    }

    fn assign(&mut self, value: &Value) -> u32 {
        let handle = self.next;
        self.next += 1;
        if let Some(key) = value.identity_key() {
            self.map.insert(key, handle);
            self.keep.push(value.clone());
        }
        handle
    }

    /// Pins a value so its allocation (and thus its identity key)
    /// stays unique for the life of the table.
    fn pin(&mut self, value: &Value) {
        self.keep.push(value.clone());
    }

    fn clear(&mut self) {
        self.map.clear();
        self.keep.clear();
        self.next = BASE_WIRE_HANDLE;
    }
}

struct BlockWriter {
    buf: Vec<u8>,
    active: bool,
}

/// The write-side session.
pub struct ObjectEncoder<W: OctetSink> {
    sink: W,
    handles: HandleTable,
    block: BlockWriter,
    // Original identity key -> the substitute the replacement hooks
    // settled on, so every later occurrence of a replaced value lands
    // on the first substitute's handle.
    subs: HashMap<usize, Value>,
    type_strings: HashMap<Arc<str>, Value>,
    replacer: Option<Box<dyn FnMut(Value) -> Result<Value>>>,
    cur: Option<ActiveWrite>,
    depth: usize,
}

impl<W: OctetSink> ObjectEncoder<W> {
    /// Opens a session: binds the sink and writes the stream header.
    pub fn new(mut sink: W) -> Result<Self> {
        sink.write_octets(&STREAM_MAGIC.to_be_bytes())?;
        sink.write_octets(&STREAM_VERSION.to_be_bytes())?;
        debug!("encode session opened");
        Ok(Self {
            sink,
            handles: HandleTable::new(),
            block: BlockWriter {
                buf: Vec::with_capacity(MAX_BLOCK_SIZE),
                active: true,
            },
            subs: HashMap::new(),
            type_strings: HashMap::new(),
            replacer: None,
            cur: None,
            depth: 0,
        })
    }

    /// Installs the session-level replacement hook and enables
    /// substitution. Without this call only per-class write-replace
    /// hooks run.
    pub fn set_replacer(&mut self, hook: Box<dyn FnMut(Value) -> Result<Value>>) {
        self.replacer = Some(hook);
    }

    /// Encodes one root value as a structured record.
    ///
    /// A structural failure below the root is captured into the stream
    /// as an exception record (bracketed by handle-table resets, so the
    /// stream stays parseable) and re-signaled as
    /// [`GravecError::WriteAborted`].
    pub fn encode(&mut self, value: &Value) -> Result<()> {
        let old = self.set_block_mode(false)?;
        let result = match self.emit(value) {
            Err(err) if !matches!(err, GravecError::Io(_)) => Err(self.capture_failure(err)),
            other => other,
        };
        self.set_block_mode(old)?;
        result
    }

    /// Encodes a typed root through its generated vtable.
    pub fn encode_root<T: crate::rt::GraphClass>(&mut self, root: &T) -> Result<()> {
        let value = root.to_value()?;
        self.encode(&value)
    }

    /// Writes a reset record and clears the handle table; handle
    /// numbering restarts at the base. Forbidden while an encode is in
    /// progress.
    pub fn reset(&mut self) -> Result<()> {
        if self.depth > 0 {
            return Err(GravecError::StreamCorrupted(
                "reset attempted while an encode is active".into(),
            ));
        }
        let old = self.set_block_mode(false)?;
        self.sink.write_octets(&[marker::RESET])?;
        self.handles.clear();
        self.subs.clear();
        self.type_strings.clear();
        debug!("encode handle table reset");
        self.set_block_mode(old)?;
        Ok(())
    }

    /// Drains buffered block data and flushes the sink.
    pub fn flush(&mut self) -> Result<()> {
        self.drain_block()?;
        self.sink.flush_octets()
    }

    /// Flushes and returns the underlying sink.
    pub fn into_inner(mut self) -> Result<W> {
        self.flush()?;
        Ok(self.sink)
    }

    // --- block-data plumbing ---

    fn raw_write(&mut self, bytes: &[u8]) -> Result<()> {
        if !self.block.active {
            return self.sink.write_octets(bytes);
        }
        let mut rest = bytes;
        while !rest.is_empty() {
            if self.block.buf.len() == MAX_BLOCK_SIZE {
                self.drain_block()?;
            }
            let room = MAX_BLOCK_SIZE - self.block.buf.len();
            let take = room.min(rest.len());
            self.block.buf.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
        }
        Ok(())
    }

    fn drain_block(&mut self) -> Result<()> {
        if self.block.buf.is_empty() {
            return Ok(());
        }
        let len = self.block.buf.len();
        if len <= u8::MAX as usize {
            self.sink.write_octets(&[marker::BLOCKDATA, len as u8])?;
        } else {
            self.sink.write_octets(&[marker::BLOCKDATA_LONG])?;
            self.sink.write_octets(&(len as u32).to_be_bytes())?;
        }
        let buf = std::mem::take(&mut self.block.buf);
        self.sink.write_octets(&buf)?;
        self.block.buf = buf;
        self.block.buf.clear();
        Ok(())
    }

    fn set_block_mode(&mut self, on: bool) -> Result<bool> {
        let prev = self.block.active;
        if prev != on {
            if prev {
                self.drain_block()?;
            }
            self.block.active = on;
        }
        Ok(prev)
    }

    fn put_utf(&mut self, s: &str) -> Result<()> {
        let bytes = to_mutf8(s);
        let len = u16::try_from(bytes.len()).map_err(|_| {
            GravecError::StreamCorrupted(format!(
                "UTF payload of {} bytes exceeds the u16 length prefix",
                bytes.len()
            ))
        })?;
        self.raw_write(&len.to_be_bytes())?;
        self.raw_write(&bytes)
    }

    // --- record emission (block mode must be off) ---

    fn emit(&mut self, value: &Value) -> Result<()> {
        self.depth += 1;
        let res = self.emit_inner(value);
        self.depth -= 1;
        res
    }

    fn emit_inner(&mut self, value: &Value) -> Result<()> {
        if matches!(value, Value::Null) {
            trace!("emit null");
            return self.raw_write(&[marker::NULL]);
        }
        if let Some(key) = value.identity_key() {
            if let Some(handle) = self.handles.lookup(key) {
                trace!("emit back-reference {handle:#x}");
                self.raw_write(&[marker::REFERENCE])?;
                return self.raw_write(&handle.to_be_bytes());
            }
            if let Some(sub) = self.subs.get(&key) {
                let sub = sub.clone();
                trace!("emit recorded substitute");
                return self.emit_inner(&sub);
            }
        }
        match value {
            Value::Class(rc) => self.write_class(&rc.clone(), value),
            Value::Desc(desc) => self.write_class_desc(&desc.clone()),
            Value::Str(_) => self.write_string(value),
            Value::Array(_) => self.write_array(value),
            Value::Object(_) => self.write_object(value),
            other => Err(GravecError::NotSerializable(format!(
                "a bare {} scalar has no record form; it travels only as a field, array \
                 element, or block data",
                other.kind_name()
            ))),
        }
    }

    fn write_class(&mut self, rc: &Arc<RuntimeClass>, value: &Value) -> Result<()> {
        trace!("emit class `{}`", rc.name());
        self.raw_write(&[marker::CLASS])?;
        self.write_class_desc(rc.descriptor())?;
        self.handles.assign(value);
        Ok(())
    }

    fn write_class_desc(&mut self, desc: &Arc<ClassDescriptor>) -> Result<()> {
        let key = Arc::as_ptr(desc) as usize;
        if let Some(handle) = self.handles.lookup(key) {
            self.raw_write(&[marker::REFERENCE])?;
            return self.raw_write(&handle.to_be_bytes());
        }
        trace!("emit descriptor `{}`", desc.name());
        self.raw_write(&[marker::CLASSDESC])?;
        self.put_utf(desc.name())?;
        self.raw_write(&desc.fingerprint().to_be_bytes())?;
        // Handle assigned before the field list so a descriptor graph
        // that loops back through a field type terminates here.
        self.handles.assign(&Value::Desc(desc.clone()));
        self.raw_write(&[desc.flags().as_u8()])?;
        let count = u16::try_from(desc.fields().len()).map_err(|_| {
            GravecError::InvalidClass(format!("`{}` declares too many fields", desc.name()))
        })?;
        self.raw_write(&count.to_be_bytes())?;
        for field in desc.fields() {
            self.raw_write(&[field.tag().as_u8()])?;
            self.put_utf(field.name())?;
            if let Some(ty) = field.type_name() {
                let ty_value = self.type_string(ty);
                self.emit(&ty_value)?;
            }
        }
        // Annotation region: no annotations by default, only the end
        // marker a reader skips to.
        self.raw_write(&[marker::ENDBLOCKDATA])?;
        match desc.super_desc() {
            Some(sup) => self.write_class_desc(&sup.clone()),
            None => self.raw_write(&[marker::NULL]),
        }
    }

    /// Type signature strings are interned per session so repeats
    /// collapse into back-references.
    fn type_string(&mut self, ty: &Arc<str>) -> Value {
        self.type_strings
            .entry(ty.clone())
            .or_insert_with(|| Value::Str(Rc::from(&**ty)))
            .clone()
    }

    fn write_string(&mut self, value: &Value) -> Result<()> {
        let Value::Str(s) = value else {
            return Err(GravecError::StreamCorrupted("expected a string value".into()));
        };
        trace!("emit string ({} chars)", s.len());
        self.raw_write(&[marker::STRING])?;
        self.handles.assign(value);
        self.put_utf(s)
    }

    fn write_array(&mut self, value: &Value) -> Result<()> {
        let Value::Array(arr) = value else {
            return Err(GravecError::StreamCorrupted("expected an array value".into()));
        };
        let (class, elems, prim) = {
            let a = arr.borrow();
            let class = registry::array_class(a.element_kind())?;
            (class, a.values().to_vec(), a.element_kind().tag().is_primitive())
        };
        trace!("emit array `{}` len {}", class.name(), elems.len());
        self.raw_write(&[marker::ARRAY])?;
        self.write_class_desc(class.descriptor())?;
        self.handles.assign(value);
        let len = u32::try_from(elems.len()).map_err(|_| {
            GravecError::NotSerializable(format!(
                "array of {} elements exceeds the u32 length field",
                elems.len()
            ))
        })?;
        self.raw_write(&len.to_be_bytes())?;
        for elem in &elems {
            if prim {
                self.write_prim(elem)?;
            } else {
                self.emit(elem)?;
            }
        }
        Ok(())
    }

    fn write_prim(&mut self, value: &Value) -> Result<()> {
        match value {
            Value::Boolean(b) => self.raw_write(&[u8::from(*b)]),
            Value::Byte(v) => self.raw_write(&[*v as u8]),
            Value::Short(v) => self.raw_write(&v.to_be_bytes()),
            Value::Char(v) => self.raw_write(&v.to_be_bytes()),
            Value::Int(v) => self.raw_write(&v.to_be_bytes()),
            Value::Long(v) => self.raw_write(&v.to_be_bytes()),
            Value::Float(v) => self.raw_write(&v.to_bits().to_be_bytes()),
            Value::Double(v) => self.raw_write(&v.to_bits().to_be_bytes()),
            other => Err(GravecError::InvalidClass(format!(
                "{} value in a primitive slot",
                other.kind_name()
            ))),
        }
    }

    fn write_object(&mut self, value: &Value) -> Result<()> {
        let current = self.run_replacements(value)?;
        if !current.identity_eq(value) {
            // The substitute may be any kind, including one that
            // already holds a handle.
            return self.emit(&current);
        }
        let Value::Object(obj) = &current else {
            return self.emit(&current);
        };
        let obj = obj.clone();
        let class = obj.borrow().class().clone();

        if class.is_external() {
            let hook = class.write_hook().ok_or_else(|| {
                GravecError::NotSerializable(format!(
                    "`{}` owns its wire format but declares no write hook",
                    class.name()
                ))
            })?;
            trace!("emit external object `{}`", class.name());
            self.raw_write(&[marker::OBJECT])?;
            self.write_class_desc(class.descriptor())?;
            self.handles.assign(&current);
            self.set_block_mode(true)?;
            {
                let inst = obj.borrow();
                hook(&inst, self)?;
            }
            self.set_block_mode(false)?;
            return self.raw_write(&[marker::ENDBLOCKDATA]);
        }

        trace!("emit object `{}`", class.name());
        self.raw_write(&[marker::OBJECT])?;
        self.write_class_desc(class.descriptor())?;
        self.handles.assign(&current);

        let chain = class.chain();
        for (level, rc) in chain.iter().enumerate() {
            if let Some(hook) = rc.write_hook() {
                let prev = self.cur.replace(ActiveWrite {
                    obj: obj.clone(),
                    level,
                });
                self.set_block_mode(true)?;
                {
                    let inst = obj.borrow();
                    hook(&inst, self)?;
                }
                self.set_block_mode(false)?;
                self.raw_write(&[marker::ENDBLOCKDATA])?;
                self.cur = prev;
            } else {
                self.write_level_fields(&obj, level)?;
            }
        }
        Ok(())
    }

    fn run_replacements(&mut self, value: &Value) -> Result<Value> {
        let mut current = value.clone();
        let mut passes = 0;
        let mut replaced: Vec<Value> = Vec::new();
        loop {
            let mut next = current.clone();
            if let Value::Object(obj) = &next {
                let hook = obj.borrow().class().write_replace();
                if let Some(hook) = hook {
                    next = hook(next.clone())?;
                }
            }
            if let Some(replacer) = self.replacer.as_mut() {
                next = replacer(next)?;
            }
            if next.identity_eq(&current) {
                // Every link of the chain maps to the final
                // substitute; later occurrences of any of them then
                // collapse onto the first substitute's handle.
                for orig in replaced {
                    if let Some(key) = orig.identity_key() {
                        self.handles.pin(&orig);
                        self.subs.insert(key, current.clone());
                    }
                }
                return Ok(current);
            }
            passes += 1;
            if passes > MAX_REPLACE_PASSES {
                return Err(GravecError::NotSerializable(format!(
                    "replacement chain did not stabilize within {MAX_REPLACE_PASSES} passes"
                )));
            }
            replaced.push(current);
            current = next;
        }
    }

    fn write_level_fields(&mut self, obj: &ObjRef, level: usize) -> Result<()> {
        let (desc, values) = {
            let inst = obj.borrow();
            let slots = &inst.levels()[level];
            (slots.descriptor().clone(), slots.values().to_vec())
        };
        // Primitive slots honor the current block mode so field data
        // emitted inside a custom region stays inside its frames;
        // nested records are always raw.
        for (field, val) in desc.fields().iter().zip(values.iter()) {
            if field.tag().is_primitive() {
                self.write_prim(val)?;
            } else {
                let old = self.set_block_mode(false)?;
                self.emit(val)?;
                self.set_block_mode(old)?;
            }
        }
        Ok(())
    }

    fn capture_failure(&mut self, err: GravecError) -> GravecError {
        warn!("capturing encode failure into the stream: {err}");
        let msg = err.to_string();
        let attempt: Result<()> = (|| {
            // Leaving block mode closes out any partial frame from an
            // aborted hook, so the failure record itself lands in
            // record position and readers skip the stray frame.
            self.set_block_mode(false)?;
            self.handles.clear();
            self.subs.clear();
            self.raw_write(&[marker::EXCEPTION])?;
            self.emit(&Value::string(&msg))?;
            self.handles.clear();
            self.subs.clear();
            Ok(())
        })();
        match attempt {
            Ok(()) => GravecError::WriteAborted(msg),
            // The sink itself failed; surface the original error.
            Err(_) => err,
        }
    }
}

impl<W: OctetSink> DataOutput for ObjectEncoder<W> {
    fn write_bytes(&mut self, buf: &[u8]) -> Result<()> {
        self.raw_write(buf)
    }

    fn write_u8(&mut self, v: u8) -> Result<()> {
        self.raw_write(&[v])
    }

    fn write_i8(&mut self, v: i8) -> Result<()> {
        self.raw_write(&[v as u8])
    }

    fn write_bool(&mut self, v: bool) -> Result<()> {
        self.raw_write(&[u8::from(v)])
    }

    fn write_u16(&mut self, v: u16) -> Result<()> {
        self.raw_write(&v.to_be_bytes())
    }

    fn write_i16(&mut self, v: i16) -> Result<()> {
        self.raw_write(&v.to_be_bytes())
    }

    fn write_char(&mut self, v: u16) -> Result<()> {
        self.raw_write(&v.to_be_bytes())
    }

    fn write_u32(&mut self, v: u32) -> Result<()> {
        self.raw_write(&v.to_be_bytes())
    }

    fn write_i32(&mut self, v: i32) -> Result<()> {
        self.raw_write(&v.to_be_bytes())
    }

    fn write_u64(&mut self, v: u64) -> Result<()> {
        self.raw_write(&v.to_be_bytes())
    }

    fn write_i64(&mut self, v: i64) -> Result<()> {
        self.raw_write(&v.to_be_bytes())
    }

    fn write_f32(&mut self, v: f32) -> Result<()> {
        self.raw_write(&v.to_bits().to_be_bytes())
    }

    fn write_f64(&mut self, v: f64) -> Result<()> {
        self.raw_write(&v.to_bits().to_be_bytes())
    }

    fn write_utf(&mut self, s: &str) -> Result<()> {
        self.put_utf(s)
    }

    fn encode_value(&mut self, v: &Value) -> Result<()> {
        let old = self.set_block_mode(false)?;
        let res = self.emit(v);
        self.set_block_mode(old)?;
        res
    }

    fn default_write(&mut self) -> Result<()> {
        let ctx = self.cur.clone().ok_or_else(|| {
            GravecError::NotActive("default_write outside an active write hook".into())
        })?;
        self.write_level_fields(&ctx.obj, ctx.level)
    }
}
