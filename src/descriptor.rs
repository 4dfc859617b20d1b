//! Class descriptors: the wire-level metadata describing one composite
//! type.
//!
//! A [`ClassDescriptor`] is immutable once constructed and cached for
//! the lifetime of the process by the [`crate::registry`]; engines
//! compare descriptors by `Arc` pointer identity as a fast "already
//! described this type in this session" path.
//!
//! Type authors (or the derive macro) describe their types through a
//! [`ClassSpec`], which also carries everything the wire never sees but
//! the compatibility fingerprint digests: modifier bits, interface
//! names, constructor and method signatures.

use std::sync::Arc;

use crate::error::Result;
use crate::value::{Instance, ObjRef, Value};
use crate::wire::{ClassFlags, FieldTag};

/// Signature of string-typed reference fields.
pub const STRING_SIGNATURE: &str = "Lstring;";

/// Custom write hook: serializes one descriptor level of `Instance`
/// through the engine's primitive/block-data surface.
pub type WriteHook = fn(&Instance, &mut dyn crate::encoder::DataOutput) -> Result<()>;

/// Custom read hook: the inverse of [`WriteHook`], reading the level's
/// custom data back into the freshly allocated instance.
pub type ReadHook = fn(&ObjRef, &mut dyn crate::decoder::DataInput) -> Result<()>;

/// Replacement hook: substitutes a value before encoding
/// (write-replace) or after decoding (read-resolve).
pub type ReplaceFn = fn(Value) -> Result<Value>;

/// One serializable field of a descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDesc {
    name: Arc<str>,
    tag: FieldTag,
    type_name: Option<Arc<str>>,
}

impl FieldDesc {
    /// A primitive-typed field.
    pub fn primitive(name: &str, tag: FieldTag) -> Self {
        debug_assert!(tag.is_primitive());
        Self {
            name: Arc::from(name),
            tag,
            type_name: None,
        }
    }

    /// A reference-typed field with its type signature (`Lname;` or
    /// `[<element>`).
    pub fn reference(name: &str, tag: FieldTag, type_name: &str) -> Self {
        debug_assert!(!tag.is_primitive());
        Self {
            name: Arc::from(name),
            tag,
            type_name: Some(Arc::from(type_name)),
        }
    }

    /// Field name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wire tag.
    pub fn tag(&self) -> FieldTag {
        self.tag
    }

    /// Type signature of reference fields; `None` for primitives.
    pub fn type_name(&self) -> Option<&Arc<str>> {
        self.type_name.as_ref()
    }

    /// Full signature string used by the fingerprint.
    pub fn signature(&self) -> String {
        match &self.type_name {
            Some(ty) => ty.to_string(),
            None => (self.tag.as_u8() as char).to_string(),
        }
    }
}

/// Sorts fields into the canonical wire order: primitives before
/// references, then lexicographically by name. Both engines iterate
/// fields in this order, so it is part of the wire contract.
pub fn sort_fields(fields: &mut [FieldDesc]) {
    fields.sort_by(|a, b| {
        b.tag
            .is_primitive()
            .cmp(&a.tag.is_primitive())
            .then_with(|| a.name.cmp(&b.name))
    });
}

/// Immutable wire-level metadata of one composite type.
#[derive(Debug)]
pub struct ClassDescriptor {
    name: Arc<str>,
    fingerprint: u64,
    flags: ClassFlags,
    fields: Vec<FieldDesc>,
    super_desc: Option<Arc<ClassDescriptor>>,
}

impl ClassDescriptor {
    /// Builds a descriptor; `fields` is brought into canonical order.
    pub fn new(
        name: &str,
        fingerprint: u64,
        flags: ClassFlags,
        mut fields: Vec<FieldDesc>,
        super_desc: Option<Arc<ClassDescriptor>>,
    ) -> Self {
        sort_fields(&mut fields);
        Self {
            name: Arc::from(name),
            fingerprint,
            flags,
            fields,
            super_desc,
        }
    }

    /// Fully qualified type name.
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    /// 64-bit compatibility fingerprint.
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    /// Capability flags.
    pub fn flags(&self) -> ClassFlags {
        self.flags
    }

    /// Fields in canonical wire order.
    pub fn fields(&self) -> &[FieldDesc] {
        &self.fields
    }

    /// Index of a field by name within this level.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name() == name)
    }

    /// Nearest serializable ancestor's descriptor.
    pub fn super_desc(&self) -> Option<&Arc<ClassDescriptor>> {
        self.super_desc.as_ref()
    }
}

/// A non-field member signature fed into the fingerprint (constructors
/// and methods).
#[derive(Debug, Clone)]
pub struct MemberSig {
    /// Member name (`<init>` for constructors).
    pub name: String,
    /// Modifier bits.
    pub modifiers: u32,
    /// Type signature string.
    pub signature: String,
}

#[derive(Debug, Clone)]
pub(crate) struct FieldSpec {
    pub(crate) desc: FieldDesc,
    pub(crate) modifiers: u32,
}

/// Declarative description of a serializable class, consumed by
/// [`crate::registry::register`].
///
/// ```rust
/// use gravec::descriptor::ClassSpec;
///
/// let spec = ClassSpec::new("demo.Point")
///     .field_int("x")
///     .field_string("name");
/// assert_eq!(spec.name(), "demo.Point");
/// ```
#[derive(Debug, Clone)]
pub struct ClassSpec {
    pub(crate) name: String,
    pub(crate) explicit_fingerprint: Option<u64>,
    pub(crate) modifiers: u32,
    pub(crate) interfaces: Vec<String>,
    pub(crate) fields: Vec<FieldSpec>,
    pub(crate) has_static_init: bool,
    pub(crate) ctors: Vec<MemberSig>,
    pub(crate) methods: Vec<MemberSig>,
    pub(crate) super_name: Option<String>,
    pub(crate) external: bool,
    pub(crate) write_hook: Option<WriteHook>,
    pub(crate) read_hook: Option<ReadHook>,
    pub(crate) write_replace: Option<ReplaceFn>,
    pub(crate) read_resolve: Option<ReplaceFn>,
}

impl ClassSpec {
    /// Starts a spec for the given fully qualified class name.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            explicit_fingerprint: None,
            modifiers: crate::wire::modifier::PUBLIC,
            interfaces: Vec::new(),
            fields: Vec::new(),
            has_static_init: false,
            ctors: Vec::new(),
            methods: Vec::new(),
            super_name: None,
            external: false,
            write_hook: None,
            read_hook: None,
            write_replace: None,
            read_resolve: None,
        }
    }

    /// The class name this spec describes.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds a field from raw parts; `type_name` is required for
    /// reference tags. Used by generated code.
    pub fn field_raw(mut self, name: &str, tag: FieldTag, type_name: Option<&str>) -> Self {
        let desc = match type_name {
            Some(ty) => FieldDesc::reference(name, tag, ty),
            None => FieldDesc::primitive(name, tag),
        };
        self.fields.push(FieldSpec { desc, modifiers: 0 });
        self
    }

    /// Adds a `bool` field.
    pub fn field_bool(self, name: &str) -> Self {
        self.field_raw(name, FieldTag::Boolean, None)
    }

    /// Adds an `i8` field.
    pub fn field_byte(self, name: &str) -> Self {
        self.field_raw(name, FieldTag::Byte, None)
    }

    /// Adds an `i16` field.
    pub fn field_short(self, name: &str) -> Self {
        self.field_raw(name, FieldTag::Short, None)
    }

    /// Adds a UTF-16 code unit field.
    pub fn field_char(self, name: &str) -> Self {
        self.field_raw(name, FieldTag::Char, None)
    }

    /// Adds an `i32` field.
    pub fn field_int(self, name: &str) -> Self {
        self.field_raw(name, FieldTag::Int, None)
    }

    /// Adds an `i64` field.
    pub fn field_long(self, name: &str) -> Self {
        self.field_raw(name, FieldTag::Long, None)
    }

    /// Adds an `f32` field.
    pub fn field_float(self, name: &str) -> Self {
        self.field_raw(name, FieldTag::Float, None)
    }

    /// Adds an `f64` field.
    pub fn field_double(self, name: &str) -> Self {
        self.field_raw(name, FieldTag::Double, None)
    }

    /// Adds a string reference field.
    pub fn field_string(self, name: &str) -> Self {
        self.field_raw(name, FieldTag::Object, Some(STRING_SIGNATURE))
    }

    /// Adds a reference field typed as `class_name`.
    pub fn field_object(self, name: &str, class_name: &str) -> Self {
        let sig = format!("L{class_name};");
        self.field_raw(name, FieldTag::Object, Some(&sig))
    }

    /// Adds an array reference field with the given element signature.
    pub fn field_array(self, name: &str, elem_sig: &str) -> Self {
        let sig = format!("[{elem_sig}");
        self.field_raw(name, FieldTag::Array, Some(&sig))
    }

    /// Declares an explicit fingerprint instead of the computed one.
    pub fn fingerprint(mut self, fp: u64) -> Self {
        self.explicit_fingerprint = Some(fp);
        self
    }

    /// Overrides the class modifier bits digested by the fingerprint.
    pub fn modifiers(mut self, bits: u32) -> Self {
        self.modifiers = bits;
        self
    }

    /// Declares an implemented interface (fingerprint input only).
    pub fn implements(mut self, interface: &str) -> Self {
        self.interfaces.push(interface.to_owned());
        self
    }

    /// Declares a static initializer (fingerprint input only).
    pub fn static_init(mut self) -> Self {
        self.has_static_init = true;
        self
    }

    /// Declares a constructor signature (fingerprint input only).
    pub fn constructor(mut self, modifiers: u32, signature: &str) -> Self {
        self.ctors.push(MemberSig {
            name: "<init>".to_owned(),
            modifiers,
            signature: signature.to_owned(),
        });
        self
    }

    /// Declares a method signature (fingerprint input only).
    pub fn method(mut self, name: &str, modifiers: u32, signature: &str) -> Self {
        self.methods.push(MemberSig {
            name: name.to_owned(),
            modifiers,
            signature: signature.to_owned(),
        });
        self
    }

    /// Names the nearest serializable superclass; it must already be
    /// registered when this spec is.
    pub fn extends(mut self, super_name: &str) -> Self {
        self.super_name = Some(super_name.to_owned());
        self
    }

    /// Marks the class as fully owning its wire representation. The
    /// hooks installed via [`Self::on_write`]/[`Self::on_read`] become
    /// the external encode/decode hooks.
    pub fn external(mut self) -> Self {
        self.external = true;
        self
    }

    /// Installs the custom write hook for this level.
    pub fn on_write(mut self, hook: WriteHook) -> Self {
        self.write_hook = Some(hook);
        self
    }

    /// Installs the custom read hook for this level.
    pub fn on_read(mut self, hook: ReadHook) -> Self {
        self.read_hook = Some(hook);
        self
    }

    /// Installs the write-replace hook: substitutes the value before it
    /// is encoded.
    pub fn write_replace(mut self, hook: ReplaceFn) -> Self {
        self.write_replace = Some(hook);
        self
    }

    /// Installs the read-resolve hook: substitutes the instance after
    /// it is decoded.
    pub fn read_resolve(mut self, hook: ReplaceFn) -> Self {
        self.read_resolve = Some(hook);
        self
    }

    /// Capability flags this spec produces on the wire.
    pub(crate) fn class_flags(&self) -> ClassFlags {
        ClassFlags::new(self.external, !self.external && self.write_hook.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_field_order() {
        let mut fields = vec![
            FieldDesc::reference("name", FieldTag::Object, STRING_SIGNATURE),
            FieldDesc::primitive("x", FieldTag::Int),
            FieldDesc::primitive("a", FieldTag::Double),
            FieldDesc::reference("links", FieldTag::Array, "[I"),
        ];
        sort_fields(&mut fields);
        let names: Vec<&str> = fields.iter().map(|f| f.name()).collect();
        // Primitives first (a, x), then references (links, name).
        assert_eq!(names, ["a", "x", "links", "name"]);
    }

    #[test]
    fn external_spec_never_claims_write_hook() {
        fn noop(_: &Instance, _: &mut dyn crate::encoder::DataOutput) -> Result<()> {
            Ok(())
        }
        let spec = ClassSpec::new("demo.Ext").external().on_write(noop);
        let flags = spec.class_flags();
        assert!(flags.is_external());
        assert!(!flags.has_write_hook());
        assert!(!flags.is_field_serial());
    }
}
