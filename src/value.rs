//! The dynamic value model the engines operate on.
//!
//! A [`Value`] is the unit being serialized: a primitive scalar, a text
//! string, an array, a composite instance, or a class used as a value.
//! Reference kinds (`Str`, `Array`, `Object`, `Class`, `Desc`) are held
//! behind shared pointers; *identity* is pointer identity, which is what
//! the handle tables key on. Two clones of the same `Rc` are one value on
//! the wire; two structurally equal but separately allocated values are
//! two.
//!
//! Shared and cyclic graphs are expressed the ordinary Rust way:
//!
//! ```rust,ignore
//! let a = Value::object(Instance::new(&node_class));
//! if let Value::Object(obj) = &a {
//!     obj.borrow_mut().set("next", a.clone())?; // a.next = a
//! }
//! ```

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use crate::descriptor::ClassDescriptor;
use crate::error::{GravecError, Result};
use crate::registry::RuntimeClass;
use crate::wire::FieldTag;

/// Shared text value.
pub type StrRef = Rc<str>;
/// Shared composite instance.
pub type ObjRef = Rc<RefCell<Instance>>;
/// Shared array instance.
pub type ArrayRef = Rc<RefCell<ArrayInstance>>;

/// A serializable value.
#[derive(Clone, Debug)]
pub enum Value {
    /// The null reference.
    Null,
    /// Boolean scalar.
    Boolean(bool),
    /// 8-bit signed scalar.
    Byte(i8),
    /// 16-bit signed scalar.
    Short(i16),
    /// UTF-16 code unit scalar.
    Char(u16),
    /// 32-bit signed scalar.
    Int(i32),
    /// 64-bit signed scalar.
    Long(i64),
    /// 32-bit float scalar.
    Float(f32),
    /// 64-bit float scalar.
    Double(f64),
    /// Shared text.
    Str(StrRef),
    /// Shared array.
    Array(ArrayRef),
    /// Shared composite instance.
    Object(ObjRef),
    /// A class itself used as a value.
    Class(Arc<RuntimeClass>),
    /// A bare class descriptor used as a value.
    Desc(Arc<ClassDescriptor>),
}

impl Value {
    /// Wraps an instance into an object value.
    pub fn object(inst: Instance) -> Self {
        Self::Object(Rc::new(RefCell::new(inst)))
    }

    /// Wraps an array instance into an array value.
    pub fn array(arr: ArrayInstance) -> Self {
        Self::Array(Rc::new(RefCell::new(arr)))
    }

    /// Builds a string value.
    pub fn string(s: &str) -> Self {
        Self::Str(Rc::from(s))
    }

    /// Stable identity key for reference kinds, `None` for scalars and
    /// null. Used by the encoder's handle table.
    pub fn identity_key(&self) -> Option<usize> {
        match self {
            Self::Str(s) => Some(Rc::as_ptr(s) as *const u8 as usize),
            Self::Array(a) => Some(Rc::as_ptr(a) as usize),
            Self::Object(o) => Some(Rc::as_ptr(o) as usize),
            Self::Class(c) => Some(Arc::as_ptr(c) as usize),
            Self::Desc(d) => Some(Arc::as_ptr(d) as usize),
            _ => None,
        }
    }

    /// True if the two values are the *same* reference (or both null).
    pub fn identity_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            _ => match (self.identity_key(), other.identity_key()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }

    /// Short kind name for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Boolean(_) => "boolean",
            Self::Byte(_) => "byte",
            Self::Short(_) => "short",
            Self::Char(_) => "char",
            Self::Int(_) => "int",
            Self::Long(_) => "long",
            Self::Float(_) => "float",
            Self::Double(_) => "double",
            Self::Str(_) => "string",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
            Self::Class(_) => "class",
            Self::Desc(_) => "descriptor",
        }
    }

    /// Whether this value may occupy a field slot with the given tag.
    pub fn matches_tag(&self, tag: FieldTag) -> bool {
        match (self, tag) {
            (Self::Boolean(_), FieldTag::Boolean)
            | (Self::Byte(_), FieldTag::Byte)
            | (Self::Short(_), FieldTag::Short)
            | (Self::Char(_), FieldTag::Char)
            | (Self::Int(_), FieldTag::Int)
            | (Self::Long(_), FieldTag::Long)
            | (Self::Float(_), FieldTag::Float)
            | (Self::Double(_), FieldTag::Double) => true,
            (Self::Null | Self::Str(_) | Self::Object(_) | Self::Class(_), FieldTag::Object) => {
                true
            }
            (Self::Null | Self::Array(_), FieldTag::Array) => true,
            _ => false,
        }
    }

    /// The zero value for a field slot of the given tag.
    pub fn default_for(tag: FieldTag) -> Self {
        match tag {
            FieldTag::Boolean => Self::Boolean(false),
            FieldTag::Byte => Self::Byte(0),
            FieldTag::Short => Self::Short(0),
            FieldTag::Char => Self::Char(0),
            FieldTag::Int => Self::Int(0),
            FieldTag::Long => Self::Long(0),
            FieldTag::Float => Self::Float(0.0),
            FieldTag::Double => Self::Double(0.0),
            FieldTag::Object | FieldTag::Array => Self::Null,
        }
    }
}

/// One descriptor level of an instance: the descriptor plus a slot per
/// declared field, in the descriptor's (wire) field order.
pub struct LevelSlots {
    desc: Arc<ClassDescriptor>,
    values: Vec<Value>,
}

impl LevelSlots {
    /// The descriptor this level belongs to.
    pub fn descriptor(&self) -> &Arc<ClassDescriptor> {
        &self.desc
    }

    /// The slot values in descriptor field order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

/// A composite instance: a runtime class plus one slot vector per
/// descriptor level, most-super level first.
///
/// Slots exist from the moment the instance is allocated, holding zero
/// values until assigned — this is what lets the decoder populate an
/// instance that was never run through a user constructor.
pub struct Instance {
    class: Arc<RuntimeClass>,
    levels: Vec<LevelSlots>,
}

impl Instance {
    /// Allocates an instance of `class` with all slots zeroed.
    pub fn new(class: &Arc<RuntimeClass>) -> Self {
        let mut levels = Vec::new();
        for rc in class.chain() {
            let desc = rc.descriptor().clone();
            let values = desc
                .fields()
                .iter()
                .map(|f| Value::default_for(f.tag()))
                .collect();
            levels.push(LevelSlots { desc, values });
        }
        Self {
            class: class.clone(),
            levels,
        }
    }

    /// The runtime class of this instance.
    pub fn class(&self) -> &Arc<RuntimeClass> {
        &self.class
    }

    /// The concrete (most-derived) descriptor.
    pub fn descriptor(&self) -> &Arc<ClassDescriptor> {
        self.class.descriptor()
    }

    /// Descriptor levels, most-super first.
    pub fn levels(&self) -> &[LevelSlots] {
        &self.levels
    }

    /// Reads a field by name, searching the most-derived level first so
    /// shadowed ancestor fields stay reachable through [`Self::get_at`].
    pub fn get(&self, name: &str) -> Result<Value> {
        for level in self.levels.iter().rev() {
            if let Some(idx) = level.desc.field_index(name) {
                return Ok(level.values[idx].clone());
            }
        }
        Err(GravecError::InvalidClass(format!(
            "{}: no field named `{name}`",
            self.class.name()
        )))
    }

    /// Assigns a field by name with a tag compatibility check.
    pub fn set(&mut self, name: &str, value: Value) -> Result<()> {
        for li in (0..self.levels.len()).rev() {
            if let Some(idx) = self.levels[li].desc.field_index(name) {
                return self.set_at(li, idx, value);
            }
        }
        Err(GravecError::InvalidClass(format!(
            "{}: no field named `{name}`",
            self.class.name()
        )))
    }

    /// Reads a slot by (level, field index).
    pub fn get_at(&self, level: usize, idx: usize) -> Result<Value> {
        self.levels
            .get(level)
            .and_then(|l| l.values.get(idx))
            .cloned()
            .ok_or_else(|| {
                GravecError::InvalidClass(format!(
                    "{}: slot ({level},{idx}) out of range",
                    self.class.name()
                ))
            })
    }

    /// Assigns a slot by (level, field index) with a tag check.
    pub fn set_at(&mut self, level: usize, idx: usize, value: Value) -> Result<()> {
        let class_name = self.class.name().to_owned();
        let slots = self.levels.get_mut(level).ok_or_else(|| {
            GravecError::InvalidClass(format!("{class_name}: level {level} out of range"))
        })?;
        let field = slots.desc.fields().get(idx).ok_or_else(|| {
            GravecError::InvalidClass(format!("{class_name}: field index {idx} out of range"))
        })?;
        if !value.matches_tag(field.tag()) {
            return Err(GravecError::InvalidClass(format!(
                "{class_name}.{}: cannot hold a {} value",
                field.name(),
                value.kind_name()
            )));
        }
        slots.values[idx] = value;
        Ok(())
    }
}

// Cyclic instances would send a derived Debug into unbounded recursion,
// so only the shape is printed.
impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("class", &self.class.name())
            .field("levels", &self.levels.len())
            .finish()
    }
}

/// Element type of an array value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ElementKind {
    /// `bool` elements.
    Boolean,
    /// `i8` elements.
    Byte,
    /// `i16` elements.
    Short,
    /// UTF-16 code unit elements.
    Char,
    /// `i32` elements.
    Int,
    /// `i64` elements.
    Long,
    /// `f32` elements.
    Float,
    /// `f64` elements.
    Double,
    /// Reference elements; carries the element type signature
    /// (`Lname;` or a nested `[` signature).
    Ref(Arc<str>),
}

impl ElementKind {
    /// Signature fragment of the element type.
    pub fn signature(&self) -> String {
        match self {
            Self::Boolean => "Z".into(),
            Self::Byte => "B".into(),
            Self::Short => "S".into(),
            Self::Char => "C".into(),
            Self::Int => "I".into(),
            Self::Long => "J".into(),
            Self::Float => "F".into(),
            Self::Double => "D".into(),
            Self::Ref(sig) => sig.to_string(),
        }
    }

    /// Name of the array class for this element kind, e.g. `[I`.
    pub fn array_class_name(&self) -> String {
        format!("[{}", self.signature())
    }

    /// Parses an element signature fragment.
    pub fn from_signature(sig: &str) -> Result<Self> {
        match sig {
            "Z" => Ok(Self::Boolean),
            "B" => Ok(Self::Byte),
            "S" => Ok(Self::Short),
            "C" => Ok(Self::Char),
            "I" => Ok(Self::Int),
            "J" => Ok(Self::Long),
            "F" => Ok(Self::Float),
            "D" => Ok(Self::Double),
            _ if sig.starts_with('L') && sig.ends_with(';') => Ok(Self::Ref(Arc::from(sig))),
            _ if sig.starts_with('[') => Ok(Self::Ref(Arc::from(sig))),
            _ => Err(GravecError::StreamCorrupted(format!(
                "malformed element signature `{sig}`"
            ))),
        }
    }

    /// Wire tag matching this element kind.
    pub fn tag(&self) -> FieldTag {
        match self {
            Self::Boolean => FieldTag::Boolean,
            Self::Byte => FieldTag::Byte,
            Self::Short => FieldTag::Short,
            Self::Char => FieldTag::Char,
            Self::Int => FieldTag::Int,
            Self::Long => FieldTag::Long,
            Self::Float => FieldTag::Float,
            Self::Double => FieldTag::Double,
            Self::Ref(sig) => {
                if sig.starts_with('[') {
                    FieldTag::Array
                } else {
                    FieldTag::Object
                }
            }
        }
    }
}

/// An array value: element kind plus elements.
pub struct ArrayInstance {
    elem: ElementKind,
    values: Vec<Value>,
}

impl ArrayInstance {
    /// Allocates an array of `len` zero elements.
    pub fn new(elem: ElementKind, len: usize) -> Self {
        let default = Value::default_for(elem.tag());
        Self {
            elem,
            values: vec![default; len],
        }
    }

    /// Builds an array from existing elements without tag checks.
    pub fn from_values(elem: ElementKind, values: Vec<Value>) -> Self {
        Self { elem, values }
    }

    /// The element kind.
    pub fn element_kind(&self) -> &ElementKind {
        &self.elem
    }

    /// Element count.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True if the array holds no elements.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The elements in order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Reads one element.
    pub fn get(&self, idx: usize) -> Result<Value> {
        self.values.get(idx).cloned().ok_or_else(|| {
            GravecError::InvalidClass(format!(
                "array index {idx} out of range (len {})",
                self.values.len()
            ))
        })
    }

    /// Assigns one element with a tag check.
    pub fn set(&mut self, idx: usize, value: Value) -> Result<()> {
        if !value.matches_tag(self.elem.tag()) {
            return Err(GravecError::InvalidClass(format!(
                "array of `{}` cannot hold a {} element",
                self.elem.signature(),
                value.kind_name()
            )));
        }
        match self.values.get_mut(idx) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(GravecError::InvalidClass(format!(
                "array index {idx} out of range (len {})",
                self.values.len()
            ))),
        }
    }
}

// Arrays can be cyclic through reference elements just like instances,
// so Debug prints the shape only.
impl fmt::Debug for ArrayInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayInstance")
            .field("elem", &self.elem.signature())
            .field("len", &self.values.len())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn identity_tracks_pointers() {
        let a = Value::string("same text");
        let b = a.clone();
        let c = Value::string("same text");
        assert!(a.identity_eq(&b));
        assert!(!a.identity_eq(&c));
        assert!(Value::Null.identity_eq(&Value::Null));
        assert!(!Value::Int(1).identity_eq(&Value::Int(1)));
    }

    #[test]
    fn element_signatures_round_trip() {
        for sig in ["Z", "B", "I", "J", "Lstring;", "[I", "[Ldemo.Node;"] {
            let kind = ElementKind::from_signature(sig).unwrap();
            assert_eq!(kind.signature(), sig);
        }
        assert!(ElementKind::from_signature("Q").is_err());
    }

    #[test]
    fn array_slots_enforce_tags() {
        let mut arr = ArrayInstance::new(ElementKind::Int, 2);
        arr.set(0, Value::Int(7)).unwrap();
        assert!(arr.set(1, Value::Long(7)).is_err());
        assert!(matches!(arr.get(0).unwrap(), Value::Int(7)));
    }
}
