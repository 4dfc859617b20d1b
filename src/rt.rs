//! Typed bridge between Rust structs and the dynamic value model.
//!
//! `#[derive(GraphClass)]` generates a [`GraphClass`] impl that
//! registers a structural template on first use and converts the struct
//! to and from [`Value`] graphs, plus a [`FieldCodec`] impl so the
//! struct can appear as a field of another serializable struct.

use std::sync::Arc;

use crate::descriptor::{ClassSpec, STRING_SIGNATURE};
use crate::error::{GravecError, Result};
use crate::registry::{self, RuntimeClass};
use crate::value::{ArrayInstance, ElementKind, ObjRef, Value};
use crate::wire::FieldTag;

/// A Rust type with a registered stream class.
pub trait GraphClass: Sized {
    /// The stream class name.
    fn class_name() -> &'static str;
    /// The structural template registered on first use.
    fn class_spec() -> ClassSpec;
    /// Converts `self` into a dynamic value graph.
    fn to_value(&self) -> Result<Value>;
    /// Rebuilds `Self` from a decoded value graph.
    fn from_value(value: &Value) -> Result<Self>;
}

/// Looks up the runtime class for `T`, registering its template the
/// first time it is needed.
pub fn runtime_class<T: GraphClass>() -> Result<Arc<RuntimeClass>> {
    if let Some(rc) = registry::lookup(T::class_name()) {
        return Ok(rc);
    }
    registry::register(T::class_spec())
}

/// Unwraps a value as an object of the named class.
pub fn instance_of(value: &Value, class: &str) -> Result<ObjRef> {
    match value {
        Value::Object(obj) => {
            let found = obj.borrow().class().name().to_owned();
            if found == class {
                Ok(obj.clone())
            } else {
                Err(GravecError::InvalidClass(format!(
                    "expected an instance of `{class}`, found `{found}`"
                )))
            }
        }
        other => Err(GravecError::InvalidClass(format!(
            "expected an instance of `{class}`, found {}",
            other.kind_name()
        ))),
    }
}

/// Per-field conversion between a Rust type and its slot value.
pub trait FieldCodec: Sized {
    /// Wire tag of the slot this type occupies.
    fn field_tag() -> FieldTag;
    /// Type signature for reference slots; `None` for primitives.
    fn type_signature() -> Option<String> {
        None
    }
    /// Converts to a slot value.
    fn into_value(&self) -> Result<Value>;
    /// Converts from a slot value.
    fn from_value(value: &Value) -> Result<Self>;
}

macro_rules! prim_codec {
    ($ty:ty, $tag:ident, $variant:ident) => {
        impl FieldCodec for $ty {
            fn field_tag() -> FieldTag {
                FieldTag::$tag
            }

            fn into_value(&self) -> Result<Value> {
                Ok(Value::$variant(*self))
            }

            fn from_value(value: &Value) -> Result<Self> {
                match value {
                    Value::$variant(v) => Ok(*v),
                    other => Err(GravecError::InvalidClass(format!(
                        concat!("expected ", stringify!($ty), ", found {}"),
                        other.kind_name()
                    ))),
                }
            }
        }
    };
}

prim_codec!(bool, Boolean, Boolean);
prim_codec!(i8, Byte, Byte);
prim_codec!(i16, Short, Short);
prim_codec!(u16, Char, Char);
prim_codec!(i32, Int, Int);
prim_codec!(i64, Long, Long);
prim_codec!(f32, Float, Float);
prim_codec!(f64, Double, Double);

impl FieldCodec for String {
    fn field_tag() -> FieldTag {
        FieldTag::Object
    }

    fn type_signature() -> Option<String> {
        Some(STRING_SIGNATURE.to_owned())
    }

    fn into_value(&self) -> Result<Value> {
        Ok(Value::string(self))
    }

    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Str(s) => Ok(s.to_string()),
            other => Err(GravecError::InvalidClass(format!(
                "expected a string, found {}",
                other.kind_name()
            ))),
        }
    }
}

/// `None` travels as a null reference. Only meaningful for reference
/// slots; a primitive `T` is rejected when converted.
impl<T: FieldCodec> FieldCodec for Option<T> {
    fn field_tag() -> FieldTag {
        T::field_tag()
    }

    fn type_signature() -> Option<String> {
        T::type_signature()
    }

    fn into_value(&self) -> Result<Value> {
        match self {
            Some(v) => v.into_value(),
            None => {
                if T::field_tag().is_primitive() {
                    return Err(GravecError::InvalidClass(
                        "a primitive slot cannot hold null".into(),
                    ));
                }
                Ok(Value::Null)
            }
        }
    }

    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

macro_rules! prim_vec_codec {
    ($ty:ty, $kind:ident, $variant:ident) => {
        impl FieldCodec for Vec<$ty> {
            fn field_tag() -> FieldTag {
                FieldTag::Array
            }

            fn type_signature() -> Option<String> {
                Some(ElementKind::$kind.array_class_name())
            }

            fn into_value(&self) -> Result<Value> {
                let values = self.iter().map(|v| Value::$variant(*v)).collect();
                Ok(Value::array(ArrayInstance::from_values(
                    ElementKind::$kind,
                    values,
                )))
            }

            fn from_value(value: &Value) -> Result<Self> {
                let Value::Array(arr) = value else {
                    return Err(GravecError::InvalidClass(format!(
                        "expected an array, found {}",
                        value.kind_name()
                    )));
                };
                let arr = arr.borrow();
                arr.values()
                    .iter()
                    .map(|v| match v {
                        Value::$variant(x) => Ok(*x),
                        other => Err(GravecError::InvalidClass(format!(
                            concat!("expected ", stringify!($ty), " element, found {}"),
                            other.kind_name()
                        ))),
                    })
                    .collect()
            }
        }
    };
}

prim_vec_codec!(bool, Boolean, Boolean);
prim_vec_codec!(i8, Byte, Byte);
prim_vec_codec!(i16, Short, Short);
prim_vec_codec!(u16, Char, Char);
prim_vec_codec!(i32, Int, Int);
prim_vec_codec!(i64, Long, Long);
prim_vec_codec!(f32, Float, Float);
prim_vec_codec!(f64, Double, Double);

impl FieldCodec for Vec<String> {
    fn field_tag() -> FieldTag {
        FieldTag::Array
    }

    fn type_signature() -> Option<String> {
        Some(ElementKind::Ref(Arc::from(STRING_SIGNATURE)).array_class_name())
    }

    fn into_value(&self) -> Result<Value> {
        let values = self.iter().map(|s| Value::string(s)).collect();
        Ok(Value::array(ArrayInstance::from_values(
            ElementKind::Ref(Arc::from(STRING_SIGNATURE)),
            values,
        )))
    }

    fn from_value(value: &Value) -> Result<Self> {
        let Value::Array(arr) = value else {
            return Err(GravecError::InvalidClass(format!(
                "expected an array, found {}",
                value.kind_name()
            )));
        };
        let arr = arr.borrow();
        arr.values()
            .iter()
            .map(|v| match v {
                Value::Str(s) => Ok(s.to_string()),
                other => Err(GravecError::InvalidClass(format!(
                    "expected string element, found {}",
                    other.kind_name()
                ))),
            })
            .collect()
    }
}
