//! # Dynamic values
//!
//! The runtime shape of call targets, arguments and results. Type names follow
//! JVM naming so that a value's type can be compared against the argument and
//! return types carried by a method signature: `int`, `java.lang.String`,
//! `[I`, `[Ljava.lang.String;`, or a plain class name for objects.

use std::borrow::Cow;

use serde::Deserialize;
use serde::Serialize;

use crate::Decoder;
use crate::Encoder;
use crate::Error;
use crate::Result;
use crate::Tag;

/// The maximum nesting depth for values before encoding or decoding fails.
pub const MAX_DEPTH: usize = 64;

pub const STRING_CLASS: &str = "java.lang.String";

/// A dynamically typed value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    Null,
    Bool(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(#[serde(with = "json_float")] f32),
    Double(#[serde(with = "json_float")] f64),
    Char(char),
    Str(String),
    Array(Array),
    Object(Object),
}

/// JSON has no NaN or infinities, so those travel as the strings `"NaN"`,
/// `"Infinity"` and `"-Infinity"`. Finite values stay plain numbers.
mod json_float {
    use serde::Deserialize;
    use serde::Deserializer;
    use serde::Serialize;
    use serde::Serializer;
    use serde::de::Error;

    pub trait Float: Copy + Serialize + for<'de> Deserialize<'de> {
        const NAN: Self;
        const INFINITY: Self;
        const NEG_INFINITY: Self;
        fn is_finite(self) -> bool;
        fn is_nan(self) -> bool;
        fn is_sign_positive(self) -> bool;
    }

    macro_rules! impl_float {
        ($t:ty) => {
            impl Float for $t {
                const NAN: Self = <$t>::NAN;
                const INFINITY: Self = <$t>::INFINITY;
                const NEG_INFINITY: Self = <$t>::NEG_INFINITY;
                fn is_finite(self) -> bool { <$t>::is_finite(self) }
                fn is_nan(self) -> bool { <$t>::is_nan(self) }
                fn is_sign_positive(self) -> bool { <$t>::is_sign_positive(self) }
            }
        };
    }

    impl_float!(f32);
    impl_float!(f64);

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr<F> {
        Number(F),
        Text(String),
    }

    pub fn serialize<F: Float, S: Serializer>(value: &F, serializer: S) -> Result<S::Ok, S::Error> {
        let value = *value;
        if value.is_finite() {
            value.serialize(serializer)
        } else if value.is_nan() {
            serializer.serialize_str("NaN")
        } else if value.is_sign_positive() {
            serializer.serialize_str("Infinity")
        } else {
            serializer.serialize_str("-Infinity")
        }
    }

    pub fn deserialize<'de, F: Float, D: Deserializer<'de>>(deserializer: D) -> Result<F, D::Error> {
        match Repr::<F>::deserialize(deserializer)? {
            Repr::Number(value) => Ok(value),
            Repr::Text(text) => match text.as_str() {
                "NaN" => Ok(F::NAN),
                "Infinity" => Ok(F::INFINITY),
                "-Infinity" => Ok(F::NEG_INFINITY),
                other => Err(D::Error::custom(format!("not a float: {:?}", other))),
            },
        }
    }
}

/// An instance of a named class with ordered named fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Object {
    pub class: String,
    pub fields: Vec<(String, Value)>,
}

impl Object {
    pub fn new(class: impl Into<String>) -> Self {
        Self { class: class.into(), fields: Vec::new() }
    }

    /// Adds or replaces a field, builder style.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

/// A homogeneous array whose elements have type `component`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Array {
    pub component: String,
    pub items: Vec<Value>,
}

impl Array {
    pub fn new(component: impl Into<String>, items: Vec<Value>) -> Self {
        Self { component: component.into(), items }
    }

    /// The JVM name of this array's own type, e.g. `[I` for an `int` array.
    pub fn type_name(&self) -> String {
        format!("[{}", descriptor(&self.component))
    }
}

impl Value {
    /// Runtime type name of the value, `None` for `Null`.
    pub fn type_name(&self) -> Option<Cow<'_, str>> {
        let name = match self {
            Value::Null => return None,
            Value::Bool(_) => "boolean",
            Value::Byte(_) => "byte",
            Value::Short(_) => "short",
            Value::Int(_) => "int",
            Value::Long(_) => "long",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::Char(_) => "char",
            Value::Str(_) => STRING_CLASS,
            Value::Array(a) => return Some(Cow::Owned(a.type_name())),
            Value::Object(o) => return Some(Cow::Borrowed(&o.class)),
        };
        Some(Cow::Borrowed(name))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }
}

/// The JVM descriptor for a type name used inside an array type name.
///
/// Primitives map to their one-letter code, arrays are already descriptors,
/// and class names become `L<name>;`.
pub fn descriptor(type_name: &str) -> Cow<'_, str> {
    let code = match type_name {
        "boolean" => "Z",
        "byte" => "B",
        "char" => "C",
        "short" => "S",
        "int" => "I",
        "long" => "J",
        "float" => "F",
        "double" => "D",
        name if name.starts_with('[') => return Cow::Borrowed(name),
        name => return Cow::Owned(format!("L{};", name)),
    };
    Cow::Borrowed(code)
}

impl From<bool> for Value { fn from(v: bool) -> Self { Value::Bool(v) } }
impl From<i8> for Value { fn from(v: i8) -> Self { Value::Byte(v) } }
impl From<i16> for Value { fn from(v: i16) -> Self { Value::Short(v) } }
impl From<i32> for Value { fn from(v: i32) -> Self { Value::Int(v) } }
impl From<i64> for Value { fn from(v: i64) -> Self { Value::Long(v) } }
impl From<f32> for Value { fn from(v: f32) -> Self { Value::Float(v) } }
impl From<f64> for Value { fn from(v: f64) -> Self { Value::Double(v) } }
impl From<char> for Value { fn from(v: char) -> Self { Value::Char(v) } }
impl From<&str> for Value { fn from(v: &str) -> Self { Value::Str(v.to_string()) } }
impl From<String> for Value { fn from(v: String) -> Self { Value::Str(v) } }
impl From<Object> for Value { fn from(v: Object) -> Self { Value::Object(v) } }
impl From<Array> for Value { fn from(v: Array) -> Self { Value::Array(v) } }

/// Encodes a value into the encoder stream.
///
/// # Errors
/// Returns `Error::RecursionLimitExceeded` if the value nests deeper than `MAX_DEPTH`.
pub fn encode_value(enc: &mut Encoder, value: &Value) -> Result<()> {
    encode_impl(enc, value, 0)
}

fn encode_impl(enc: &mut Encoder, value: &Value, depth: usize) -> Result<()> {
    if depth > MAX_DEPTH {
        return Err(Error::RecursionLimitExceeded);
    }

    match value {
        Value::Null => enc.null(),
        Value::Bool(v) => enc.bool(*v),
        Value::Byte(v) => enc.i8(*v),
        Value::Short(v) => enc.i16(*v),
        Value::Int(v) => enc.i32(*v),
        Value::Long(v) => enc.i64(*v),
        Value::Float(v) => enc.f32(*v),
        Value::Double(v) => enc.f64(*v),
        Value::Char(v) => enc.char(*v),
        Value::Str(v) => enc.str(v),
        Value::Array(array) => {
            enc.array_begin(&array.component)?;
            for item in &array.items {
                encode_impl(enc, item, depth + 1)?;
            }
            enc.array_end()
        }
        Value::Object(object) => {
            enc.object_begin(&object.class)?;
            for (name, field) in &object.fields {
                enc.entry_begin(name)?;
                encode_impl(enc, field, depth + 1)?;
                enc.entry_end()?;
            }
            enc.object_end()
        }
    }
}

/// Decodes the next value from the decoder.
pub fn decode_value(dec: &mut Decoder) -> Result<Value> {
    decode_impl(dec, 0)
}

fn decode_impl(dec: &mut Decoder, depth: usize) -> Result<Value> {
    if depth > MAX_DEPTH {
        return Err(Error::RecursionLimitExceeded);
    }

    let value = match dec.peek_tag()? {
        Tag::Null => { dec.null()?; Value::Null }
        Tag::True | Tag::False => Value::Bool(dec.bool()?),
        Tag::I8 => Value::Byte(dec.i8()?),
        Tag::I16 => Value::Short(dec.i16()?),
        Tag::I32 => Value::Int(dec.i32()?),
        Tag::I64 => Value::Long(dec.i64()?),
        Tag::F32 => Value::Float(dec.f32()?),
        Tag::F64 => Value::Double(dec.f64()?),
        Tag::Char => Value::Char(dec.char()?),
        Tag::Str => Value::Str(dec.str()?.to_string()),
        Tag::Array => {
            let (component, mut items) = dec.array()?;
            let mut out = Vec::new();
            while let Some(mut item) = items.next()? {
                out.push(decode_impl(&mut item, depth + 1)?);
            }
            Value::Array(Array::new(component, out))
        }
        Tag::Object => {
            let (class, mut fields) = dec.object()?;
            let mut object = Object::new(class);
            while let Some((name, mut field)) = fields.next()? {
                object.fields.push((name.to_string(), decode_impl(&mut field, depth + 1)?));
            }
            Value::Object(object)
        }
        found => return Err(Error::UnexpectedTag { expected: Tag::Object, found }),
    };
    Ok(value)
}
