//! Type names and assignability.
//!
//! Values carry JVM-style runtime type names (see [`Value::type_name`]). A value
//! is assignable to a declared type when it is exactly that primitive, or when
//! the declared reference type is one of the value's supertypes. Primitives are
//! never widened.

use diffpack::Value;
use diffpack::value::STRING_CLASS;

pub const OBJECT_CLASS: &str = "java.lang.Object";

const PRIMITIVES: [&str; 9] = ["boolean", "byte", "char", "short", "int", "long", "float", "double", "void"];

/// Reference types every peer knows without a class lookup.
const BUILTIN_CLASSES: [&str; 16] = [
    OBJECT_CLASS,
    STRING_CLASS,
    "java.lang.Boolean",
    "java.lang.Byte",
    "java.lang.Character",
    "java.lang.Short",
    "java.lang.Integer",
    "java.lang.Long",
    "java.lang.Float",
    "java.lang.Double",
    "java.lang.Number",
    "java.lang.CharSequence",
    "java.lang.Comparable",
    "java.lang.Void",
    "java.lang.Cloneable",
    "java.io.Serializable",
];

pub fn is_primitive(name: &str) -> bool {
    PRIMITIVES.contains(&name)
}

pub fn is_void(name: &str) -> bool {
    name == "void" || name == "java.lang.Void"
}

pub fn is_array(name: &str) -> bool {
    name.starts_with('[')
}

pub fn is_builtin(name: &str) -> bool {
    is_primitive(name) || BUILTIN_CLASSES.contains(&name)
}

/// The wrapper class of a primitive.
pub fn boxed(primitive: &str) -> Option<&'static str> {
    let name = match primitive {
        "boolean" => "java.lang.Boolean",
        "byte" => "java.lang.Byte",
        "char" => "java.lang.Character",
        "short" => "java.lang.Short",
        "int" => "java.lang.Integer",
        "long" => "java.lang.Long",
        "float" => "java.lang.Float",
        "double" => "java.lang.Double",
        _ => return None,
    };
    Some(name)
}

/// The class name an array type is built from, `None` for primitive components.
pub fn array_component_class(name: &str) -> Option<&str> {
    name.trim_start_matches('[').strip_prefix('L')?.strip_suffix(';')
}

/// Structural assignability: objects are trusted to be whatever they claim.
///
/// Used where no class table is at hand, such as after deserializing.
pub fn conforms(value: &Value, declared: &str) -> bool {
    assignable(value, declared, &|_, _| true)
}

/// Assignability with user class hierarchy checks delegated to `is_subtype`.
pub fn assignable(value: &Value, declared: &str, is_subtype: &dyn Fn(&str, &str) -> bool) -> bool {
    if is_void(declared) {
        return value.is_null();
    }
    let Some(actual) = value.type_name() else {
        return !is_primitive(declared);
    };
    if is_primitive(declared) || is_array(declared) {
        return actual == declared;
    }
    if actual == declared || declared == OBJECT_CLASS {
        return true;
    }
    match value {
        Value::Object(object) => is_subtype(&object.class, declared),
        Value::Str(_) => {
            matches!(declared, "java.lang.CharSequence" | "java.lang.Comparable" | "java.io.Serializable")
        }
        Value::Array(_) => matches!(declared, "java.io.Serializable" | "java.lang.Cloneable"),
        Value::Bool(_) | Value::Char(_) => {
            boxed(&actual) == Some(declared) || matches!(declared, "java.lang.Comparable" | "java.io.Serializable")
        }
        _ => {
            boxed(&actual) == Some(declared)
                || matches!(declared, "java.lang.Number" | "java.lang.Comparable" | "java.io.Serializable")
        }
    }
}
