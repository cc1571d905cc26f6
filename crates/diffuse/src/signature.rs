//! # Method signatures
//!
//! A signature names one method: `class:method(arg,arg)-return`. Array types
//! can't be written with `[` inside that grammar, so each leading `[` becomes
//! `_` and the trailing `;` of a class component is dropped, e.g. `[[Ljava.lang.String;`
//! is written `__Ljava.lang.String`.
//!
//! Parsing decodes array types back to their JVM names, so a [`Signature`] always
//! holds native type names while its text form holds encoded ones.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::{LazyLock, OnceLock};

use regex::Regex;

use crate::store::RequestId;

/// The return type assumed when a signature omits one.
pub const VOID: &str = "void";

const ARRAY_MARKER: char = '_';
const RESULT_KEY_SEPARATOR: char = '/';

static SIGNATURE: LazyLock<Regex> = LazyLock::new(|| {
    const IDENT: &str = r"[A-Za-z]\w*";
    let class = format!(r"{IDENT}(?:\.{IDENT})*");
    let ty = format!(r"(?:_+(?:[ZBCSIJFD]|L{class})|{class})");
    Regex::new(&format!(r"^({class}):({IDENT})\(((?:{ty}(?:,{ty})*)?)\)(?:-({ty}))?$")).unwrap(/* known good */)
});

/// A signature string that does not match the grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub input: String,
    /// A corrected signature, when stripping whitespace makes the input parse.
    pub hint: Option<String>,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "malformed signature '{}'", self.input)?;
        if let Some(hint) = &self.hint {
            write!(f, "; did you mean '{}'?", hint)?;
        }
        Ok(())
    }
}

impl std::error::Error for ParseError {}

/// A parsed method signature.
///
/// Equality and hashing go through the canonical text, and the hash is computed
/// once, since signatures key every registry lookup.
#[derive(Debug, Clone)]
pub struct Signature {
    return_type: String,
    class_name: String,
    method_name: String,
    argument_types: Vec<String>,
    canonical: String,
    hash: OnceLock<u64>,
}

impl Signature {
    /// Parses `class:method(args)[-return]`.
    ///
    /// # Errors
    /// Returns a [`ParseError`] if the text does not match the grammar. If the
    /// only problem is stray whitespace the error carries the corrected form.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        if let Some(signature) = Self::parse_strict(text) {
            return Ok(signature);
        }
        let stripped: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        let hint = if stripped != text {
            Self::parse_strict(&stripped).map(|s| s.canonical)
        } else {
            None
        };
        Err(ParseError { input: text.to_string(), hint })
    }

    /// Builds a signature from native type names.
    pub fn new<S: AsRef<str>>(
        return_type: &str,
        class_name: &str,
        method_name: &str,
        argument_types: &[S],
    ) -> Result<Self, ParseError> {
        Self::parse(&Self::create(return_type, class_name, method_name, argument_types))
    }

    /// Produces the canonical text form; array types are encoded.
    pub fn create<S: AsRef<str>>(
        return_type: &str,
        class_name: &str,
        method_name: &str,
        argument_types: &[S],
    ) -> String {
        let args: Vec<String> = argument_types.iter().map(|t| encode_array_type(t.as_ref())).collect();
        format!("{}:{}({})-{}", class_name, method_name, args.join(","), encode_array_type(return_type))
    }

    fn parse_strict(text: &str) -> Option<Self> {
        let caps = SIGNATURE.captures(text)?;
        let argument_types: Vec<String> = caps
            .get(3)
            .map(|m| m.as_str())
            .unwrap_or_default()
            .split(',')
            .filter(|t| !t.is_empty())
            .map(decode_array_type)
            .collect();
        let return_type = caps.get(4).map_or_else(|| VOID.to_string(), |m| decode_array_type(m.as_str()));
        let class_name = caps[1].to_string();
        let method_name = caps[2].to_string();
        let canonical = Self::create(&return_type, &class_name, &method_name, &argument_types);

        Some(Self { return_type, class_name, method_name, argument_types, canonical, hash: OnceLock::new() })
    }

    pub fn return_type(&self) -> &str {
        &self.return_type
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    pub fn argument_types(&self) -> &[String] {
        &self.argument_types
    }

    pub fn as_str(&self) -> &str {
        &self.canonical
    }

    /// The key a result is stored under: signature, separator, request id.
    pub fn result_key(&self, request_id: &RequestId) -> String {
        format!("{}{}{}", self.canonical, RESULT_KEY_SEPARATOR, request_id)
    }

    fn cached_hash(&self) -> u64 {
        *self.hash.get_or_init(|| {
            let mut hasher = DefaultHasher::new();
            self.canonical.hash(&mut hasher);
            hasher.finish()
        })
    }
}

impl PartialEq for Signature {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for Signature {}

impl Hash for Signature {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.cached_hash());
    }
}

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.canonical)
    }
}

impl FromStr for Signature {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Rewrites a JVM array type name into its signature-safe form.
///
/// Names that are not arrays pass through untouched.
pub fn encode_array_type(name: &str) -> String {
    let depth = name.chars().take_while(|c| *c == '[').count();
    if depth == 0 {
        return name.to_string();
    }
    let component = &name[depth..];
    let component = match component.strip_suffix(';') {
        Some(class) if class.starts_with('L') => class,
        _ => component,
    };
    let mut out = ARRAY_MARKER.to_string().repeat(depth);
    out.push_str(component);
    out
}

/// Inverse of [`encode_array_type`].
pub fn decode_array_type(name: &str) -> String {
    let depth = name.chars().take_while(|c| *c == ARRAY_MARKER).count();
    if depth == 0 {
        return name.to_string();
    }
    let component = &name[depth..];
    let mut out = "[".repeat(depth);
    out.push_str(component);
    if component.len() > 1 && component.starts_with('L') {
        out.push(';');
    }
    out
}
