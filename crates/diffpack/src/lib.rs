//! # Diffpack
//!
//! A small, bounded TLV encoding for the values that cross a diffusion
//! boundary: call targets, arguments and results.
//!
//! ## Format
//!
//! - **Scalars**: `[Tag: 1b][Data: N]`
//! - **Blobs**: `[Tag: 1b][Len: 4b][Data: Len]`
//! - **Containers**: `[Tag: 1b][Len: 4b][Body: Len]`
//!
//! Named containers (`Entry`, `Object`, `Array`) start their body with a
//! string blob carrying the name. All integers are Little-Endian.

pub mod value;

pub use value::Array;
pub use value::Object;
pub use value::Value;
pub use value::decode_value;
pub use value::encode_value;

#[cfg(test)]
mod tests;

/// Diffpack encoding and decoding errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Byte does not correspond to a valid `Tag`.
    InvalidTag(u8),
    /// A valid tag was found where a different one was required.
    UnexpectedTag { expected: Tag, found: Tag },
    InvalidUtf8,
    /// Encoded char is not a valid unicode scalar value.
    InvalidChar(u32),
    /// Closing a scope that does not match the active scope.
    ScopeMismatch { expected: Scope, actual: Scope },
    /// `close()` with nothing but the root open.
    ScopeUnderflow,
    /// `into_bytes()` while a container is still open.
    ScopeStillOpen,
    UnexpectedEnd,
    /// Lengths are u32 on the wire.
    BlobTooLarge(usize),
    /// Attempted to write more than one payload into an entry.
    TooManyItems,
    /// Attempted to close an entry without a payload.
    EmptyEntry,
    /// Attempted to write something other than an entry into a map or object.
    InvalidMapEntry,
    /// Values nested deeper than `value::MAX_DEPTH`.
    RecursionLimitExceeded,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidTag(b) => write!(f, "invalid tag byte: {:#04x}", b),
            Error::UnexpectedTag { expected, found } => {
                write!(f, "unexpected tag: expected {:?}, found {:?}", expected, found)
            }
            Error::ScopeMismatch { expected, actual } => {
                write!(f, "scope mismatch: expected {:?}, found {:?}", expected, actual)
            }
            Error::InvalidChar(c) => write!(f, "invalid char scalar: {:#x}", c),
            Error::BlobTooLarge(n) => write!(f, "blob of {} bytes exceeds u32 length", n),
            _ => write!(f, "{:?}", self),
        }
    }
}

impl std::error::Error for Error {}

/// Specialized `Result` for diffpack operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Identifies the type of the encoded item.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Null = 0x01,
    True = 0x02,
    False = 0x03,
    I8 = 0x04,
    I16 = 0x05,
    I32 = 0x06,
    I64 = 0x07,
    U64 = 0x08,
    F32 = 0x09,
    F64 = 0x0A,
    Char = 0x0B,

    // Blobs (Tag + u32 Len + Bytes)
    Str = 0x10,
    Bytes = 0x11,

    // Containers (Tag + u32 Len + Body)
    List = 0x20,
    Map = 0x21,
    Entry = 0x22,
    Object = 0x23,
    Array = 0x24,
}

impl Tag {
    /// Returns the Tag for a given byte, or `None` if invalid.
    pub fn from_u8(b: u8) -> Option<Self> {
        let tag = match b {
            0x01 => Tag::Null,
            0x02 => Tag::True,
            0x03 => Tag::False,
            0x04 => Tag::I8,
            0x05 => Tag::I16,
            0x06 => Tag::I32,
            0x07 => Tag::I64,
            0x08 => Tag::U64,
            0x09 => Tag::F32,
            0x0A => Tag::F64,
            0x0B => Tag::Char,
            0x10 => Tag::Str,
            0x11 => Tag::Bytes,
            0x20 => Tag::List,
            0x21 => Tag::Map,
            0x22 => Tag::Entry,
            0x23 => Tag::Object,
            0x24 => Tag::Array,
            _ => return None,
        };
        Some(tag)
    }

    /// Width of the fixed payload following the tag, `None` for length-prefixed items.
    fn fixed_width(self) -> Option<usize> {
        match self {
            Tag::Null | Tag::True | Tag::False => Some(0),
            Tag::I8 => Some(1),
            Tag::I16 => Some(2),
            Tag::I32 | Tag::F32 | Tag::Char => Some(4),
            Tag::I64 | Tag::U64 | Tag::F64 => Some(8),
            _ => None,
        }
    }
}

/// Encoder scope kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Top level, before any container is opened.
    Root,
    List,
    /// Named fields; allows only `Entry` items.
    Map,
    /// A single named payload.
    Entry,
    /// A class name followed by named fields; allows only `Entry` items.
    Object,
    /// A component type name followed by any number of items.
    Array,
}

struct Frame {
    start: usize,
    scope: Scope,
    count: usize,
}

/// A state-machine driven encoder.
///
/// Open containers live on a stack; closing one back-patches its length.
/// Writes are checked against the current scope:
///
/// 1. `Map` and `Object` scopes accept only entries.
/// 2. `Entry` scopes accept exactly one payload item.
/// 3. The encoder must be back at `Root` to produce bytes.
pub struct Encoder {
    buf: Vec<u8>,
    /// Bottom is always `Scope::Root`.
    stack: Vec<Frame>,
}

impl Encoder {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(256),
            stack: vec![Frame { start: 0, scope: Scope::Root, count: 0 }],
        }
    }

    /// Consumes the encoder and returns the encoded bytes.
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        if self.stack.len() > 1 {
            return Err(Error::ScopeStillOpen);
        }
        Ok(self.buf)
    }

    fn frame(&mut self) -> &mut Frame {
        let last = self.stack.len() - 1;
        &mut self.stack[last]
    }

    fn check_write(&mut self, tag: Tag) -> Result<()> {
        let frame = self.frame();
        match frame.scope {
            Scope::Root | Scope::List | Scope::Array => Ok(()),
            Scope::Map | Scope::Object if tag == Tag::Entry => Ok(()),
            Scope::Map | Scope::Object => Err(Error::InvalidMapEntry),
            Scope::Entry if frame.count >= 1 => Err(Error::TooManyItems),
            Scope::Entry => Ok(()),
        }
    }

    fn written(&mut self) {
        self.frame().count += 1;
    }

    fn scalar(&mut self, tag: Tag, data: &[u8]) -> Result<()> {
        self.check_write(tag)?;
        self.buf.push(tag as u8);
        self.buf.extend_from_slice(data);
        self.written();
        Ok(())
    }

    fn blob(&mut self, tag: Tag, data: &[u8]) -> Result<()> {
        let len = u32::try_from(data.len()).map_err(|_| Error::BlobTooLarge(data.len()))?;
        self.check_write(tag)?;
        self.buf.push(tag as u8);
        self.buf.extend_from_slice(&len.to_le_bytes());
        self.buf.extend_from_slice(data);
        self.written();
        Ok(())
    }

    fn begin(&mut self, tag: Tag, scope: Scope) -> Result<()> {
        self.check_write(tag)?;
        self.buf.push(tag as u8);
        self.buf.extend_from_slice(&[0, 0, 0, 0]);
        self.stack.push(Frame { start: self.buf.len(), scope, count: 0 });
        Ok(())
    }

    /// Begins a named container: the name is written as a string blob, which
    /// does not count towards the scope's items.
    fn begin_named(&mut self, tag: Tag, scope: Scope, name: &str) -> Result<()> {
        self.begin(tag, scope)?;
        let len = u32::try_from(name.len()).map_err(|_| Error::BlobTooLarge(name.len()))?;
        self.buf.push(Tag::Str as u8);
        self.buf.extend_from_slice(&len.to_le_bytes());
        self.buf.extend_from_slice(name.as_bytes());
        Ok(())
    }

    fn end(&mut self, expected: Scope) -> Result<()> {
        if self.stack.len() <= 1 {
            return Err(Error::ScopeUnderflow);
        }
        let frame = self.frame();
        if frame.scope != expected {
            return Err(Error::ScopeMismatch { expected, actual: frame.scope });
        }
        if frame.scope == Scope::Entry && frame.count == 0 {
            return Err(Error::EmptyEntry);
        }

        let start = frame.start;
        self.stack.pop();
        let body_len = self.buf.len() - start;
        let len = u32::try_from(body_len).map_err(|_| Error::BlobTooLarge(body_len))?;
        self.buf[start - 4..start].copy_from_slice(&len.to_le_bytes());
        self.written();
        Ok(())
    }

    pub fn null(&mut self) -> Result<()> { self.scalar(Tag::Null, &[]) }
    pub fn bool(&mut self, v: bool) -> Result<()> { self.scalar(if v { Tag::True } else { Tag::False }, &[]) }
    pub fn i8(&mut self, v: i8) -> Result<()> { self.scalar(Tag::I8, &v.to_le_bytes()) }
    pub fn i16(&mut self, v: i16) -> Result<()> { self.scalar(Tag::I16, &v.to_le_bytes()) }
    pub fn i32(&mut self, v: i32) -> Result<()> { self.scalar(Tag::I32, &v.to_le_bytes()) }
    pub fn i64(&mut self, v: i64) -> Result<()> { self.scalar(Tag::I64, &v.to_le_bytes()) }
    pub fn u64(&mut self, v: u64) -> Result<()> { self.scalar(Tag::U64, &v.to_le_bytes()) }
    pub fn f32(&mut self, v: f32) -> Result<()> { self.scalar(Tag::F32, &v.to_le_bytes()) }
    pub fn f64(&mut self, v: f64) -> Result<()> { self.scalar(Tag::F64, &v.to_le_bytes()) }
    /// Encodes a char as its u32 scalar value.
    pub fn char(&mut self, v: char) -> Result<()> { self.scalar(Tag::Char, &(v as u32).to_le_bytes()) }

    pub fn str(&mut self, v: &str) -> Result<()> { self.blob(Tag::Str, v.as_bytes()) }
    pub fn bytes(&mut self, v: &[u8]) -> Result<()> { self.blob(Tag::Bytes, v) }

    pub fn list_begin(&mut self) -> Result<()> { self.begin(Tag::List, Scope::List) }
    pub fn list_end(&mut self) -> Result<()> { self.end(Scope::List) }

    /// Begins a map; only `entry_begin` may follow until `map_end`.
    pub fn map_begin(&mut self) -> Result<()> { self.begin(Tag::Map, Scope::Map) }
    pub fn map_end(&mut self) -> Result<()> { self.end(Scope::Map) }

    /// Begins a named entry; exactly one payload item must follow.
    pub fn entry_begin(&mut self, name: &str) -> Result<()> { self.begin_named(Tag::Entry, Scope::Entry, name) }
    pub fn entry_end(&mut self) -> Result<()> { self.end(Scope::Entry) }

    /// Begins an object of `class`; its fields are written as entries.
    pub fn object_begin(&mut self, class: &str) -> Result<()> { self.begin_named(Tag::Object, Scope::Object, class) }
    pub fn object_end(&mut self) -> Result<()> { self.end(Scope::Object) }

    /// Begins an array whose elements have type `component`.
    pub fn array_begin(&mut self, component: &str) -> Result<()> { self.begin_named(Tag::Array, Scope::Array, component) }
    pub fn array_end(&mut self) -> Result<()> { self.end(Scope::Array) }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

/// A zero-copy, bounds-checked view over encoded bytes.
///
/// Reading advances the view. Container reads return new decoders restricted
/// to the container's body.
#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    buf: &'a [u8],
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Returns the number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    /// Peeks the next Tag without advancing.
    pub fn peek_tag(&self) -> Result<Tag> {
        let b = *self.buf.first().ok_or(Error::UnexpectedEnd)?;
        Tag::from_u8(b).ok_or(Error::InvalidTag(b))
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.buf.len() {
            return Err(Error::UnexpectedEnd);
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn expect(&mut self, expected: Tag) -> Result<()> {
        let found = self.peek_tag()?;
        if found != expected {
            return Err(Error::UnexpectedTag { expected, found });
        }
        self.take(1)?;
        Ok(())
    }

    fn read_len(&mut self) -> Result<usize> {
        Ok(u32::from_le_bytes(self.take_array()?) as usize)
    }

    /// Skips the next item and everything nested in it.
    pub fn skip(&mut self) -> Result<()> {
        let tag = self.peek_tag()?;
        self.take(1)?;
        match tag.fixed_width() {
            Some(n) => { self.take(n)?; }
            None => {
                let len = self.read_len()?;
                self.take(len)?;
            }
        }
        Ok(())
    }

    pub fn null(&mut self) -> Result<()> { self.expect(Tag::Null) }

    pub fn bool(&mut self) -> Result<bool> {
        match self.peek_tag()? {
            Tag::True => { self.take(1)?; Ok(true) }
            Tag::False => { self.take(1)?; Ok(false) }
            found => Err(Error::UnexpectedTag { expected: Tag::True, found }),
        }
    }

    pub fn i8(&mut self) -> Result<i8> { self.expect(Tag::I8)?; Ok(i8::from_le_bytes(self.take_array()?)) }
    pub fn i16(&mut self) -> Result<i16> { self.expect(Tag::I16)?; Ok(i16::from_le_bytes(self.take_array()?)) }
    pub fn i32(&mut self) -> Result<i32> { self.expect(Tag::I32)?; Ok(i32::from_le_bytes(self.take_array()?)) }
    pub fn i64(&mut self) -> Result<i64> { self.expect(Tag::I64)?; Ok(i64::from_le_bytes(self.take_array()?)) }
    pub fn u64(&mut self) -> Result<u64> { self.expect(Tag::U64)?; Ok(u64::from_le_bytes(self.take_array()?)) }
    pub fn f32(&mut self) -> Result<f32> { self.expect(Tag::F32)?; Ok(f32::from_le_bytes(self.take_array()?)) }
    pub fn f64(&mut self) -> Result<f64> { self.expect(Tag::F64)?; Ok(f64::from_le_bytes(self.take_array()?)) }

    pub fn char(&mut self) -> Result<char> {
        self.expect(Tag::Char)?;
        let raw = u32::from_le_bytes(self.take_array()?);
        char::from_u32(raw).ok_or(Error::InvalidChar(raw))
    }

    pub fn str(&mut self) -> Result<&'a str> {
        self.expect(Tag::Str)?;
        let len = self.read_len()?;
        std::str::from_utf8(self.take(len)?).map_err(|_| Error::InvalidUtf8)
    }

    pub fn bytes(&mut self) -> Result<&'a [u8]> {
        self.expect(Tag::Bytes)?;
        let len = self.read_len()?;
        self.take(len)
    }

    fn enter(&mut self, tag: Tag) -> Result<Decoder<'a>> {
        self.expect(tag)?;
        let len = self.read_len()?;
        Ok(Decoder::new(self.take(len)?))
    }

    pub fn list(&mut self) -> Result<ListIter<'a>> {
        Ok(ListIter { dec: self.enter(Tag::List)? })
    }

    pub fn map(&mut self) -> Result<MapIter<'a>> {
        Ok(MapIter { dec: self.enter(Tag::Map)? })
    }

    /// Decodes an entry, returning `(name, payload)`.
    pub fn entry(&mut self) -> Result<(&'a str, Decoder<'a>)> {
        let mut body = self.enter(Tag::Entry)?;
        let name = body.str()?;
        Ok((name, body))
    }

    /// Decodes an object, returning `(class, fields)`.
    pub fn object(&mut self) -> Result<(&'a str, MapIter<'a>)> {
        let mut body = self.enter(Tag::Object)?;
        let class = body.str()?;
        Ok((class, MapIter { dec: body }))
    }

    /// Decodes an array, returning `(component, items)`.
    pub fn array(&mut self) -> Result<(&'a str, ListIter<'a>)> {
        let mut body = self.enter(Tag::Array)?;
        let component = body.str()?;
        Ok((component, ListIter { dec: body }))
    }
}

/// Iterator over the items of a list or array.
#[derive(Debug, Clone)]
pub struct ListIter<'a> {
    dec: Decoder<'a>,
}

impl<'a> ListIter<'a> {
    /// Returns a decoder positioned on the next item, or `None` at the end.
    pub fn next(&mut self) -> Result<Option<Decoder<'a>>> {
        if self.dec.remaining() == 0 {
            return Ok(None);
        }
        let mut probe = self.dec.clone();
        probe.skip()?;
        let len = self.dec.remaining() - probe.remaining();
        Ok(Some(Decoder::new(self.dec.take(len)?)))
    }
}

/// Iterator over the entries of a map or object.
#[derive(Debug, Clone)]
pub struct MapIter<'a> {
    dec: Decoder<'a>,
}

impl<'a> MapIter<'a> {
    /// Returns `(name, payload)` for the next entry, or `None` at the end.
    pub fn next(&mut self) -> Result<Option<(&'a str, Decoder<'a>)>> {
        if self.dec.remaining() == 0 {
            return Ok(None);
        }
        self.dec.entry().map(Some)
    }
}
