//! # Serializers
//!
//! Values cross the wire as opaque byte blobs; a diffuser names the serializer
//! that produced them. Two ship by default:
//!
//! - `pack`: the diffpack TLV encoding.
//! - `json`: the tagged JSON form of [`Value`], handy when debugging a peer.
//!
//! Deserializing checks that the decoded value fits the declared type name, so a
//! mismatch surfaces as a serialization failure rather than deep inside a method.

use std::sync::Arc;

use dashmap::DashMap;
use diffpack::{Decoder, Encoder, Value};

use crate::error::{Error, Result};
use crate::types;

pub const PACK: &str = "pack";
pub const JSON: &str = "json";

pub trait Serializer: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn serialize(&self, value: &Value) -> Result<Vec<u8>>;

    /// Decodes a value that must be assignable to `type_name`.
    fn deserialize(&self, bytes: &[u8], type_name: &str) -> Result<Value>;
}

fn check_declared(serializer: &str, value: Value, type_name: &str) -> Result<Value> {
    if types::conforms(&value, type_name) {
        Ok(value)
    } else {
        let found = value.type_name().map_or_else(|| "null".to_string(), |t| t.into_owned());
        Err(Error::serialization(serializer, format!("decoded {} where {} was declared", found, type_name)))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PackSerializer;

impl Serializer for PackSerializer {
    fn name(&self) -> &str {
        PACK
    }

    fn serialize(&self, value: &Value) -> Result<Vec<u8>> {
        let mut enc = Encoder::new();
        diffpack::encode_value(&mut enc, value).map_err(|e| Error::serialization(PACK, e))?;
        enc.into_bytes().map_err(|e| Error::serialization(PACK, e))
    }

    fn deserialize(&self, bytes: &[u8], type_name: &str) -> Result<Value> {
        let mut dec = Decoder::new(bytes);
        let value = diffpack::decode_value(&mut dec).map_err(|e| Error::serialization(PACK, e))?;
        if dec.remaining() != 0 {
            return Err(Error::serialization(PACK, format!("{} trailing bytes", dec.remaining())));
        }
        check_declared(PACK, value, type_name)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn name(&self) -> &str {
        JSON
    }

    fn serialize(&self, value: &Value) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| Error::serialization(JSON, e))
    }

    fn deserialize(&self, bytes: &[u8], type_name: &str) -> Result<Value> {
        let value: Value = serde_json::from_slice(bytes).map_err(|e| Error::serialization(JSON, e))?;
        check_declared(JSON, value, type_name)
    }
}

/// Serializers by name, with aliases.
pub struct SerializerRepository {
    serializers: DashMap<String, Arc<dyn Serializer>>,
    aliases: DashMap<String, String>,
}

impl SerializerRepository {
    /// An empty repository.
    pub fn new() -> Self {
        Self { serializers: DashMap::new(), aliases: DashMap::new() }
    }

    /// A repository holding `pack` and `json`.
    pub fn with_defaults() -> Self {
        let repo = Self::new();
        repo.register(Arc::new(PackSerializer));
        repo.register(Arc::new(JsonSerializer));
        repo
    }

    pub fn register(&self, serializer: Arc<dyn Serializer>) {
        self.serializers.insert(serializer.name().to_string(), serializer);
    }

    /// Makes `alias` resolve to the serializer registered as `name`.
    pub fn alias(&self, alias: impl Into<String>, name: &str) -> Result<()> {
        let canonical = self.canonical_name(name).ok_or_else(|| unknown(name))?;
        self.aliases.insert(alias.into(), canonical);
        Ok(())
    }

    /// The registered name `name` refers to, following an alias if needed.
    pub fn canonical_name(&self, name: &str) -> Option<String> {
        if self.serializers.contains_key(name) {
            return Some(name.to_string());
        }
        self.aliases.get(name).map(|n| n.clone())
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Serializer>> {
        let canonical = self.canonical_name(name).ok_or_else(|| unknown(name))?;
        self.serializers.get(&canonical).map(|s| s.clone()).ok_or_else(|| unknown(name))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.serializers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl Default for SerializerRepository {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn unknown(name: &str) -> Error {
    Error::serialization(name, "no such serializer")
}
