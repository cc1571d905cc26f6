//! # Classes
//!
//! A [`Class`] is a named type with supertypes and, on nodes that can run it,
//! an [`Invocable`] that dispatches method calls. The invocation capability is
//! attached once at registration; nothing is looked up reflectively per call.
//!
//! Peers that only need to *accept* values of a class (type checks, subtype
//! queries) can resolve it from a [`ClassSource`], which hands back a
//! [`ClassSchema`]: name and supertypes, no code.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use diffpack::{Decoder, Encoder, Object, Value};

use crate::error::Result;
use crate::types::{self, OBJECT_CLASS};

/// The body of a method: receives the target object and the arguments.
pub type MethodBody = Arc<dyn Fn(&Object, &[Value]) -> anyhow::Result<Value> + Send + Sync>;

/// Per-class method dispatch.
pub trait Invocable: Send + Sync + 'static {
    /// Whether a method with exactly these declared argument types exists.
    fn declares(&self, method: &str, arg_types: &[String]) -> bool;

    /// Runs a method previously confirmed by [`declares`](Self::declares).
    fn invoke(&self, target: &Object, method: &str, arg_types: &[String], args: &[Value]) -> anyhow::Result<Value>;
}

/// A table of closures keyed by name and argument types.
#[derive(Clone, Default)]
pub struct MethodTable {
    methods: HashMap<(String, Vec<String>), MethodBody>,
}

impl MethodTable {
    pub fn insert(&mut self, name: &str, arg_types: &[&str], body: MethodBody) {
        let key = (name.to_string(), arg_types.iter().map(|t| t.to_string()).collect());
        self.methods.insert(key, body);
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl Invocable for MethodTable {
    fn declares(&self, method: &str, arg_types: &[String]) -> bool {
        self.methods.contains_key(&(method.to_string(), arg_types.to_vec()))
    }

    fn invoke(&self, target: &Object, method: &str, arg_types: &[String], args: &[Value]) -> anyhow::Result<Value> {
        match self.methods.get(&(method.to_string(), arg_types.to_vec())) {
            Some(body) => body(target, args),
            None => anyhow::bail!("no method {}({})", method, arg_types.join(",")),
        }
    }
}

#[derive(Clone)]
pub struct Class {
    name: String,
    supertypes: Vec<String>,
    methods: Option<Arc<dyn Invocable>>,
}

impl Class {
    pub fn builder(name: impl Into<String>) -> ClassBuilder {
        ClassBuilder { name: name.into(), supertypes: Vec::new(), table: MethodTable::default() }
    }

    /// A class whose methods are dispatched by a hand-written [`Invocable`].
    pub fn with_invocable(name: impl Into<String>, supertypes: Vec<String>, methods: Arc<dyn Invocable>) -> Self {
        Self { name: name.into(), supertypes, methods: Some(methods) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn supertypes(&self) -> &[String] {
        &self.supertypes
    }

    /// `None` for classes known only by schema.
    pub fn methods(&self) -> Option<&Arc<dyn Invocable>> {
        self.methods.as_ref()
    }

    pub fn schema(&self) -> ClassSchema {
        ClassSchema { name: self.name.clone(), supertypes: self.supertypes.clone() }
    }
}

impl std::fmt::Debug for Class {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Class")
            .field("name", &self.name)
            .field("supertypes", &self.supertypes)
            .field("invocable", &self.methods.is_some())
            .finish()
    }
}

pub struct ClassBuilder {
    name: String,
    supertypes: Vec<String>,
    table: MethodTable,
}

impl ClassBuilder {
    pub fn extends(mut self, supertype: impl Into<String>) -> Self {
        self.supertypes.push(supertype.into());
        self
    }

    pub fn method<F>(mut self, name: &str, arg_types: &[&str], body: F) -> Self
    where
        F: Fn(&Object, &[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.table.insert(name, arg_types, Arc::new(body));
        self
    }

    pub fn build(self) -> Class {
        Class { name: self.name, supertypes: self.supertypes, methods: Some(Arc::new(self.table)) }
    }
}

/// The transferable description of a class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassSchema {
    pub name: String,
    pub supertypes: Vec<String>,
}

impl ClassSchema {
    pub fn to_bytes(&self) -> diffpack::Result<Vec<u8>> {
        let mut enc = Encoder::new();
        enc.entry_begin("Class")?;
        enc.map_begin()?;
        enc.entry_begin("name")?;
        enc.str(&self.name)?;
        enc.entry_end()?;
        enc.entry_begin("supertypes")?;
        enc.list_begin()?;
        for supertype in &self.supertypes {
            enc.str(supertype)?;
        }
        enc.list_end()?;
        enc.entry_end()?;
        enc.map_end()?;
        enc.entry_end()?;
        enc.into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> diffpack::Result<Self> {
        let mut dec = Decoder::new(bytes);
        let (_, mut body) = dec.entry()?;
        let mut fields = body.map()?;
        let mut name = None;
        let mut supertypes = Vec::new();
        while let Some((key, mut field)) = fields.next()? {
            match key {
                "name" => name = Some(field.str()?.to_string()),
                "supertypes" => {
                    let mut items = field.list()?;
                    while let Some(mut item) = items.next()? {
                        supertypes.push(item.str()?.to_string());
                    }
                }
                _ => {}
            }
        }
        let name = name.ok_or(diffpack::Error::InvalidMapEntry)?;
        Ok(Self { name, supertypes })
    }

    pub fn into_class(self) -> Class {
        Class { name: self.name, supertypes: self.supertypes, methods: None }
    }
}

/// Classes known to this node.
#[derive(Default)]
pub struct ClassRegistry {
    classes: DashMap<String, Class>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a class, replacing any previous one of the same name.
    pub fn register(&self, class: Class) {
        self.classes.insert(class.name.clone(), class);
    }

    pub fn get(&self, name: &str) -> Option<Class> {
        self.classes.get(name).map(|c| c.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    pub fn schema(&self, name: &str) -> Option<ClassSchema> {
        self.classes.get(name).map(|c| c.schema())
    }

    /// Supertypes of `name` in breadth-first order, starting with `name` itself.
    pub fn ancestry(&self, name: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([name.to_string()]);
        let mut out = Vec::new();
        while let Some(next) = queue.pop_front() {
            if !seen.insert(next.clone()) {
                continue;
            }
            if let Some(supertypes) = self.classes.get(&next).map(|c| c.supertypes.clone()) {
                queue.extend(supertypes);
            }
            out.push(next);
        }
        out
    }

    pub fn is_subtype(&self, class: &str, ancestor: &str) -> bool {
        ancestor == OBJECT_CLASS || self.ancestry(class).iter().any(|c| c == ancestor)
    }

    /// Whether `value` may be passed where `declared` is expected.
    pub fn is_assignable(&self, value: &Value, declared: &str) -> bool {
        types::assignable(value, declared, &|class, ancestor| self.is_subtype(class, ancestor))
    }
}

/// A place to fetch classes this node does not know yet.
#[async_trait]
pub trait ClassSource: Send + Sync + 'static {
    /// Names the source in resolution failures.
    fn describe(&self) -> String;

    /// Fetches the encoded [`ClassSchema`] of `name`.
    async fn fetch_class(&self, name: &str) -> Result<Vec<u8>>;
}
