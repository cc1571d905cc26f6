//! The shared state of a node: classes, serializers, and where to look for
//! classes it does not have.

use std::sync::Arc;

use diffpack::Value;
use tracing::debug;

use crate::class::{Class, ClassRegistry, ClassSchema, ClassSource};
use crate::error::{Error, Result};
use crate::serializer::{Serializer, SerializerRepository};
use crate::types;

pub struct Context {
    classes: ClassRegistry,
    serializers: SerializerRepository,
    class_sources: Vec<Arc<dyn ClassSource>>,
}

impl Context {
    pub fn builder() -> ContextBuilder {
        ContextBuilder::default()
    }

    /// A context with the default serializers and no user classes.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            classes: ClassRegistry::new(),
            serializers: SerializerRepository::with_defaults(),
            class_sources: Vec::new(),
        })
    }

    pub fn classes(&self) -> &ClassRegistry {
        &self.classes
    }

    pub fn serializers(&self) -> &SerializerRepository {
        &self.serializers
    }

    pub fn serializer(&self, name: &str) -> Result<Arc<dyn Serializer>> {
        self.serializers.get(name)
    }

    /// Makes sure `name` is known here.
    ///
    /// Tries, in order: the local registry (built-in types included), then each
    /// class source. A class fetched from a source is registered by schema.
    pub async fn resolve_class(&self, name: &str) -> Result<()> {
        let name = match types::is_array(name) {
            true => match types::array_component_class(name) {
                Some(component) => component,
                None => return Ok(()),
            },
            false => name,
        };
        if types::is_builtin(name) || self.classes.contains(name) {
            return Ok(());
        }

        let mut tried = Vec::with_capacity(self.class_sources.len());
        for source in &self.class_sources {
            let origin = source.describe();
            let fetched = source.fetch_class(name).await.and_then(|bytes| {
                ClassSchema::from_bytes(&bytes).map_err(|e| Error::Protocol { peer: origin.clone(), message: e.to_string() })
            });
            match fetched {
                Ok(schema) if schema.name == name => {
                    debug!(class = name, source = %origin, "resolved class from source");
                    self.classes.register(schema.into_class());
                    return Ok(());
                }
                Ok(schema) => debug!(class = name, got = %schema.name, source = %origin, "source sent a different class"),
                Err(e) => debug!(class = name, source = %origin, error = %e, "class source failed"),
            }
            tried.push(origin);
        }
        Err(Error::ClassResolution { class: name.to_string(), tried })
    }

    /// Resolves every class a value mentions, including nested fields and items.
    pub async fn resolve_value(&self, value: &Value) -> Result<()> {
        let mut pending = vec![value];
        while let Some(next) = pending.pop() {
            match next {
                Value::Object(object) => {
                    self.resolve_class(&object.class).await?;
                    pending.extend(object.fields.iter().map(|(_, v)| v));
                }
                Value::Array(array) => {
                    self.resolve_class(&array.component).await?;
                    pending.extend(array.items.iter());
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct ContextBuilder {
    classes: Vec<Class>,
    serializers: Vec<Arc<dyn Serializer>>,
    aliases: Vec<(String, String)>,
    class_sources: Vec<Arc<dyn ClassSource>>,
}

impl ContextBuilder {
    pub fn class(mut self, class: Class) -> Self {
        self.classes.push(class);
        self
    }

    /// Registers an extra serializer next to `pack` and `json`.
    pub fn serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializers.push(serializer);
        self
    }

    pub fn alias(mut self, alias: impl Into<String>, name: impl Into<String>) -> Self {
        self.aliases.push((alias.into(), name.into()));
        self
    }

    /// Appends a source to consult, after the local registry and any earlier sources.
    pub fn class_source(mut self, source: Arc<dyn ClassSource>) -> Self {
        self.class_sources.push(source);
        self
    }

    /// # Errors
    /// Fails if an alias points at a serializer that was never registered.
    pub fn build(self) -> Result<Arc<Context>> {
        let classes = ClassRegistry::new();
        for class in self.classes {
            classes.register(class);
        }
        let serializers = SerializerRepository::with_defaults();
        for serializer in self.serializers {
            serializers.register(serializer);
        }
        for (alias, name) in self.aliases {
            serializers.alias(alias, &name)?;
        }
        Ok(Arc::new(Context { classes, serializers, class_sources: self.class_sources }))
    }
}
