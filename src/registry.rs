use crate::config::Config;
use crate::descriptor::RecordDescriptor;
use crate::error::{Result, UpsertError};
use std::collections::BTreeMap;

/// Named record shapes, each batch is submitted with one of these names.
#[derive(Debug, Clone, Default)]
pub struct ShapeRegistry {
    shapes: BTreeMap<String, RecordDescriptor>,
}

impl ShapeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let mut registry = Self::new();
        for (name, shape) in &config.shapes {
            registry.register(name.clone(), shape.to_descriptor()?);
        }
        Ok(registry)
    }

    pub fn register(&mut self, name: impl Into<String>, descriptor: RecordDescriptor) {
        self.shapes.insert(name.into(), descriptor);
    }

    pub fn get(&self, name: &str) -> Result<&RecordDescriptor> {
        self.shapes
            .get(name)
            .ok_or_else(|| UpsertError::UnknownShape(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RecordDescriptor)> {
        self.shapes.iter().map(|(name, d)| (name.as_str(), d))
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }
}
