//! Resolved schema: config validated and flattened into immutable descriptors for runtime use.

use crate::config::ValueKind;
use crate::error::AppError;
use std::collections::HashMap;
use std::sync::Arc;

/// Name of the identity attribute every entity declares.
pub const IDENTITY_ATTRIBUTE: &str = "Id";

/// Suffix of the text attribute holding a blob's display filename.
pub const FILENAME_SUFFIX: &str = "FileName";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttributeDescriptor {
    pub name: String,
    pub kind: ValueKind,
    pub nullable: bool,
    /// Filename sidecar attribute, set for blob attributes only.
    pub sidecar: Option<String>,
    /// Target entity, set for reference attributes only.
    pub target: Option<String>,
}

impl AttributeDescriptor {
    pub fn is_identity(&self) -> bool {
        self.name == IDENTITY_ATTRIBUTE
    }
}

/// One registered record type. Built by the loader; read-only afterwards.
#[derive(Debug)]
pub struct RecordTypeDescriptor {
    name: String,
    namespace: String,
    table: String,
    attributes: Vec<AttributeDescriptor>,
    index: HashMap<String, usize>,
    identity: usize,
}

impl RecordTypeDescriptor {
    /// Caller guarantees the identity attribute is present (checked by the validator).
    pub(crate) fn new(
        name: String,
        namespace: String,
        table: String,
        attributes: Vec<AttributeDescriptor>,
    ) -> Option<Self> {
        let index: HashMap<String, usize> = attributes
            .iter()
            .enumerate()
            .map(|(i, a)| (a.name.clone(), i))
            .collect();
        let identity = *index.get(IDENTITY_ATTRIBUTE)?;
        Some(Self {
            name,
            namespace,
            table,
            attributes,
            index,
            identity,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Database schema holding the table.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn attributes(&self) -> &[AttributeDescriptor] {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeDescriptor> {
        self.index.get(name).map(|&i| &self.attributes[i])
    }

    pub fn attribute_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn identity_attribute(&self) -> &AttributeDescriptor {
        &self.attributes[self.identity]
    }

    pub fn identity_index(&self) -> usize {
        self.identity
    }
}

/// Entity-name lookup built once at startup and shared read-only by all workers.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    entities: Vec<Arc<RecordTypeDescriptor>>,
    by_name: HashMap<String, usize>,
}

impl SchemaRegistry {
    pub(crate) fn new(entities: Vec<Arc<RecordTypeDescriptor>>) -> Self {
        let by_name = entities
            .iter()
            .enumerate()
            .map(|(i, e)| (e.name().to_string(), i))
            .collect();
        Self { entities, by_name }
    }

    /// Exact, case-sensitive lookup.
    pub fn resolve(&self, name: &str) -> Result<&Arc<RecordTypeDescriptor>, AppError> {
        self.by_name
            .get(name)
            .map(|&i| &self.entities[i])
            .ok_or_else(|| AppError::UnknownEntity(name.to_string()))
    }

    pub fn identity_attribute<'a>(&self, desc: &'a RecordTypeDescriptor) -> &'a AttributeDescriptor {
        desc.identity_attribute()
    }

    pub fn entities(&self) -> impl Iterator<Item = &Arc<RecordTypeDescriptor>> {
        self.entities.iter()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
