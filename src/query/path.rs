//! Client-facing property names resolved against a record type.

use crate::config::{RecordTypeDescriptor, ValueKind};
use crate::error::AppError;
use std::fmt;

/// Separators accepted between path segments (`Address/City`, `Address.City`).
const PATH_SEPARATORS: [char; 2] = ['/', '.'];

/// Validated reference to one attribute of one record type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttributePath {
    entity: String,
    name: String,
    index: usize,
    kind: ValueKind,
}

impl AttributePath {
    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Position of the attribute in the descriptor (and in record values).
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }
}

impl fmt::Display for AttributePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

pub struct AttributePathResolver;

impl AttributePathResolver {
    /// Only single-segment paths resolve; navigation through references is not supported.
    pub fn resolve(desc: &RecordTypeDescriptor, raw: &str) -> Result<AttributePath, AppError> {
        let unresolvable = || AppError::UnresolvableAttribute {
            entity: desc.name().to_string(),
            path: raw.to_string(),
        };
        let mut segments = raw.split(PATH_SEPARATORS);
        let first = segments.next().filter(|s| !s.is_empty()).ok_or_else(unresolvable)?;
        if segments.next().is_some() {
            return Err(unresolvable());
        }
        let index = desc.attribute_index(first).ok_or_else(unresolvable)?;
        let attr = &desc.attributes()[index];
        Ok(AttributePath {
            entity: desc.name().to_string(),
            name: attr.name.clone(),
            index,
            kind: attr.kind,
        })
    }
}
