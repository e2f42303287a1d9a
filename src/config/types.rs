//! Raw schema config types matching the JSON document loaded at startup.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared value kind of an attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    #[serde(rename = "integer")]
    Integer,
    #[serde(rename = "decimal")]
    Decimal,
    #[serde(rename = "text")]
    Text,
    #[serde(rename = "boolean")]
    Boolean,
    #[serde(rename = "datetime")]
    DateTime,
    #[serde(rename = "blob")]
    Blob,
    #[serde(rename = "reference")]
    Reference,
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::Integer => "integer",
            ValueKind::Decimal => "decimal",
            ValueKind::Text => "text",
            ValueKind::Boolean => "boolean",
            ValueKind::DateTime => "datetime",
            ValueKind::Blob => "blob",
            ValueKind::Reference => "reference",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NamespaceConfig {
    pub id: String,
    /// Database schema the namespace's tables live in.
    pub name: String,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AttributeConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ValueKind,
    #[serde(default = "default_true")]
    pub nullable: bool,
    /// Entity name a `reference` attribute points at.
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntityConfig {
    pub name: String,
    #[serde(default)]
    pub namespace_id: Option<String>,
    /// Table name; the entity name when omitted.
    #[serde(default)]
    pub table: Option<String>,
    pub attributes: Vec<AttributeConfig>,
    #[serde(default)]
    pub comment: Option<String>,
}

/// Whole schema document.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SchemaConfig {
    #[serde(default)]
    pub namespaces: Vec<NamespaceConfig>,
    #[serde(default)]
    pub entities: Vec<EntityConfig>,
}
