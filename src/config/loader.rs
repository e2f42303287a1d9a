//! Load schema config from a JSON file and resolve it into the registry.

use crate::config::resolved::{AttributeDescriptor, RecordTypeDescriptor, SchemaRegistry};
use crate::config::types::*;
use crate::config::{default_namespace_id, validate, FILENAME_SUFFIX};
use crate::error::ConfigError;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Build the registry from a config document (validates first).
pub fn resolve(config: &SchemaConfig) -> Result<SchemaRegistry, ConfigError> {
    validate(config)?;
    let default_ns = default_namespace_id(config);
    let namespaces_by_id: HashMap<_, _> = config
        .namespaces
        .iter()
        .map(|n| (n.id.as_str(), n.name.as_str()))
        .collect();

    let mut entities = Vec::with_capacity(config.entities.len());
    for e in &config.entities {
        let ns_id = e.namespace_id.as_deref().unwrap_or(default_ns);
        let schema = namespaces_by_id.get(ns_id).copied().unwrap_or(ns_id);
        let attributes = e
            .attributes
            .iter()
            .map(|a| AttributeDescriptor {
                name: a.name.clone(),
                kind: a.kind,
                nullable: a.nullable,
                sidecar: (a.kind == ValueKind::Blob).then(|| format!("{}{}", a.name, FILENAME_SUFFIX)),
                target: a.target.clone(),
            })
            .collect();
        let desc = RecordTypeDescriptor::new(
            e.name.clone(),
            schema.to_string(),
            e.table.clone().unwrap_or_else(|| e.name.clone()),
            attributes,
        )
        .ok_or_else(|| ConfigError::InvalidIdentity {
            entity: e.name.clone(),
            reason: "identity attribute missing".into(),
        })?;
        tracing::debug!(entity = %e.name, schema = %schema, "registered entity");
        entities.push(Arc::new(desc));
    }
    Ok(SchemaRegistry::new(entities))
}

pub fn load_from_str(json: &str) -> Result<SchemaConfig, ConfigError> {
    serde_json::from_str(json).map_err(|e| ConfigError::Load(e.to_string()))
}

/// Read a schema document from disk.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<SchemaConfig, ConfigError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
    load_from_str(&text)
}
