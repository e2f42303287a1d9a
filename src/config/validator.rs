//! Config validation: referential integrity and registration invariants.

use crate::config::{EntityConfig, SchemaConfig, ValueKind, FILENAME_SUFFIX, IDENTITY_ATTRIBUTE};
use crate::error::ConfigError;
use std::collections::{HashMap, HashSet};

/// Namespace id used when an entity omits `namespace_id`.
pub const DEFAULT_NAMESPACE: &str = "public";

/// Default namespace id: the first declared namespace, else `public`.
pub fn default_namespace_id(config: &SchemaConfig) -> &str {
    config
        .namespaces
        .first()
        .map(|n| n.id.as_str())
        .unwrap_or(DEFAULT_NAMESPACE)
}

pub fn validate(config: &SchemaConfig) -> Result<(), ConfigError> {
    let default_ns = default_namespace_id(config);
    let mut namespace_ids: HashSet<&str> = config.namespaces.iter().map(|n| n.id.as_str()).collect();
    if config.namespaces.is_empty() {
        namespace_ids.insert(DEFAULT_NAMESPACE);
    }

    let mut seen: HashMap<&str, &str> = HashMap::new();
    for e in &config.entities {
        let ns = e.namespace_id.as_deref().unwrap_or(default_ns);
        if !namespace_ids.contains(ns) {
            return Err(ConfigError::MissingReference {
                kind: "namespace",
                id: ns.to_string(),
            });
        }
        if let Some(first) = seen.insert(e.name.as_str(), ns) {
            return Err(ConfigError::DuplicateEntity {
                name: e.name.clone(),
                first: first.to_string(),
                second: ns.to_string(),
            });
        }
    }

    for e in &config.entities {
        validate_entity(e, &seen)?;
    }
    Ok(())
}

fn validate_entity(e: &EntityConfig, entity_names: &HashMap<&str, &str>) -> Result<(), ConfigError> {
    let mut by_name = HashMap::new();
    for a in &e.attributes {
        if by_name.insert(a.name.as_str(), a).is_some() {
            return Err(ConfigError::DuplicateAttribute {
                entity: e.name.clone(),
                attribute: a.name.clone(),
            });
        }
    }

    match by_name.get(IDENTITY_ATTRIBUTE) {
        None => {
            return Err(ConfigError::InvalidIdentity {
                entity: e.name.clone(),
                reason: format!("no attribute named '{}'", IDENTITY_ATTRIBUTE),
            })
        }
        Some(id) if id.kind != ValueKind::Integer => {
            return Err(ConfigError::InvalidIdentity {
                entity: e.name.clone(),
                reason: format!("'{}' is {}, expected integer", IDENTITY_ATTRIBUTE, id.kind),
            })
        }
        Some(_) => {}
    }

    for a in &e.attributes {
        match (a.kind, a.target.as_deref()) {
            (ValueKind::Reference, None) => {
                return Err(ConfigError::Validation(format!(
                    "reference attribute '{}.{}' needs a target",
                    e.name, a.name
                )))
            }
            (ValueKind::Reference, Some(target)) if !entity_names.contains_key(target) => {
                return Err(ConfigError::MissingReference {
                    kind: "entity",
                    id: target.to_string(),
                })
            }
            (ValueKind::Reference, Some(_)) => {}
            (_, Some(_)) => {
                return Err(ConfigError::Validation(format!(
                    "only reference attributes may declare a target ('{}.{}')",
                    e.name, a.name
                )))
            }
            (_, None) => {}
        }

        if a.kind == ValueKind::Blob {
            let sidecar = format!("{}{}", a.name, FILENAME_SUFFIX);
            let ok = by_name
                .get(sidecar.as_str())
                .map(|s| s.kind == ValueKind::Text)
                .unwrap_or(false);
            if !ok {
                return Err(ConfigError::MissingSidecar {
                    entity: e.name.clone(),
                    attribute: a.name.clone(),
                    sidecar,
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(v: serde_json::Value) -> SchemaConfig {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn accepts_entities_without_namespaces() {
        let c = config(json!({
            "entities": [{ "name": "Tag", "attributes": [{ "name": "Id", "type": "integer" }] }]
        }));
        assert!(validate(&c).is_ok());
        assert_eq!(default_namespace_id(&c), "public");
    }

    #[test]
    fn rejects_duplicate_entity_across_namespaces() {
        let c = config(json!({
            "namespaces": [{ "id": "a", "name": "a" }, { "id": "b", "name": "b" }],
            "entities": [
                { "name": "Item", "namespace_id": "a", "attributes": [{ "name": "Id", "type": "integer" }] },
                { "name": "Item", "namespace_id": "b", "attributes": [{ "name": "Id", "type": "integer" }] }
            ]
        }));
        match validate(&c) {
            Err(ConfigError::DuplicateEntity { name, first, second }) => {
                assert_eq!(name, "Item");
                assert_eq!(first, "a");
                assert_eq!(second, "b");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn entity_names_are_case_sensitive() {
        let c = config(json!({
            "entities": [
                { "name": "Item", "attributes": [{ "name": "Id", "type": "integer" }] },
                { "name": "item", "attributes": [{ "name": "Id", "type": "integer" }] }
            ]
        }));
        assert!(validate(&c).is_ok());
    }

    #[test]
    fn rejects_missing_or_mistyped_identity() {
        let missing = config(json!({
            "entities": [{ "name": "Tag", "attributes": [{ "name": "Label", "type": "text" }] }]
        }));
        assert!(matches!(validate(&missing), Err(ConfigError::InvalidIdentity { .. })));

        let mistyped = config(json!({
            "entities": [{ "name": "Tag", "attributes": [{ "name": "Id", "type": "text" }] }]
        }));
        assert!(matches!(validate(&mistyped), Err(ConfigError::InvalidIdentity { .. })));
    }

    #[test]
    fn blob_requires_text_sidecar() {
        let c = config(json!({
            "entities": [{ "name": "Doc", "attributes": [
                { "name": "Id", "type": "integer" },
                { "name": "Body", "type": "blob" }
            ] }]
        }));
        match validate(&c) {
            Err(ConfigError::MissingSidecar { sidecar, .. }) => assert_eq!(sidecar, "BodyFileName"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn reference_target_must_exist() {
        let c = config(json!({
            "entities": [{ "name": "Doc", "attributes": [
                { "name": "Id", "type": "integer" },
                { "name": "Owner", "type": "reference", "target": "Person" }
            ] }]
        }));
        assert!(matches!(
            validate(&c),
            Err(ConfigError::MissingReference { kind: "entity", .. })
        ));
    }

    #[test]
    fn rejects_unknown_namespace_and_duplicate_attribute() {
        let ns = config(json!({
            "namespaces": [{ "id": "a", "name": "a" }],
            "entities": [{ "name": "Doc", "namespace_id": "zz", "attributes": [{ "name": "Id", "type": "integer" }] }]
        }));
        assert!(matches!(validate(&ns), Err(ConfigError::MissingReference { kind: "namespace", .. })));

        let dup = config(json!({
            "entities": [{ "name": "Doc", "attributes": [
                { "name": "Id", "type": "integer" },
                { "name": "Id", "type": "integer" }
            ] }]
        }));
        assert!(matches!(validate(&dup), Err(ConfigError::DuplicateAttribute { .. })));
    }
}
