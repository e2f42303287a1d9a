//! Shared fixtures for unit tests.

use crate::config::{load_from_str, resolve, SchemaRegistry};

pub(crate) const SCHEMA: &str = r#"{
    "namespaces": [
        { "id": "hr", "name": "hr" },
        { "id": "billing", "name": "billing" }
    ],
    "entities": [
        { "name": "Person", "namespace_id": "hr", "table": "person", "attributes": [
            { "name": "Id", "type": "integer", "nullable": false },
            { "name": "Name", "type": "text", "nullable": false },
            { "name": "Age", "type": "integer" },
            { "name": "Score", "type": "decimal" },
            { "name": "Active", "type": "boolean" },
            { "name": "BornAt", "type": "datetime" },
            { "name": "Photo", "type": "blob" },
            { "name": "PhotoFileName", "type": "text" },
            { "name": "Manager", "type": "reference", "target": "Person" }
        ] },
        { "name": "Invoice", "namespace_id": "billing", "attributes": [
            { "name": "Id", "type": "integer", "nullable": false },
            { "name": "Number", "type": "text" },
            { "name": "Total", "type": "decimal" },
            { "name": "Paid", "type": "boolean" },
            { "name": "Customer", "type": "reference", "target": "Person" }
        ] }
    ]
}"#;

pub(crate) fn registry() -> SchemaRegistry {
    resolve(&load_from_str(SCHEMA).unwrap()).unwrap()
}
