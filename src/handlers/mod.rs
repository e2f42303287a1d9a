//! HTTP handlers for entity sets, records, properties and binary content.

pub mod blob;
pub mod entity;

pub use entity::*;
