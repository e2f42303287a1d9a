//! Type-erased record instance: values laid out in its descriptor's attribute order.

use crate::config::RecordTypeDescriptor;
use crate::error::AppError;
use crate::query::AttributePath;
use crate::value::Value;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct Record {
    descriptor: Arc<RecordTypeDescriptor>,
    values: Vec<Value>,
}

impl Record {
    /// New instance with every attribute null (identity unset).
    pub fn new(descriptor: Arc<RecordTypeDescriptor>) -> Self {
        let values = vec![Value::Null; descriptor.attributes().len()];
        Self { descriptor, values }
    }

    pub(crate) fn from_values(descriptor: Arc<RecordTypeDescriptor>, values: Vec<Value>) -> Self {
        debug_assert_eq!(values.len(), descriptor.attributes().len());
        Self { descriptor, values }
    }

    pub fn descriptor(&self) -> &Arc<RecordTypeDescriptor> {
        &self.descriptor
    }

    pub fn entity(&self) -> &str {
        self.descriptor.name()
    }

    pub fn id(&self) -> Option<i64> {
        match self.values[self.descriptor.identity_index()] {
            Value::Integer(id) => Some(id),
            _ => None,
        }
    }

    pub(crate) fn set_id(&mut self, id: Option<i64>) {
        let idx = self.descriptor.identity_index();
        self.values[idx] = id.map(Value::Integer).unwrap_or(Value::Null);
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Value by attribute name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.descriptor.attribute_index(name).map(|i| &self.values[i])
    }

    /// Value at a resolved path; the path must belong to this record's type.
    pub fn value(&self, path: &AttributePath) -> Result<&Value, AppError> {
        self.check_path(path)?;
        Ok(&self.values[path.index()])
    }

    pub fn set(&mut self, path: &AttributePath, value: Value) -> Result<(), AppError> {
        self.check_path(path)?;
        self.values[path.index()] = value;
        Ok(())
    }

    fn check_path(&self, path: &AttributePath) -> Result<(), AppError> {
        if path.entity() != self.entity() || path.index() >= self.values.len() {
            return Err(AppError::UnresolvableAttribute {
                entity: self.entity().to_string(),
                path: path.name().to_string(),
            });
        }
        Ok(())
    }

    /// Same values, identity unset. Not persisted.
    pub fn duplicate(&self) -> Record {
        let mut copy = self.clone();
        copy.set_id(None);
        copy
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.entity() == other.entity() && self.values == other.values
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (attr, value) in self.descriptor.attributes().iter().zip(&self.values) {
            map.serialize_entry(&attr.name, value)?;
        }
        map.end()
    }
}
