//! Untyped string maps to typed records, and single attributes back to text.

use crate::config::{RecordTypeDescriptor, ValueKind};
use crate::error::AppError;
use crate::query::{AttributePath, AttributePathResolver};
use crate::record::Record;
use crate::value::{coerce, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Attribute name to raw text value, as received from a client body.
pub type AttributeMap = BTreeMap<String, String>;

pub struct RecordMapper;

impl RecordMapper {
    /// New record with every key of `attrs` coerced and set. Absent keys stay null.
    pub fn to_record(desc: &Arc<RecordTypeDescriptor>, attrs: &AttributeMap) -> Result<Record, AppError> {
        let mut record = Record::new(Arc::clone(desc));
        for (key, raw) in attrs {
            let path = AttributePathResolver::resolve(desc, key)?;
            let value = Self::coerce_attribute(desc, &path, raw)?;
            record.set(&path, value)?;
        }
        Ok(record)
    }

    /// Empty text clears a nullable non-text attribute.
    fn coerce_attribute(desc: &RecordTypeDescriptor, path: &AttributePath, raw: &str) -> Result<Value, AppError> {
        let attr = &desc.attributes()[path.index()];
        if raw.is_empty() && attr.kind != ValueKind::Text {
            return if attr.nullable {
                Ok(Value::Null)
            } else {
                Err(AppError::type_mismatch(path.name(), attr.kind, raw))
            };
        }
        coerce(attr.kind, raw).map_err(|e| AppError::type_mismatch(path.name(), e.kind, &e.input))
    }

    /// `attrs` with the identity value forced to `id`, whatever the caller sent.
    pub fn inject_identity(desc: &RecordTypeDescriptor, mut attrs: AttributeMap, id: i64) -> AttributeMap {
        attrs.insert(desc.identity_attribute().name.clone(), id.to_string());
        attrs
    }

    pub fn read_scalar_property(record: &Record, path: &AttributePath) -> Result<String, AppError> {
        Ok(record.value(path)?.to_string())
    }
}
