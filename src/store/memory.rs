//! In-process engine: one RwLock over all tables. Used by tests and when no database is configured.

use crate::config::{RecordTypeDescriptor, ValueKind};
use crate::query::FilterExpression;
use crate::record::Record;
use crate::store::{blob_index, BlobSink, BlobSource, RecordStore, SelectQuery, StorageError};
use crate::value::Value;
use bytes::{Bytes, BytesMut};
use std::collections::{BTreeMap, HashMap};
use std::io::{self, Cursor};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
struct Row {
    values: Vec<Value>,
    /// Committed blob content by attribute index.
    blobs: HashMap<usize, Bytes>,
}

#[derive(Default)]
struct Table {
    next_id: i64,
    /// Keyed by identity, so iteration is identity ascending.
    rows: BTreeMap<i64, Row>,
}

type Tables = HashMap<String, Table>;

#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StorageError> {
        self.tables.read().map_err(|_| StorageError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StorageError> {
        self.tables.write().map_err(|_| StorageError::Poisoned)
    }
}

fn missing(entity: &str, id: i64) -> StorageError {
    StorageError::MissingRecord {
        entity: entity.to_string(),
        id,
    }
}

fn passes(filter: Option<&FilterExpression>, values: &[Value]) -> bool {
    filter.map_or(true, |f| f.evaluate(values) == Some(true))
}

impl RecordStore for MemoryStore {
    fn select(&self, desc: &Arc<RecordTypeDescriptor>, query: &SelectQuery) -> Result<Vec<Record>, StorageError> {
        let tables = self.read()?;
        let Some(table) = tables.get(desc.name()) else {
            return Ok(Vec::new());
        };
        let mut rows: Vec<&Vec<Value>> = table
            .rows
            .values()
            .map(|r| &r.values)
            .filter(|v| passes(query.filter.as_ref(), v))
            .collect();
        // Stable sort keeps identity order among equal keys.
        rows.sort_by(|a, b| query.order.compare(a, b));
        let skip = usize::try_from(query.skip).unwrap_or(usize::MAX);
        let top = query
            .top
            .map(|t| usize::try_from(t).unwrap_or(usize::MAX))
            .unwrap_or(usize::MAX);
        Ok(rows
            .into_iter()
            .skip(skip)
            .take(top)
            .map(|v| Record::from_values(Arc::clone(desc), v.clone()))
            .collect())
    }

    fn count(&self, desc: &RecordTypeDescriptor, filter: Option<&FilterExpression>) -> Result<u64, StorageError> {
        let tables = self.read()?;
        let n = tables
            .get(desc.name())
            .map(|t| t.rows.values().filter(|r| passes(filter, &r.values)).count())
            .unwrap_or(0);
        Ok(n as u64)
    }

    fn get(&self, desc: &Arc<RecordTypeDescriptor>, id: i64) -> Result<Option<Record>, StorageError> {
        let tables = self.read()?;
        Ok(tables
            .get(desc.name())
            .and_then(|t| t.rows.get(&id))
            .map(|r| Record::from_values(Arc::clone(desc), r.values.clone())))
    }

    fn insert(&self, record: &Record) -> Result<Record, StorageError> {
        let desc = record.descriptor();
        let mut tables = self.write()?;
        let table = tables.entry(desc.name().to_string()).or_default();
        table.next_id += 1;
        let id = table.next_id;
        let mut values = record.values().to_vec();
        for (value, attr) in values.iter_mut().zip(desc.attributes()) {
            if attr.kind == ValueKind::Blob {
                *value = Value::Null;
            }
        }
        values[desc.identity_index()] = Value::Integer(id);
        table.rows.insert(
            id,
            Row {
                values: values.clone(),
                blobs: HashMap::new(),
            },
        );
        tracing::debug!(entity = desc.name(), id, "memory insert");
        Ok(Record::from_values(Arc::clone(desc), values))
    }

    fn update(&self, record: &Record) -> Result<Record, StorageError> {
        let desc = record.descriptor();
        let id = record.id().ok_or_else(|| {
            StorageError::Io(io::Error::new(io::ErrorKind::InvalidInput, "update without identity"))
        })?;
        let mut tables = self.write()?;
        let row = tables
            .get_mut(desc.name())
            .and_then(|t| t.rows.get_mut(&id))
            .ok_or_else(|| missing(desc.name(), id))?;
        for ((stored, incoming), attr) in row.values.iter_mut().zip(record.values()).zip(desc.attributes()) {
            if attr.kind != ValueKind::Blob {
                *stored = incoming.clone();
            }
        }
        tracing::debug!(entity = desc.name(), id, "memory update");
        Ok(Record::from_values(Arc::clone(desc), row.values.clone()))
    }

    fn delete(&self, desc: &RecordTypeDescriptor, id: i64) -> Result<(), StorageError> {
        let mut tables = self.write()?;
        tables
            .get_mut(desc.name())
            .and_then(|t| t.rows.remove(&id))
            .map(|_| ())
            .ok_or_else(|| missing(desc.name(), id))
    }

    fn open_blob_sink(
        &self,
        desc: &RecordTypeDescriptor,
        id: i64,
        attribute: &str,
    ) -> Result<Box<dyn BlobSink>, StorageError> {
        let index = blob_index(desc, attribute)?;
        let exists = self
            .read()?
            .get(desc.name())
            .is_some_and(|t| t.rows.contains_key(&id));
        if !exists {
            return Err(missing(desc.name(), id));
        }
        Ok(Box::new(MemoryBlobSink {
            tables: Arc::clone(&self.tables),
            entity: desc.name().to_string(),
            id,
            index,
            staged: BytesMut::new(),
        }))
    }

    fn open_blob_source(
        &self,
        desc: &RecordTypeDescriptor,
        id: i64,
        attribute: &str,
    ) -> Result<Option<BlobSource>, StorageError> {
        let index = blob_index(desc, attribute)?;
        let tables = self.read()?;
        let row = tables
            .get(desc.name())
            .and_then(|t| t.rows.get(&id))
            .ok_or_else(|| missing(desc.name(), id))?;
        Ok(row
            .blobs
            .get(&index)
            .cloned()
            .map(|content| Box::new(Cursor::new(content)) as BlobSource))
    }
}

/// Stages chunks privately and swaps them in on commit, so readers never see a partial blob.
struct MemoryBlobSink {
    tables: Arc<RwLock<Tables>>,
    entity: String,
    id: i64,
    index: usize,
    staged: BytesMut,
}

impl BlobSink for MemoryBlobSink {
    fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), StorageError> {
        self.staged.extend_from_slice(chunk);
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<u64, StorageError> {
        let MemoryBlobSink {
            tables,
            entity,
            id,
            index,
            staged,
        } = *self;
        let mut tables = tables.write().map_err(|_| StorageError::Poisoned)?;
        let row = tables
            .get_mut(&entity)
            .and_then(|t| t.rows.get_mut(&id))
            .ok_or_else(|| missing(&entity, id))?;
        let content = staged.freeze();
        let len = content.len() as u64;
        row.values[index] = Value::Blob(len);
        row.blobs.insert(index, content);
        Ok(len)
    }
}
