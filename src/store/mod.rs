//! Persistence engine seam. Calls are synchronous and run to completion on the calling worker.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::config::{RecordTypeDescriptor, ValueKind};
use crate::query::{FilterExpression, OrderBySpec};
use crate::record::Record;
use std::io::{self, Read};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("no {entity} with Id {id}")]
    MissingRecord { entity: String, id: i64 },
    #[error("store lock poisoned")]
    Poisoned,
    #[error("runtime: {0}")]
    Runtime(String),
}

/// Fully resolved read: filter, then order (identity ascending breaks ties), then skip/top.
#[derive(Clone, Debug, Default)]
pub struct SelectQuery {
    pub filter: Option<FilterExpression>,
    pub order: OrderBySpec,
    pub skip: u64,
    pub top: Option<u64>,
}

/// Chunked writer for one blob attribute. Content becomes visible only on `commit`;
/// dropping the sink discards everything written.
pub trait BlobSink: Send {
    fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), StorageError>;

    /// Returns the committed byte length.
    fn commit(self: Box<Self>) -> Result<u64, StorageError>;
}

pub type BlobSource = Box<dyn Read + Send>;

pub trait RecordStore: Send + Sync {
    fn select(&self, desc: &Arc<RecordTypeDescriptor>, query: &SelectQuery) -> Result<Vec<Record>, StorageError>;

    fn count(&self, desc: &RecordTypeDescriptor, filter: Option<&FilterExpression>) -> Result<u64, StorageError>;

    fn get(&self, desc: &Arc<RecordTypeDescriptor>, id: i64) -> Result<Option<Record>, StorageError>;

    /// Stores a new row; the engine assigns the identity. Blob attributes start empty.
    fn insert(&self, record: &Record) -> Result<Record, StorageError>;

    /// Replaces every scalar attribute of an existing row. Blob content is kept.
    fn update(&self, record: &Record) -> Result<Record, StorageError>;

    fn delete(&self, desc: &RecordTypeDescriptor, id: i64) -> Result<(), StorageError>;

    fn open_blob_sink(
        &self,
        desc: &RecordTypeDescriptor,
        id: i64,
        attribute: &str,
    ) -> Result<Box<dyn BlobSink>, StorageError>;

    /// `None` when the attribute holds no content.
    fn open_blob_source(
        &self,
        desc: &RecordTypeDescriptor,
        id: i64,
        attribute: &str,
    ) -> Result<Option<BlobSource>, StorageError>;
}

/// Index of `attribute` when it is a blob attribute of `desc`.
pub(crate) fn blob_index(desc: &RecordTypeDescriptor, attribute: &str) -> Result<usize, StorageError> {
    desc.attribute_index(attribute)
        .filter(|&i| desc.attributes()[i].kind == ValueKind::Blob)
        .ok_or_else(|| {
            StorageError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{}.{} is not a blob attribute", desc.name(), attribute),
            ))
        })
}
