//! PostgreSQL engine over a sqlx pool.
//!
//! The trait is synchronous, so every call drives its future through the runtime handle.
//! Callers must be on a blocking worker (`spawn_blocking`); calling from an async task panics.

use crate::config::{RecordTypeDescriptor, SchemaRegistry, ValueKind};
use crate::query::FilterExpression;
use crate::record::Record;
use crate::sql::{builder, PgBindValue, QueryBuf};
use crate::store::{blob_index, BlobSink, BlobSource, RecordStore, SelectQuery, StorageError};
use crate::value::Value;
use chrono::NaiveDateTime;
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow, Postgres};
use sqlx::query::Query;
use sqlx::{Row, Transaction};
use std::future::Future;
use std::io::{self, Read};
use std::sync::Arc;
use tokio::runtime::Handle;

/// Bytes fetched per round trip when streaming a blob out.
const READ_CHUNK: i64 = 64 * 1024;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    handle: Handle,
}

impl PgStore {
    pub fn new(pool: PgPool, handle: Handle) -> Self {
        Self { pool, handle }
    }

    /// Connect a pool and bind it to the current runtime.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        tracing::info!(max_connections, "connected to PostgreSQL");
        Ok(Self::new(pool, Handle::current()))
    }

    /// Warns about blob columns not stored EXTERNAL. Compressed storage makes every
    /// `substring` read during a download decompress the value from the start.
    pub async fn check_blob_storage(&self, registry: &SchemaRegistry) -> Result<(), StorageError> {
        for desc in registry.entities() {
            for attr in desc.attributes().iter().filter(|a| a.kind == ValueKind::Blob) {
                let mode: Option<String> = sqlx::query_scalar(builder::BLOB_STORAGE_MODE)
                    .bind(desc.namespace())
                    .bind(desc.table_name())
                    .bind(&attr.name)
                    .fetch_optional(&self.pool)
                    .await?;
                match mode.as_deref() {
                    Some("e") => {}
                    Some(mode) => tracing::warn!(
                        entity = desc.name(),
                        attribute = %attr.name,
                        storage = mode,
                        "blob column is not STORAGE EXTERNAL; downloads re-read it per chunk"
                    ),
                    None => tracing::warn!(
                        entity = desc.name(),
                        attribute = %attr.name,
                        "blob column not found"
                    ),
                }
            }
        }
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn block_on<F: Future>(&self, fut: F) -> F::Output {
        self.handle.block_on(fut)
    }

    async fn fetch_all(&self, q: &QueryBuf) -> Result<Vec<PgRow>, sqlx::Error> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        bind_all(q).fetch_all(&self.pool).await
    }

    async fn fetch_optional(&self, q: &QueryBuf) -> Result<Option<PgRow>, sqlx::Error> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        bind_all(q).fetch_optional(&self.pool).await
    }
}

fn bind_all(q: &QueryBuf) -> Query<'_, Postgres, PgArguments> {
    let mut query = sqlx::query(&q.sql);
    for p in &q.params {
        query = query.bind(PgBindValue::from_value(p));
    }
    query
}

fn missing(desc: &RecordTypeDescriptor, id: i64) -> StorageError {
    StorageError::MissingRecord {
        entity: desc.name().to_string(),
        id,
    }
}

/// Row laid out by `select_column_list`: one column per attribute, in descriptor order.
fn decode_row(desc: &Arc<RecordTypeDescriptor>, row: &PgRow) -> Result<Record, sqlx::Error> {
    let mut values = Vec::with_capacity(desc.attributes().len());
    for (i, attr) in desc.attributes().iter().enumerate() {
        let value = match attr.kind {
            ValueKind::Integer => row.try_get::<Option<i64>, _>(i)?.map(Value::Integer),
            ValueKind::Reference => row.try_get::<Option<i64>, _>(i)?.map(Value::Reference),
            ValueKind::Decimal => row.try_get::<Option<f64>, _>(i)?.map(Value::Decimal),
            ValueKind::Text => row.try_get::<Option<String>, _>(i)?.map(Value::Text),
            ValueKind::Boolean => row.try_get::<Option<bool>, _>(i)?.map(Value::Boolean),
            ValueKind::DateTime => row.try_get::<Option<NaiveDateTime>, _>(i)?.map(Value::DateTime),
            ValueKind::Blob => row
                .try_get::<Option<i64>, _>(i)?
                .map(|n| Value::Blob(n.max(0) as u64)),
        };
        values.push(value.unwrap_or(Value::Null));
    }
    Ok(Record::from_values(Arc::clone(desc), values))
}

impl RecordStore for PgStore {
    fn select(&self, desc: &Arc<RecordTypeDescriptor>, query: &SelectQuery) -> Result<Vec<Record>, StorageError> {
        let q = builder::select_list(desc, query);
        let rows = self.block_on(self.fetch_all(&q))?;
        Ok(rows
            .iter()
            .map(|r| decode_row(desc, r))
            .collect::<Result<Vec<_>, _>>()?)
    }

    fn count(&self, desc: &RecordTypeDescriptor, filter: Option<&FilterExpression>) -> Result<u64, StorageError> {
        let q = builder::count(desc, filter);
        let n: i64 = match self.block_on(self.fetch_optional(&q))? {
            Some(row) => row.try_get(0)?,
            None => 0,
        };
        Ok(n.max(0) as u64)
    }

    fn get(&self, desc: &Arc<RecordTypeDescriptor>, id: i64) -> Result<Option<Record>, StorageError> {
        let q = builder::select_by_id(desc, id);
        let row = self.block_on(self.fetch_optional(&q))?;
        Ok(row.map(|r| decode_row(desc, &r)).transpose()?)
    }

    fn insert(&self, record: &Record) -> Result<Record, StorageError> {
        let desc = record.descriptor();
        let q = builder::insert(record);
        let row = self
            .block_on(self.fetch_optional(&q))?
            .ok_or(StorageError::Db(sqlx::Error::RowNotFound))?;
        Ok(decode_row(desc, &row)?)
    }

    fn update(&self, record: &Record) -> Result<Record, StorageError> {
        let desc = record.descriptor();
        let id = record.id().ok_or_else(|| {
            StorageError::Io(io::Error::new(io::ErrorKind::InvalidInput, "update without identity"))
        })?;
        let q = builder::update(record, id);
        let row = self
            .block_on(self.fetch_optional(&q))?
            .ok_or_else(|| missing(desc, id))?;
        Ok(decode_row(desc, &row)?)
    }

    fn delete(&self, desc: &RecordTypeDescriptor, id: i64) -> Result<(), StorageError> {
        let q = builder::delete(desc, id);
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let done = self.block_on(bind_all(&q).execute(&self.pool))?;
        if done.rows_affected() == 0 {
            return Err(missing(desc, id));
        }
        Ok(())
    }

    fn open_blob_sink(
        &self,
        desc: &RecordTypeDescriptor,
        id: i64,
        attribute: &str,
    ) -> Result<Box<dyn BlobSink>, StorageError> {
        blob_index(desc, attribute)?;
        let lock = builder::blob_lock(desc);
        let (tx, found) = self.block_on(async {
            let mut tx = self.pool.begin().await?;
            tracing::debug!(sql = %lock, id, "blob lock");
            let found = sqlx::query(&lock).bind(id).fetch_optional(&mut *tx).await?;
            if found.is_some() {
                sqlx::query(builder::BLOB_STAGE_CREATE).execute(&mut *tx).await?;
            }
            Ok::<_, sqlx::Error>((tx, found.is_some()))
        })?;
        if !found {
            return Err(missing(desc, id));
        }
        Ok(Box::new(PgBlobSink {
            tx,
            handle: self.handle.clone(),
            assemble_sql: builder::blob_assemble(desc, attribute),
            id,
            seq: 0,
            written: 0,
        }))
    }

    fn open_blob_source(
        &self,
        desc: &RecordTypeDescriptor,
        id: i64,
        attribute: &str,
    ) -> Result<Option<BlobSource>, StorageError> {
        blob_index(desc, attribute)?;
        let length_sql = builder::blob_length(desc, attribute);
        let (tx, length) = self.block_on(async {
            let mut tx = self.pool.begin().await?;
            sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
                .execute(&mut *tx)
                .await?;
            let length: Option<Option<i64>> = sqlx::query_scalar(&length_sql)
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
            Ok::<_, sqlx::Error>((tx, length))
        })?;
        match length {
            None => Err(missing(desc, id)),
            Some(None) => Ok(None),
            Some(Some(length)) => Ok(Some(Box::new(PgBlobReader {
                tx,
                handle: self.handle.clone(),
                chunk_sql: builder::blob_chunk(desc, attribute),
                id,
                length,
                offset: 0,
                buf: Vec::new(),
                pos: 0,
            }))),
        }
    }
}

/// Stages chunks as rows of a transaction-scoped table and writes the column once on
/// commit. Dropping without commit rolls back the lock and the staging table.
struct PgBlobSink {
    tx: Transaction<'static, Postgres>,
    handle: Handle,
    assemble_sql: String,
    id: i64,
    seq: i64,
    written: u64,
}

impl BlobSink for PgBlobSink {
    fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), StorageError> {
        if chunk.is_empty() {
            return Ok(());
        }
        self.handle.block_on(
            sqlx::query(builder::BLOB_STAGE_APPEND)
                .bind(self.seq)
                .bind(chunk)
                .execute(&mut *self.tx),
        )?;
        self.seq += 1;
        self.written += chunk.len() as u64;
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<u64, StorageError> {
        let PgBlobSink {
            mut tx,
            handle,
            assemble_sql,
            id,
            seq,
            written,
        } = *self;
        handle.block_on(async {
            tracing::debug!(sql = %assemble_sql, id, chunks = seq, "blob assemble");
            sqlx::query(&assemble_sql).bind(id).execute(&mut *tx).await?;
            tx.commit().await
        })?;
        Ok(written)
    }
}

/// Reads `substring` chunks from one repeatable-read snapshot.
struct PgBlobReader {
    tx: Transaction<'static, Postgres>,
    handle: Handle,
    chunk_sql: String,
    id: i64,
    length: i64,
    offset: i64,
    buf: Vec<u8>,
    pos: usize,
}

impl PgBlobReader {
    fn fill(&mut self) -> io::Result<()> {
        let want = (self.length - self.offset).min(READ_CHUNK);
        let chunk: Option<Vec<u8>> = self
            .handle
            .block_on(
                sqlx::query_scalar(&self.chunk_sql)
                    .bind(self.offset + 1)
                    .bind(want)
                    .bind(self.id)
                    .fetch_one(&mut *self.tx),
            )
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let chunk = chunk.unwrap_or_default();
        if chunk.is_empty() {
            self.offset = self.length;
        } else {
            self.offset += chunk.len() as i64;
        }
        self.buf = chunk;
        self.pos = 0;
        Ok(())
    }
}

impl Read for PgBlobReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.buf.len() {
            if self.offset >= self.length {
                return Ok(0);
            }
            self.fill()?;
        }
        let n = out.len().min(self.buf.len() - self.pos);
        out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}
