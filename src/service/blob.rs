//! Streams binary attribute content in and out through a small fixed buffer.

use crate::config::{AttributeDescriptor, ValueKind};
use crate::error::AppError;
use crate::query::AttributePath;
use crate::record::Record;
use crate::store::{BlobSource, RecordStore, StorageError};
use crate::value::Value;
use std::io::{ErrorKind, Read};

/// Intermediate buffer size for every blob copy.
pub const CHUNK_SIZE: usize = 8 * 1024;

/// Copies `source` to `sink` one buffer at a time. Returns the bytes copied.
pub fn copy_in_chunks(
    source: &mut dyn Read,
    mut sink: impl FnMut(&[u8]) -> Result<(), AppError>,
) -> Result<u64, AppError> {
    let mut buf = [0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = match source.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(StorageError::Io(e).into()),
        };
        sink(&buf[..n])?;
        total += n as u64;
    }
    Ok(total)
}

/// Quote characters would end the `filename="..."` parameter early; controls would split the header.
pub fn sanitize_filename(raw: &str) -> String {
    raw.chars().filter(|c| *c != '"' && !c.is_control()).collect()
}

/// Stored content plus the suggested filename from the sidecar attribute.
pub struct BlobDownload {
    pub content: BlobSource,
    pub filename: Option<String>,
}

impl BlobDownload {
    pub fn content_disposition(&self) -> String {
        match &self.filename {
            Some(name) => format!("attachment; filename=\"{}\"", name),
            None => "attachment".to_string(),
        }
    }
}

pub struct BlobStreamBridge<'a> {
    store: &'a dyn RecordStore,
}

impl<'a> BlobStreamBridge<'a> {
    pub fn new(store: &'a dyn RecordStore) -> Self {
        Self { store }
    }

    fn require_blob<'r>(record: &'r Record, path: &AttributePath) -> Result<(&'r AttributeDescriptor, i64), AppError> {
        record.value(path)?;
        let attr = &record.descriptor().attributes()[path.index()];
        if attr.kind != ValueKind::Blob {
            return Err(AppError::BadRequest(format!(
                "property {} of {} is not binary",
                attr.name,
                record.entity()
            )));
        }
        let id = record
            .id()
            .ok_or_else(|| AppError::BadRequest(format!("{} record has no Id", record.entity())))?;
        Ok((attr, id))
    }

    /// Replaces the attribute's content with everything `source` yields. Nothing is kept
    /// if the source fails part way. The filename sidecar is not touched.
    pub fn upload(&self, record: &Record, path: &AttributePath, source: &mut dyn Read) -> Result<u64, AppError> {
        let (attr, id) = Self::require_blob(record, path)?;
        let mut sink = self.store.open_blob_sink(record.descriptor(), id, &attr.name)?;
        copy_in_chunks(source, |chunk| sink.write_chunk(chunk).map_err(AppError::from))?;
        let written = sink.commit()?;
        tracing::info!(
            entity = record.entity(),
            id,
            attribute = %attr.name,
            bytes = written,
            "blob uploaded"
        );
        Ok(written)
    }

    /// `None` when the attribute holds no content.
    pub fn download(&self, record: &Record, path: &AttributePath) -> Result<Option<BlobDownload>, AppError> {
        let (attr, id) = Self::require_blob(record, path)?;
        let Some(content) = self.store.open_blob_source(record.descriptor(), id, &attr.name)? else {
            return Ok(None);
        };
        let filename = attr
            .sidecar
            .as_deref()
            .and_then(|sidecar| record.get(sidecar))
            .and_then(|v| match v {
                Value::Text(name) if !name.is_empty() => Some(sanitize_filename(name)),
                _ => None,
            });
        Ok(Some(BlobDownload { content, filename }))
    }
}
