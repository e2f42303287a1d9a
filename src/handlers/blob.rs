//! Binary property upload and download. Request and response bodies are relayed to the
//! blocking copy through bounded channels, so neither side is buffered whole.

use crate::error::AppError;
use crate::handlers::entity::{blocking, load_record, Target};
use crate::query::AttributePathResolver;
use crate::response::success_one;
use crate::service::blob::copy_in_chunks;
use crate::service::BlobStreamBridge;
use crate::state::AppState;
use crate::store::StorageError;
use axum::{
    body::Body,
    extract::multipart::{Field, Multipart},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::{Buf, Bytes};
use std::io::{self, Read};
use tokio::sync::mpsc;

/// Chunks in flight between the HTTP body and the blocking copy.
const CHANNEL_DEPTH: usize = 4;

const FILE_FIELD: &str = "file";

/// Blocking `Read` over chunks sent from the async side. An `Err` item aborts the read.
struct ChannelReader {
    rx: mpsc::Receiver<io::Result<Bytes>>,
    current: Bytes,
}

impl ChannelReader {
    fn new(rx: mpsc::Receiver<io::Result<Bytes>>) -> Self {
        Self {
            rx,
            current: Bytes::new(),
        }
    }
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while !self.current.has_remaining() {
            match self.rx.blocking_recv() {
                Some(Ok(chunk)) => self.current = chunk,
                Some(Err(e)) => return Err(e),
                None => return Ok(0),
            }
        }
        let n = buf.len().min(self.current.remaining());
        buf[..n].copy_from_slice(&self.current[..n]);
        self.current.advance(n);
        Ok(n)
    }
}

/// Sends every chunk of `field`. A broken body is forwarded as an error so the copy aborts.
async fn pump_field(field: &mut Field<'_>, tx: &mpsc::Sender<io::Result<Bytes>>) -> Result<(), AppError> {
    loop {
        match field.chunk().await {
            Ok(Some(chunk)) => {
                // Receiver gone: the copy already failed and reports its own error.
                if tx.send(Ok(chunk)).await.is_err() {
                    return Ok(());
                }
            }
            Ok(None) => return Ok(()),
            Err(e) => {
                let message = e.to_string();
                let _ = tx
                    .send(Err(io::Error::new(io::ErrorKind::UnexpectedEof, message.clone())))
                    .await;
                return Err(AppError::BadRequest(format!("upload interrupted: {}", message)));
            }
        }
    }
}

/// POST /:segment/:property/Upload with multipart field `file`.
pub(crate) async fn upload(
    state: AppState,
    target: Target,
    property: String,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let mut field = loop {
        match multipart
            .next_field()
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?
        {
            Some(f) if f.name() == Some(FILE_FIELD) => break f,
            Some(_) => continue,
            None => {
                return Err(AppError::BadRequest(format!(
                    "missing '{}' field in multipart body",
                    FILE_FIELD
                )))
            }
        }
    };
    let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
    let copy = tokio::task::spawn_blocking(move || {
        let record = load_record(&state, &target)?;
        let path = AttributePathResolver::resolve(record.descriptor(), &property)?;
        let mut reader = ChannelReader::new(rx);
        BlobStreamBridge::new(state.store.as_ref()).upload(&record, &path, &mut reader)
    });
    let pumped = pump_field(&mut field, &tx).await;
    drop(tx);
    let written = copy
        .await
        .map_err(|e| AppError::Storage(StorageError::Runtime(e.to_string())))?;
    pumped?;
    let written = written?;
    Ok(success_one(serde_json::json!({ "length": written })).into_response())
}

/// GET /:segment/:property/Download. 204 when the property holds no content.
pub(crate) async fn download(state: AppState, target: Target, property: String) -> Result<Response, AppError> {
    let found = blocking(move || {
        let record = load_record(&state, &target)?;
        let path = AttributePathResolver::resolve(record.descriptor(), &property)?;
        BlobStreamBridge::new(state.store.as_ref()).download(&record, &path)
    })
    .await?;
    let Some(download) = found else {
        return Ok(StatusCode::NO_CONTENT.into_response());
    };
    let disposition = HeaderValue::from_str(&download.content_disposition())
        .map_err(|e| AppError::BadRequest(format!("unusable filename: {}", e)))?;

    let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(CHANNEL_DEPTH);
    let mut content = download.content;
    tokio::task::spawn_blocking(move || {
        let copied = copy_in_chunks(&mut content, |chunk| {
            tx.blocking_send(Ok(Bytes::copy_from_slice(chunk)))
                .map_err(|_| AppError::BadRequest("client went away".into()))
        });
        if let Err(e) = copied {
            tracing::warn!(error = %e, "blob download aborted");
            let _ = tx.blocking_send(Err(io::Error::new(io::ErrorKind::Other, e.to_string())));
        }
    });
    let stream = futures::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) });

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/octet-stream")),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn channel_reader_reassembles_chunks() {
        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        let reader = tokio::task::spawn_blocking(move || {
            let mut out = Vec::new();
            ChannelReader::new(rx).read_to_end(&mut out).map(|_| out)
        });
        for chunk in [&b"hello "[..], &b""[..], &b"wor"[..], &b"ld"[..]] {
            tx.send(Ok(Bytes::copy_from_slice(chunk))).await.unwrap();
        }
        drop(tx);
        assert_eq!(reader.await.unwrap().unwrap(), b"hello world");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn channel_reader_surfaces_errors() {
        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        let reader = tokio::task::spawn_blocking(move || {
            let mut out = Vec::new();
            ChannelReader::new(rx).read_to_end(&mut out)
        });
        tx.send(Ok(Bytes::from_static(b"part"))).await.unwrap();
        tx.send(Err(io::Error::new(io::ErrorKind::UnexpectedEof, "cut")))
            .await
            .unwrap();
        let err = reader.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
