//! Streaming copy from a download into an object writer.
//!
//! # Pipeline
//!
//! ```text
//!  SourceBody ──▶ reader ──[bounded channel]──▶ writer ──▶ ObjectWriter
//!                   ▲                             │
//!                   └──────── finished flag ◀─────┘
//! ```
//!
//! The reader and writer run as two futures joined in the caller's task, so
//! the transfer timeout cancels both by dropping them. The bounded channel
//! lets the sink's pace gate how fast the source is read.
//!
//! # Completion
//!
//! The body is complete once the declared length has arrived, or when the
//! source stream ends. The writer then finishes the sink and raises the
//! `finished` flag. Only after that does the reader look at whatever the
//! source has already reported: a connection reset at that point is
//! swallowed, any other error still fails the transfer. A source that stays
//! open without reporting anything does not delay the outcome.

use std::time::Duration;

use bytes::Bytes;
use futures::{FutureExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tracing::debug;

use super::source::SourceBody;
use crate::error::{SourceError, TransferError};
use crate::storage::ObjectWriter;

/// Chunks buffered between reader and writer.
pub const CHANNEL_CAPACITY: usize = 8;

enum Frame {
    Data(Bytes),
    End,
    Failed(SourceError),
}

/// Copy `source` into `sink`, returning the number of bytes written.
///
/// Resolves only after the sink acknowledged completion. Fails on any sink
/// error, on any source error before completion, on a non-reset source error
/// after completion, or when `timeout` elapses.
pub async fn pipe(
    source: SourceBody,
    sink: Box<dyn ObjectWriter>,
    timeout: Duration,
) -> Result<u64, TransferError> {
    match tokio::time::timeout(timeout, run_pipe(source, sink)).await {
        Ok(result) => result,
        Err(_) => Err(TransferError::Timeout(timeout)),
    }
}

async fn run_pipe(source: SourceBody, sink: Box<dyn ObjectWriter>) -> Result<u64, TransferError> {
    let (frames_tx, frames_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (finished_tx, finished_rx) = watch::channel(false);

    let (read, written) = tokio::join!(
        read_source(source, frames_tx, finished_rx),
        write_sink(sink, frames_rx, finished_tx)
    );

    let bytes = written?;
    read?;
    Ok(bytes)
}

async fn read_source(
    source: SourceBody,
    frames: mpsc::Sender<Frame>,
    mut finished: watch::Receiver<bool>,
) -> Result<(), SourceError> {
    let SourceBody {
        expected_len,
        mut chunks,
    } = source;
    let mut received: u64 = 0;
    let mut exhausted = false;

    loop {
        if expected_len.is_some_and(|len| received >= len) {
            break;
        }

        let next = tokio::select! {
            _ = frames.closed() => return Ok(()),
            next = chunks.next() => next,
        };

        match next {
            Some(Ok(chunk)) => {
                received += chunk.len() as u64;
                if frames.send(Frame::Data(chunk)).await.is_err() {
                    return Ok(());
                }
            }
            Some(Err(err)) => {
                // Reported through the writer, which owns the outcome.
                let _ = frames.send(Frame::Failed(err)).await;
                return Ok(());
            }
            None => {
                exhausted = true;
                break;
            }
        }
    }

    if frames.send(Frame::End).await.is_err() {
        return Ok(());
    }
    drop(frames);

    // A dropped flag means the writer failed and already holds the error.
    if finished.wait_for(|done| *done).await.is_err() {
        return Ok(());
    }
    if exhausted {
        return Ok(());
    }

    // Only items that are already available count; a source that stays open
    // past its declared length must not hold back the finished outcome.
    while let Some(Some(item)) = chunks.next().now_or_never() {
        match item {
            Ok(extra) => {
                debug!(bytes = extra.len(), "Ignoring data past the declared length");
            }
            Err(err) if err.is_connection_reset() => {
                debug!(error = %err, "Ignoring connection reset after completed transfer");
                return Ok(());
            }
            Err(err) => return Err(err),
        }
    }

    Ok(())
}

async fn write_sink(
    mut sink: Box<dyn ObjectWriter>,
    mut frames: mpsc::Receiver<Frame>,
    finished: watch::Sender<bool>,
) -> Result<u64, TransferError> {
    let mut written: u64 = 0;

    loop {
        match frames.recv().await {
            Some(Frame::Data(chunk)) => {
                written += chunk.len() as u64;
                sink.write(chunk).await?;
            }
            Some(Frame::End) => break,
            Some(Frame::Failed(err)) => return Err(TransferError::Source(err)),
            None => {
                return Err(TransferError::Source(SourceError::new(
                    "download ended unexpectedly",
                )))
            }
        }
    }

    sink.finish().await?;
    finished.send_replace(true);
    Ok(written)
}
