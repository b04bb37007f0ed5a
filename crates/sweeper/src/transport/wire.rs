//! Frame protocol over an AsyncRead/AsyncWrite pair.

use std::io;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, Stdin, Stdout};
use tokio_util::codec::{FramedRead, FramedWrite};

use super::ResultSource;
use crate::bridge::codec::{Frame, JsonCodec};
use crate::bridge::protocol::{SubmitBatch, TaskResult};
use crate::error::{Result, SweepError};

/// Workers reachable through one byte stream in each direction.
pub struct WireSource<R, W> {
    reader: FramedRead<R, JsonCodec<TaskResult>>,
    writer: FramedWrite<W, JsonCodec<SubmitBatch>>,
    closed: bool,
}

impl WireSource<Stdin, Stdout> {
    /// Results on stdin, batches on stdout. Logging must not use stdout.
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }
}

impl<R, W> WireSource<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: FramedRead::new(reader, JsonCodec::new()),
            writer: FramedWrite::new(writer, JsonCodec::new()),
            closed: false,
        }
    }
}

fn read_error(e: io::Error) -> SweepError {
    if e.kind() == io::ErrorKind::InvalidData {
        SweepError::MalformedFrame(e.to_string())
    } else {
        SweepError::Io(e)
    }
}

#[async_trait(?Send)]
impl<R, W> ResultSource for WireSource<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    async fn submit(&mut self, batch: SubmitBatch) -> Result<()> {
        tracing::debug!(count = batch.len(), "Sending submit batch");
        self.writer.send(batch).await?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<Option<TaskResult>> {
        if self.closed {
            return Ok(None);
        }
        match self.reader.next().await {
            Some(Ok(Frame::Data(result))) => Ok(Some(result)),
            Some(Ok(Frame::Empty)) => {
                tracing::debug!("Received end-of-stream frame");
                self.closed = true;
                Ok(None)
            }
            Some(Err(e)) => {
                let err = read_error(e);
                tracing::error!(error = %err, "Failed to read result frame");
                Err(err)
            }
            None => {
                tracing::debug!("Result stream reached EOF");
                self.closed = true;
                Ok(None)
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.writer.send(Vec::new()).await?;
        self.writer.flush().await?;
        Ok(())
    }
}
