//! Line-delimited JSON framing.
//!
//! One frame is one JSON document followed by `\n`. A final frame without
//! the newline is accepted when the peer closes its side.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::message::{Request, Response};
use crate::protocol::ProtocolError;

/// Upper bound for responses read by clients.
pub const MAX_RESPONSE_BYTES: usize = 1024 * 1024;

/// Read one request, rejecting frames longer than `max_bytes`.
pub async fn read_request<R>(reader: &mut R, max_bytes: usize) -> Result<Request, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    read_frame(reader, max_bytes).await
}

/// Read one response.
pub async fn read_response<R>(reader: &mut R) -> Result<Response, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    read_frame(reader, MAX_RESPONSE_BYTES).await
}

pub async fn write_request<W>(writer: &mut W, request: &Request) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    write_frame(writer, request).await
}

pub async fn write_response<W>(writer: &mut W, response: &Response) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    write_frame(writer, response).await
}

async fn read_frame<R, T>(reader: &mut R, max_bytes: usize) -> Result<T, ProtocolError>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut frame = Vec::new();
    // One extra byte leaves room for the terminator of a frame of exactly
    // `max_bytes`.
    let mut limited = (&mut *reader).take(max_bytes as u64 + 1);
    let read = limited.read_until(b'\n', &mut frame).await?;
    if read == 0 {
        return Err(ProtocolError::Closed);
    }

    if frame.last() == Some(&b'\n') {
        frame.pop();
        if frame.last() == Some(&b'\r') {
            frame.pop();
        }
    }
    if frame.len() > max_bytes {
        return Err(ProtocolError::TooLarge { limit: max_bytes });
    }

    Ok(serde_json::from_slice(&frame)?)
}

async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut frame = serde_json::to_vec(message)?;
    frame.push(b'\n');
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}
