//! Length-prefixed TCP framing over the dispatch queue.
//!
//! Each frame is `[u32 BE frame length][bincode payload]`; requests decode
//! to [`Request`] and responses encode from [`ResponseEnvelope`]. One task
//! runs per connection, and each request crosses into the synchronous
//! dispatcher on the blocking thread pool.

use std::io;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use waddledb_core::{Dispatcher, Request, ResponseEnvelope};

/// Upper bound on a single frame; anything larger is a protocol error.
const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// Accept connections until the listener is dropped.
pub async fn serve(listener: TcpListener, dispatcher: Dispatcher) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                tracing::debug!(%peer, "connection accepted");
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, dispatcher).await {
                        if e.kind() != io::ErrorKind::UnexpectedEof {
                            tracing::warn!(%peer, error = %e, "connection closed with error");
                        }
                    }
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
            }
        }
    }
}

async fn handle_connection(mut stream: TcpStream, dispatcher: Dispatcher) -> io::Result<()> {
    loop {
        let frame = match read_frame(&mut stream).await {
            Ok(frame) => frame,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e),
        };

        let request: Request = match bincode::deserialize(&frame) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(error = %e, "undecodable request frame, dropping connection");
                return Ok(());
            }
        };

        let dispatcher = dispatcher.clone();
        let response = tokio::task::spawn_blocking(move || {
            dispatcher.dispatch(request.request_id, request.operation)
        })
        .await
        .map_err(|e| io::Error::other(format!("dispatch task failed: {e}")))?;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(error = %e, "dispatcher unavailable");
                return Err(io::Error::other(e.to_string()));
            }
        };

        write_response(&mut stream, &response).await?;
    }
}

async fn read_frame(stream: &mut TcpStream) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame length {len} exceeds limit"),
        ));
    }
    let mut frame = vec![0u8; len as usize];
    stream.read_exact(&mut frame).await?;
    Ok(frame)
}

async fn write_response(stream: &mut TcpStream, response: &ResponseEnvelope) -> io::Result<()> {
    let payload = bincode::serialize(response)
        .map_err(|e| io::Error::other(format!("response serialize failed: {e}")))?;
    stream.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    stream.write_all(&payload).await?;
    stream.flush().await
}
