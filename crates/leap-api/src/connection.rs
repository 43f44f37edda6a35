// ── Newline-delimited JSON framing ──
//
// A LEAP message is one UTF-8 JSON object terminated by `\r\n`. Bridges
// emit responses of up to 256 KiB (the full `/device` listing on a large
// install), so the line buffer grows as needed up to MAX_FRAME_BYTES.

use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, trace, warn};

use crate::error::Error;
use crate::transport::{connect_tls, TlsCredentials};

/// Hard ceiling on a single frame. Bridges emit up to 256 KiB; anything
/// past this is treated as a framing failure.
const MAX_FRAME_BYTES: usize = 1024 * 1024;

const READ_BUFFER_BYTES: usize = 64 * 1024;

/// Object-safe alias for the byte streams a connection can run over:
/// a TLS stream in production, an in-memory duplex pipe in tests.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Transport for T {}

type BoxedTransport = Box<dyn Transport>;

// ── Connection ──────────────────────────────────────────────────────

/// A framed LEAP connection. Split into reader and writer halves so the
/// read loop and request writers can run on separate tasks.
pub struct Connection {
    reader: ConnectionReader,
    writer: ConnectionWriter,
}

impl Connection {
    /// Establish a mutually-authenticated TLS connection to the bridge.
    pub async fn open(
        host: &str,
        port: u16,
        credentials: &TlsCredentials,
        timeout: Duration,
    ) -> Result<Self, Error> {
        let stream = connect_tls(host, port, credentials, timeout).await?;
        debug!(host, port, "LEAP connection established");
        Ok(Self::from_stream(stream))
    }

    /// Wrap an already-established stream. Used by tests to run the
    /// protocol over an in-memory pipe.
    pub fn from_stream(stream: impl Transport + 'static) -> Self {
        let boxed: BoxedTransport = Box::new(stream);
        let (read_half, write_half) = tokio::io::split(boxed);
        Self {
            reader: ConnectionReader {
                reader: BufReader::with_capacity(READ_BUFFER_BYTES, read_half),
                line: Vec::new(),
            },
            writer: ConnectionWriter { writer: write_half },
        }
    }

    pub fn into_split(self) -> (ConnectionReader, ConnectionWriter) {
        (self.reader, self.writer)
    }
}

// ── Reader half ─────────────────────────────────────────────────────

pub struct ConnectionReader {
    reader: BufReader<tokio::io::ReadHalf<BoxedTransport>>,
    line: Vec<u8>,
}

impl ConnectionReader {
    /// Read the next JSON value from the stream.
    ///
    /// Returns `Ok(None)` on clean EOF. Lines that fail to decode are
    /// logged and consumed; the read continues with the next line. A
    /// partial line at EOF or an oversized frame terminates the stream
    /// with a transport error.
    pub async fn read_value(&mut self) -> Result<Option<serde_json::Value>, Error> {
        loop {
            self.line.clear();
            let n = self.reader.read_until(b'\n', &mut self.line).await?;

            if n == 0 {
                if self.line.is_empty() {
                    return Ok(None);
                }
                return Err(Error::Transport(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "incomplete LEAP frame at end of stream",
                )));
            }

            if self.line.len() > MAX_FRAME_BYTES {
                return Err(Error::Transport(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("LEAP frame exceeds {MAX_FRAME_BYTES} bytes"),
                )));
            }

            let trimmed = trim_line(&self.line);
            if trimmed.is_empty() {
                continue;
            }

            trace!(bytes = trimmed.len(), "received frame");
            match serde_json::from_slice(trimmed) {
                Ok(value) => return Ok(Some(value)),
                Err(e) => {
                    warn!(
                        error = %e,
                        raw = %String::from_utf8_lossy(&trimmed[..trimmed.len().min(200)]),
                        "skipping undecodable line"
                    );
                }
            }
        }
    }
}

fn trim_line(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && (line[end - 1] == b'\n' || line[end - 1] == b'\r') {
        end -= 1;
    }
    &line[..end]
}

// ── Writer half ─────────────────────────────────────────────────────

pub struct ConnectionWriter {
    writer: tokio::io::WriteHalf<BoxedTransport>,
}

impl ConnectionWriter {
    /// Serialize `value` as one JSON line (`\r\n`-terminated) and flush.
    pub async fn write_json<T: Serialize>(&mut self, value: &T) -> Result<(), Error> {
        let mut buffer = serde_json::to_vec(value).map_err(|e| Error::Decode {
            raw: e.to_string(),
        })?;
        trace!(bytes = buffer.len(), "sending frame");
        buffer.extend_from_slice(b"\r\n");
        self.writer.write_all(&buffer).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Half-close the write side.
    pub async fn shutdown(&mut self) -> Result<(), Error> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
