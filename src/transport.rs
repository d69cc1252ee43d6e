//! Line/length oriented socket abstraction.
//!
//! The wire protocol is one ASCII line per command or response, CRLF
//! terminated, with job bodies sent as `<len>` raw bytes plus a trailing
//! CRLF. [`Transport`] exposes exactly that surface; [`TcpTransport`]
//! implements it with a connect-on-demand TCP socket. Any read or write
//! failure drops the socket so the next call dials afresh, which is what
//! lets the managed layer walk a reconnected socket back to its logical
//! tube state.

use std::io;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use itertools::Itertools;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::trace;

use crate::util::bytes_to_human_str;

/// The line/length oriented surface the protocol layer drives.
///
/// `write_line` and `write_frame` append the CRLF terminators; `read_line`
/// strips them. `read_data` returns exactly `len` raw bytes (callers read a
/// body as `len + 2` and discard the trailing pair themselves).
#[async_trait]
pub trait Transport: Send {
    async fn write_line(&mut self, line: &[u8]) -> io::Result<()>;
    async fn write_frame(&mut self, line: &[u8], body: &[u8])
        -> io::Result<()>;
    async fn read_line(&mut self) -> io::Result<Bytes>;
    async fn read_data(&mut self, len: usize) -> io::Result<Bytes>;
}

/// Provides a facility to read CRLF-terminated lines and exact-length data
/// frames from a stream.
pub struct FrameReader<T: AsyncRead + Unpin> {
    /// Stores data that's been read in but not yet consumed.
    buf: BytesMut,
    /// Index in buf from which a valid CRLF pair may appear (and before
    /// which a CRLF sequence hasn't been seen).
    maybe_crlf_from: usize,
    /// Data source
    reader: T,
}

impl<T: AsyncRead + Unpin> FrameReader<T> {
    /// Reads a line from the internal buffer and/or reader, with the
    /// trailing CRLF stripped. An end-of-stream condition is an error: the
    /// client always has a response outstanding when it reads.
    pub async fn read_line(&mut self) -> io::Result<Bytes> {
        loop {
            // We slice and dice buf here to avoid re-reading all but the
            // last byte of the part of the line we've already seen, keeping
            // O(bytes_read) behaviour.
            // Note also we need to scan from one position earlier than the
            // start of the newest bytes in case we received a \r then \n on
            // the next read.
            if let Some(eol) = self
                .buf
                .iter()
                .skip(self.maybe_crlf_from)
                .tuple_windows::<(_, _)>()
                .position(|x| x == (&b'\r', &b'\n'))
            {
                let line =
                    self.buf.split_to(self.maybe_crlf_from + eol + 2).freeze();

                // Drop trailing b"\r\n".
                let line = line.slice(0..line.len() - 2);

                // Restart the CRLF scan from the start of the unread buffer
                // section.
                self.maybe_crlf_from = 0;

                return Ok(line);
            }

            let n_bytes_read = self.reader.read_buf(&mut self.buf).await?;

            // Set maybe_crlf_from to the byte before the first byte returned
            // in the read_buf call (and 0 if buf is empty).
            self.maybe_crlf_from =
                self.buf.len().checked_sub(n_bytes_read + 1).unwrap_or(0);

            if n_bytes_read == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed mid-response",
                ));
            }
        }
    }

    /// Reads exactly `len` bytes.
    pub async fn read_exact(&mut self, len: usize) -> io::Result<Bytes> {
        while self.buf.len() < len {
            if self.reader.read_buf(&mut self.buf).await? == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed mid-body",
                ));
            }
        }

        // The CRLF scan restarts on whatever is left unconsumed.
        self.maybe_crlf_from = 0;

        Ok(self.buf.split_to(len).freeze())
    }
}

impl<T: AsyncRead + Unpin> From<T> for FrameReader<T> {
    fn from(value: T) -> Self {
        Self {
            buf: BytesMut::new(),
            maybe_crlf_from: 0,
            reader: value,
        }
    }
}

struct Wire {
    reader: FrameReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

/// A connect-on-demand TCP transport.
pub struct TcpTransport {
    addr: String,
    conn: Option<Wire>,
}

impl TcpTransport {
    pub fn new(addr: impl Into<String>) -> Self {
        TcpTransport {
            addr: addr.into(),
            conn: None,
        }
    }

    async fn wire(&mut self) -> io::Result<&mut Wire> {
        match self.conn {
            Some(ref mut wire) => Ok(wire),
            None => {
                let stream = TcpStream::connect(&self.addr).await?;
                stream.set_nodelay(true)?;
                trace!(addr = %self.addr, "connected");

                let (r, w) = stream.into_split();
                Ok(self.conn.insert(Wire {
                    reader: r.into(),
                    writer: w,
                }))
            },
        }
    }

    /// Drops the socket on failure so the next call reconnects.
    fn seal<R>(&mut self, result: io::Result<R>) -> io::Result<R> {
        if result.is_err() {
            self.conn = None;
        }
        result
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn write_line(&mut self, line: &[u8]) -> io::Result<()> {
        trace!(line = bytes_to_human_str(line), "send");

        let result = async {
            let wire = self.wire().await?;
            wire.writer.write_all(line).await?;
            wire.writer.write_all(b"\r\n").await?;
            wire.writer.flush().await
        }
        .await;

        self.seal(result)
    }

    async fn write_frame(
        &mut self,
        line: &[u8],
        body: &[u8],
    ) -> io::Result<()> {
        trace!(
            line = bytes_to_human_str(line),
            body_len = body.len(),
            "send frame"
        );

        let result = async {
            let wire = self.wire().await?;
            wire.writer.write_all(line).await?;
            wire.writer.write_all(b"\r\n").await?;
            wire.writer.write_all(body).await?;
            wire.writer.write_all(b"\r\n").await?;
            wire.writer.flush().await
        }
        .await;

        self.seal(result)
    }

    async fn read_line(&mut self) -> io::Result<Bytes> {
        let result = async {
            let wire = self.wire().await?;
            wire.reader.read_line().await
        }
        .await;

        let result = self.seal(result);
        if let Ok(ref line) = result {
            trace!(line = bytes_to_human_str(line), "recv");
        }
        result
    }

    async fn read_data(&mut self, len: usize) -> io::Result<Bytes> {
        let result = async {
            let wire = self.wire().await?;
            wire.reader.read_exact(len).await
        }
        .await;

        self.seal(result)
    }
}
