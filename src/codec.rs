//! Line-oriented framing over a raw byte stream
//!
//! Header lines and raw chunk payloads share one byte stream with no
//! separation in between. A single socket read can therefore return the tail
//! of a header line together with the first bytes of the payload that follows
//! it. [`LineStream`] keeps such bytes in a carry-over buffer, and every read
//! (line or chunk) drains that buffer before touching the stream again.

use crate::error::{Error, Result};
use crate::protocol::{MAX_LINE_LEN, READ_BUFFER_SIZE};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

pub struct LineStream<S> {
    stream: S,
    buf: Vec<u8>,
    read_timeout: Option<Duration>,
}

impl<S> LineStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buf: Vec::with_capacity(READ_BUFFER_SIZE),
            read_timeout: None,
        }
    }

    /// Apply a deadline to every individual read from the stream.
    pub fn with_read_timeout(mut self, read_timeout: Option<Duration>) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn set_read_timeout(&mut self, read_timeout: Option<Duration>) {
        self.read_timeout = read_timeout;
    }

    /// Bytes read from the stream but not consumed yet.
    pub fn buffered(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    #[inline]
    async fn read_timed(&mut self, out: &mut [u8]) -> Result<usize> {
        match self.read_timeout {
            Some(d) => match timeout(d, self.stream.read(out)).await {
                Ok(res) => Ok(res?),
                Err(_) => Err(Error::Timeout {
                    ms: d.as_millis() as u64,
                }),
            },
            None => Ok(self.stream.read(out).await?),
        }
    }

    /// Read one header line.
    ///
    /// Returns the bytes before `\n` with a trailing `\r` removed. Anything
    /// after the newline stays buffered for the next line or chunk read.
    pub async fn read_line(&mut self) -> Result<String> {
        let mut scanned = 0;
        let mut tmp = [0u8; READ_BUFFER_SIZE];
        loop {
            if let Some(pos) = self.buf[scanned..].iter().position(|b| *b == b'\n') {
                let end = scanned + pos;
                let mut line: Vec<u8> = self.buf.drain(..=end).collect();
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return String::from_utf8(line)
                    .map_err(|_| Error::protocol("header line is not valid UTF-8"));
            }
            scanned = self.buf.len();
            if scanned > MAX_LINE_LEN {
                return Err(Error::protocol(format!(
                    "header line exceeds {} bytes",
                    MAX_LINE_LEN
                )));
            }

            let n = self.read_timed(&mut tmp).await?;
            if n == 0 {
                let partial = String::from_utf8_lossy(&self.buf).trim().to_string();
                self.buf.clear();
                return Err(Error::ConnectionClosed { partial });
            }
            self.buf.extend_from_slice(&tmp[..n]);
        }
    }

    /// Read exactly `len` payload bytes.
    ///
    /// Carry-over bytes are used first; further reads ask for no more than the
    /// bytes still missing, so the stream ends up positioned on the first byte
    /// after this chunk.
    pub async fn read_chunk(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut chunk = vec![0u8; len];
        let from_buf = self.buf.len().min(len);
        chunk[..from_buf].copy_from_slice(&self.buf[..from_buf]);
        self.buf.drain(..from_buf);

        let mut got = from_buf;
        while got < len {
            let n = self.read_timed(&mut chunk[got..]).await?;
            if n == 0 {
                return Err(Error::ConnectionClosed {
                    partial: String::new(),
                });
            }
            got += n;
        }
        Ok(chunk)
    }

    /// Write `text` followed by a single newline.
    pub async fn write_line(&mut self, text: &str) -> Result<()> {
        if text.contains('\n') {
            return Err(Error::protocol("header line must not contain a newline"));
        }
        let mut out = Vec::with_capacity(text.len() + 1);
        out.extend_from_slice(text.as_bytes());
        out.push(b'\n');
        self.stream.write_all(&out).await?;
        Ok(())
    }

    /// Write raw payload bytes with no framing.
    pub async fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream.write_all(bytes).await?;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.stream.flush().await?;
        Ok(())
    }

    /// Close the write half; the peer sees end-of-stream after pending bytes.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}
