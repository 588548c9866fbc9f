//! Newline-delimited JSON over a byte stream.

use bytes::BytesMut;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;

use super::transport::{Transport, TransportError, TransportKind};

/// Default upper bound for a single frame.
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024 * 1024;

/// Opens the byte stream a [`StreamTransport`] runs over.
#[allow(async_fn_in_trait)]
pub trait Dial {
    type Stream: AsyncRead + AsyncWrite + Unpin;

    async fn dial(&mut self) -> io::Result<Self::Stream>;
}

/// Dials a TCP address.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    addr: String,
}

impl TcpDialer {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

impl Dial for TcpDialer {
    type Stream = TcpStream;

    async fn dial(&mut self) -> io::Result<TcpStream> {
        let stream = TcpStream::connect(&self.addr).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

/// Hands out one already established stream; later dials fail.
#[derive(Debug)]
pub struct Established<S>(Option<S>);

impl<S: AsyncRead + AsyncWrite + Unpin> Dial for Established<S> {
    type Stream = S;

    async fn dial(&mut self) -> io::Result<S> {
        self.0
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "stream already used"))
    }
}

/// Splits a byte stream into newline-terminated frames.
///
/// Blank lines and lines that are not UTF-8 are dropped. A line longer than
/// the limit is skipped up to its terminating newline.
#[derive(Debug)]
pub struct FrameBuffer {
    buf: BytesMut,
    max_frame_len: usize,
    discarding: bool,
}

impl FrameBuffer {
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(8 * 1024),
            max_frame_len,
            discarding: false,
        }
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    fn bytes_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Bytes received but not yet part of a complete frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn next_frame(&mut self) -> Option<String> {
        loop {
            let Some(pos) = self.buf.iter().position(|b| *b == b'\n') else {
                if self.buf.len() > self.max_frame_len {
                    log::warn!("Skipping frame longer than {} bytes", self.max_frame_len);
                    self.buf.clear();
                    self.discarding = true;
                }
                return None;
            };
            let line = self.buf.split_to(pos + 1);
            if std::mem::take(&mut self.discarding) {
                continue;
            }
            let mut line = &line[..pos];
            if let [rest @ .., b'\r'] = line {
                line = rest;
            }
            if line.len() > self.max_frame_len {
                log::warn!("Skipping frame of {} bytes", line.len());
                continue;
            }
            match std::str::from_utf8(line) {
                Ok(text) if text.trim().is_empty() => continue,
                Ok(text) => return Some(text.to_string()),
                Err(_) => log::warn!("Skipping non UTF-8 frame"),
            }
        }
    }

    /// Drop an unterminated trailing frame. Returns the number of bytes dropped.
    pub fn finish(&mut self) -> usize {
        let dropped = self.buf.len();
        self.buf.clear();
        self.discarding = false;
        dropped
    }
}

/// Transport writing one JSON object per line.
pub struct StreamTransport<D: Dial = TcpDialer> {
    dialer: D,
    reader: Option<ReadHalf<D::Stream>>,
    writer: Option<WriteHalf<D::Stream>>,
    buffer: FrameBuffer,
}

impl StreamTransport<TcpDialer> {
    /// Transport over TCP to `addr` (`host:port`).
    pub fn tcp(addr: impl Into<String>) -> Self {
        Self::new(TcpDialer::new(addr))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> StreamTransport<Established<S>> {
    /// Transport over a stream that is already connected.
    pub fn from_stream(stream: S) -> Self {
        Self::new(Established(Some(stream)))
    }
}

impl<D: Dial> StreamTransport<D> {
    pub fn new(dialer: D) -> Self {
        Self::with_max_frame_len(dialer, DEFAULT_MAX_FRAME_LEN)
    }

    pub fn with_max_frame_len(dialer: D, max_frame_len: usize) -> Self {
        Self {
            dialer,
            reader: None,
            writer: None,
            buffer: FrameBuffer::new(max_frame_len),
        }
    }

    fn close(&mut self) {
        self.reader = None;
        self.writer = None;
    }
}

impl<D: Dial> Transport for StreamTransport<D> {
    fn kind(&self) -> TransportKind {
        TransportKind::Stream
    }

    fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        if self.is_open() {
            return Ok(());
        }
        let stream = self
            .dialer
            .dial()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (reader, writer) = tokio::io::split(stream);
        self.reader = Some(reader);
        self.writer = Some(writer);
        self.buffer.finish();
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        let writer = self.writer.take();
        self.reader = None;
        if let Some(mut writer) = writer {
            writer.shutdown().await?;
        }
        Ok(())
    }

    async fn send(&mut self, frame: &str) -> Result<(), TransportError> {
        let writer = self.writer.as_mut().ok_or(TransportError::NotConnected)?;
        let mut line = Vec::with_capacity(frame.len() + 1);
        line.extend_from_slice(frame.as_bytes());
        line.push(b'\n');
        writer
            .write_all(&line)
            .await
            .map_err(|e| TransportError::Send(e.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn next_frame(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            if let Some(frame) = self.buffer.next_frame() {
                return Some(Ok(frame));
            }
            let Some(reader) = self.reader.as_mut() else {
                return Some(Err(TransportError::NotConnected));
            };
            let read = reader.read_buf(self.buffer.bytes_mut()).await;
            match read {
                Ok(0) => {
                    let dropped = self.buffer.finish();
                    if dropped > 0 {
                        log::warn!("Discarding {dropped} bytes of an incomplete trailing frame");
                    }
                    self.close();
                    return None;
                }
                Ok(_) => {}
                Err(e) => {
                    self.close();
                    return Some(Err(TransportError::Receive(e.to_string())));
                }
            }
        }
    }
}
