//! Per-connection stream compression
//!
//! A compressed event stream cannot be encoded once and shared: each
//! connection gets its own encoder, and every frame is followed by a sync
//! flush so the client can decode it as soon as it arrives.

#[cfg(feature = "compression")]
use crate::error::SessionError;
#[cfg(feature = "compression")]
use crate::session::EventSink;
#[cfg(feature = "compression")]
use async_trait::async_trait;
#[cfg(feature = "compression")]
use bytes::Bytes;
#[cfg(feature = "compression")]
use flate2::{
    write::{GzEncoder, ZlibEncoder},
    Compression,
};
#[cfg(feature = "compression")]
use std::io::Write;

/// Content coding applied to a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// gzip
    Gzip,
    /// deflate (zlib-wrapped, as HTTP defines it)
    Deflate,
    /// No transform
    Identity,
}

impl Encoding {
    /// Value for the `Content-Encoding` response header
    pub fn content_encoding(&self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::Deflate => "deflate",
            Self::Identity => "identity",
        }
    }

    /// Pick the client's most preferred supported coding.
    ///
    /// Entries with `q=0` are refused outright; a bare `*` selects gzip.
    pub fn from_accept_encoding(header: &str) -> Self {
        let mut offered: Vec<(f32, &str)> = header
            .split(',')
            .filter_map(|part| {
                let mut params = part.split(';');
                let coding = params.next()?.trim();
                let quality = params
                    .find_map(|p| p.trim().strip_prefix("q="))
                    .map(|q| q.trim().parse().unwrap_or(1.0))
                    .unwrap_or(1.0);
                (!coding.is_empty() && quality > 0.0).then_some((quality, coding))
            })
            .collect();

        // Stable: equal weights keep the client's order
        offered.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        for (_, coding) in offered {
            match coding.to_ascii_lowercase().as_str() {
                "gzip" | "x-gzip" => return Self::Gzip,
                "deflate" => return Self::Deflate,
                "*" => return Self::Gzip,
                _ => continue,
            }
        }

        Self::Identity
    }
}

#[cfg(feature = "compression")]
enum Encoder {
    Gzip(GzEncoder<Vec<u8>>),
    Deflate(ZlibEncoder<Vec<u8>>),
}

#[cfg(feature = "compression")]
impl Encoder {
    fn new(encoding: Encoding) -> Option<Self> {
        match encoding {
            Encoding::Gzip => Some(Self::Gzip(GzEncoder::new(Vec::new(), Compression::default()))),
            Encoding::Deflate => Some(Self::Deflate(ZlibEncoder::new(Vec::new(), Compression::default()))),
            Encoding::Identity => None,
        }
    }

    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            Self::Gzip(e) => e.write_all(buf),
            Self::Deflate(e) => e.write_all(buf),
        }
    }

    /// Sync-flush and take whatever compressed output is ready
    fn flush(&mut self) -> std::io::Result<Vec<u8>> {
        match self {
            Self::Gzip(e) => {
                e.flush()?;
                Ok(std::mem::take(e.get_mut()))
            }
            Self::Deflate(e) => {
                e.flush()?;
                Ok(std::mem::take(e.get_mut()))
            }
        }
    }

    fn finish(&mut self) -> std::io::Result<Vec<u8>> {
        match self {
            Self::Gzip(e) => {
                e.try_finish()?;
                Ok(std::mem::take(e.get_mut()))
            }
            Self::Deflate(e) => {
                e.try_finish()?;
                Ok(std::mem::take(e.get_mut()))
            }
        }
    }
}

/// Sink that compresses everything before passing it on
#[cfg(feature = "compression")]
pub struct CompressedSink<S> {
    inner: S,
    encoder: Encoder,
}

#[cfg(feature = "compression")]
impl<S: EventSink> CompressedSink<S> {
    /// Wrap `inner`, or return it back if `encoding` is identity.
    pub fn new(inner: S, encoding: Encoding) -> Result<Self, S> {
        match Encoder::new(encoding) {
            Some(encoder) => Ok(Self { inner, encoder }),
            None => Err(inner),
        }
    }
}

#[cfg(feature = "compression")]
#[async_trait]
impl<S: EventSink> EventSink for CompressedSink<S> {
    async fn write(&mut self, chunk: Bytes) -> Result<(), SessionError> {
        self.encoder.write_all(&chunk)?;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), SessionError> {
        let out = self.encoder.flush()?;
        if !out.is_empty() {
            self.inner.write(Bytes::from(out)).await?;
        }
        self.inner.flush().await
    }

    async fn closed(&self) {
        self.inner.closed().await
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        let tail = self.encoder.finish()?;
        if !tail.is_empty() {
            self.inner.write(Bytes::from(tail)).await?;
        }
        self.inner.close().await
    }
}
