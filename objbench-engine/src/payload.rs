//! Synthetic object contents used by every upload.
//!
//! A run either materializes one pseudo-random buffer up front and shares it between all uploads
//! ([`PayloadSource::Materialized`]), or hands every upload an [`InfiniteReader`] that generates
//! the bytes on demand ([`PayloadSource::Streamed`]). The latter never holds more than one part
//! in memory, which matters for very large objects.

use std::io::{self, Read, Seek, SeekFrom};
use std::ops::Range;
use std::pin::Pin;
use std::task;

use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::io::ReaderStream;

/// Maximum number of bytes produced by a single read of an [`InfiniteReader`].
pub const BLOCK_SIZE: usize = 512;

/// Type alias for payload byte streams handed to streaming backends.
pub type PayloadStream = BoxStream<'static, io::Result<Bytes>>;

/// A seekable stream of pseudo-random bytes with a fixed length.
///
/// Reads yield at most [`BLOCK_SIZE`] bytes at a time until `size` bytes have been produced, after
/// which the reader signals end-of-stream. The contents are freshly generated on every read, so
/// seeking back and reading again yields the same number of bytes, but not the same bytes.
#[derive(Debug, Clone)]
pub struct InfiniteReader {
    size: u64,
    position: u64,
    rng: SmallRng,
}

impl InfiniteReader {
    /// Creates a reader that produces exactly `size` bytes.
    pub fn new(size: u64) -> Self {
        Self {
            size,
            position: 0,
            rng: SmallRng::seed_from_u64(rand::random()),
        }
    }

    /// The declared length of the stream.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// The current read position.
    pub fn position(&self) -> u64 {
        self.position
    }

    fn remaining(&self) -> u64 {
        self.size.saturating_sub(self.position)
    }

    fn next_block_len(&self, available: usize) -> usize {
        (available as u64)
            .min(self.remaining())
            .min(BLOCK_SIZE as u64) as usize
    }
}

impl Read for InfiniteReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = self.next_block_len(buf.len());

        self.rng.fill_bytes(&mut buf[..len]);
        self.position += len as u64;

        Ok(len)
    }
}

impl Seek for InfiniteReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(offset) => self.position.checked_add_signed(offset),
            SeekFrom::End(offset) => self.size.checked_add_signed(offset),
        };

        let Some(target) = target else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid seek to {pos:?} from position {}", self.position),
            ));
        };

        self.position = target;
        Ok(target)
    }
}

impl AsyncRead for InfiniteReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut task::Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> task::Poll<io::Result<()>> {
        let len = self.next_block_len(buf.remaining());

        let fill_buf = buf.initialize_unfilled_to(len);
        self.rng.fill_bytes(fill_buf);

        self.position += len as u64;
        buf.advance(len);

        task::Poll::Ready(Ok(()))
    }
}

/// Where upload contents come from for the duration of a run.
///
/// Cloning is cheap: the materialized buffer is reference counted and shared read-only.
#[derive(Debug, Clone)]
pub enum PayloadSource {
    /// One buffer generated at startup and reused by every upload.
    Materialized(Bytes),
    /// Contents generated per upload by an [`InfiniteReader`].
    Streamed {
        /// Length of every generated payload.
        size: u64,
    },
}

impl PayloadSource {
    /// Generates a pseudo-random buffer of `size` bytes once.
    pub fn materialize(size: u64) -> Self {
        let mut data = vec![0; size as usize];
        SmallRng::seed_from_u64(rand::random()).fill_bytes(&mut data);
        Self::Materialized(data.into())
    }

    /// Creates a source that generates `size` bytes per upload on demand.
    pub fn streamed(size: u64) -> Self {
        Self::Streamed { size }
    }

    /// The length of every payload opened from this source.
    pub fn len(&self) -> u64 {
        match self {
            Self::Materialized(bytes) => bytes.len() as u64,
            Self::Streamed { size } => *size,
        }
    }

    /// Returns `true` if payloads from this source are empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Opens a fresh read cursor for a single upload attempt.
    pub fn open(&self) -> Payload {
        match self {
            Self::Materialized(bytes) => Payload::Buffered(bytes.clone()),
            Self::Streamed { size } => Payload::Generated(InfiniteReader::new(*size)),
        }
    }
}

/// The contents of a single upload attempt.
#[derive(Debug)]
pub enum Payload {
    /// A view into the shared, materialized buffer.
    Buffered(Bytes),
    /// Generated contents.
    Generated(InfiniteReader),
}

impl Payload {
    /// The total length of the payload in bytes.
    pub fn len(&self) -> u64 {
        match self {
            Self::Buffered(bytes) => bytes.len() as u64,
            Self::Generated(reader) => reader.size(),
        }
    }

    /// Returns `true` if the payload has no contents.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads the given byte range, used to assemble individual multipart parts.
    pub fn read_range(&mut self, range: Range<u64>) -> io::Result<Bytes> {
        if range.end > self.len() || range.start > range.end {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("range {range:?} out of bounds for {} bytes", self.len()),
            ));
        }

        match self {
            Self::Buffered(bytes) => Ok(bytes.slice(range.start as usize..range.end as usize)),
            Self::Generated(reader) => {
                reader.seek(SeekFrom::Start(range.start))?;
                let mut buf = vec![0; (range.end - range.start) as usize];
                reader.read_exact(&mut buf)?;
                Ok(buf.into())
            }
        }
    }

    /// Reads the entire payload into a single buffer.
    pub fn into_bytes(mut self) -> io::Result<Bytes> {
        let len = self.len();
        self.read_range(0..len)
    }

    /// Converts the payload into a stream of chunks.
    pub fn into_stream(self) -> PayloadStream {
        match self {
            Self::Buffered(bytes) => futures_util::stream::once(async move { Ok(bytes) }).boxed(),
            Self::Generated(reader) => ReaderStream::new(reader).boxed(),
        }
    }
}
