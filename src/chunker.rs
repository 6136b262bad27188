//! Chunk splitter
//!
//! Turns a stream of arbitrarily sized byte buffers into fixed-size chunks.
//! Every chunk is exactly `chunk_size` bytes except possibly the last one.

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use std::fmt;
use std::pin::Pin;

use crate::error::StripeError;

/// Default chunk size: 1 MiB
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Number of chunks a file of `len` bytes splits into
pub fn chunk_count_for(len: u64, chunk_size: u64) -> u64 {
    if chunk_size == 0 {
        return 0;
    }
    len.div_ceil(chunk_size)
}

/// MD5 hex digest recorded in the manifest for each chunk
pub fn chunk_checksum(data: &[u8]) -> String {
    hex::encode(md5::compute(data).0)
}

/// Lazily splits a byte stream into chunks
///
/// Splitting an in-memory `Bytes` source is cheap to restart: build a new
/// splitter over a clone of the same buffer.
pub struct ChunkSplitter<S> {
    source: Pin<Box<S>>,
    chunk_size: usize,
    buffer: BytesMut,
    exhausted: bool,
}

impl<S, B, E> ChunkSplitter<S>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: fmt::Display,
{
    pub fn new(source: S, chunk_size: usize) -> Result<Self, StripeError> {
        if chunk_size == 0 {
            return Err(StripeError::InvalidConfig("chunk_size must be at least 1".to_string()));
        }
        Ok(Self {
            source: Box::pin(source),
            chunk_size,
            buffer: BytesMut::with_capacity(chunk_size),
            exhausted: false,
        })
    }

    /// Next chunk, or `None` once the source is exhausted
    ///
    /// A source error is reported once; the splitter is finished afterwards.
    pub async fn next_chunk(&mut self) -> Option<Result<Bytes, StripeError>> {
        loop {
            if self.buffer.len() >= self.chunk_size {
                return Some(Ok(self.buffer.split_to(self.chunk_size).freeze()));
            }
            if self.exhausted {
                if self.buffer.is_empty() {
                    return None;
                }
                return Some(Ok(self.buffer.split().freeze()));
            }
            match self.source.next().await {
                Some(Ok(data)) => self.buffer.extend_from_slice(data.as_ref()),
                Some(Err(e)) => {
                    self.exhausted = true;
                    self.buffer.clear();
                    return Some(Err(StripeError::Source(e.to_string())));
                }
                None => self.exhausted = true,
            }
        }
    }
}
