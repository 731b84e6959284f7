//! In-memory transport for reader/decoder unit tests

use crate::error::Result;
use crate::reader::ByteTransport;
use std::collections::VecDeque;

/// Scripted transport: hands out queued chunks, then behaves as silent
pub struct MockTransport {
    chunks: VecDeque<Vec<u8>>,
    /// Number of `read_some` calls made
    pub reads: usize,
    byte_rate: f64,
}

impl MockTransport {
    pub fn new(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            chunks: chunks.into(),
            reads: 0,
            byte_rate: 1_000_000.0,
        }
    }

    /// One contiguous stream split into fixed-size chunks
    pub fn from_bytes(data: &[u8], chunk: usize) -> Self {
        Self::new(data.chunks(chunk.max(1)).map(|c| c.to_vec()).collect())
    }
}

impl ByteTransport for MockTransport {
    fn read_some(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.reads += 1;
        match self.chunks.pop_front() {
            None => Ok(0),
            Some(mut chunk) => {
                if chunk.len() > buf.len() {
                    let rest = chunk.split_off(buf.len());
                    self.chunks.push_front(rest);
                }
                buf[..chunk.len()].copy_from_slice(&chunk);
                Ok(chunk.len())
            }
        }
    }

    fn byte_rate(&self) -> f64 {
        self.byte_rate
    }
}
