//! Fixed-size chunk splitting for attachment storage
//!
//! Attachments are stored GridFS-style: the body is cut into fixed-size
//! binary chunks written to a side collection, each carrying a sequence
//! number, followed by a file-metadata record written only after the
//! terminal (possibly short) chunk is flushed.

use bytes::{Bytes, BytesMut};

/// Fixed chunk size for attachment bodies (255 KiB)
pub const CHUNK_SIZE: usize = 255 * 1024;

/// Re-frames an arbitrary byte stream into fixed-size chunks
///
/// Feed with [`push`](ChunkSplitter::push) as data arrives; every complete
/// chunk comes back immediately. [`finish`](ChunkSplitter::finish) flushes
/// the terminal short chunk, if any.
pub struct ChunkSplitter {
    chunk_size: usize,
    buf: BytesMut,
}

impl ChunkSplitter {
    /// Splitter producing chunks of `chunk_size` bytes
    pub fn new(chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "chunk size must be positive");
        ChunkSplitter {
            chunk_size,
            buf: BytesMut::new(),
        }
    }

    /// Feed bytes in; complete chunks come out
    pub fn push(&mut self, data: &[u8]) -> Vec<Bytes> {
        self.buf.extend_from_slice(data);
        let mut full = Vec::new();
        while self.buf.len() >= self.chunk_size {
            full.push(self.buf.split_to(self.chunk_size).freeze());
        }
        full
    }

    /// Flush the terminal short chunk
    pub fn finish(mut self) -> Option<Bytes> {
        if self.buf.is_empty() {
            None
        } else {
            Some(self.buf.split().freeze())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_600kb_body_splits_into_three_chunks() {
        let mut splitter = ChunkSplitter::new(CHUNK_SIZE);
        let body = vec![7u8; 600 * 1024];

        let mut chunks = Vec::new();
        // Feed in uneven pieces, the way a network stream arrives.
        for piece in body.chunks(100_000) {
            chunks.extend(splitter.push(piece));
        }
        if let Some(last) = splitter.finish() {
            chunks.push(last);
        }

        let lengths: Vec<usize> = chunks.iter().map(Bytes::len).collect();
        assert_eq!(lengths, vec![255 * 1024, 255 * 1024, 90 * 1024]);
        assert_eq!(lengths.iter().sum::<usize>(), 600 * 1024);
    }

    #[test]
    fn test_exact_multiple_has_no_short_chunk() {
        let mut splitter = ChunkSplitter::new(4);
        let chunks = splitter.push(&[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(chunks.len(), 2);
        assert!(splitter.finish().is_none());
    }

    #[test]
    fn test_empty_stream_produces_nothing() {
        let mut splitter = ChunkSplitter::new(4);
        assert!(splitter.push(&[]).is_empty());
        assert!(splitter.finish().is_none());
    }

    #[test]
    fn test_chunk_boundaries_preserve_content() {
        let mut splitter = ChunkSplitter::new(3);
        let mut chunks = splitter.push(b"abcdefgh");
        if let Some(last) = splitter.finish() {
            chunks.push(last);
        }
        let joined: Vec<u8> = chunks.iter().flat_map(|c| c.to_vec()).collect();
        assert_eq!(joined, b"abcdefgh");
        assert_eq!(chunks[0].as_ref(), b"abc");
        assert_eq!(chunks[2].as_ref(), b"gh");
    }
}
