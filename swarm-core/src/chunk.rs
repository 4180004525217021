//! Content chunker: split a file into fixed-size pieces, hash it, reassemble pieces in order.

use std::collections::BTreeMap;

use crate::identity::{FileHash, PieceIndex};

/// Default piece size in bytes.
pub const DEFAULT_PIECE_SIZE: usize = 512 * 1024; // 512 KiB

/// Largest piece size a node may be configured with. Hex doubles it on the wire.
pub const MAX_PIECE_SIZE: usize = 4 * 1024 * 1024;

/// Byte range of one piece within a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PieceSpan {
    pub index: PieceIndex,
    pub start: usize,
    pub end: usize,
}

impl PieceSpan {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Split `total_len` bytes into pieces of `piece_size`. A zero-length file still has one
/// (empty) piece so every file has at least one piece.
pub fn split_into_pieces(total_len: usize, piece_size: usize) -> Vec<PieceSpan> {
    let size = if piece_size == 0 {
        DEFAULT_PIECE_SIZE
    } else {
        piece_size
    };
    if total_len == 0 {
        return vec![PieceSpan {
            index: 0,
            start: 0,
            end: 0,
        }];
    }
    let mut out = Vec::with_capacity(total_len.div_ceil(size));
    let mut start = 0usize;
    let mut index: PieceIndex = 0;
    while start < total_len {
        let end = (start + size).min(total_len);
        out.push(PieceSpan { index, start, end });
        start = end;
        index += 1;
    }
    out
}

/// A file loaded for upload: content, content hash and its piece layout.
#[derive(Debug, Clone)]
pub struct ChunkedFile {
    hash: FileHash,
    data: Vec<u8>,
    spans: Vec<PieceSpan>,
}

impl ChunkedFile {
    pub fn new(data: Vec<u8>, piece_size: usize) -> Self {
        let hash = FileHash::of_bytes(&data);
        let spans = split_into_pieces(data.len(), piece_size);
        Self { hash, data, spans }
    }

    pub fn hash(&self) -> &FileHash {
        &self.hash
    }

    pub fn total_pieces(&self) -> u32 {
        self.spans.len() as u32
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes of one piece, or `None` if the index is out of range.
    pub fn piece(&self, index: PieceIndex) -> Option<&[u8]> {
        self.spans
            .get(index as usize)
            .map(|span| &self.data[span.start..span.end])
    }

    /// All pieces in index order.
    pub fn pieces(&self) -> impl Iterator<Item = (PieceIndex, &[u8])> + '_ {
        self.spans
            .iter()
            .map(move |span| (span.index, &self.data[span.start..span.end]))
    }
}

/// Pieces received for one download; concatenated only once every index is present.
pub struct Reassembly {
    total_pieces: u32,
    received: BTreeMap<PieceIndex, Vec<u8>>,
}

impl Reassembly {
    pub fn new(total_pieces: u32) -> Self {
        Self {
            total_pieces,
            received: BTreeMap::new(),
        }
    }

    /// Record a received piece. Returns true if the file is now complete.
    /// Indices outside `0..total_pieces` are ignored.
    pub fn mark_received(&mut self, index: PieceIndex, payload: Vec<u8>) -> bool {
        if index < self.total_pieces {
            self.received.insert(index, payload);
        }
        self.is_complete()
    }

    pub fn is_complete(&self) -> bool {
        self.received.len() == self.total_pieces as usize
    }

    /// Concatenate pieces in index order. `None` while any piece is missing.
    pub fn into_bytes(self) -> Option<Vec<u8>> {
        if !self.is_complete() {
            return None;
        }
        let total: usize = self.received.values().map(Vec::len).sum();
        let mut out = Vec::with_capacity(total);
        for payload in self.received.into_values() {
            out.extend_from_slice(&payload);
        }
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;

    fn random_bytes(len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        rand::thread_rng().fill_bytes(&mut buf);
        buf
    }

    #[test]
    fn split_pieces() {
        let spans = split_into_pieces(100, 30);
        assert_eq!(spans.len(), 4);
        assert_eq!((spans[0].start, spans[0].end), (0, 30));
        assert_eq!((spans[3].start, spans[3].end), (90, 100));
        assert_eq!(spans[3].index, 3);
    }

    #[test]
    fn split_exact_multiple() {
        let spans = split_into_pieces(90, 30);
        assert_eq!(spans.len(), 3);
        assert_eq!(spans[2].end, 90);
    }

    #[test]
    fn split_zero_length_has_one_empty_piece() {
        let spans = split_into_pieces(0, 30);
        assert_eq!(spans.len(), 1);
        assert!(spans[0].is_empty());
    }

    #[test]
    fn split_zero_piece_size_uses_default() {
        let spans = split_into_pieces(DEFAULT_PIECE_SIZE * 2, 0);
        assert_eq!(spans.len(), 2);
    }

    #[test]
    fn reassembly_reproduces_original_bytes() {
        let piece_size = 64;
        for len in [
            0,
            1,
            piece_size - 1,
            piece_size,
            piece_size + 1,
            10 * piece_size + 7,
        ] {
            let data = random_bytes(len);
            let file = ChunkedFile::new(data.clone(), piece_size);
            let mut reassembly = Reassembly::new(file.total_pieces());
            // Out of order on purpose; assembly is by index.
            let mut pieces: Vec<_> = file.pieces().collect();
            pieces.reverse();
            for (index, bytes) in pieces {
                reassembly.mark_received(index, bytes.to_vec());
            }
            assert_eq!(reassembly.into_bytes().unwrap(), data, "len {len}");
        }
    }

    #[test]
    fn piece_count_for_scenario_file() {
        let s = 1024;
        let file = ChunkedFile::new(vec![7u8; 2 * s + 10], s);
        assert_eq!(file.total_pieces(), 3);
        assert_eq!(file.piece(2).unwrap().len(), 10);
        assert!(file.piece(3).is_none());
    }

    #[test]
    fn incomplete_reassembly_yields_nothing() {
        let mut reassembly = Reassembly::new(2);
        assert!(!reassembly.mark_received(0, vec![1, 2]));
        assert!(!reassembly.mark_received(9, vec![3]));
        assert!(reassembly.into_bytes().is_none());
    }

    #[test]
    fn hash_is_content_derived() {
        let a = ChunkedFile::new(b"same".to_vec(), 2);
        let b = ChunkedFile::new(b"same".to_vec(), 3);
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a.hash(), &FileHash::of_bytes(b"same"));
    }
}
