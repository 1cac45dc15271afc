//! Document chunking.
//!
//! Chunk sizes and overlaps are measured in characters (Unicode scalar
//! values), never bytes, so multi-byte text such as `100°C` is never split
//! inside a character. The defaults come from [`RagConfig`](crate::RagConfig):
//! 1500 characters per chunk with a 150 character overlap.

use sha2::{Digest, Sha256};

use crate::document::{Chunk, Document, keys};

/// A strategy for splitting documents into chunks.
///
/// Implementations must be deterministic: the same document text always
/// yields the same chunks, which is what makes re-ingestion idempotent.
pub trait Chunker: Send + Sync {
    /// Split a document into chunks.
    ///
    /// Returns an empty `Vec` if the document has no non-whitespace text.
    fn chunk(&self, document: &Document) -> Vec<Chunk>;
}

/// SHA-256 of `text`, lowercase hex.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Splits text into fixed-size windows of characters that overlap by a
/// configurable amount.
///
/// The window advances by `chunk_size - chunk_overlap` characters and stops
/// once a window reaches the end of the text, so the final chunk is never a
/// pure repeat of the previous overlap. Chunk IDs are
/// `{document_id}_{chunk_index}`; each chunk inherits the document's record
/// metadata plus its index, offsets and content hash.
///
/// # Example
///
/// ```rust,ignore
/// use ragkit::FixedSizeChunker;
///
/// let chunker = FixedSizeChunker::new(1500, 150);
/// let chunks = chunker.chunk(&document);
/// ```
#[derive(Debug, Clone)]
pub struct FixedSizeChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl FixedSizeChunker {
    /// Create a new `FixedSizeChunker`.
    ///
    /// # Arguments
    ///
    /// * `chunk_size`: maximum number of characters per chunk
    /// * `chunk_overlap`: number of characters shared by consecutive chunks
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self { chunk_size: chunk_size.max(1), chunk_overlap }
    }

    /// Number of characters the window advances per chunk (at least one).
    fn step(&self) -> usize {
        self.chunk_size.saturating_sub(self.chunk_overlap).max(1)
    }

    /// Character windows `(start, end)` covering a text of `len` characters.
    fn windows(&self, len: usize) -> Vec<(usize, usize)> {
        let mut windows = Vec::new();
        let mut start = 0;
        while start < len {
            let end = (start + self.chunk_size).min(len);
            windows.push((start, end));
            if end == len {
                break;
            }
            start += self.step();
        }
        windows
    }
}

impl Chunker for FixedSizeChunker {
    fn chunk(&self, document: &Document) -> Vec<Chunk> {
        let text = document.text.as_str();
        if text.trim().is_empty() {
            return Vec::new();
        }

        // Byte offset of every character boundary, including the end.
        let boundaries: Vec<usize> =
            text.char_indices().map(|(i, _)| i).chain(std::iter::once(text.len())).collect();
        let char_count = boundaries.len() - 1;
        let base_metadata = document.record_metadata();

        self.windows(char_count)
            .into_iter()
            .enumerate()
            .map(|(index, (start, end))| {
                let chunk_text = &text[boundaries[start]..boundaries[end]];
                let hash = content_hash(chunk_text);

                let mut metadata = base_metadata.clone();
                metadata.insert(keys::CHUNK_INDEX.to_string(), index.to_string());
                metadata.insert(keys::CHUNK_START.to_string(), start.to_string());
                metadata.insert(keys::CHUNK_END.to_string(), end.to_string());
                metadata.insert(keys::CONTENT_HASH.to_string(), hash.clone());

                Chunk {
                    id: Chunk::make_id(&document.id, index),
                    document_id: document.id.clone(),
                    index,
                    text: chunk_text.to_string(),
                    start,
                    end,
                    content_hash: hash,
                    metadata,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_blank_documents_produce_no_chunks() {
        let chunker = FixedSizeChunker::new(10, 2);
        assert!(chunker.chunk(&Document::new("d", "")).is_empty());
        assert!(chunker.chunk(&Document::new("d", "  \n\t ")).is_empty());
    }

    #[test]
    fn short_document_is_a_single_chunk() {
        let chunker = FixedSizeChunker::new(100, 10);
        let chunks = chunker.chunk(&Document::new("doc1", "The sky is blue. Water boils at 100°C."));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].id, "doc1_0");
        assert_eq!(chunks[0].text, "The sky is blue. Water boils at 100°C.");
        assert_eq!(chunks[0].end, 38);
    }

    #[test]
    fn windows_overlap_and_cover_the_text() {
        let chunker = FixedSizeChunker::new(4, 1);
        let chunks = chunker.chunk(&Document::new("d", "abcdefghij"));
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, ["abcd", "defg", "ghij"]);
        assert_eq!(chunks[1].start, 3);
        assert_eq!(chunks[1].end, 7);
        assert_eq!(chunks[2].metadata.get(keys::CHUNK_INDEX).map(String::as_str), Some("2"));
    }

    #[test]
    fn multibyte_characters_are_never_split() {
        let chunker = FixedSizeChunker::new(3, 1);
        let chunks = chunker.chunk(&Document::new("d", "°C°C°C"));
        for chunk in &chunks {
            assert!(chunk.char_len() <= 3);
        }
        let rebuilt: String = chunks
            .iter()
            .enumerate()
            .map(|(i, c)| if i == 0 { c.text.clone() } else { c.text.chars().skip(1).collect() })
            .collect();
        assert_eq!(rebuilt, "°C°C°C");
    }

    #[test]
    fn chunking_is_deterministic() {
        let chunker = FixedSizeChunker::new(8, 3);
        let doc = Document::new("d", "one two three four five six");
        assert_eq!(chunker.chunk(&doc), chunker.chunk(&doc));
    }

    #[test]
    fn hash_changes_with_content() {
        assert_eq!(content_hash("a"), content_hash("a"));
        assert_ne!(content_hash("a"), content_hash("b"));
        assert_eq!(content_hash("").len(), 64);
    }

    #[test]
    fn overlap_not_smaller_than_size_still_terminates() {
        let chunker = FixedSizeChunker::new(3, 5);
        let chunks = chunker.chunk(&Document::new("d", "abcdef"));
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks.last().map(|c| c.text.as_str()), Some("def"));
    }
}
