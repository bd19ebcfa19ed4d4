//! Sentence-aware text chunking

use unicode_segmentation::UnicodeSegmentation;

use crate::config::ChunkingConfig;

/// A chunk of document text and its position in the document
#[derive(Debug, Clone, PartialEq)]
pub struct TextPiece {
    pub index: usize,
    pub content: String,
    /// Byte offsets into the source text
    pub start: usize,
    pub end: usize,
}

/// Text chunker with configurable size and overlap
pub struct TextChunker {
    /// Target chunk size in bytes
    chunk_size: usize,
    /// Overlap between chunks
    overlap: usize,
    /// Minimum chunk size
    min_size: usize,
}

impl TextChunker {
    /// Create a new chunker
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        Self {
            chunk_size,
            overlap,
            min_size: 20,
        }
    }

    pub fn from_config(config: &ChunkingConfig) -> Self {
        Self::new(config.chunk_size, config.chunk_overlap).with_min_size(config.min_chunk_size)
    }

    pub fn with_min_size(mut self, min_size: usize) -> Self {
        self.min_size = min_size;
        self
    }

    /// Split text into overlapping chunks along sentence boundaries
    pub fn chunk(&self, text: &str) -> Vec<TextPiece> {
        let mut pieces = Vec::new();
        let mut current = String::new();
        let mut current_start = 0usize;
        let mut pos = 0usize;

        for sentence in text.split_sentence_bounds() {
            if !current.is_empty() && current.len() + sentence.len() > self.chunk_size {
                self.push_piece(&mut pieces, &current, current_start, pos);

                // Start new chunk with overlap
                current = self.overlap_text(&current);
                current_start = pos.saturating_sub(current.len());
            }

            current.push_str(sentence);
            pos += sentence.len();
        }

        self.push_piece(&mut pieces, &current, current_start, pos);
        pieces
    }

    fn push_piece(&self, pieces: &mut Vec<TextPiece>, text: &str, start: usize, end: usize) {
        let trimmed = text.trim();
        if trimmed.len() < self.min_size {
            return;
        }
        pieces.push(TextPiece {
            index: pieces.len(),
            content: trimmed.to_string(),
            start,
            end,
        });
    }

    /// Tail of a chunk carried into the next one
    fn overlap_text(&self, text: &str) -> String {
        if self.overlap == 0 {
            return String::new();
        }
        if text.len() <= self.overlap {
            return text.to_string();
        }

        let mut start = text.len() - self.overlap;
        while start > 0 && !text.is_char_boundary(start) {
            start -= 1;
        }
        let tail = &text[start..];

        // Prefer a sentence, then a word boundary
        if let Some(pos) = tail.find(". ") {
            return tail[pos + 2..].to_string();
        }
        if let Some(pos) = tail.find(' ') {
            return tail[pos + 1..].to_string();
        }
        tail.to_string()
    }
}
