//! Word-window chunking for embedding.

/// Window size in whitespace-separated tokens.
pub const CHUNK_SIZE_WORDS: usize = 500;
/// Windows advance by `CHUNK_SIZE_WORDS - CHUNK_OVERLAP_WORDS` tokens.
pub const CHUNK_OVERLAP_WORDS: usize = 50;

#[derive(Debug, Clone)]
pub struct Chunk {
    pub text: String,
    /// Byte offset of the chunk's first word in the source text.
    pub char_start: usize,
    /// Byte offset one past the chunk's last word.
    pub char_end: usize,
    pub word_count: usize,
}

/// Split `content` into overlapping word windows. Empty windows are dropped,
/// so empty or whitespace-only input yields no chunks.
pub fn chunk_words(content: &str) -> Vec<Chunk> {
    chunk_words_with(content, CHUNK_SIZE_WORDS, CHUNK_OVERLAP_WORDS)
}

pub fn chunk_words_with(content: &str, chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    assert!(chunk_size > overlap, "chunk size must exceed overlap");

    // Token positions are tracked so chunk boundaries can be recorded as
    // character offsets into the stored text.
    let words: Vec<(usize, &str)> = content
        .split_whitespace()
        .map(|w| (w.as_ptr() as usize - content.as_ptr() as usize, w))
        .collect();

    let step = chunk_size - overlap;
    let mut chunks = Vec::new();

    let mut i = 0;
    while i < words.len() {
        let window = &words[i..(i + chunk_size).min(words.len())];
        let text = window.iter().map(|(_, w)| *w).collect::<Vec<_>>().join(" ");
        if !text.trim().is_empty() {
            let (first_off, _) = window[0];
            let (last_off, last_word) = window[window.len() - 1];
            chunks.push(Chunk {
                text,
                char_start: first_off,
                char_end: last_off + last_word.len(),
                word_count: window.len(),
            });
        }
        i += step;
    }

    chunks
}
