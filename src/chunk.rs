//! Fixed-size text windowing with overlap.
//!
//! The embedding unit of work is a chunk: a `chunk_size`-character window of
//! a page's merged text, with `overlap` characters repeated between
//! consecutive windows so no sentence is ever split across a hard boundary
//! without context on at least one side. Windowing is character-based, not
//! byte-based, so multi-byte text never gets sliced mid-codepoint.
//!
//! Texts at or below the window size come back as a single chunk equal to
//! the input — including the empty string, which yields one empty chunk.
//! Callers that filter empty chunks from *output* must still count them in
//! their enqueue bookkeeping so flat result slices stay aligned.

/// Split `text` into overlapping windows of `chunk_size` characters.
///
/// Consecutive windows share `overlap` characters; the window start advances
/// by `chunk_size - overlap` each step, and the final window is truncated at
/// the end of the text.
///
/// `overlap` must be smaller than `chunk_size` (enforced by config
/// validation); equal or larger values would stall the window.
pub fn split_with_overlap(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    debug_assert!(overlap < chunk_size, "overlap must be < chunk_size");

    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= chunk_size {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + chunk_size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if start + chunk_size >= chars.len() {
            break;
        }
        start = start + chunk_size - overlap;
    }
    chunks
}
