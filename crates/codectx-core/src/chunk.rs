//! Recursive separator-priority text chunker.
//!
//! Splits text into overlapping chunks no larger than a target size
//! (measured in characters). Splitting prefers structural boundaries and
//! falls back to progressively finer separators only for pieces that are
//! still too large.
//!
//! # Algorithm
//!
//! 1. If the text fits in `size` characters, return it as a single chunk.
//! 2. Pick the first separator from the priority list that occurs in the
//!    text (the empty separator always matches and splits per character).
//! 3. Split on it, keeping the separator at the start of the following
//!    piece, so every piece is an exact slice of the input.
//! 4. Merge consecutive pieces that fit into windows of at most `size`
//!    characters. After emitting a window, drop leading pieces until at most
//!    `overlap` characters remain as shared context for the next window.
//! 5. Recurse with the remaining separators on any piece larger than
//!    `size`. A piece with no remaining separator is emitted whole.
//!
//! Every chunk records its byte range in the source, so consecutive chunks
//! can be stitched back together by skipping the overlapped prefix.
//!
//! # Example
//!
//! ```rust
//! use codectx_core::chunk::{chunk_text, ChunkParams};
//!
//! let chunks = chunk_text("fn main() {}\n", &ChunkParams::default());
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].text, "fn main() {}\n");
//! ```

use std::collections::VecDeque;
use std::ops::Range;

use crate::error::{Error, Result};

/// Default target chunk size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Default overlap between consecutive chunks in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Separators ordered from most to least meaningful: declarations,
/// comments, blank lines, lines, whitespace, then single characters.
pub const DEFAULT_SEPARATORS: &[&str] = &[
    "\nclass ",
    "\nfunction ",
    "\nexport ",
    "\nconst ",
    "\nlet ",
    "\nvar ",
    "\npub fn ",
    "\nfn ",
    "\nimpl ",
    "\nstruct ",
    "\nenum ",
    "\ntrait ",
    "\ndef ",
    "\n// ",
    "\n/* ",
    "\n# ",
    "\n\n",
    "\n",
    " ",
    "",
];

/// Suffix marker placed between a file path and its 1-based chunk ordinal.
pub const ORDINAL_MARKER: &str = "#chunk-";

/// Chunking parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkParams {
    /// Target maximum chunk size in characters.
    pub size: usize,
    /// Approximate characters shared between consecutive chunks.
    pub overlap: usize,
    /// Separator priority list.
    pub separators: Vec<String>,
}

impl ChunkParams {
    /// Create parameters with the default separator list.
    ///
    /// Fails if `size` is zero or `overlap` is not smaller than `size`.
    pub fn new(size: usize, overlap: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::Configuration("chunk size must be > 0".to_string()));
        }
        if overlap >= size {
            return Err(Error::Configuration(format!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                overlap, size
            )));
        }
        Ok(Self {
            size,
            overlap,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        })
    }

    pub fn with_separators(mut self, separators: Vec<String>) -> Self {
        self.separators = separators;
        self
    }
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// A chunk of text and its byte range in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub text: String,
    pub start: usize,
    pub end: usize,
}

impl TextChunk {
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Split `text` into ordered, overlapping chunks.
///
/// # Guarantees
///
/// - Empty text yields no chunks.
/// - Text of at most `params.size` characters yields exactly one chunk
///   equal to the input.
/// - No chunk exceeds `params.size` characters unless it is a single piece
///   with no remaining separator to split on.
/// - Chunk start offsets are strictly increasing and the chunks cover the
///   whole input.
/// - Deterministic.
pub fn chunk_text(text: &str, params: &ChunkParams) -> Vec<TextChunk> {
    if text.is_empty() {
        return Vec::new();
    }

    if text.chars().count() <= params.size {
        return vec![TextChunk {
            text: text.to_string(),
            start: 0,
            end: text.len(),
        }];
    }

    let mut ranges = Vec::new();
    split_recursive(text, 0..text.len(), &params.separators, params, &mut ranges);

    ranges
        .into_iter()
        .filter(|r| !r.is_empty())
        .map(|r| TextChunk {
            text: text[r.clone()].to_string(),
            start: r.start,
            end: r.end,
        })
        .collect()
}

fn split_recursive(
    text: &str,
    range: Range<usize>,
    separators: &[String],
    params: &ChunkParams,
    out: &mut Vec<Range<usize>>,
) {
    let slice = &text[range.clone()];

    let position = separators
        .iter()
        .position(|sep| sep.is_empty() || slice.contains(sep.as_str()));

    let (separator, remaining) = match position {
        Some(i) => (separators[i].as_str(), &separators[i + 1..]),
        None => {
            out.push(range);
            return;
        }
    };

    let mut fitting: Vec<(Range<usize>, usize)> = Vec::new();

    for piece in split_keep_separator(slice, separator, range.start) {
        let len = text[piece.clone()].chars().count();
        if len <= params.size {
            fitting.push((piece, len));
            continue;
        }

        if !fitting.is_empty() {
            merge_pieces(&fitting, params, out);
            fitting.clear();
        }

        if remaining.is_empty() {
            out.push(piece);
        } else {
            split_recursive(text, piece, remaining, params, out);
        }
    }

    if !fitting.is_empty() {
        merge_pieces(&fitting, params, out);
    }
}

/// Split `slice` on `separator`, attaching each separator to the piece that
/// follows it. Returned ranges are absolute (offset by `base`) and cover the
/// slice without gaps.
fn split_keep_separator(slice: &str, separator: &str, base: usize) -> Vec<Range<usize>> {
    if separator.is_empty() {
        return slice
            .char_indices()
            .map(|(i, c)| base + i..base + i + c.len_utf8())
            .collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (idx, _) in slice.match_indices(separator) {
        if idx > start {
            pieces.push(base + start..base + idx);
        }
        start = idx;
    }
    if start < slice.len() {
        pieces.push(base + start..base + slice.len());
    }
    pieces
}

/// Greedily merge contiguous pieces into windows of at most `params.size`
/// characters, carrying up to `params.overlap` characters between windows.
fn merge_pieces(pieces: &[(Range<usize>, usize)], params: &ChunkParams, out: &mut Vec<Range<usize>>) {
    let mut window: VecDeque<&(Range<usize>, usize)> = VecDeque::new();
    let mut total = 0usize;

    for piece in pieces {
        let len = piece.1;
        if total + len > params.size && !window.is_empty() {
            push_window(&window, out);
            while total > params.overlap || (total + len > params.size && total > 0) {
                match window.pop_front() {
                    Some(dropped) => total -= dropped.1,
                    None => break,
                }
            }
        }
        window.push_back(piece);
        total += len;
    }

    push_window(&window, out);
}

fn push_window(window: &VecDeque<&(Range<usize>, usize)>, out: &mut Vec<Range<usize>>) {
    if let (Some(first), Some(last)) = (window.front(), window.back()) {
        out.push(first.0.start..last.0.end);
    }
}

/// Origin path for chunk `ordinal` (1-based) of a document that produced
/// `total` chunks. Single-chunk documents keep the bare path.
pub fn origin_path(path: &str, ordinal: usize, total: usize) -> String {
    if total <= 1 {
        path.to_string()
    } else {
        format!("{}{}{}", path, ORDINAL_MARKER, ordinal)
    }
}

/// Strip a `#chunk-<n>` suffix, returning the source file path.
pub fn strip_chunk_ordinal(path: &str) -> &str {
    split_chunk_ordinal(path).0
}

/// Split an origin path into the file path and its chunk ordinal, if any.
pub fn split_chunk_ordinal(path: &str) -> (&str, Option<usize>) {
    if let Some((base, suffix)) = path.rsplit_once(ORDINAL_MARKER) {
        if !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(n) = suffix.parse::<usize>() {
                return (base, Some(n));
            }
        }
    }
    (path, None)
}

/// Whether a stored origin path belongs to an earlier version of `file`
/// that no longer exists now that `file` produces `total` chunks. With
/// `total == 0` every chunk of `file` is superseded.
pub fn is_superseded(path: &str, file: &str, total: usize) -> bool {
    match split_chunk_ordinal(path) {
        (base, _) if base != file => false,
        (_, None) => total != 1,
        (_, Some(n)) => total <= 1 || n > total,
    }
}
