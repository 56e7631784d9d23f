//! Document chunk scanner
//!
//! Walks a document's lines once, front to back, and yields every data chunk
//! it finds. Fenced blocks of other engines are skipped whole, so a chunk
//! fence written inside, say, an R code block is never picked up.

use crate::config::ChunkConfig;
use crate::error::{ChunkError, ChunkResult};
use crate::options::{self, ChunkOptions, OpeningFence, UNNAMED_LABEL_PREFIX};

/// Half-open, 0-based line range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LineRange {
    pub start: usize,
    pub end: usize,
}

impl LineRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn contains(&self, line: usize) -> bool {
        self.start <= line && line < self.end
    }
}

impl std::fmt::Display for LineRange {
    /// 1-based inclusive form, as shown to users
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.start + 1, self.end)
    }
}

/// A data chunk found in a document snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Label from the header, or a synthesized `unnamed-chunk-N`
    pub label: String,
    /// Whether `label` was synthesized
    pub unnamed: bool,
    pub options: ChunkOptions,
    /// Body lines exactly as they appear between the fences
    pub body: Vec<String>,
    /// Lines covered by the chunk, fences included
    pub range: LineRange,
    /// Backtick count of the opening fence
    pub fence_len: usize,
}

/// Scans documents for chunks of one engine
#[derive(Debug, Clone)]
pub struct Scanner {
    engine: String,
}

impl Scanner {
    /// Create a scanner for the default `data` engine
    pub fn new() -> Self {
        Self::with_config(&ChunkConfig::default())
    }

    pub fn with_config(config: &ChunkConfig) -> Self {
        Self::with_engine(config.engine.clone())
    }

    pub fn with_engine(engine: impl Into<String>) -> Self {
        Self { engine: engine.into() }
    }

    pub fn engine(&self) -> &str {
        &self.engine
    }

    /// Lazily iterate over the chunks of a document snapshot.
    ///
    /// Each call starts a fresh pass, so the same snapshot always yields the
    /// same sequence. Ranges are only valid against the snapshot scanned.
    pub fn scan<'a, S: AsRef<str>>(&'a self, lines: &'a [S]) -> Chunks<'a, S> {
        Chunks {
            engine: &self.engine,
            lines,
            pos: 0,
            unnamed: 0,
            done: false,
        }
    }

    /// Collect all chunks, failing on the first error
    pub fn scan_all<S: AsRef<str>>(&self, lines: &[S]) -> ChunkResult<Vec<Chunk>> {
        self.scan(lines).collect()
    }

    /// Find a chunk by label
    pub fn find<S: AsRef<str>>(&self, lines: &[S], label: &str) -> ChunkResult<Option<Chunk>> {
        for chunk in self.scan(lines) {
            let chunk = chunk?;
            if chunk.label == label {
                return Ok(Some(chunk));
            }
        }
        Ok(None)
    }
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over the chunks of a document, see [`Scanner::scan`].
///
/// A malformed option list fails only its own chunk; the scan resumes after
/// that chunk's closing fence. An unterminated or nested fence ends the scan.
pub struct Chunks<'a, S> {
    engine: &'a str,
    lines: &'a [S],
    pos: usize,
    unnamed: usize,
    done: bool,
}

impl<'a, S: AsRef<str>> Chunks<'a, S> {
    fn line(&self, idx: usize) -> &'a str {
        let lines: &'a [S] = self.lines;
        lines[idx].as_ref()
    }

    /// Index of the closing fence for a foreign block opened at `open`
    fn skip_foreign(&self, open: usize, fence_len: usize) -> Option<usize> {
        (open + 1..self.lines.len()).find(|&i| options::is_closing_fence(self.line(i), fence_len))
    }

    fn read_chunk(&mut self, open: usize, fence: OpeningFence<'a>) -> ChunkResult<Chunk> {
        let header = options::parse_params(self.engine, fence.params).map_err(|e| e.at_line(open + 1));
        let header_label = header.as_ref().ok().and_then(|h| h.label.clone());

        let mut close = None;
        for i in open + 1..self.lines.len() {
            let line = self.line(i);
            if options::is_closing_fence(line, fence.fence_len) {
                close = Some(i);
                break;
            }
            if let Some(inner) = OpeningFence::parse(line) {
                if inner.engine == Some(self.engine) && inner.fence_len >= fence.fence_len {
                    self.done = true;
                    return Err(ChunkError::MalformedHeader {
                        line_number: Some(i + 1),
                        fragment: line.trim().to_string(),
                        reason: format!("nested chunk fence inside chunk opened at line {}", open + 1),
                    });
                }
            }
        }

        let Some(close) = close else {
            self.done = true;
            return Err(ChunkError::UnterminatedChunk {
                line_number: open + 1,
                label: header_label,
            });
        };
        self.pos = close + 1;

        let header = header?;
        let (label, unnamed) = match header.label {
            Some(label) => (label, false),
            None => {
                self.unnamed += 1;
                (format!("{}{}", UNNAMED_LABEL_PREFIX, self.unnamed), true)
            }
        };

        log::debug!(
            "found chunk '{}' at lines {}-{}",
            label,
            open + 1,
            close + 1
        );

        Ok(Chunk {
            label,
            unnamed,
            options: header.options,
            body: (open + 1..close).map(|i| self.line(i).to_string()).collect(),
            range: LineRange::new(open, close + 1),
            fence_len: fence.fence_len,
        })
    }
}

impl<'a, S: AsRef<str>> Iterator for Chunks<'a, S> {
    type Item = ChunkResult<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done && self.pos < self.lines.len() {
            let open = self.pos;
            let Some(fence) = OpeningFence::parse(self.line(open)) else {
                self.pos += 1;
                continue;
            };

            if fence.engine == Some(self.engine) {
                return Some(self.read_chunk(open, fence));
            }

            match self.skip_foreign(open, fence.fence_len) {
                Some(close) => self.pos = close + 1,
                None => {
                    log::debug!("unterminated foreign fence at line {}, rest of document skipped", open + 1);
                    self.done = true;
                }
            }
        }
        None
    }
}
