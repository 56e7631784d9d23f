//! Splicing chunks into and out of a document's lines
//!
//! Documents are plain line vectors. Every operation returns a new vector and
//! leaves the input untouched.

use crate::error::{ChunkError, ChunkResult};
use crate::scanner::LineRange;

/// Split document text into lines, accepting `\n` and `\r\n` endings
pub fn split_lines(text: &str) -> Vec<String> {
    text.lines().map(str::to_string).collect()
}

/// Line terminator used by a document: `\r\n` if any line ends with it, else `\n`
pub fn line_ending(text: &str) -> &'static str {
    if text.contains("\r\n") {
        "\r\n"
    } else {
        "\n"
    }
}

/// Join lines back into document text with `\n` endings
pub fn join_lines<S: AsRef<str>>(lines: &[S], trailing_newline: bool) -> String {
    join_lines_with(lines, "\n", trailing_newline)
}

/// Join lines back into document text with the given line ending
pub fn join_lines_with<S: AsRef<str>>(lines: &[S], ending: &str, trailing_newline: bool) -> String {
    let mut out = lines
        .iter()
        .map(|l| l.as_ref())
        .collect::<Vec<_>>()
        .join(ending);
    if trailing_newline && !lines.is_empty() {
        out.push_str(ending);
    }
    out
}

/// Insert `chunk` before line `position` (0-based).
///
/// Positions past the end append; negative positions are rejected.
pub fn insert_at<S: AsRef<str>, T: AsRef<str>>(
    lines: &[S],
    position: isize,
    chunk: &[T],
) -> ChunkResult<Vec<String>> {
    if position < 0 {
        return Err(ChunkError::InvalidPosition { position, len: lines.len() });
    }
    let at = (position as usize).min(lines.len());

    let mut out = Vec::with_capacity(lines.len() + chunk.len());
    out.extend(lines[..at].iter().map(|l| l.as_ref().to_string()));
    out.extend(chunk.iter().map(|l| l.as_ref().to_string()));
    out.extend(lines[at..].iter().map(|l| l.as_ref().to_string()));
    Ok(out)
}

/// Sort ranges and merge the ones that overlap or touch. Empty ranges are dropped.
pub fn merge_ranges(ranges: &[LineRange]) -> Vec<LineRange> {
    let mut sorted: Vec<LineRange> = ranges.iter().copied().filter(|r| !r.is_empty()).collect();
    sorted.sort();

    let mut merged: Vec<LineRange> = Vec::with_capacity(sorted.len());
    for range in sorted {
        match merged.last_mut() {
            Some(last) if range.start <= last.end => last.end = last.end.max(range.end),
            _ => merged.push(range),
        }
    }
    merged
}

/// Remove line ranges in one pass.
///
/// Ranges may overlap or come in any order. Returns the new lines and the
/// index where the first removed span started (where a cursor would land),
/// or `None` when nothing was removed.
pub fn remove_ranges<S: AsRef<str>>(
    lines: &[S],
    ranges: &[LineRange],
) -> ChunkResult<(Vec<String>, Option<usize>)> {
    for range in ranges {
        if range.start > range.end || range.end > lines.len() {
            let position = if range.start > lines.len() { range.start } else { range.end };
            return Err(ChunkError::InvalidPosition {
                position: position as isize,
                len: lines.len(),
            });
        }
    }

    let merged = merge_ranges(ranges);
    let first = merged.first().map(|r| r.start);

    let mut out = Vec::with_capacity(lines.len());
    let mut spans = merged.iter().peekable();
    for (idx, line) in lines.iter().enumerate() {
        while spans.peek().is_some_and(|r| r.end <= idx) {
            spans.next();
        }
        if spans.peek().is_some_and(|r| r.contains(idx)) {
            continue;
        }
        out.push(line.as_ref().to_string());
    }

    if let Some(start) = first {
        log::debug!(
            "removed {} lines in {} spans, first at line {}",
            lines.len() - out.len(),
            merged.len(),
            start + 1
        );
    }
    Ok((out, first))
}
