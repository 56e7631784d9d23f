//! Error type shared by the codec, scanner, assembler and splicer

use crate::codec::Encoding;

/// Result alias for chunk operations
pub type ChunkResult<T> = Result<T, ChunkError>;

/// Structured, recoverable failure of a single chunk operation.
///
/// Line numbers carried here are 1-based, as a user would read them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkError {
    /// The requested encoding cannot hold the payload (e.g. `asis` for non-UTF-8 bytes)
    InvalidEncodingChoice { encoding: Encoding, reason: String },

    /// The chunk body could not be decoded
    CorruptPayload { label: Option<String>, reason: String },

    /// Decoded bytes do not match the stored digest
    ChecksumMismatch {
        label: Option<String>,
        expected: String,
        actual: String,
    },

    /// Header syntax error, duplicate option or nested fence
    MalformedHeader {
        line_number: Option<usize>,
        fragment: String,
        reason: String,
    },

    /// The document ended while a chunk was still open
    UnterminatedChunk {
        line_number: usize,
        label: Option<String>,
    },

    /// Incoherent parameter combination supplied by the caller
    InvalidArguments { reason: String },

    /// Splice target outside the document
    InvalidPosition { position: isize, len: usize },
}

impl ChunkError {
    pub(crate) fn malformed(fragment: impl Into<String>, reason: impl Into<String>) -> Self {
        ChunkError::MalformedHeader {
            line_number: None,
            fragment: fragment.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_args(reason: impl Into<String>) -> Self {
        ChunkError::InvalidArguments { reason: reason.into() }
    }

    /// Attach the chunk label to errors that carry one
    pub fn with_label(self, chunk_label: &str) -> Self {
        match self {
            ChunkError::CorruptPayload { label: None, reason } => ChunkError::CorruptPayload {
                label: Some(chunk_label.to_string()),
                reason,
            },
            ChunkError::ChecksumMismatch { label: None, expected, actual } => {
                ChunkError::ChecksumMismatch {
                    label: Some(chunk_label.to_string()),
                    expected,
                    actual,
                }
            }
            other => other,
        }
    }

    /// Attach a 1-based line number to header errors that lack one
    pub fn at_line(self, line: usize) -> Self {
        match self {
            ChunkError::MalformedHeader { line_number: None, fragment, reason } => {
                ChunkError::MalformedHeader {
                    line_number: Some(line),
                    fragment,
                    reason,
                }
            }
            other => other,
        }
    }
}

impl std::fmt::Display for ChunkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChunkError::InvalidEncodingChoice { encoding, reason } => {
                write!(f, "Invalid encoding choice '{}': {}", encoding, reason)
            }
            ChunkError::CorruptPayload { label, reason } => match label {
                Some(label) => write!(f, "Corrupt payload in chunk '{}': {}", label, reason),
                None => write!(f, "Corrupt payload: {}", reason),
            },
            ChunkError::ChecksumMismatch { label, expected, actual } => {
                let label = label.as_deref().unwrap_or("<unknown>");
                write!(
                    f,
                    "Checksum mismatch in chunk '{}': expected {}, got {}",
                    label, expected, actual
                )
            }
            ChunkError::MalformedHeader { line_number, fragment, reason } => match line_number {
                Some(line) => write!(f, "Malformed chunk header at line {}: {} ('{}')", line, reason, fragment),
                None => write!(f, "Malformed chunk header: {} ('{}')", reason, fragment),
            },
            ChunkError::UnterminatedChunk { line_number, label } => match label {
                Some(label) => write!(
                    f,
                    "Unterminated chunk '{}' opened at line {}",
                    label, line_number
                ),
                None => write!(f, "Unterminated chunk opened at line {}", line_number),
            },
            ChunkError::InvalidArguments { reason } => {
                write!(f, "Invalid arguments: {}", reason)
            }
            ChunkError::InvalidPosition { position, len } => {
                write!(f, "Invalid position: {} (document has {} lines)", position, len)
            }
        }
    }
}

impl std::error::Error for ChunkError {}
