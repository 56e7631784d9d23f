//! Payload codec: chunk body encoding, decoding and checksums
//!
//! Two encodings are supported:
//!
//! - `asis`: the payload is UTF-8 text stored verbatim, one body line per text
//!   line. Line endings are normalized to `\n` and a single final newline is
//!   treated as a terminator; decoding terminates every line with `\n`.
//! - `base64`: standard alphabet with padding, wrapped at a fixed width.
//!
//! Checksums are MD5 hex digests. For `asis` payloads the digest covers the
//! normalized text (what decoding returns); for `base64` it covers the
//! original bytes.

use crate::error::{ChunkError, ChunkResult};
use anyhow::Context;
use base64::Engine;
use md5::{Digest, Md5};
use std::fmt::Write as _;
use std::io::Read;

/// Default base64 line width
pub const DEFAULT_LINE_WIDTH: usize = 76;

/// Payload content domain, as recorded in the `format` option
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Text,
    Binary,
}

impl Format {
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Text => "text",
            Format::Binary => "binary",
        }
    }

    /// Encoding used when only the format is known
    pub fn default_encoding(&self) -> Encoding {
        match self {
            Format::Text => Encoding::Asis,
            Format::Binary => Encoding::Base64,
        }
    }
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Format {
    type Err = ChunkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Format::Text),
            "binary" => Ok(Format::Binary),
            other => Err(ChunkError::malformed(
                other,
                "format must be \"text\" or \"binary\"",
            )),
        }
    }
}

/// Body encoding, as recorded in the `encoding` option
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Asis,
    Base64,
}

impl Encoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Asis => "asis",
            Encoding::Base64 => "base64",
        }
    }
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Encoding {
    type Err = ChunkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asis" => Ok(Encoding::Asis),
            "base64" => Ok(Encoding::Base64),
            other => Err(ChunkError::malformed(
                other,
                "encoding must be \"asis\" or \"base64\"",
            )),
        }
    }
}

/// Encoded body lines together with the digest of the payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPayload {
    pub encoding: Encoding,
    pub lines: Vec<String>,
    pub md5sum: String,
}

/// Encodes and decodes chunk bodies
#[derive(Debug, Clone)]
pub struct Codec {
    line_width: usize,
}

impl Codec {
    /// Create a codec with the default base64 line width
    pub fn new() -> Self {
        Self { line_width: DEFAULT_LINE_WIDTH }
    }

    /// Set the base64 line width, rounded down to a multiple of 4 (minimum 4)
    pub fn with_line_width(mut self, width: usize) -> Self {
        self.line_width = (width / 4 * 4).max(4);
        self
    }

    pub fn line_width(&self) -> usize {
        self.line_width
    }

    /// Input bytes per base64 line
    fn block_len(&self) -> usize {
        self.line_width / 4 * 3
    }

    /// Encode a payload into body lines
    pub fn encode(&self, data: &[u8], encoding: Encoding) -> ChunkResult<Vec<String>> {
        match encoding {
            Encoding::Asis => Ok(text_lines(as_text(data)?)),
            Encoding::Base64 => Ok(data
                .chunks(self.block_len())
                .map(|block| base64::engine::general_purpose::STANDARD.encode(block))
                .collect()),
        }
    }

    /// Encode a payload and compute the digest that `decode` output will match
    pub fn encode_with_checksum(&self, data: &[u8], encoding: Encoding) -> ChunkResult<EncodedPayload> {
        let lines = self.encode(data, encoding)?;
        let md5sum = match encoding {
            Encoding::Asis => checksum(&join_text_lines(&lines)),
            Encoding::Base64 => checksum(data),
        };
        Ok(EncodedPayload { encoding, lines, md5sum })
    }

    /// Encode from a reader.
    ///
    /// Base64 input is consumed in line-sized blocks and hashed on the way.
    /// Text input has to be read whole, since it must be validated as UTF-8.
    pub fn encode_reader<R: Read>(&self, mut reader: R, encoding: Encoding) -> anyhow::Result<EncodedPayload> {
        match encoding {
            Encoding::Asis => {
                let mut data = Vec::new();
                reader
                    .read_to_end(&mut data)
                    .context("Failed to read text payload")?;
                Ok(self.encode_with_checksum(&data, encoding)?)
            }
            Encoding::Base64 => {
                let mut hasher = Md5::new();
                let mut lines = Vec::new();
                let mut block = vec![0u8; self.block_len()];
                loop {
                    let filled = read_block(&mut reader, &mut block)
                        .context("Failed to read binary payload")?;
                    if filled == 0 {
                        break;
                    }
                    hasher.update(&block[..filled]);
                    lines.push(base64::engine::general_purpose::STANDARD.encode(&block[..filled]));
                    if filled < block.len() {
                        break;
                    }
                }
                Ok(EncodedPayload {
                    encoding,
                    lines,
                    md5sum: to_hex(&hasher.finalize()),
                })
            }
        }
    }

    /// Decode body lines back into the payload
    pub fn decode<S: AsRef<str>>(&self, lines: &[S], encoding: Encoding) -> ChunkResult<Vec<u8>> {
        match encoding {
            Encoding::Asis => Ok(join_text_lines(lines)),
            Encoding::Base64 => {
                let compact: String = lines
                    .iter()
                    .flat_map(|line| line.as_ref().chars())
                    .filter(|c| !c.is_ascii_whitespace())
                    .collect();
                base64::engine::general_purpose::STANDARD
                    .decode(compact.as_bytes())
                    .map_err(|e| ChunkError::CorruptPayload {
                        label: None,
                        reason: format!("invalid base64: {}", e),
                    })
            }
        }
    }

    /// Canonical form of a text payload, i.e. what an `asis` round trip yields
    pub fn normalize_text(&self, data: &[u8]) -> ChunkResult<Vec<u8>> {
        Ok(join_text_lines(&text_lines(as_text(data)?)))
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::new()
    }
}

fn as_text(data: &[u8]) -> ChunkResult<&str> {
    std::str::from_utf8(data).map_err(|e| ChunkError::InvalidEncodingChoice {
        encoding: Encoding::Asis,
        reason: format!("payload is not valid UTF-8 text ({})", e),
    })
}

fn text_lines(text: &str) -> Vec<String> {
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
    if normalized.is_empty() {
        return Vec::new();
    }
    let body = normalized.strip_suffix('\n').unwrap_or(&normalized);
    body.split('\n').map(str::to_string).collect()
}

fn join_text_lines<S: AsRef<str>>(lines: &[S]) -> Vec<u8> {
    let mut out = Vec::new();
    for line in lines {
        out.extend_from_slice(line.as_ref().as_bytes());
        out.push(b'\n');
    }
    out
}

fn read_block<R: Read>(reader: &mut R, block: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < block.len() {
        match reader.read(&mut block[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

/// MD5 digest of a buffer as lower-case hex
pub fn checksum(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    to_hex(&hasher.finalize())
}

/// Compare a buffer against an expected hex digest (case-insensitive)
pub fn verify(data: &[u8], expected: &str) -> ChunkResult<()> {
    let actual = checksum(data);
    if actual.eq_ignore_ascii_case(expected.trim()) {
        Ok(())
    } else {
        Err(ChunkError::ChecksumMismatch {
            label: None,
            expected: expected.trim().to_string(),
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asis_single_line() {
        let codec = Codec::new();
        assert_eq!(codec.encode(b"abc", Encoding::Asis).unwrap(), vec!["abc"]);
    }

    #[test]
    fn test_asis_trailing_newline_is_terminator() {
        let codec = Codec::new();
        assert_eq!(codec.encode(b"abc\n", Encoding::Asis).unwrap(), vec!["abc"]);
        assert_eq!(codec.decode(&["abc"], Encoding::Asis).unwrap(), b"abc\n");
    }

    #[test]
    fn test_asis_without_trailing_newline_gains_one() {
        let codec = Codec::new();
        let lines = codec.encode(b"one\ntwo", Encoding::Asis).unwrap();
        assert_eq!(lines, vec!["one", "two"]);
        assert_eq!(codec.decode(&lines, Encoding::Asis).unwrap(), b"one\ntwo\n");
    }

    #[test]
    fn test_asis_blank_lines_survive() {
        let codec = Codec::new();
        let lines = codec.encode(b"a\n\n\nb\n\n", Encoding::Asis).unwrap();
        assert_eq!(lines, vec!["a", "", "", "b", ""]);
        assert_eq!(codec.decode(&lines, Encoding::Asis).unwrap(), b"a\n\n\nb\n\n");
    }

    #[test]
    fn test_asis_crlf_normalized() {
        let codec = Codec::new();
        let lines = codec.encode(b"a\r\nb\rc\r\n", Encoding::Asis).unwrap();
        assert_eq!(lines, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_asis_empty() {
        let codec = Codec::new();
        assert!(codec.encode(b"", Encoding::Asis).unwrap().is_empty());
        let none: [&str; 0] = [];
        assert!(codec.decode(&none, Encoding::Asis).unwrap().is_empty());
    }

    #[test]
    fn test_asis_rejects_binary() {
        let codec = Codec::new();
        let err = codec.encode(&[0x00, 0xFF, 0x10], Encoding::Asis).unwrap_err();
        assert!(matches!(
            err,
            ChunkError::InvalidEncodingChoice { encoding: Encoding::Asis, .. }
        ));
    }

    #[test]
    fn test_base64_roundtrip_binary() {
        let codec = Codec::new();
        let data = [0x00, 0xFF, 0x10];
        let lines = codec.encode(&data, Encoding::Base64).unwrap();
        assert_eq!(lines, vec!["AP8Q"]);
        assert_eq!(codec.decode(&lines, Encoding::Base64).unwrap(), data);
    }

    #[test]
    fn test_base64_wraps_at_width() {
        let codec = Codec::new().with_line_width(8);
        let data: Vec<u8> = (0u8..20).collect();
        let lines = codec.encode(&data, Encoding::Base64).unwrap();
        assert!(lines.iter().all(|l| l.len() <= 8 && !l.is_empty()));
        assert!(lines[..lines.len() - 1].iter().all(|l| l.len() == 8));
        assert_eq!(codec.decode(&lines, Encoding::Base64).unwrap(), data);
    }

    #[test]
    fn test_line_width_rounding() {
        assert_eq!(Codec::new().with_line_width(10).line_width(), 8);
        assert_eq!(Codec::new().with_line_width(1).line_width(), 4);
    }

    #[test]
    fn test_base64_decode_ignores_whitespace() {
        let codec = Codec::new();
        let decoded = codec.decode(&["  /9j/ ", "", "\t"], Encoding::Base64).unwrap();
        assert_eq!(decoded, vec![0xFF, 0xD8, 0xFF]);
    }

    #[test]
    fn test_base64_decode_corrupt() {
        let codec = Codec::new();
        let err = codec.decode(&["not*base64!"], Encoding::Base64).unwrap_err();
        assert!(matches!(err, ChunkError::CorruptPayload { .. }));
    }

    #[test]
    fn test_encode_reader_matches_encode() {
        let codec = Codec::new().with_line_width(12);
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let streamed = codec.encode_reader(&data[..], Encoding::Base64).unwrap();
        assert_eq!(streamed.lines, codec.encode(&data, Encoding::Base64).unwrap());
        assert_eq!(streamed.md5sum, checksum(&data));
    }

    #[test]
    fn test_checksum_known_value() {
        assert_eq!(checksum(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(checksum(b"abc"), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn test_verify_case_insensitive() {
        assert!(verify(b"abc", "900150983CD24FB0D6963F7D28E17F72").is_ok());
    }

    #[test]
    fn test_verify_mismatch() {
        let err = verify(b"abd", "900150983cd24fb0d6963f7d28e17f72").unwrap_err();
        match err {
            ChunkError::ChecksumMismatch { expected, actual, .. } => {
                assert_eq!(expected, "900150983cd24fb0d6963f7d28e17f72");
                assert_eq!(actual, checksum(b"abd"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_asis_checksum_covers_normalized_text() {
        let codec = Codec::new();
        let encoded = codec.encode_with_checksum(b"abc", Encoding::Asis).unwrap();
        let decoded = codec.decode(&encoded.lines, Encoding::Asis).unwrap();
        assert!(verify(&decoded, &encoded.md5sum).is_ok());
        assert_eq!(codec.normalize_text(b"abc").unwrap(), decoded);
    }

    #[test]
    fn test_format_and_encoding_parse() {
        assert_eq!("binary".parse::<Format>().unwrap(), Format::Binary);
        assert_eq!("asis".parse::<Encoding>().unwrap(), Encoding::Asis);
        assert!("hex".parse::<Encoding>().is_err());
    }
}
