//! Render-time chunk loading: decode, verify and decrypt a scanned chunk
//!
//! This is the work a host document engine does for each data chunk. The
//! loader never touches the file system; writing `output.file` targets or
//! binding `output.var` values is left to the caller.

use crate::codec::{self, Codec, Encoding, Format};
use crate::config::ChunkConfig;
use crate::error::{ChunkError, ChunkResult};
use crate::scanner::{Chunk, Scanner};

/// Decrypts payloads of chunks that carry a `decrypt` option
pub trait Decryptor {
    /// `method` is the unquoted `decrypt` value, `ops` the raw `decrypt.ops` value
    fn decrypt(&self, method: &str, ops: Option<&str>, data: &[u8]) -> ChunkResult<Vec<u8>>;
}

/// Decoded payload of one chunk, with its output targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedChunk {
    pub label: String,
    pub format: Format,
    pub data: Vec<u8>,
    pub output_var: Option<String>,
    pub output_file: Option<String>,
    /// Raw loader expression for `output_var`
    pub loader_function: Option<String>,
    pub echo: bool,
    /// Whether a stored checksum was checked
    pub verified: bool,
}

impl LoadedChunk {
    /// Payload as text, if it is valid UTF-8
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }
}

/// Loads chunk payloads
pub struct Loader<'a> {
    codec: Codec,
    scanner: Scanner,
    verify: bool,
    decryptor: Option<&'a dyn Decryptor>,
}

impl<'a> Loader<'a> {
    pub fn new() -> Self {
        Self::with_config(&ChunkConfig::default())
    }

    pub fn with_config(config: &ChunkConfig) -> Self {
        Self {
            codec: config.codec(),
            scanner: Scanner::with_config(config),
            verify: true,
            decryptor: None,
        }
    }

    /// Enable or disable checksum verification (enabled by default)
    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    pub fn with_decryptor(mut self, decryptor: &'a dyn Decryptor) -> Self {
        self.decryptor = Some(decryptor);
        self
    }

    /// Decode one chunk, verifying its checksum when one is stored
    pub fn load(&self, chunk: &Chunk) -> ChunkResult<LoadedChunk> {
        self.load_inner(chunk).map_err(|e| e.with_label(&chunk.label))
    }

    fn load_inner(&self, chunk: &Chunk) -> ChunkResult<LoadedChunk> {
        let options = &chunk.options;
        let format = options.format()?.unwrap_or(Format::Text);
        let encoding = match options.encoding()? {
            Some(encoding) => encoding,
            None => format.default_encoding(),
        };
        if format == Format::Binary && encoding == Encoding::Asis {
            return Err(ChunkError::InvalidEncodingChoice {
                encoding,
                reason: "binary chunks must be base64 encoded".to_string(),
            });
        }
        if options.loader_function().is_some() && options.output_var().is_none() {
            return Err(ChunkError::invalid_args(
                "loader.function is set without output.var",
            ));
        }

        let mut data = self.codec.decode(&chunk.body, encoding)?;

        // The stored checksum covers the payload as assembled, before decryption.
        let mut verified = false;
        if let Some(expected) = options.md5sum() {
            if self.verify {
                codec::verify(&data, &expected)?;
                verified = true;
            } else {
                log::warn!("checksum verification skipped for chunk '{}'", chunk.label);
            }
        }

        if let Some(method) = options.decrypt() {
            let decryptor = self.decryptor.ok_or_else(|| {
                ChunkError::invalid_args(format!(
                    "chunk is encrypted with '{}' but no decryptor is available",
                    method
                ))
            })?;
            data = decryptor.decrypt(&method, options.get("decrypt.ops"), &data)?;
        }

        Ok(LoadedChunk {
            label: chunk.label.clone(),
            format,
            data,
            output_var: options.output_var(),
            output_file: options.output_file(),
            loader_function: options.loader_function().map(str::to_string),
            echo: options.echo()?.unwrap_or(false),
            verified,
        })
    }

    /// Load every chunk of a document.
    ///
    /// Each chunk gets its own result so one bad chunk does not prevent the
    /// others from loading. Scan errors appear in sequence as well.
    pub fn load_document<S: AsRef<str>>(&self, lines: &[S]) -> Vec<ChunkResult<LoadedChunk>> {
        self.scanner
            .scan(lines)
            .map(|chunk| chunk.and_then(|chunk| self.load(&chunk)))
            .collect()
    }
}

impl Default for Loader<'_> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::{Assembler, ChunkParams};

    fn scan_one(lines: &[String]) -> Chunk {
        Scanner::new().scan_all(lines).unwrap().remove(0)
    }

    struct XorDecryptor;

    impl Decryptor for XorDecryptor {
        fn decrypt(&self, method: &str, _ops: Option<&str>, data: &[u8]) -> ChunkResult<Vec<u8>> {
            if method != "xor" {
                return Err(ChunkError::CorruptPayload {
                    label: None,
                    reason: format!("unknown method {}", method),
                });
            }
            Ok(data.iter().map(|b| b ^ 0x5a).collect())
        }
    }

    #[test]
    fn test_load_text_chunk() {
        let params = ChunkParams {
            label: Some("notes".into()),
            output_var: Some("notes".into()),
            echo: Some(true),
            md5sum: true,
            ..ChunkParams::default()
        };
        let lines = Assembler::new().assemble(b"hello\nworld", &params).unwrap();
        let loaded = Loader::new().load(&scan_one(&lines)).unwrap();
        assert_eq!(loaded.text(), Some("hello\nworld\n"));
        assert_eq!(loaded.format, Format::Text);
        assert_eq!(loaded.output_var.as_deref(), Some("notes"));
        assert!(loaded.echo);
        assert!(loaded.verified);
    }

    #[test]
    fn test_load_binary_chunk_defaults_to_base64() {
        let lines: Vec<String> = ["```{data raw, format=\"binary\"}", "AP8Q", "```"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let loaded = Loader::new().load(&scan_one(&lines)).unwrap();
        assert_eq!(loaded.data, vec![0x00, 0xFF, 0x10]);
        assert!(!loaded.verified);
    }

    #[test]
    fn test_checksum_mismatch_names_chunk() {
        let lines: Vec<String> = [
            "```{data raw, format=\"binary\", md5sum=\"00000000000000000000000000000000\"}",
            "AP8Q",
            "```",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let err = Loader::new().load(&scan_one(&lines)).unwrap_err();
        match err {
            ChunkError::ChecksumMismatch { label, expected, actual } => {
                assert_eq!(label.as_deref(), Some("raw"));
                assert_eq!(expected, "00000000000000000000000000000000");
                assert_eq!(actual, codec::checksum(&[0x00, 0xFF, 0x10]));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_verification_opt_out() {
        let lines: Vec<String> = [
            "```{data raw, format=\"binary\", md5sum=\"00000000000000000000000000000000\"}",
            "AP8Q",
            "```",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let loaded = Loader::new().with_verify(false).load(&scan_one(&lines)).unwrap();
        assert!(!loaded.verified);
    }

    #[test]
    fn test_corrupt_payload_names_chunk() {
        let lines: Vec<String> = ["```{data bad, encoding=\"base64\"}", "@@@@", "```"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let err = Loader::new().load(&scan_one(&lines)).unwrap_err();
        assert!(err.to_string().contains("chunk 'bad'"));
    }

    #[test]
    fn test_encrypted_chunk_requires_decryptor() {
        let encrypted: Vec<u8> = b"secret".iter().map(|b| b ^ 0x5a).collect();
        let params = ChunkParams {
            label: Some("s".into()),
            format: Some(Format::Binary),
            extra_options: Some("decrypt=\"xor\"".into()),
            ..ChunkParams::default()
        };
        let lines = Assembler::new().assemble(&encrypted, &params).unwrap();
        let chunk = scan_one(&lines);

        assert!(matches!(
            Loader::new().load(&chunk).unwrap_err(),
            ChunkError::InvalidArguments { .. }
        ));

        let decryptor = XorDecryptor;
        let loaded = Loader::new().with_decryptor(&decryptor).load(&chunk).unwrap();
        assert_eq!(loaded.data, b"secret");
    }

    #[test]
    fn test_encrypted_chunk_with_checksum() {
        let encrypted: Vec<u8> = b"secret".iter().map(|b| b ^ 0x5a).collect();
        let params = ChunkParams {
            label: Some("s".into()),
            format: Some(Format::Binary),
            md5sum: true,
            extra_options: Some("decrypt=\"xor\"".into()),
            ..ChunkParams::default()
        };
        let lines = Assembler::new().assemble(&encrypted, &params).unwrap();
        let chunk = scan_one(&lines);
        assert_eq!(chunk.options.md5sum(), Some(codec::checksum(&encrypted)));

        let decryptor = XorDecryptor;
        let loaded = Loader::new().with_decryptor(&decryptor).load(&chunk).unwrap();
        assert_eq!(loaded.data, b"secret");
        assert!(loaded.verified);
    }

    #[test]
    fn test_tampered_encrypted_chunk_fails_before_decrypting() {
        let lines: Vec<String> = [
            "```{data s, format=\"binary\", md5sum=\"00000000000000000000000000000000\", decrypt=\"xor\"}",
            "AP8Q",
            "```",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let err = Loader::new().load(&scan_one(&lines)).unwrap_err();
        assert!(matches!(err, ChunkError::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_load_document_isolates_failures() {
        let text = "```{data a}\nfine\n```\n\n```{data b, encoding=\"base64\"}\n!!!\n```\n\n```{data c}\nalso fine\n```";
        let lines: Vec<String> = text.lines().map(str::to_string).collect();
        let results = Loader::new().load_document(&lines);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().data, b"fine\n");
        assert!(results[1].is_err());
        assert_eq!(results[2].as_ref().unwrap().data, b"also fine\n");
    }
}
