//! Chunk assembler: payload bytes and parameters in, chunk lines out

use crate::codec::{Codec, Encoding, Format};
use crate::config::ChunkConfig;
use crate::error::{ChunkError, ChunkResult};
use crate::options::{self, ChunkHeader, FENCE_CHAR, MIN_FENCE_LEN};
use crate::sniff::{Detection, SniffConfig};

/// Keys the assembler writes itself; extra options may not override them
const GENERATED_KEYS: &[&str] = &[
    "label",
    "format",
    "encoding",
    "output.var",
    "output.file",
    "loader.function",
    "md5sum",
    "echo",
    "eval",
];

/// Already-resolved parameters for one chunk.
///
/// Front ends apply their own defaults (e.g. an `eval` guard for
/// `output_file`) before handing these over.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkParams {
    pub label: Option<String>,
    /// Explicit format; detected from the payload when `None`
    pub format: Option<Format>,
    /// Explicit encoding; derived from the format when `None`
    pub encoding: Option<Encoding>,
    /// Additional `key=value, ...` options appended verbatim
    pub extra_options: Option<String>,
    pub output_var: Option<String>,
    pub output_file: Option<String>,
    /// Loader expression; requires `output_var`
    pub loader_function: Option<String>,
    /// Store an md5 checksum of the payload
    pub md5sum: bool,
    pub echo: Option<bool>,
    /// Raw `eval` expression
    pub eval: Option<String>,
}

/// Builds complete chunks from payloads
#[derive(Debug, Clone)]
pub struct Assembler {
    engine: String,
    codec: Codec,
    sniff: SniffConfig,
}

impl Assembler {
    pub fn new() -> Self {
        Self::with_config(&ChunkConfig::default())
    }

    pub fn with_config(config: &ChunkConfig) -> Self {
        Self {
            engine: config.engine.clone(),
            codec: config.codec(),
            sniff: config.sniff.clone(),
        }
    }

    /// Format and encoding that would be used for `payload`
    pub fn resolve_encoding(&self, payload: &[u8], params: &ChunkParams) -> ChunkResult<(Format, Encoding)> {
        let format = match params.format {
            Some(format) => format,
            None => match self.sniff.detect(payload) {
                Detection::Text => Format::Text,
                Detection::Binary { reason } => {
                    log::debug!("payload detected as binary ({:?})", reason);
                    Format::Binary
                }
            },
        };
        let encoding = params.encoding.unwrap_or_else(|| format.default_encoding());

        if format == Format::Binary && encoding == Encoding::Asis {
            return Err(ChunkError::InvalidEncodingChoice {
                encoding,
                reason: "binary data must be base64 encoded".to_string(),
            });
        }
        Ok((format, encoding))
    }

    /// Build the complete chunk: opening fence with header, body, closing fence
    pub fn assemble(&self, payload: &[u8], params: &ChunkParams) -> ChunkResult<Vec<String>> {
        validate(params)?;
        let (format, encoding) = self.resolve_encoding(payload, params)?;
        let encoded = self.codec.encode_with_checksum(payload, encoding)?;

        let mut header = ChunkHeader::new(self.engine.as_str());
        header.label = params.label.clone();
        header.options.insert("format", options::quote(format.as_str()));
        header.options.insert("encoding", options::quote(encoding.as_str()));
        if let Some(var) = &params.output_var {
            header.options.insert("output.var", options::quote(var));
            if let Some(loader) = &params.loader_function {
                header.options.insert("loader.function", loader.trim());
            }
        }
        if let Some(file) = &params.output_file {
            header.options.insert("output.file", options::quote(file));
        }
        if params.md5sum {
            header.options.insert("md5sum", options::quote(&encoded.md5sum));
        }
        if let Some(echo) = params.echo {
            header.options.insert("echo", if echo { "TRUE" } else { "FALSE" });
        }
        if let Some(eval) = &params.eval {
            header.options.insert("eval", eval.trim());
        }
        if let Some(extra) = &params.extra_options {
            for (key, value) in options::parse_options(extra)?.iter() {
                if GENERATED_KEYS.contains(&key) {
                    return Err(ChunkError::invalid_args(format!(
                        "extra option '{}' conflicts with a chunk parameter",
                        key
                    )));
                }
                header.options.insert(key, value);
            }
        }

        let fence_len = fence_len_for(&encoded.lines);
        log::debug!(
            "assembled chunk {:?}: format={}, encoding={}, {} body lines",
            params.label,
            format,
            encoding,
            encoded.lines.len()
        );

        let fence: String = std::iter::repeat(FENCE_CHAR).take(fence_len).collect();
        let mut lines = Vec::with_capacity(encoded.lines.len() + 2);
        lines.push(header.to_fence_line(fence_len));
        lines.extend(encoded.lines);
        lines.push(fence);
        Ok(lines)
    }
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}

fn validate(params: &ChunkParams) -> ChunkResult<()> {
    if let Some(label) = &params.label {
        if !options::is_bare_label(label) {
            return Err(ChunkError::invalid_args(format!(
                "label '{}' must be a single bare token",
                label
            )));
        }
    }
    if params.output_var.as_deref().is_some_and(|v| v.trim().is_empty()) {
        return Err(ChunkError::invalid_args("output variable name is empty"));
    }
    if params.output_file.as_deref().is_some_and(|v| v.trim().is_empty()) {
        return Err(ChunkError::invalid_args("output file path is empty"));
    }
    if params.loader_function.is_some() && params.output_var.is_none() {
        return Err(ChunkError::invalid_args(
            "a loader function requires an output variable",
        ));
    }
    Ok(())
}

/// Smallest fence longer than any backtick run that starts a body line
fn fence_len_for(body: &[String]) -> usize {
    let longest = body
        .iter()
        .map(|line| options::fence_run(line.trim_start()))
        .max()
        .unwrap_or(0);
    (longest + 1).max(MIN_FENCE_LEN)
}
