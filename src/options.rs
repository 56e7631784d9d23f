//! Chunk header parsing and serialization
//!
//! A chunk header is the opening fence line of a data chunk:
//!
//! ````text
//! ```{data logo, format="binary", encoding="base64", output.file="logo.png"}
//! ````
//!
//! Option values are kept as opaque source text. Quoted strings can be read
//! back unquoted through [`ChunkOptions::get_str`]; everything else is left
//! for the host document engine to evaluate.

use crate::codec::{Encoding, Format};
use crate::error::{ChunkError, ChunkResult};

/// Default chunk engine name
pub const DEFAULT_ENGINE: &str = "data";

pub const FENCE_CHAR: char = '`';
pub const MIN_FENCE_LEN: usize = 3;

/// Prefix for labels synthesized for unlabeled chunks
pub const UNNAMED_LABEL_PREFIX: &str = "unnamed-chunk-";

/// Recognized keys, in the order they are serialized
pub const CANONICAL_KEYS: &[&str] = &[
    "label",
    "format",
    "encoding",
    "output.var",
    "output.file",
    "loader.function",
    "loader.ops",
    "md5sum",
    "echo",
    "max.echo",
    "eval",
    "decrypt",
    "decrypt.ops",
];

/// Ordered option mapping of a chunk header
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkOptions {
    entries: Vec<(String, String)>,
}

impl ChunkOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw value as written in the header
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Value with surrounding quotes and escapes removed
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.get(key).map(unquote)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Insert or replace an option, keeping the position of an existing key
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Options in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Options in serialization order: recognized keys first, then the rest
    /// in their original relative order
    pub fn canonical_iter(&self) -> impl Iterator<Item = (&str, &str)> {
        let known = CANONICAL_KEYS
            .iter()
            .filter_map(move |key| self.get(key).map(|v| (*key, v)));
        let rest = self.iter().filter(|(k, _)| !CANONICAL_KEYS.contains(k));
        known.chain(rest)
    }

    pub fn format(&self) -> ChunkResult<Option<Format>> {
        self.get_str("format").map(|v| v.parse()).transpose()
    }

    pub fn encoding(&self) -> ChunkResult<Option<Encoding>> {
        self.get_str("encoding").map(|v| v.parse()).transpose()
    }

    pub fn echo(&self) -> ChunkResult<Option<bool>> {
        self.get_str("echo").map(|v| parse_flag(&v)).transpose()
    }

    pub fn md5sum(&self) -> Option<String> {
        self.get_str("md5sum")
    }

    pub fn output_var(&self) -> Option<String> {
        self.get_str("output.var")
    }

    pub fn output_file(&self) -> Option<String> {
        self.get_str("output.file")
    }

    /// Loader expression, kept as raw source text
    pub fn loader_function(&self) -> Option<&str> {
        self.get("loader.function")
    }

    pub fn decrypt(&self) -> Option<String> {
        self.get_str("decrypt")
    }

    /// Serialize as `key=value, key=value` in canonical order
    pub fn to_option_string(&self) -> String {
        self.canonical_iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn parse_flag(value: &str) -> ChunkResult<bool> {
    match value {
        "TRUE" | "T" | "true" => Ok(true),
        "FALSE" | "F" | "false" => Ok(false),
        other => Err(ChunkError::malformed(other, "expected a logical value")),
    }
}

/// Parsed chunk header: engine name, optional label and options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkHeader {
    pub engine: String,
    pub label: Option<String>,
    pub options: ChunkOptions,
}

impl ChunkHeader {
    pub fn new(engine: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
            label: None,
            options: ChunkOptions::new(),
        }
    }

    /// Render as an opening fence line with the given backtick count
    pub fn to_fence_line(&self, fence_len: usize) -> String {
        let fence: String = std::iter::repeat(FENCE_CHAR)
            .take(fence_len.max(MIN_FENCE_LEN))
            .collect();
        format!("{}{}", fence, self)
    }
}

impl std::fmt::Display for ChunkHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{{}", self.engine)?;
        let mut first = true;
        if let Some(label) = &self.label {
            write!(f, " {}", label)?;
            first = false;
        }
        for (key, value) in self.options.canonical_iter() {
            if key == "label" && self.label.is_some() {
                continue;
            }
            if first {
                write!(f, " {}={}", key, value)?;
                first = false;
            } else {
                write!(f, ", {}={}", key, value)?;
            }
        }
        write!(f, "}}")
    }
}

/// Serialize a header as `{engine label, key=value, ...}`
pub fn serialize_header(engine: &str, label: Option<&str>, options: &ChunkOptions) -> String {
    ChunkHeader {
        engine: engine.to_string(),
        label: label.map(str::to_string),
        options: options.clone(),
    }
    .to_string()
}

/// Opening fence split into its parts, before option parsing
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct OpeningFence<'a> {
    pub fence_len: usize,
    /// Engine name, `None` for plain or non-brace fences
    pub engine: Option<&'a str>,
    /// Text between the engine name and the closing brace
    pub params: &'a str,
}

impl<'a> OpeningFence<'a> {
    /// Recognize any opening fence; returns `None` for non-fence lines
    pub fn parse(line: &'a str) -> Option<Self> {
        let trimmed = line.trim();
        let fence_len = fence_run(trimmed);
        if fence_len < MIN_FENCE_LEN {
            return None;
        }
        let info = trimmed[fence_len..].trim_start();

        let braced = info
            .strip_prefix('{')
            .and_then(|rest| rest.strip_suffix('}'));
        let Some(inner) = braced else {
            return Some(Self { fence_len, engine: None, params: "" });
        };

        let inner = inner.trim_start();
        let name_end = inner
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-'))
            .unwrap_or(inner.len());
        if name_end == 0 {
            return Some(Self { fence_len, engine: None, params: "" });
        }

        let rest = &inner[name_end..];
        if !(rest.is_empty() || rest.starts_with(|c: char| c == ',' || c.is_whitespace())) {
            return Some(Self { fence_len, engine: None, params: "" });
        }

        Some(Self {
            fence_len,
            engine: Some(&inner[..name_end]),
            params: rest,
        })
    }
}

/// Length of the leading backtick run
pub(crate) fn fence_run(s: &str) -> usize {
    s.chars().take_while(|&c| c == FENCE_CHAR).count()
}

/// Whether `line` closes a fence opened with `fence_len` backticks
pub(crate) fn is_closing_fence(line: &str, fence_len: usize) -> bool {
    let trimmed = line.trim();
    let run = fence_run(trimmed);
    run >= fence_len && run == trimmed.len()
}

/// Parse a full opening fence line into a header
pub fn parse_header(line: &str) -> ChunkResult<ChunkHeader> {
    let fence = OpeningFence::parse(line)
        .ok_or_else(|| ChunkError::malformed(line, "not an opening chunk fence"))?;
    let engine = fence
        .engine
        .ok_or_else(|| ChunkError::malformed(line, "missing {engine ...} header"))?;
    parse_params(engine, fence.params)
}

/// Parse the text following the engine name (`label, key=value, ...`)
pub(crate) fn parse_params(engine: &str, params: &str) -> ChunkResult<ChunkHeader> {
    let mut header = ChunkHeader::new(engine);
    let trimmed = params.trim();
    let trimmed = trimmed.strip_prefix(',').unwrap_or(trimmed);

    let mut items = split_top_level(trimmed)?;
    if items.first().is_some_and(|first| find_top_level_eq(first).is_none()) {
        let label = items.remove(0);
        header.label = Some(checked_label(&label)?);
    }
    header.options = collect_options(items)?;

    if let Some(label) = header.options.remove("label") {
        if header.label.is_some() {
            return Err(ChunkError::malformed(
                format!("label={}", label),
                "label given both as bare token and as option",
            ));
        }
        header.label = Some(checked_label(&label)?);
    }
    Ok(header)
}

/// Whether `label` can be written as the bare label token of a header
pub(crate) fn is_bare_label(label: &str) -> bool {
    !label.is_empty()
        && !label
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, ',' | '=' | '"' | '\'' | '`' | '{' | '}'))
}

fn checked_label(raw: &str) -> ChunkResult<String> {
    let label = unquote(raw);
    if !is_bare_label(&label) {
        return Err(ChunkError::malformed(raw, "label must be a single bare token"));
    }
    Ok(label)
}

/// Parse a bare option list such as `key1=1, key2="x,y"`
pub fn parse_options(text: &str) -> ChunkResult<ChunkOptions> {
    collect_options(split_top_level(text.trim())?)
}

fn collect_options(items: Vec<String>) -> ChunkResult<ChunkOptions> {
    let mut options = ChunkOptions::new();
    for item in items {
        let eq = find_top_level_eq(&item)
            .ok_or_else(|| ChunkError::malformed(&item, "expected key=value"))?;
        let key = item[..eq].trim();
        let value = item[eq + 1..].trim();
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_') {
            return Err(ChunkError::malformed(&item, "invalid option name"));
        }
        if value.is_empty() {
            return Err(ChunkError::malformed(&item, "missing option value"));
        }
        if options.contains_key(key) {
            return Err(ChunkError::malformed(&item, "duplicate option"));
        }
        options.insert(key, value);
    }
    Ok(options)
}

/// Split on commas outside quotes and brackets
fn split_top_level(text: &str) -> ChunkResult<Vec<String>> {
    if text.is_empty() {
        return Ok(Vec::new());
    }

    let mut items = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut stack: Vec<char> = Vec::new();

    for c in text.chars() {
        if let Some(q) = quote {
            current.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }

        match c {
            '"' | '\'' | '`' => {
                quote = Some(c);
                current.push(c);
            }
            '(' | '[' | '{' => {
                stack.push(c);
                current.push(c);
            }
            ')' | ']' | '}' => {
                let open = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                if stack.pop() != Some(open) {
                    current.push(c);
                    return Err(ChunkError::malformed(current.trim(), "unbalanced brackets"));
                }
                current.push(c);
            }
            ',' if stack.is_empty() => {
                items.push(take_item(&mut current)?);
            }
            _ => current.push(c),
        }
    }

    if quote.is_some() {
        return Err(ChunkError::malformed(current.trim(), "unbalanced quotes"));
    }
    if !stack.is_empty() {
        return Err(ChunkError::malformed(current.trim(), "unbalanced brackets"));
    }
    items.push(take_item(&mut current)?);
    Ok(items)
}

fn take_item(current: &mut String) -> ChunkResult<String> {
    let item = current.trim().to_string();
    current.clear();
    if item.is_empty() {
        return Err(ChunkError::malformed(",", "empty option"));
    }
    Ok(item)
}

/// Position of the first `=` outside quotes and brackets
fn find_top_level_eq(item: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut depth = 0usize;
    for (i, c) in item.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' | '`' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            '=' if depth == 0 => return Some(i),
            _ => {}
        }
    }
    None
}

/// Strip matching quotes and resolve backslash escapes; other text is returned as-is
pub fn unquote(value: &str) -> String {
    let value = value.trim();
    let mut chars = value.chars();
    let (Some(first), Some(last)) = (chars.next(), chars.next_back()) else {
        return value.to_string();
    };
    if !(first == last && (first == '"' || first == '\'')) {
        return value.to_string();
    }

    let inner = &value[1..value.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut escaped = false;
    for c in inner.chars() {
        if escaped {
            match c {
                'n' => out.push('\n'),
                't' => out.push('\t'),
                other => out.push(other),
            }
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else {
            out.push(c);
        }
    }
    out
}

/// Double-quote a string value for a header
pub fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header_with_label_and_options() {
        let header = parse_header(r#"```{data logo, format="binary", encoding='base64'}"#).unwrap();
        assert_eq!(header.engine, "data");
        assert_eq!(header.label.as_deref(), Some("logo"));
        assert_eq!(header.options.format().unwrap(), Some(Format::Binary));
        assert_eq!(header.options.encoding().unwrap(), Some(Encoding::Base64));
    }

    #[test]
    fn test_parse_quoted_comma() {
        let options = parse_options(r#"key1=1, key2="x,y""#).unwrap();
        assert_eq!(options.get("key1"), Some("1"));
        assert_eq!(options.get_str("key2").as_deref(), Some("x,y"));
    }

    #[test]
    fn test_parse_header_without_label() {
        let header = parse_header("```{data, output.var=\"df\", eval=TRUE}").unwrap();
        assert!(header.label.is_none());
        assert_eq!(header.options.output_var().as_deref(), Some("df"));
        assert_eq!(header.options.get("eval"), Some("TRUE"));
    }

    #[test]
    fn test_parse_header_bare() {
        let header = parse_header("```{data}").unwrap();
        assert!(header.label.is_none());
        assert!(header.options.is_empty());
    }

    #[test]
    fn test_label_with_whitespace_rejected() {
        let err = parse_header("```{data my label, a=1}").unwrap_err();
        match err {
            ChunkError::MalformedHeader { fragment, .. } => assert_eq!(fragment, "my label"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(parse_header("```{data label=\"my label\"}").is_err());
        assert!(parse_header("```{data \"quoted\", a=1}").is_ok());
    }

    #[test]
    fn test_label_option_folded_into_label() {
        let header = parse_header("```{data label=\"cars\", echo=FALSE}").unwrap();
        assert_eq!(header.label.as_deref(), Some("cars"));
        assert!(!header.options.contains_key("label"));
        assert_eq!(header.options.echo().unwrap(), Some(false));
    }

    #[test]
    fn test_duplicate_label_rejected() {
        let err = parse_header("```{data cars, label=\"other\"}").unwrap_err();
        assert!(matches!(err, ChunkError::MalformedHeader { .. }));
    }

    #[test]
    fn test_expressions_pass_through() {
        let options = parse_options("eval=!file.exists(\"a,b.csv\"), loader.function=function(x) read.csv(x, sep=',')").unwrap();
        assert_eq!(options.get("eval"), Some("!file.exists(\"a,b.csv\")"));
        assert_eq!(options.loader_function(), Some("function(x) read.csv(x, sep=',')"));
    }

    #[test]
    fn test_unbalanced_quote_names_fragment() {
        let err = parse_options("a=1, b=\"open").unwrap_err();
        match err {
            ChunkError::MalformedHeader { fragment, reason, .. } => {
                assert_eq!(fragment, "b=\"open");
                assert_eq!(reason, "unbalanced quotes");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unbalanced_parens() {
        assert!(parse_options("eval=f(x").is_err());
        assert!(parse_options("eval=f(x))").is_err());
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let err = parse_options("a=1, a=2").unwrap_err();
        assert!(err.to_string().contains("duplicate option"));
    }

    #[test]
    fn test_empty_item_rejected() {
        assert!(parse_options("a=1,,b=2").is_err());
        assert!(parse_options("a=1, b").is_err());
    }

    #[test]
    fn test_serialize_canonical_order() {
        let mut header = ChunkHeader::new("data");
        header.label = Some("logo".into());
        header.options.insert("fig.cap", "\"x\"");
        header.options.insert("md5sum", "\"abc\"");
        header.options.insert("zeta", "1");
        header.options.insert("format", "\"binary\"");
        header.options.insert("encoding", "\"base64\"");
        assert_eq!(
            header.to_string(),
            r#"{data logo, format="binary", encoding="base64", md5sum="abc", fig.cap="x", zeta=1}"#
        );
    }

    #[test]
    fn test_serialize_header_passes_unknown_keys_in_order() {
        let options = parse_options("b=2, echo=TRUE, a=1, format=\"text\"").unwrap();
        assert_eq!(
            serialize_header("data", Some("t"), &options),
            "{data t, format=\"text\", echo=TRUE, b=2, a=1}"
        );
    }

    #[test]
    fn test_serialize_without_label() {
        let mut header = ChunkHeader::new("data");
        header.options.insert("output.var", "\"df\"");
        assert_eq!(header.to_fence_line(3), "```{data output.var=\"df\"}");
    }

    #[test]
    fn test_serialize_then_parse() {
        let line = r#"````{data x, format="text", encoding="asis", custom=list(a = 1, b = "q")}"#;
        let header = parse_header(line).unwrap();
        assert_eq!(header.to_fence_line(4), line);
    }

    #[test]
    fn test_opening_fence_variants() {
        assert_eq!(OpeningFence::parse("```{r setup}").unwrap().engine, Some("r"));
        assert_eq!(OpeningFence::parse("```").unwrap().engine, None);
        assert_eq!(OpeningFence::parse("```python").unwrap().engine, None);
        assert_eq!(OpeningFence::parse("  ````{data}").unwrap().fence_len, 4);
        assert!(OpeningFence::parse("``{data}").is_none());
        assert!(OpeningFence::parse("text").is_none());
        assert_eq!(OpeningFence::parse("```{datax}").unwrap().engine, Some("datax"));
    }

    #[test]
    fn test_closing_fence() {
        assert!(is_closing_fence("```", 3));
        assert!(is_closing_fence("````  ", 3));
        assert!(!is_closing_fence("```", 4));
        assert!(!is_closing_fence("``` x", 3));
    }

    #[test]
    fn test_quote_unquote() {
        let raw = "a \"b\" \\ c";
        assert_eq!(unquote(&quote(raw)), raw);
        assert_eq!(unquote("bare"), "bare");
        assert_eq!(unquote("'single'"), "single");
    }

    #[test]
    fn test_invalid_echo_value() {
        let options = parse_options("echo=maybe").unwrap();
        assert!(options.echo().is_err());
    }
}
