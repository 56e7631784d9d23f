//! Text/binary classification of payload bytes
//!
//! The sniffer only looks at a bounded prefix of the buffer, so classifying a
//! large file costs the same as classifying a small one.

/// Default number of leading bytes inspected
pub const DEFAULT_SAMPLE_LEN: usize = 8000;

/// Default share of suspicious bytes (in percent) above which a sample is binary
pub const DEFAULT_MAX_SUSPICIOUS_PERCENT: u8 = 30;

/// Configuration for binary detection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SniffConfig {
    /// How many leading bytes to inspect
    pub sample_len: usize,
    /// Percentage of suspicious bytes tolerated in a text sample
    pub max_suspicious_percent: u8,
}

impl Default for SniffConfig {
    fn default() -> Self {
        Self {
            sample_len: DEFAULT_SAMPLE_LEN,
            max_suspicious_percent: DEFAULT_MAX_SUSPICIOUS_PERCENT,
        }
    }
}

/// Result of classifying a buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detection {
    /// UTF-8 text that can be embedded verbatim
    Text,
    /// Data that needs a binary-safe encoding
    Binary { reason: BinaryReason },
}

impl Detection {
    pub fn is_binary(&self) -> bool {
        matches!(self, Detection::Binary { .. })
    }
}

/// Reason why data is considered binary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryReason {
    /// The sample contains a NUL byte
    NulByte,
    /// Too many control or non-text bytes in the sample
    ControlBytes,
    /// Looks like text but is not valid UTF-8, so it cannot be stored verbatim
    InvalidUtf8,
}

impl SniffConfig {
    /// Heuristic binary check over the sample prefix
    pub fn is_binary(&self, data: &[u8]) -> bool {
        self.classify_sample(data).is_some()
    }

    /// Classify a buffer for default format selection.
    ///
    /// Unlike [`SniffConfig::is_binary`] this validates UTF-8 over the whole
    /// buffer, since verbatim embedding needs every byte to be text.
    pub fn detect(&self, data: &[u8]) -> Detection {
        if let Some(reason) = self.classify_sample(data) {
            return Detection::Binary { reason };
        }
        if std::str::from_utf8(data).is_err() {
            return Detection::Binary { reason: BinaryReason::InvalidUtf8 };
        }
        Detection::Text
    }

    fn classify_sample(&self, data: &[u8]) -> Option<BinaryReason> {
        let sample = &data[..data.len().min(self.sample_len)];
        if sample.is_empty() {
            return None;
        }
        if sample.contains(&0) {
            return Some(BinaryReason::NulByte);
        }

        // A multi-byte sequence cut by the sample boundary still counts as UTF-8
        let utf8 = match std::str::from_utf8(sample) {
            Ok(_) => true,
            Err(e) => e.error_len().is_none(),
        };

        let suspicious = sample
            .iter()
            .filter(|&&b| !is_text_byte(b, utf8))
            .count();

        if suspicious * 100 > sample.len() * self.max_suspicious_percent as usize {
            Some(BinaryReason::ControlBytes)
        } else {
            None
        }
    }
}

fn is_text_byte(b: u8, utf8: bool) -> bool {
    match b {
        b'\t' | b'\n' | b'\r' | 0x0c | 0x08 | 0x1b => true,
        0x20..=0x7e => true,
        0x80..=0xff => utf8,
        _ => false,
    }
}

/// Classify with the default configuration
pub fn is_binary(data: &[u8]) -> bool {
    SniffConfig::default().is_binary(data)
}
