//! Engine-wide configuration

use crate::codec::{Codec, DEFAULT_LINE_WIDTH};
use crate::options::DEFAULT_ENGINE;
use crate::sniff::SniffConfig;

/// Settings shared by the scanner, assembler and loader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkConfig {
    /// Chunk engine name recognized in fences (`{data ...}`)
    pub engine: String,
    /// Base64 line width
    pub line_width: usize,
    /// Binary detection settings
    pub sniff: SniffConfig,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            engine: DEFAULT_ENGINE.to_string(),
            line_width: DEFAULT_LINE_WIDTH,
            sniff: SniffConfig::default(),
        }
    }
}

impl ChunkConfig {
    pub fn with_engine(mut self, engine: impl Into<String>) -> Self {
        self.engine = engine.into();
        self
    }

    pub fn with_line_width(mut self, width: usize) -> Self {
        self.line_width = width;
        self
    }

    /// Codec using this configuration's line width
    pub fn codec(&self) -> Codec {
        Codec::new().with_line_width(self.line_width)
    }
}
