//! # emx-datachunk
//!
//! Embed text and binary files directly inside literate-programming documents
//! as fenced *data chunks*, so the document no longer depends on external
//! files at render time.
//!
//! ## Chunk Format
//!
//! ````text
//! Some prose.
//!
//! ```{data cars, format="text", encoding="asis", output.var="cars", md5sum="..."}
//! speed,dist
//! 4,2
//! ```
//!
//! ```{data logo, format="binary", encoding="base64", output.file="logo.png"}
//! iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNk+M9QDwADhgGAWjR9
//! awAAAABJRU5ErkJggg==
//! ```
//! ````
//!
//! The opening fence is a backtick run of three or more, followed by the
//! engine name (`data` by default), an optional bare label and a comma
//! separated `key=value` list. The closing fence is a backtick run at least
//! as long as the opening one.
//!
//! ## Encodings
//!
//! - `asis`: UTF-8 text, one body line per text line
//! - `base64`: any bytes, wrapped at a fixed width
//!
//! When no format is given, the [`sniff`] module decides: binary data gets
//! `format="binary"` and `encoding="base64"`, text gets `format="text"` and
//! `encoding="asis"`.
//!
//! ## Pipeline
//!
//! 1. [`Assembler::assemble`] turns payload bytes and [`ChunkParams`] into chunk lines
//! 2. [`splice::insert_at`] places them in a document
//! 3. [`Scanner::scan`] finds chunks again, with their line ranges
//! 4. [`Loader::load`] decodes and verifies a chunk at render time
//! 5. [`splice::remove_ranges`] takes chunks back out
//!
//! All operations are pure: documents are line slices in, new line vectors out.

pub mod assembler;
pub mod codec;
pub mod config;
pub mod error;
pub mod loader;
pub mod options;
pub mod scanner;
pub mod sniff;
pub mod splice;

pub use assembler::{Assembler, ChunkParams};
pub use codec::{checksum, verify, Codec, EncodedPayload, Encoding, Format};
pub use config::ChunkConfig;
pub use error::{ChunkError, ChunkResult};
pub use loader::{Decryptor, LoadedChunk, Loader};
pub use options::{parse_header, parse_options, serialize_header, ChunkHeader, ChunkOptions};
pub use scanner::{Chunk, Chunks, LineRange, Scanner};
pub use sniff::{is_binary, BinaryReason, Detection, SniffConfig};
pub use splice::{
    insert_at, join_lines, join_lines_with, line_ending, merge_ranges, remove_ranges, split_lines,
};
