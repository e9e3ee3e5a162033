//! Streaming codec for the NAR (Nix ARchive) tree format.
//!
//! A NAR is a tree of directories, regular files (with an executable
//! bit) and symlinks in which every string is length-prefixed and padded
//! to an 8-byte boundary. The parser turns the byte stream into a
//! sequence of [`NarEvent`]s in input order; the encoder turns the same
//! sequence back into bytes. Directory entries appear in ascending byte
//! order of name, and both directions preserve that order.

use std::io;

use bytes::Bytes;
use thiserror::Error;

mod encoder;
mod parser;
#[cfg(any(test, feature = "test"))]
pub mod test_data;

pub use encoder::{write_nar, NarEncoder};
pub use parser::parse_nar;

pub const NAR_VERSION_MAGIC_1: &str = "nix-archive-1";

/// One node of the archive, in traversal order. File contents are
/// buffered whole because every rewriter needs the complete payload;
/// memory use is bounded by the largest file, not the archive.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Hash)]
pub enum NarEvent {
    File {
        name: Bytes,
        executable: bool,
        contents: Bytes,
    },
    Symlink {
        name: Bytes,
        target: Bytes,
    },
    StartDirectory {
        name: Bytes,
    },
    EndDirectory,
}

#[derive(Debug, Error)]
pub enum NarError {
    #[error("input does not look like a Nix archive")]
    BadMagic,
    #[error("unexpected end of archive")]
    Truncated,
    #[error("expected '{expected}' in archive, got '{found}'")]
    UnexpectedTag { expected: String, found: String },
    #[error("unknown node type '{0}'")]
    UnknownNodeType(String),
    #[error("archive contains invalid file name '{0}'")]
    InvalidFileName(String),
    #[error("archive directory entries are not sorted")]
    UnsortedDirectory,
    #[error("archive string of {0} bytes exceeds its limit")]
    StringTooLong(u64),
    #[error("non-zero padding in archive")]
    BadPadding,
    #[error(transparent)]
    Io(#[from] io::Error),
}
