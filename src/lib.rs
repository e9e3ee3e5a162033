//! patchnar — rewrite store paths inside a NAR stream.
//!
//! Reads a Nix ARchive, rewrites embedded absolute store paths (ELF
//! interpreter and rpath, symlink targets, script text) so the packaged
//! tree can be installed under an arbitrary filesystem prefix, and
//! re-emits the archive byte-for-byte compatible with the original
//! structure.

pub mod archive;
pub mod elf;
pub mod io;
pub mod lang;
pub mod pipeline;
pub mod rewrite;
pub mod stats;
pub mod text;

pub use pipeline::process;
pub use rewrite::{ConfigError, RewriteConfig};
pub use stats::Stats;
