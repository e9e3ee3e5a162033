//! Hash-mapping configuration: pairs of store paths whose basenames are
//! substituted for one another throughout the stream.

use std::io;
use std::path::{Path, PathBuf};

use bstr::ByteSlice;
use thiserror::Error;
use tracing::{debug, warn};

use super::{basename, RewriteConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid mapping '{0}': expected \"OLD_PATH NEW_PATH\"")]
    InvalidMapping(String),
    #[error("cannot read mappings file {path}")]
    UnreadableFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl RewriteConfig {
    /// Register one basename mapping, given the two full store paths.
    ///
    /// Returns false when the mapping is skipped. Only equal-length
    /// basenames are accepted: the sweep replaces bytes in place inside
    /// arbitrary payloads, so a length change would shift every offset
    /// after it.
    pub fn add_mapping(&mut self, old_path: &[u8], new_path: &[u8]) -> bool {
        let old = basename(old_path);
        let new = basename(new_path);
        if old.is_empty() || old.len() != new.len() {
            warn!(
                old = %old.as_bstr(),
                new = %new.as_bstr(),
                old_len = old.len(),
                new_len = new.len(),
                "skipping mapping with mismatched basename length"
            );
            return false;
        }
        debug!(old = %old.as_bstr(), new = %new.as_bstr(), "hash mapping");
        self.mappings.insert(old.to_vec(), new.to_vec());
        true
    }

    /// Parse a `--self-mapping` argument of the form `"OLD NEW"`.
    pub fn add_self_mapping(&mut self, arg: &str) -> Result<(), ConfigError> {
        let (old, new) = arg
            .trim()
            .split_once(' ')
            .ok_or_else(|| ConfigError::InvalidMapping(arg.to_owned()))?;
        self.add_mapping(old.trim().as_bytes(), new.trim().as_bytes());
        Ok(())
    }

    /// Load a mappings file: one `OLD_PATH NEW_PATH` pair per line,
    /// blank lines ignored. Returns the number of mappings accepted.
    pub fn load_mappings(&mut self, path: &Path) -> Result<usize, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::UnreadableFile {
            path: path.to_owned(),
            source,
        })?;
        let mut added = 0;
        for line in text.lines() {
            let mut fields = line.split_whitespace();
            let (Some(old), Some(new)) = (fields.next(), fields.next()) else {
                continue;
            };
            if self.add_mapping(old.as_bytes(), new.as_bytes()) {
                added += 1;
            }
        }
        debug!(added, path = %path.display(), "loaded hash mappings");
        Ok(added)
    }
}
