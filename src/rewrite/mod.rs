//! The path-rewrite pipeline.
//!
//! Every rewritten string goes through the same ordered steps: library
//! root substitution first, then hash mappings, then prefix insertion.
//! The order is load-bearing — the library root's basename embeds a
//! hash, so once a mapping has rewritten that hash the root would no
//! longer match, and a prefixed path must not be re-read as a store
//! path by later steps.

use std::collections::BTreeMap;

use bstr::ByteSlice;
use bytes::Bytes;
use tracing::debug;

mod mappings;

pub use mappings::ConfigError;

pub const STORE_PREFIX: &[u8] = b"/nix/store/";

pub(crate) fn basename(path: &[u8]) -> &[u8] {
    match path.rfind_byte(b'/') {
        Some(pos) => &path[pos + 1..],
        None => path,
    }
}

#[derive(Debug, Clone)]
struct LibrootSwap {
    old: Vec<u8>,
    new: Vec<u8>,
    old_base: Vec<u8>,
    new_base: Vec<u8>,
}

/// Immutable rewrite settings for one stream.
#[derive(Debug, Clone, Default)]
pub struct RewriteConfig {
    prefix: Vec<u8>,
    libroot: Option<LibrootSwap>,
    mappings: BTreeMap<Vec<u8>, Vec<u8>>,
    extra_prefix_patterns: Vec<Vec<u8>>,
}

impl RewriteConfig {
    pub fn new(prefix: impl Into<Vec<u8>>) -> Self {
        RewriteConfig {
            prefix: prefix.into(),
            ..Default::default()
        }
    }

    /// Substitute one library root for another (typically the C library
    /// swapped for an ABI-compatible replacement).
    pub fn set_libroot(&mut self, old: impl Into<Vec<u8>>, new: impl Into<Vec<u8>>) {
        let old = old.into();
        let new = new.into();
        let old_base = basename(&old).to_vec();
        let new_base = basename(&new).to_vec();
        self.libroot = Some(LibrootSwap {
            old,
            new,
            old_base,
            new_base,
        });
    }

    /// Additional string prefix that also receives the installation
    /// prefix inside string-literal and comment spans.
    pub fn add_prefix_pattern(&mut self, pattern: impl Into<Vec<u8>>) {
        self.extra_prefix_patterns.push(pattern.into());
    }

    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    /// Whether text payloads are worth tokenizing at all. Hash mappings
    /// alone never need spans — the unconditional sweep covers them.
    pub(crate) fn has_text_work(&self) -> bool {
        !self.prefix.is_empty() || self.libroot.is_some()
    }

    /// Length-preserving in-place basename substitution.
    fn apply_mappings_in_place(&self, buf: &mut Vec<u8>) -> bool {
        let mut changed = false;
        for (old, new) in &self.mappings {
            let mut start = 0;
            while let Some(pos) = buf[start..].find(old.as_slice()) {
                let at = start + pos;
                buf[at..at + old.len()].copy_from_slice(new);
                start = at + new.len();
                changed = true;
            }
        }
        changed
    }

    /// The full pipeline for a single path-valued string (ELF
    /// interpreter, one RPATH entry).
    pub fn transform_store_path(&self, path: &[u8]) -> Vec<u8> {
        let mut out = path.to_vec();
        if let Some(lib) = &self.libroot {
            if out.contains_str(&lib.old) {
                out = out.replace(&lib.old, &lib.new);
            }
        }
        self.apply_mappings_in_place(&mut out);
        if out.starts_with(STORE_PREFIX) && !self.prefix.is_empty() {
            let mut prefixed = Vec::with_capacity(self.prefix.len() + out.len());
            prefixed.extend_from_slice(&self.prefix);
            prefixed.extend_from_slice(&out);
            out = prefixed;
        }
        out
    }

    /// Symlink variant: a relative target encodes only the basename of
    /// the library root, so fall back to substituting basenames when the
    /// full root does not occur.
    pub fn patch_symlink(&self, target: &[u8]) -> Vec<u8> {
        let mut out = target.to_vec();
        if let Some(lib) = &self.libroot {
            if out.contains_str(&lib.old) {
                out = out.replace(&lib.old, &lib.new);
            } else if !lib.old_base.is_empty() && out.contains_str(&lib.old_base) {
                out = out.replace(&lib.old_base, &lib.new_base);
            }
        }
        self.apply_mappings_in_place(&mut out);
        if out.starts_with(STORE_PREFIX) && !self.prefix.is_empty() {
            let mut prefixed = Vec::with_capacity(self.prefix.len() + out.len());
            prefixed.extend_from_slice(&self.prefix);
            prefixed.extend_from_slice(&out);
            out = prefixed;
        }
        if out != target {
            debug!(old = %target.as_bstr(), new = %out.as_bstr(), "rewrote symlink target");
        }
        out
    }

    /// Rewrite one string-literal or comment span: the store-path
    /// pipeline applied to every occurrence, plus the extra prefix
    /// patterns.
    pub fn rewrite_fragment(&self, fragment: &[u8]) -> Vec<u8> {
        let mut out = fragment.to_vec();
        if let Some(lib) = &self.libroot {
            if out.contains_str(&lib.old) {
                out = out.replace(&lib.old, &lib.new);
            }
        }
        self.apply_mappings_in_place(&mut out);
        if !self.prefix.is_empty() {
            out = insert_prefix_before(&out, STORE_PREFIX, &self.prefix);
            for pattern in &self.extra_prefix_patterns {
                out = insert_prefix_before(&out, pattern, &self.prefix);
            }
        }
        out
    }

    /// Shebang lines take the store-path pipeline but not the extra
    /// prefix patterns.
    pub fn rewrite_shebang_line(&self, line: &[u8]) -> Vec<u8> {
        let mut out = line.to_vec();
        if let Some(lib) = &self.libroot {
            if out.contains_str(&lib.old) {
                out = out.replace(&lib.old, &lib.new);
            }
        }
        self.apply_mappings_in_place(&mut out);
        if !self.prefix.is_empty() {
            out = insert_prefix_before(&out, STORE_PREFIX, &self.prefix);
        }
        out
    }

    /// The unconditional basename sweep applied to every regular file
    /// payload after structural patching. Safe on arbitrary binary data
    /// because mappings are length-preserving.
    pub fn sweep_mappings(&self, contents: Bytes) -> Bytes {
        if self.mappings.is_empty()
            || !self
                .mappings
                .keys()
                .any(|old| contents.as_ref().contains_str(old))
        {
            return contents;
        }
        let mut buf = contents.to_vec();
        self.apply_mappings_in_place(&mut buf);
        Bytes::from(buf)
    }
}

/// Insert `prefix` before every occurrence of `pattern`, leaving
/// occurrences that are already directly preceded by `prefix` alone.
/// The guard makes the rewrite a fixed point of itself.
fn insert_prefix_before(text: &[u8], pattern: &[u8], prefix: &[u8]) -> Vec<u8> {
    if pattern.is_empty() || prefix.is_empty() || !text.contains_str(pattern) {
        return text.to_vec();
    }
    let mut out = Vec::with_capacity(text.len() + prefix.len());
    let mut last = 0;
    for pos in text.find_iter(pattern) {
        let already = pos >= prefix.len() && &text[pos - prefix.len()..pos] == prefix;
        out.extend_from_slice(&text[last..pos]);
        if !already {
            out.extend_from_slice(prefix);
        }
        last = pos;
    }
    out.extend_from_slice(&text[last..]);
    out
}
