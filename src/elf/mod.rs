//! ELF image rewriting: the dynamic interpreter (`PT_INTERP`) and the
//! library search path (`DT_RPATH`/`DT_RUNPATH`) run through the path
//! transform, and the image is re-emitted with a consistent layout.
//!
//! The rewrite is total from the pipeline's point of view: any parse or
//! layout failure leaves the original payload untouched and is only
//! counted.

use bstr::ByteSlice;
use thiserror::Error;
use tracing::debug;

use crate::rewrite::RewriteConfig;

mod image;

pub use image::ElfImage;

pub const ELF_MAGIC: &[u8] = b"\x7fELF";

#[derive(Debug, Error)]
pub enum ElfError {
    #[error("unsupported ELF object type")]
    Unsupported,
    #[error("no DT_RPATH or DT_RUNPATH entry")]
    NoRpath,
    #[error("inconsistent section layout: {0}")]
    Layout(&'static str),
    #[error(transparent)]
    Parse(#[from] goblin::error::Error),
    #[error(transparent)]
    Emit(#[from] scroll::Error),
}

pub fn is_elf(payload: &[u8]) -> bool {
    payload.starts_with(ELF_MAGIC)
}

/// Apply the rewrite recipe to one ELF payload: transform the
/// interpreter, transform each colon-separated rpath entry, re-emit.
/// Returns `None` when neither string needed a change.
pub fn patch_elf(payload: &[u8], config: &RewriteConfig) -> Result<Option<Vec<u8>>, ElfError> {
    let mut elf = ElfImage::parse(payload)?;
    let mut changed = false;

    if let Some(interp) = elf.interpreter().map(|i| i.to_vec()) {
        if !interp.is_empty() {
            let new_interp = config.transform_store_path(&interp);
            if new_interp != interp {
                debug!(
                    old = %interp.as_bstr(),
                    new = %new_interp.as_bstr(),
                    "rewrote interpreter"
                );
                elf.set_interpreter(&new_interp);
                changed = true;
            }
        }
    }

    if let Some(rpath) = elf.rpath() {
        if !rpath.is_empty() {
            let new_rpath = transform_rpath(&rpath, config);
            if new_rpath != rpath {
                debug!(
                    old = %rpath.as_bstr(),
                    new = %new_rpath.as_bstr(),
                    "rewrote rpath"
                );
                elf.set_rpath(&new_rpath)?;
                changed = true;
            }
        }
    }

    if !changed {
        return Ok(None);
    }
    elf.build().map(Some)
}

/// Split on `:`, transform each entry, rejoin. Empty entries are
/// dropped, matching how the loader treats them anyway.
fn transform_rpath(rpath: &[u8], config: &RewriteConfig) -> Vec<u8> {
    let mut out = Vec::with_capacity(rpath.len());
    for entry in rpath.split(|b| *b == b':') {
        if entry.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push(b':');
        }
        out.extend_from_slice(&config.transform_store_path(entry));
    }
    out
}
