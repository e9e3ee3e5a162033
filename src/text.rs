//! Patches textual payloads: store paths inside string-literal and
//! comment spans, with a shebang-only fallback for files no tokenizer
//! can handle.
//!
//! Patching here is structural and may shift offsets. The unconditional
//! basename sweep is separate (see [`RewriteConfig::sweep_mappings`])
//! because it is length-preserving and applies to every payload.

use tracing::debug;

use crate::lang::{shebang_line, shebang_mentions_store, tokenize, Grammar, TokenizeError};
use crate::rewrite::RewriteConfig;

/// Rewrite all string and comment spans of `payload`. Returns `None`
/// when nothing changed, and an error when the payload could not be
/// tokenized (the caller falls back to [`patch_shebang`]).
pub fn patch_text(
    payload: &[u8],
    grammar: Grammar,
    config: &RewriteConfig,
) -> Result<Option<Vec<u8>>, TokenizeError> {
    if !config.has_text_work() {
        return Ok(None);
    }
    let spans = tokenize(payload, grammar)?;
    if spans.is_empty() {
        return Ok(None);
    }
    let mut out = Vec::with_capacity(payload.len());
    let mut last = 0;
    let mut changed = false;
    for span in &spans {
        out.extend_from_slice(&payload[last..span.start]);
        let fragment = &payload[span.start..span.end];
        let rewritten = config.rewrite_fragment(fragment);
        if rewritten != fragment {
            changed = true;
        }
        out.extend_from_slice(&rewritten);
        last = span.end;
    }
    out.extend_from_slice(&payload[last..]);
    if changed {
        debug!(spans = spans.len(), "patched text spans");
        Ok(Some(out))
    } else {
        Ok(None)
    }
}

/// Fallback for `#!` files without a usable grammar: rewrite store paths
/// on the first line only and splice it back.
pub fn patch_shebang(payload: &[u8], config: &RewriteConfig) -> Option<Vec<u8>> {
    let line = shebang_line(payload)?;
    if !shebang_mentions_store(line) {
        return None;
    }
    let rewritten = config.rewrite_shebang_line(line);
    if rewritten == line {
        return None;
    }
    debug!("patched shebang line");
    let mut out = Vec::with_capacity(rewritten.len() + payload.len() - line.len());
    out.extend_from_slice(&rewritten);
    out.extend_from_slice(&payload[line.len()..]);
    Some(out)
}

#[cfg(test)]
mod unittests {
    use pretty_assertions::assert_eq;

    use crate::lang::Grammar;
    use crate::rewrite::RewriteConfig;

    use super::*;

    const PREFIX: &str = "/data/data/com.termux.nix/files/usr";

    #[test]
    fn rewrites_shebang_and_string_spans() {
        let config = RewriteConfig::new(PREFIX);
        let src = b"#!/nix/store/h0000-bash/bin/bash\nX=\"/nix/store/h1111-d/share\"\nrun /nix/store/h2222-code-span\n";
        let out = patch_text(src, Grammar::Shell, &config).unwrap().unwrap();
        let expected = format!(
            "#!{PREFIX}/nix/store/h0000-bash/bin/bash\nX=\"{PREFIX}/nix/store/h1111-d/share\"\nrun /nix/store/h2222-code-span\n"
        );
        assert_eq!(out, expected.into_bytes());
    }

    #[test]
    fn rewrites_library_root_in_comments() {
        let mut config = RewriteConfig::new(PREFIX);
        config.set_libroot("/nix/store/OLD-glibc", "/nix/store/NEW-glibc-android");
        let src = b"#!/bin/sh\n# uses /nix/store/OLD-glibc/lib/libc.so.6\n";
        let out = patch_text(src, Grammar::Shell, &config).unwrap().unwrap();
        let expected =
            format!("#!/bin/sh\n# uses {PREFIX}/nix/store/NEW-glibc-android/lib/libc.so.6\n");
        assert_eq!(out, expected.into_bytes());
    }

    #[test]
    fn extra_patterns_apply_to_spans_only() {
        let mut config = RewriteConfig::new(PREFIX);
        config.add_prefix_pattern("/nix/var/");
        let src = b"#!/bin/sh\nP=\"/nix/var/nix/profiles\"\nls /nix/var/nix\n";
        let out = patch_text(src, Grammar::Shell, &config).unwrap().unwrap();
        let expected = format!("#!/bin/sh\nP=\"{PREFIX}/nix/var/nix/profiles\"\nls /nix/var/nix\n");
        assert_eq!(out, expected.into_bytes());
    }

    #[test]
    fn patch_text_is_idempotent() {
        let config = RewriteConfig::new(PREFIX);
        let src = b"#!/nix/store/h0000-bash/bin/bash\nX=\"/nix/store/h1111-d\"\n";
        let once = patch_text(src, Grammar::Shell, &config).unwrap().unwrap();
        assert_eq!(patch_text(&once, Grammar::Shell, &config).unwrap(), None);
    }

    #[test]
    fn untouched_payload_reports_no_change() {
        let config = RewriteConfig::new(PREFIX);
        let src = b"#!/bin/sh\necho \"nothing interesting\"\n";
        assert_eq!(patch_text(src, Grammar::Shell, &config).unwrap(), None);
    }

    #[test]
    fn shebang_fallback_touches_first_line_only() {
        let config = RewriteConfig::new(PREFIX);
        let src = b"#!/nix/store/h0000-php/bin/php\necho \"/nix/store/h1111-d\";\n";
        let out = patch_shebang(src, &config).unwrap();
        let expected = format!(
            "#!{PREFIX}/nix/store/h0000-php/bin/php\necho \"/nix/store/h1111-d\";\n"
        );
        assert_eq!(out, expected.into_bytes());
    }

    #[test]
    fn env_shebang_is_not_touched() {
        let config = RewriteConfig::new(PREFIX);
        assert_eq!(patch_shebang(b"#!/usr/bin/env bash\necho\n", &config), None);
    }
}
