//! Decides, for a non-ELF payload, whether it is a textual artifact
//! worth tokenizing and which grammar applies.
//!
//! Classification is cheap by design: a hard-skip extension set, an
//! extension→grammar table, and shebang inference only for small
//! extensionless files.

use crate::rewrite::{basename, STORE_PREFIX};

pub mod tokenizer;

pub use tokenizer::{tokenize, Span, SpanKind, TokenizeError};

/// Files without a recognized extension larger than this are data, not
/// scripts; skip shebang inference for them.
pub const MAX_CONTENT_DETECT_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Grammar {
    Shell,
    Zsh,
    Python,
    Perl,
    Ruby,
    Lua,
    Tcl,
    JavaScript,
    Json,
    Awk,
    Make,
    Conf,
    Desktop,
    Properties,
    Ini,
    M4,
    Xml,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Leave the payload alone (apart from the basename sweep).
    Skip,
    /// Tokenize with the given grammar and patch string/comment spans.
    Text(Grammar),
    /// No usable grammar, but the file has a shebang worth patching.
    ShebangOnly,
}

/// Lowercased extension including the dot, if any. A leading dot alone
/// (dotfiles) does not count as an extension.
fn extension(file_name: &[u8]) -> Option<Vec<u8>> {
    let dot = file_name.iter().rposition(|b| *b == b'.')?;
    if dot == 0 {
        return None;
    }
    Some(file_name[dot..].to_ascii_lowercase())
}

/// Documentation, image, archive and object formats that never contain
/// patchable source text.
fn is_skip_extension(ext: &[u8]) -> bool {
    matches!(
        ext,
        b".html"
            | b".htm"
            | b".xhtml"
            | b".css"
            | b".svg"
            | b".png"
            | b".jpg"
            | b".jpeg"
            | b".gif"
            | b".ico"
            | b".webp"
            | b".bmp"
            | b".xz"
            | b".gz"
            | b".bz2"
            | b".zst"
            | b".zip"
            | b".tar"
            | b".7z"
            | b".ttf"
            | b".otf"
            | b".woff"
            | b".woff2"
            | b".eot"
            | b".pdf"
            | b".ps"
            | b".dvi"
            | b".info"
            | b".texi"
            | b".texinfo"
            | b".haddock"
            | b".hi"
            | b".o"
            | b".a"
            | b".so"
            | b".dylib"
    )
}

fn grammar_for_extension(ext: &[u8]) -> Option<Grammar> {
    use Grammar::*;
    let grammar = match ext {
        b".sh" | b".bash" => Shell,
        b".zsh" => Zsh,
        b".py" | b".pyw" => Python,
        b".pl" | b".pm" => Perl,
        b".rb" => Ruby,
        b".lua" => Lua,
        b".tcl" => Tcl,
        b".js" | b".mjs" => JavaScript,
        b".json" => Json,
        b".awk" => Awk,
        b".mk" => Make,
        b".conf" | b".cfg" => Conf,
        b".desktop" => Desktop,
        b".properties" => Properties,
        b".ini" => Ini,
        b".m4" => M4,
        b".xml" => Xml,
        _ => return None,
    };
    Some(grammar)
}

/// Well-known extensionless file names.
fn grammar_for_file_name(file_name: &[u8]) -> Option<Grammar> {
    match file_name {
        b"Makefile" | b"makefile" | b"GNUmakefile" => Some(Grammar::Make),
        _ => None,
    }
}

fn grammar_for_interpreter(base: &[u8]) -> Option<Grammar> {
    use Grammar::*;
    match base {
        b"sh" | b"bash" | b"dash" | b"ash" | b"ksh" | b"mksh" => Some(Shell),
        b"zsh" => Some(Zsh),
        b"perl" => Some(Perl),
        b"ruby" => Some(Ruby),
        b"tclsh" | b"wish" => Some(Tcl),
        b"node" | b"nodejs" => Some(JavaScript),
        b"awk" | b"gawk" | b"mawk" | b"nawk" => Some(Awk),
        b"make" | b"gmake" => Some(Make),
        _ if base.starts_with(b"python") => Some(Python),
        _ if base.starts_with(b"lua") => Some(Lua),
        _ => None,
    }
}

/// The first line of a `#!` payload, without the newline.
pub(crate) fn shebang_line(payload: &[u8]) -> Option<&[u8]> {
    if !payload.starts_with(b"#!") {
        return None;
    }
    let end = payload
        .iter()
        .position(|b| *b == b'\n')
        .unwrap_or(payload.len());
    Some(&payload[..end])
}

/// Infer the grammar from a shebang line. Store-path interpreters
/// (`#!/nix/store/<hash>-<name>/bin/x`) reduce to their basename, and an
/// `env` indirection is followed to its argument.
fn grammar_from_shebang(payload: &[u8]) -> Option<Grammar> {
    let line = shebang_line(payload)?;
    let mut words = line[2..]
        .split(|b: &u8| b.is_ascii_whitespace())
        .filter(|w| !w.is_empty());
    let interpreter = words.next()?;
    // A store-path interpreter resolves to the same basename as its
    // normalized /bin form, so basename extraction covers both.
    let mut base = basename(interpreter);
    if base == b"env" {
        base = words.find(|w| !w.starts_with(b"-")).map(|w| basename(w))?;
    }
    grammar_for_interpreter(base)
}

/// Classify a regular-file payload. ELF detection happens before this is
/// called; `file_name` is the final path component.
pub fn classify(file_name: &[u8], payload: &[u8]) -> Classification {
    let ext = extension(file_name);
    if let Some(ext) = &ext {
        if is_skip_extension(ext) {
            return Classification::Skip;
        }
        if let Some(grammar) = grammar_for_extension(ext) {
            return Classification::Text(grammar);
        }
    }
    if let Some(grammar) = grammar_for_file_name(file_name) {
        return Classification::Text(grammar);
    }
    if payload.len() > MAX_CONTENT_DETECT_SIZE {
        return Classification::Skip;
    }
    if !payload.starts_with(b"#!") {
        return Classification::Skip;
    }
    match grammar_from_shebang(payload) {
        Some(grammar) => Classification::Text(grammar),
        None => Classification::ShebangOnly,
    }
}

/// True when the shebang line mentions the store at all; the fallback
/// patcher has nothing to do otherwise.
pub(crate) fn shebang_mentions_store(line: &[u8]) -> bool {
    use bstr::ByteSlice;
    line.contains_str(STORE_PREFIX)
}

#[cfg(test)]
mod unittests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::html(b"index.html".as_ref(), b"<html>".as_ref(), Classification::Skip)]
    #[case::upper_case(b"FONT.TTF".as_ref(), b"".as_ref(), Classification::Skip)]
    #[case::shell(b"setup.sh".as_ref(), b"echo".as_ref(), Classification::Text(Grammar::Shell))]
    #[case::python(b"build.py".as_ref(), b"".as_ref(), Classification::Text(Grammar::Python))]
    #[case::makefile(b"Makefile".as_ref(), b"all:".as_ref(), Classification::Text(Grammar::Make))]
    #[case::desktop(b"app.desktop".as_ref(), b"".as_ref(), Classification::Text(Grammar::Desktop))]
    #[case::plain_data(b"README".as_ref(), b"hello".as_ref(), Classification::Skip)]
    fn by_name(#[case] name: &[u8], #[case] payload: &[u8], #[case] expected: Classification) {
        assert_eq!(classify(name, payload), expected);
    }

    #[rstest]
    #[case::bash(b"#!/bin/bash\n".as_ref(), Classification::Text(Grammar::Shell))]
    #[case::store_bash(
        b"#!/nix/store/zzmh6q4n5rhlk25vg2jcgrxgcpvy3j7a-bash/bin/bash\n".as_ref(),
        Classification::Text(Grammar::Shell)
    )]
    #[case::env_python(b"#!/usr/bin/env python3\n".as_ref(), Classification::Text(Grammar::Python))]
    #[case::env_split(b"#!/usr/bin/env -S perl -w\n".as_ref(), Classification::Text(Grammar::Perl))]
    #[case::versioned(b"#!/usr/bin/python3.11\n".as_ref(), Classification::Text(Grammar::Python))]
    #[case::unknown(b"#!/usr/bin/php\n".as_ref(), Classification::ShebangOnly)]
    #[case::no_shebang(b"plain text\n".as_ref(), Classification::Skip)]
    fn by_shebang(#[case] payload: &[u8], #[case] expected: Classification) {
        assert_eq!(classify(b"tool", payload), expected);
    }

    #[test]
    fn large_extensionless_payload_is_skipped() {
        let mut payload = b"#!/bin/sh\n".to_vec();
        payload.resize(MAX_CONTENT_DETECT_SIZE + 1, b'x');
        assert_eq!(classify(b"blob", &payload), Classification::Skip);
    }

    #[test]
    fn known_extension_beats_payload_size() {
        let mut payload = b"echo hi\n".to_vec();
        payload.resize(MAX_CONTENT_DETECT_SIZE * 2, b'x');
        assert_eq!(
            classify(b"big.sh", &payload),
            Classification::Text(Grammar::Shell)
        );
    }
}
