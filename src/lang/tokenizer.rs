//! An approximate, re-entrant span lexer.
//!
//! For each grammar it produces the non-overlapping string-literal and
//! comment spans of a payload; everything between spans is code. It is
//! not a parser — the contract is only that on well-formed input it
//! never tags code as string or vice versa. A construct it cannot close
//! (an unterminated literal or block comment) is an error, which the
//! patcher downgrades to shebang-only handling.

use bstr::ByteSlice;
use thiserror::Error;

use super::Grammar;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanKind {
    Str,
    Comment,
}

/// Half-open byte interval of a string literal or comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub kind: SpanKind,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenizeError {
    #[error("unterminated string literal at byte {0}")]
    UnterminatedString(usize),
    #[error("unterminated block comment at byte {0}")]
    UnterminatedComment(usize),
}

#[derive(Debug, Clone, Copy)]
struct Quote {
    delim: u8,
    escapes: bool,
}

#[derive(Debug, Clone, Copy)]
struct LexRules {
    line_comments: &'static [&'static [u8]],
    block_comments: &'static [(&'static [u8], &'static [u8])],
    quotes: &'static [Quote],
    /// Line comments only open at line start or after whitespace, so
    /// `$#` and friends stay code.
    comment_needs_boundary: bool,
    /// Python-style `'''`/`"""` literals.
    triple_quotes: bool,
    /// Lua `[[ ... ]]` long strings.
    long_brackets: bool,
    /// A backslash in code escapes the next byte (shell `\"`).
    code_backslash: bool,
    /// Quotes only count inside `<...>` tags (XML attribute values).
    xml_tags: bool,
}

const NO_BLOCKS: &[(&[u8], &[u8])] = &[];
const NO_QUOTES: &[Quote] = &[];

const SHELL: LexRules = LexRules {
    line_comments: &[b"#"],
    block_comments: NO_BLOCKS,
    quotes: &[
        Quote { delim: b'\'', escapes: false },
        Quote { delim: b'"', escapes: true },
    ],
    comment_needs_boundary: true,
    triple_quotes: false,
    long_brackets: false,
    code_backslash: true,
    xml_tags: false,
};

const PYTHON: LexRules = LexRules {
    line_comments: &[b"#"],
    block_comments: NO_BLOCKS,
    quotes: &[
        Quote { delim: b'\'', escapes: true },
        Quote { delim: b'"', escapes: true },
    ],
    comment_needs_boundary: false,
    triple_quotes: true,
    long_brackets: false,
    code_backslash: false,
    xml_tags: false,
};

const PERL: LexRules = LexRules {
    line_comments: &[b"#"],
    block_comments: NO_BLOCKS,
    quotes: &[
        Quote { delim: b'\'', escapes: true },
        Quote { delim: b'"', escapes: true },
    ],
    comment_needs_boundary: false,
    triple_quotes: false,
    long_brackets: false,
    code_backslash: false,
    xml_tags: false,
};

const LUA: LexRules = LexRules {
    line_comments: &[b"--"],
    block_comments: &[(b"--[[", b"]]")],
    quotes: &[
        Quote { delim: b'\'', escapes: true },
        Quote { delim: b'"', escapes: true },
    ],
    comment_needs_boundary: false,
    triple_quotes: false,
    long_brackets: true,
    code_backslash: false,
    xml_tags: false,
};

const TCL: LexRules = LexRules {
    line_comments: &[b"#"],
    block_comments: NO_BLOCKS,
    quotes: &[Quote { delim: b'"', escapes: true }],
    comment_needs_boundary: true,
    triple_quotes: false,
    long_brackets: false,
    code_backslash: true,
    xml_tags: false,
};

const JAVASCRIPT: LexRules = LexRules {
    line_comments: &[b"//"],
    block_comments: &[(b"/*", b"*/")],
    quotes: &[
        Quote { delim: b'\'', escapes: true },
        Quote { delim: b'"', escapes: true },
        Quote { delim: b'`', escapes: true },
    ],
    comment_needs_boundary: false,
    triple_quotes: false,
    long_brackets: false,
    code_backslash: false,
    xml_tags: false,
};

const JSON: LexRules = LexRules {
    line_comments: &[],
    block_comments: NO_BLOCKS,
    quotes: &[Quote { delim: b'"', escapes: true }],
    comment_needs_boundary: false,
    triple_quotes: false,
    long_brackets: false,
    code_backslash: false,
    xml_tags: false,
};

const AWK: LexRules = LexRules {
    line_comments: &[b"#"],
    block_comments: NO_BLOCKS,
    quotes: &[Quote { delim: b'"', escapes: true }],
    comment_needs_boundary: false,
    triple_quotes: false,
    long_brackets: false,
    code_backslash: false,
    xml_tags: false,
};

const MAKE: LexRules = LexRules {
    line_comments: &[b"#"],
    block_comments: NO_BLOCKS,
    quotes: NO_QUOTES,
    comment_needs_boundary: false,
    triple_quotes: false,
    long_brackets: false,
    code_backslash: true,
    xml_tags: false,
};

const CONF: LexRules = LexRules {
    line_comments: &[b"#"],
    block_comments: NO_BLOCKS,
    quotes: &[
        Quote { delim: b'\'', escapes: true },
        Quote { delim: b'"', escapes: true },
    ],
    comment_needs_boundary: false,
    triple_quotes: false,
    long_brackets: false,
    code_backslash: false,
    xml_tags: false,
};

const DESKTOP: LexRules = LexRules {
    line_comments: &[b"#"],
    block_comments: NO_BLOCKS,
    quotes: NO_QUOTES,
    comment_needs_boundary: false,
    triple_quotes: false,
    long_brackets: false,
    code_backslash: false,
    xml_tags: false,
};

const PROPERTIES: LexRules = LexRules {
    line_comments: &[b"#", b"!"],
    block_comments: NO_BLOCKS,
    quotes: NO_QUOTES,
    comment_needs_boundary: true,
    triple_quotes: false,
    long_brackets: false,
    code_backslash: false,
    xml_tags: false,
};

const INI: LexRules = LexRules {
    line_comments: &[b";", b"#"],
    block_comments: NO_BLOCKS,
    quotes: &[Quote { delim: b'"', escapes: true }],
    comment_needs_boundary: true,
    triple_quotes: false,
    long_brackets: false,
    code_backslash: false,
    xml_tags: false,
};

const M4: LexRules = LexRules {
    line_comments: &[b"dnl ", b"#"],
    block_comments: NO_BLOCKS,
    quotes: NO_QUOTES,
    comment_needs_boundary: false,
    triple_quotes: false,
    long_brackets: false,
    code_backslash: false,
    xml_tags: false,
};

const XML: LexRules = LexRules {
    line_comments: &[],
    block_comments: &[(b"<!--", b"-->")],
    quotes: &[
        Quote { delim: b'"', escapes: false },
        Quote { delim: b'\'', escapes: false },
    ],
    comment_needs_boundary: false,
    triple_quotes: false,
    long_brackets: false,
    code_backslash: false,
    xml_tags: true,
};

const fn rules(grammar: Grammar) -> &'static LexRules {
    match grammar {
        Grammar::Shell | Grammar::Zsh => &SHELL,
        Grammar::Python => &PYTHON,
        Grammar::Perl | Grammar::Ruby => &PERL,
        Grammar::Lua => &LUA,
        Grammar::Tcl => &TCL,
        Grammar::JavaScript => &JAVASCRIPT,
        Grammar::Json => &JSON,
        Grammar::Awk => &AWK,
        Grammar::Make => &MAKE,
        Grammar::Conf => &CONF,
        Grammar::Desktop => &DESKTOP,
        Grammar::Properties => &PROPERTIES,
        Grammar::Ini => &INI,
        Grammar::M4 => &M4,
        Grammar::Xml => &XML,
    }
}

/// Scan a delimited literal. `start` is the opening delimiter; returns
/// the index one past the closing delimiter.
fn scan_quoted(
    payload: &[u8],
    start: usize,
    delim: &[u8],
    escapes: bool,
) -> Result<usize, TokenizeError> {
    let mut i = start + delim.len();
    while i < payload.len() {
        if escapes && payload[i] == b'\\' {
            i += 2;
            continue;
        }
        if payload[i..].starts_with(delim) {
            return Ok(i + delim.len());
        }
        i += 1;
    }
    Err(TokenizeError::UnterminatedString(start))
}

fn at_line_boundary(payload: &[u8], pos: usize) -> bool {
    pos == 0 || matches!(payload[pos - 1], b' ' | b'\t' | b'\r' | b'\n' | b';')
}

fn line_end(payload: &[u8], from: usize) -> usize {
    payload[from..]
        .find_byte(b'\n')
        .map(|rel| from + rel)
        .unwrap_or(payload.len())
}

/// Split `payload` into string and comment spans for `grammar`. The
/// shebang line, if present, is tagged as a comment regardless of the
/// grammar's own comment syntax.
pub fn tokenize(payload: &[u8], grammar: Grammar) -> Result<Vec<Span>, TokenizeError> {
    let rules = rules(grammar);
    let mut spans = Vec::new();
    let mut pos = 0;

    if payload.starts_with(b"#!") {
        let end = line_end(payload, 0);
        spans.push(Span {
            start: 0,
            end,
            kind: SpanKind::Comment,
        });
        pos = end;
    }

    let mut in_tag = false;
    'scan: while pos < payload.len() {
        let byte = payload[pos];
        let rest = &payload[pos..];

        for (open, close) in rules.block_comments {
            if rest.starts_with(open) {
                let body = pos + open.len();
                let Some(rel) = payload[body..].find(close) else {
                    return Err(TokenizeError::UnterminatedComment(pos));
                };
                let end = body + rel + close.len();
                spans.push(Span {
                    start: pos,
                    end,
                    kind: SpanKind::Comment,
                });
                pos = end;
                continue 'scan;
            }
        }

        for open in rules.line_comments {
            if rest.starts_with(open)
                && (!rules.comment_needs_boundary || at_line_boundary(payload, pos))
            {
                let end = line_end(payload, pos);
                spans.push(Span {
                    start: pos,
                    end,
                    kind: SpanKind::Comment,
                });
                pos = end;
                continue 'scan;
            }
        }

        if rules.xml_tags {
            match byte {
                b'<' => {
                    in_tag = true;
                    pos += 1;
                    continue;
                }
                b'>' => {
                    in_tag = false;
                    pos += 1;
                    continue;
                }
                _ if !in_tag => {
                    pos += 1;
                    continue;
                }
                _ => {}
            }
        }

        if rules.triple_quotes && (byte == b'"' || byte == b'\'') {
            let delim = [byte; 3];
            if rest.starts_with(&delim) {
                let end = scan_quoted(payload, pos, &delim, true)?;
                spans.push(Span {
                    start: pos,
                    end,
                    kind: SpanKind::Str,
                });
                pos = end;
                continue;
            }
        }

        if rules.long_brackets && rest.starts_with(b"[[") {
            let Some(rel) = payload[pos + 2..].find(b"]]") else {
                return Err(TokenizeError::UnterminatedString(pos));
            };
            let end = pos + 2 + rel + 2;
            spans.push(Span {
                start: pos,
                end,
                kind: SpanKind::Str,
            });
            pos = end;
            continue;
        }

        if let Some(quote) = rules.quotes.iter().find(|q| q.delim == byte) {
            let end = scan_quoted(payload, pos, &[quote.delim], quote.escapes)?;
            spans.push(Span {
                start: pos,
                end,
                kind: SpanKind::Str,
            });
            pos = end;
            continue;
        }

        if rules.code_backslash && byte == b'\\' {
            pos += 2;
            continue;
        }
        pos += 1;
    }

    Ok(spans)
}
