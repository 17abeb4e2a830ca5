//! Delimited regular expressions
//!
//! Expected values and the `test_regex` filter use the delimited form
//! `/pattern/flags`. A string is treated as a regex only if it parses in that
//! form *and* compiles; everything else is a literal. Matching is an
//! unanchored search: anchoring is whatever `^`/`$` the pattern spells out.
//!
//! Any non-alphanumeric, non-backslash, non-whitespace character can be the
//! delimiter. `(`, `[`, `{` and `<` close with their bracket pair.
//! Supported flags: `i`, `m`, `s`, `x`, `U` (swap greed), `A` (anchor at the
//! start), plus `u` and `D` which are accepted and have no effect.

use regex::{Regex, RegexBuilder};

/// Compile a delimited pattern, returning the reason on failure
pub fn compile(raw: &str) -> Result<Regex, String> {
    let raw = raw.trim_start();
    let mut chars = raw.char_indices();

    let (_, open) = chars.next().ok_or_else(|| "empty pattern".to_string())?;
    if open.is_alphanumeric() || open == '\\' || open.is_whitespace() {
        return Err(format!("delimiter must not be alphanumeric or backslash, got '{}'", open));
    }

    let close = match open {
        '(' => ')',
        '[' => ']',
        '{' => '}',
        '<' => '>',
        other => other,
    };

    let mut depth = 0usize;
    let mut escaped = false;
    let mut end = None;
    for (index, c) in chars {
        if escaped {
            escaped = false;
            continue;
        }
        if c == '\\' {
            escaped = true;
        } else if c == close && depth == 0 {
            end = Some(index);
            break;
        } else if c == close {
            depth -= 1;
        } else if c == open && open != close {
            depth += 1;
        }
    }

    let end = end.ok_or_else(|| format!("no ending delimiter '{}' found", close))?;
    let body = &raw[open.len_utf8()..end];
    let flags = &raw[end + close.len_utf8()..];

    let mut anchored = false;
    let mut builder_flags = Flags::default();
    for flag in flags.chars() {
        match flag {
            'i' => builder_flags.case_insensitive = true,
            'm' => builder_flags.multi_line = true,
            's' => builder_flags.dot_all = true,
            'x' => builder_flags.extended = true,
            'U' => builder_flags.swap_greed = true,
            'A' => anchored = true,
            'u' | 'D' => {}
            '\n' | '\r' | ' ' => {}
            other => return Err(format!("unknown modifier '{}'", other)),
        }
    }

    let source = if anchored {
        format!(r"\A(?:{})", body)
    } else {
        body.to_string()
    };

    RegexBuilder::new(&source)
        .case_insensitive(builder_flags.case_insensitive)
        .multi_line(builder_flags.multi_line)
        .dot_matches_new_line(builder_flags.dot_all)
        .ignore_whitespace(builder_flags.extended)
        .swap_greed(builder_flags.swap_greed)
        .build()
        .map_err(|e| e.to_string())
}

#[derive(Default)]
struct Flags {
    case_insensitive: bool,
    multi_line: bool,
    dot_all: bool,
    extended: bool,
    swap_greed: bool,
}
