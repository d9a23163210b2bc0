//! Identifier normalization and path joining for table and column names
//!
//! Nested field paths are joined with a two character separator (`__`). Every
//! normalized identifier ends in a letter or digit, starts with at most one `_`,
//! and has any inner run of two or more underscores doubled. Inside a joined path
//! an underscore run of length 2 or 3 is therefore always a boundary (3 when the
//! next segment starts with `_`), and any other run is part of a field name:
//! `{"a__b": 1}` gives `a____b`, `{"a": {"_b": 1}}` gives `a___b` and
//! `{"a": {"b": 1}}` gives `a__b`.

use crate::error::{NormalizeError, Result};
use crate::schema::DataType;

pub const PATH_SEPARATOR: &str = "__";
const SEPARATOR_CHAR: char = '_';
const VARIANT_INFIX: &str = "__v_";
const EMPTY_IDENTIFIER: &str = "_empty";

/// Characters with a readable stand-in instead of a plain `_`
fn substitute(c: char) -> Option<char> {
    match c {
        '+' | '*' => Some('x'),
        '@' => Some('a'),
        '|' => Some('l'),
        '-' => Some(SEPARATOR_CHAR),
        _ => None,
    }
}

/// Reduce a raw field name to `[a-z0-9_]` and escape separator-like underscore runs
pub fn normalize_identifier(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_replaced_run = false;
    for c in name.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_lowercase() || c.is_ascii_digit() || c == SEPARATOR_CHAR {
            out.push(c);
            in_replaced_run = false;
        } else if let Some(sub) = substitute(c) {
            out.push(sub);
            in_replaced_run = false;
        } else if !in_replaced_run {
            out.push(SEPARATOR_CHAR);
            in_replaced_run = true;
        }
    }

    // trailing underscores would merge with a following separator
    let body_len = out.trim_end_matches(SEPARATOR_CHAR).len();
    let trailing = out.len() - body_len;
    out.truncate(body_len);
    out.extend(std::iter::repeat('x').take(trailing));

    // a leading run is a single underscore at most
    let leading = out.len() - out.trim_start_matches(SEPARATOR_CHAR).len();
    if leading > 1 {
        out.replace_range(..leading - 1, "");
    }
    if out.is_empty() {
        return EMPTY_IDENTIFIER.to_string();
    }
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, SEPARATOR_CHAR);
    }
    escape_separator(&out)
}

/// Double every inner underscore run that is at least separator-long
///
/// A leading single underscore is left alone.
pub fn escape_separator(ident: &str) -> String {
    let mut out = String::with_capacity(ident.len() + 4);
    let chars: Vec<char> = ident.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] != SEPARATOR_CHAR {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        let start = i;
        while i < chars.len() && chars[i] == SEPARATOR_CHAR {
            i += 1;
        }
        let run = i - start;
        let width = if run >= PATH_SEPARATOR.len() { run * 2 } else { run };
        out.extend(std::iter::repeat(SEPARATOR_CHAR).take(width));
    }
    out
}

/// Split a joined path back into its segments (still escaped)
pub fn split_path(path: &str) -> Vec<String> {
    let chars: Vec<char> = path.chars().collect();
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] != SEPARATOR_CHAR {
            current.push(chars[i]);
            i += 1;
            continue;
        }
        let start = i;
        while i < chars.len() && chars[i] == SEPARATOR_CHAR {
            i += 1;
        }
        let run = i - start;
        if start > 0 && (run == 2 || run == 3) {
            segments.push(std::mem::take(&mut current));
            if run == 3 {
                current.push(SEPARATOR_CHAR);
            }
        } else {
            current.extend(std::iter::repeat(SEPARATOR_CHAR).take(run));
        }
    }
    segments.push(current);
    segments
}

/// Join already normalized identifiers into one path name
pub fn make_path<S: AsRef<str>>(parts: &[S]) -> String {
    parts
        .iter()
        .map(|p| p.as_ref())
        .collect::<Vec<_>>()
        .join(PATH_SEPARATOR)
}

pub fn child_table_name(parent: &str, field_path: &str) -> String {
    make_path(&[parent, field_path])
}

pub fn variant_column_name(column: &str, data_type: DataType) -> String {
    format!("{}{}{}", column, VARIANT_INFIX, data_type)
}

/// Fails when an identifier does not fit the destination's limit
pub fn check_length(identifier: &str, limit: Option<usize>) -> Result<()> {
    match limit {
        Some(limit) if identifier.len() > limit => Err(NormalizeError::IdentifierTooLong {
            identifier: identifier.to_string(),
            limit,
        }),
        _ => Ok(()),
    }
}
