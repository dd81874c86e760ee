use std::fmt::Write;

use crate::clock::split_timestamp;
use crate::error::DecodeError;
use crate::protocol::{Arity, Field, Fields, Header, Value};

// Format strings use `{}` placeholders only; `{{` and `}}` are escapes.
// Both checks are `const` so the logging macros reject bad format strings
// and argument-count mismatches at compile time.

/// True if every brace in `s` is part of `{}`, `{{` or `}}`.
pub const fn validate_format(s: &str) -> bool {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'{' => {
                if i + 1 < bytes.len() && (bytes[i + 1] == b'{' || bytes[i + 1] == b'}') {
                    i += 2;
                    continue;
                }
                return false;
            }
            b'}' => {
                if i + 1 < bytes.len() && bytes[i + 1] == b'}' {
                    i += 2;
                    continue;
                }
                return false;
            }
            _ => {}
        }
        i += 1;
    }
    true
}

/// Number of `{}` placeholders in `s`.
pub const fn placeholder_count(s: &str) -> usize {
    let bytes = s.as_bytes();
    let mut i = 0;
    let mut count = 0;
    while i < bytes.len() {
        if i + 1 < bytes.len() {
            let pair = (bytes[i], bytes[i + 1]);
            if let (b'{', b'}') = pair {
                count += 1;
                i += 2;
                continue;
            }
            if let (b'{', b'{') | (b'}', b'}') = pair {
                i += 2;
                continue;
            }
        }
        i += 1;
    }
    count
}

/// Renders a decoded entry as one text line:
/// `<secs>.<nanos> [<sev>] <message>\n`, the timestamp only when present.
pub fn render_line(out: &mut String, header: &Header, mut fields: Fields<'_>) -> Result<(), DecodeError> {
    if let Some(ts) = header.timestamp {
        let (secs, nanos) = split_timestamp(ts);
        let _ = write!(out, "{secs}.{nanos:09} ");
    }
    let _ = write!(out, "[{}] ", header.severity);

    if header.arity != Arity::Empty {
        match fields.next().transpose()? {
            Some(Field {
                value: Value::Literal(fmt) | Value::Str(fmt),
                ..
            }) if header.arity == Arity::Format => substitute(out, fmt, &mut fields)?,
            // Registered literals come from format strings; drop their escapes.
            Some(Field {
                value: Value::Literal(text),
                ..
            }) => unescape(out, text),
            Some(first) => {
                let _ = write!(out, "{first}");
            }
            None => {}
        }
        // Anything not consumed by a placeholder is appended.
        for extra in fields {
            let _ = write!(out, " {}", extra?);
        }
    }

    out.push('\n');
    Ok(())
}

fn unescape(out: &mut String, text: &str) {
    let mut rest = text;
    while let Some(i) = rest.find("{{").into_iter().chain(rest.find("}}")).min() {
        out.push_str(&rest[..=i]);
        rest = &rest[i + 2..];
    }
    out.push_str(rest);
}

fn substitute(out: &mut String, fmt: &str, fields: &mut Fields<'_>) -> Result<(), DecodeError> {
    let mut rest = fmt;
    while let Some(i) = rest.find(|c: char| c == '{' || c == '}') {
        out.push_str(&rest[..i]);
        let tail = &rest[i..];
        if tail.starts_with("{}") {
            match fields.next() {
                Some(field) => {
                    let _ = write!(out, "{}", field?);
                }
                None => out.push_str("{MISSING}"),
            }
            rest = &tail[2..];
        } else if tail.starts_with("{{") || tail.starts_with("}}") {
            out.push_str(&tail[..1]);
            rest = &tail[2..];
        } else {
            out.push_str(&tail[..1]);
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    Ok(())
}
