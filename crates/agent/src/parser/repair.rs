//! One lenient repair pass for model-written JSON.
//!
//! Handles what models actually emit: code fences, smart quotes,
//! single-quoted strings, bare keys and values, Python literals, trailing
//! commas and missing or stray closing brackets. The pass is a single
//! left-to-right scan and never fails; whether the result parses is the
//! caller's problem.

/// Characters allowed in a bare (unquoted) token.
fn is_bare(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '.' | '-' | '/' | '+')
}

/// Strip a surrounding ```json fence, if any.
pub fn strip_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric());
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn trim_trailing_comma(out: &mut String) {
    let kept = out.trim_end().len();
    out.truncate(kept);
    if out.ends_with(',') {
        out.pop();
    }
}

/// A JSON-shaped number (Rust also parses `inf`, `NaN` and `+1`).
fn is_number(token: &str) -> bool {
    token.starts_with(|c: char| c.is_ascii_digit() || c == '-')
        && token
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E'))
        && token.parse::<f64>().is_ok()
}

fn push_bare(out: &mut String, token: &str, next: Option<char>) {
    if next == Some(':') {
        out.push('"');
        out.push_str(token);
        out.push('"');
        return;
    }
    match token {
        "true" | "false" | "null" => out.push_str(token),
        "True" => out.push_str("true"),
        "False" => out.push_str("false"),
        "None" => out.push_str("null"),
        t if is_number(t) => out.push_str(t),
        t => {
            out.push('"');
            out.push_str(t);
            out.push('"');
        }
    }
}

/// Apply the repair pass to `input`.
pub fn repair_json(input: &str) -> String {
    let normalized: String = strip_fence(input)
        .chars()
        .map(|c| match c {
            '\u{201c}' | '\u{201d}' => '"',
            '\u{2018}' | '\u{2019}' => '\'',
            other => other,
        })
        .collect();

    let chars: Vec<char> = normalized.chars().collect();
    let mut out = String::with_capacity(chars.len() + 8);
    let mut closers: Vec<char> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '"' | '\'' => {
                let quote = c;
                out.push('"');
                i += 1;
                let mut closed = false;
                while i < chars.len() {
                    let ch = chars[i];
                    if ch == '\\' && i + 1 < chars.len() {
                        if quote == '\'' && chars[i + 1] == '\'' {
                            out.push('\'');
                        } else {
                            out.push(ch);
                            out.push(chars[i + 1]);
                        }
                        i += 2;
                        continue;
                    }
                    if ch == quote {
                        closed = true;
                        i += 1;
                        break;
                    }
                    match ch {
                        '"' => out.push_str("\\\""),
                        '\n' => out.push_str("\\n"),
                        other => out.push(other),
                    }
                    i += 1;
                }
                out.push('"');
                if !closed {
                    break;
                }
                continue;
            }
            '{' => {
                closers.push('}');
                out.push(c);
            }
            '[' => {
                closers.push(']');
                out.push(c);
            }
            '}' | ']' => {
                if let Some(pos) = closers.iter().rposition(|&k| k == c) {
                    while closers.len() > pos {
                        if let Some(k) = closers.pop() {
                            trim_trailing_comma(&mut out);
                            out.push(k);
                        }
                    }
                }
            }
            c if is_bare(c) => {
                let start = i;
                while i < chars.len() && is_bare(chars[i]) {
                    i += 1;
                }
                let token: String = chars[start..i].iter().collect();
                let next = chars[i..].iter().copied().find(|ch| !ch.is_whitespace());
                push_bare(&mut out, &token, next);
                continue;
            }
            other => out.push(other),
        }
        i += 1;
    }

    while let Some(k) = closers.pop() {
        trim_trailing_comma(&mut out);
        out.push(k);
    }
    out
}
