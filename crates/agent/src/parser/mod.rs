//! ReAct parser: turn raw model output into tool calls or a final answer.
//!
//! Three output shapes are recognised, in priority order:
//! 1. structured tool calls surfaced by the model API
//! 2. a JSON object `{"tool": ..., "parameters": {...}}` anywhere in the text
//! 3. `Action: name(params)` lines, or `Action: name` followed by
//!    `Action Input: ...`
//!
//! The first shape that yields anything wins. Parameters that fail to
//! parse get one [`repair::repair_json`] pass; if that fails too the item
//! becomes a [`ParseFailure`] for the orchestrator to feed back. When no
//! call is found the text is a final-answer candidate.
//!
//! Everything here is pure; identical input gives identical output,
//! including the `react_{n}` call ids.

pub mod repair;

use regex_lite::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use veritas_core::message::MessageToolCall;
use veritas_core::tool::{Parameters, ToolCall};

pub use repair::repair_json;

/// Terminal marker for an answer.
pub const FINAL_ANSWER_MARKER: &str = "final answer:";

const TOOL_KEYS: &[&str] = &["tool", "tool_name", "action", "name"];
const PARAM_KEYS: &[&str] = &["parameters", "arguments", "args", "action_input", "input"];
const LABELS: &[&str] = &["Thought", "Action", "Action Input", "Observation", "Final Answer"];
const FINISH_ACTIONS: &[&str] = &["final_answer", "finish", "none", "answer"];

static MENTIONS_TOOL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"["']?\b(tool|tool_name|action|name)\b["']?\s*:"#).ok());
static TOOL_NAME_GUESS: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"["']?\btool\b["']?\s*:\s*["']([A-Za-z_][\w.\-]*)"#).ok());

#[derive(Debug, Clone, PartialEq)]
pub struct ParseFailure {
    pub call_id: String,
    /// Best guess at the intended tool
    pub tool_name: Option<String>,
    pub reason: String,
    /// The offending text, for the model to correct
    pub raw: String,
}

impl ParseFailure {
    /// The error text fed back to the model.
    pub fn message(&self) -> String {
        let raw: String = self.raw.chars().take(300).collect();
        format!(
            "Could not parse tool call: {}. Offending text: {raw}\nUse {{\"tool\": \"<name>\", \"parameters\": {{...}}}} with valid JSON.",
            self.reason
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedItem {
    Call(ToolCall),
    Failure(ParseFailure),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseOutcome {
    /// Calls and failures in textual order
    pub items: Vec<ParsedItem>,
    pub final_answer: Option<String>,
}

impl ParseOutcome {
    pub fn calls(&self) -> impl Iterator<Item = &ToolCall> {
        self.items.iter().filter_map(|i| match i {
            ParsedItem::Call(c) => Some(c),
            ParsedItem::Failure(_) => None,
        })
    }

    pub fn failures(&self) -> impl Iterator<Item = &ParseFailure> {
        self.items.iter().filter_map(|i| match i {
            ParsedItem::Failure(f) => Some(f),
            ParsedItem::Call(_) => None,
        })
    }
}

/// Parse one model response.
pub fn parse(text: &str, structured: &[MessageToolCall]) -> ParseOutcome {
    let items = if structured.is_empty() {
        let from_json = from_json_objects(text);
        if from_json.is_empty() {
            from_action_lines(text)
        } else {
            from_json
        }
    } else {
        from_structured(structured)
    };
    let final_answer = if items.is_empty() {
        extract_final_answer(text)
    } else {
        None
    };
    ParseOutcome {
        items,
        final_answer,
    }
}

fn react_id(index: usize) -> String {
    format!("react_{index}")
}

fn valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

fn is_finish(name: &str) -> bool {
    let normalized = name.trim().to_ascii_lowercase().replace(' ', "_");
    FINISH_ACTIONS.contains(&normalized.as_str())
}

/// Parse as JSON, then once more after repair.
fn lenient_value(raw: &str) -> Option<Value> {
    serde_json::from_str(raw.trim())
        .ok()
        .or_else(|| serde_json::from_str(&repair_json(raw)).ok())
}

fn into_parameters(value: Value) -> Parameters {
    match value {
        Value::Object(map) => map,
        Value::Null => Parameters::new(),
        Value::String(s) => match lenient_value(&s) {
            Some(Value::Object(map)) if s.trim_start().starts_with('{') => map,
            _ => Parameters::from_iter([("input".to_string(), Value::String(s))]),
        },
        other => Parameters::from_iter([("input".to_string(), other)]),
    }
}

// ── Structured ────────────────────────────────────────────────────────────

fn from_structured(calls: &[MessageToolCall]) -> Vec<ParsedItem> {
    calls
        .iter()
        .enumerate()
        .map(|(i, tc)| {
            let call_id = if tc.id.trim().is_empty() {
                react_id(i)
            } else {
                tc.id.clone()
            };
            if !valid_name(&tc.name) {
                return ParsedItem::Failure(ParseFailure {
                    call_id,
                    tool_name: None,
                    reason: format!("invalid tool name {:?}", tc.name),
                    raw: tc.arguments.clone(),
                });
            }
            if tc.arguments.trim().is_empty() {
                return ParsedItem::Call(ToolCall::new(call_id, &tc.name, Parameters::new()));
            }
            match lenient_value(&tc.arguments) {
                Some(v) => ParsedItem::Call(ToolCall::new(call_id, &tc.name, into_parameters(v))),
                None => ParsedItem::Failure(ParseFailure {
                    call_id,
                    tool_name: Some(tc.name.clone()),
                    reason: "arguments are not valid JSON".into(),
                    raw: tc.arguments.clone(),
                }),
            }
        })
        .collect()
}

// ── Inline JSON ───────────────────────────────────────────────────────────

/// Byte spans of top-level `{...}` objects. An object left open runs to
/// the end of the text so the repair pass can close it.
fn object_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    spans.push((start, i + 1));
                }
            }
            _ => {}
        }
    }
    if depth > 0 {
        spans.push((start, text.len()));
    }
    spans
}

fn tool_from_object(obj: &Parameters) -> Option<(String, Parameters)> {
    let name = TOOL_KEYS
        .iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str))?
        .trim()
        .to_string();
    // A bare {"name": ...} is only a call when it comes with arguments.
    if !obj.contains_key("tool")
        && !obj.contains_key("tool_name")
        && !obj.contains_key("action")
        && !PARAM_KEYS.iter().any(|k| obj.contains_key(*k))
    {
        return None;
    }
    let params = PARAM_KEYS
        .iter()
        .find_map(|k| obj.get(*k).cloned())
        .map(into_parameters)
        .unwrap_or_default();
    Some((name, params))
}

fn from_json_objects(text: &str) -> Vec<ParsedItem> {
    let mentions = |s: &str| MENTIONS_TOOL.as_ref().is_some_and(|re| re.is_match(s));
    let mut items = Vec::new();
    for (start, end) in object_spans(text) {
        let slice = &text[start..end];
        if !mentions(slice) {
            continue;
        }
        let call_id = react_id(items.len());
        match lenient_value(slice) {
            Some(Value::Object(obj)) => {
                let Some((name, params)) = tool_from_object(&obj) else {
                    continue;
                };
                if is_finish(&name) {
                    continue;
                }
                if valid_name(&name) {
                    items.push(ParsedItem::Call(ToolCall::new(call_id, name, params)));
                } else {
                    items.push(ParsedItem::Failure(ParseFailure {
                        call_id,
                        tool_name: None,
                        reason: format!("invalid tool name {name:?}"),
                        raw: slice.to_string(),
                    }));
                }
            }
            Some(_) => {}
            None => {
                let tool_name = TOOL_NAME_GUESS
                    .as_ref()
                    .and_then(|re| re.captures(slice))
                    .and_then(|c| c.get(1))
                    .map(|m| m.as_str().to_string());
                if tool_name.is_none() && !slice.contains("tool") {
                    continue;
                }
                items.push(ParsedItem::Failure(ParseFailure {
                    call_id,
                    tool_name,
                    reason: "tool-call JSON is malformed".into(),
                    raw: slice.to_string(),
                }));
            }
        }
    }
    items
}

// ── Action lines ──────────────────────────────────────────────────────────

/// The value after `label:` at the start of `line` (case-insensitive).
fn label_value<'a>(line: &'a str, label: &str) -> Option<&'a str> {
    let trimmed = line.trim_start().trim_start_matches(['-', '*', '#', '>', ' ']);
    let head = trimmed.get(..label.len())?;
    if !head.eq_ignore_ascii_case(label) {
        return None;
    }
    let rest = trimmed[label.len()..]
        .trim_start_matches(|c: char| c.is_ascii_digit() || c == ' ' || c == '*');
    rest.strip_prefix(':').map(|v| v.trim_start_matches('*').trim())
}

fn is_label(line: &str) -> bool {
    LABELS.iter().any(|l| label_value(line, l).is_some())
}

/// Split `a=1, b="x, y"` on top-level commas and newlines.
fn split_top_level(raw: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in raw.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, ',' | '\n') => {
                parts.push(&raw[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&raw[start..]);
    parts.into_iter().map(str::trim).filter(|p| !p.is_empty()).collect()
}

fn unquote(value: &str) -> &str {
    let v = value.trim();
    for q in ['"', '\''] {
        if v.len() >= 2 && v.starts_with(q) && v.ends_with(q) {
            return &v[1..v.len() - 1];
        }
    }
    v
}

fn key_value_params(raw: &str) -> Option<Parameters> {
    let mut params = Parameters::new();
    for part in split_top_level(raw) {
        let (key, value) = part.split_once('=')?;
        let key = unquote(key);
        if !valid_name(key) {
            return None;
        }
        let value = value.trim();
        let parsed = match serde_json::from_str::<Value>(value) {
            Ok(v @ (Value::Number(_) | Value::Bool(_) | Value::String(_))) => v,
            _ => Value::String(unquote(value).to_string()),
        };
        params.insert(key.to_string(), parsed);
    }
    (!params.is_empty()).then_some(params)
}

/// Parameters written after an action: JSON, then `k=v` pairs, then raw text.
fn inline_params(raw: &str) -> Result<Parameters, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Parameters::new());
    }
    if raw.starts_with('{') || raw.starts_with("```") {
        return lenient_value(raw)
            .map(into_parameters)
            .ok_or_else(|| "action input is not valid JSON".to_string());
    }
    if let Some(params) = key_value_params(raw) {
        return Ok(params);
    }
    Ok(Parameters::from_iter([(
        "input".to_string(),
        Value::String(unquote(raw).to_string()),
    )]))
}

fn from_action_lines(text: &str) -> Vec<ParsedItem> {
    let lines: Vec<&str> = text.lines().collect();
    let mut items = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        let Some(action) = label_value(lines[i], "Action") else {
            i += 1;
            continue;
        };
        let mut j = i + 1;
        while j < lines.len() && lines[j].trim().is_empty() {
            j += 1;
        }
        let mut input: Option<String> = None;
        if j < lines.len()
            && let Some(first) = label_value(lines[j], "Action Input")
        {
            let mut buf = vec![first];
            j += 1;
            while j < lines.len() && !is_label(lines[j]) {
                buf.push(lines[j]);
                j += 1;
            }
            input = Some(buf.join("\n").trim().to_string());
        } else {
            j = i + 1;
        }
        i = j;

        let action = action.trim().trim_matches('`').trim();
        let (name, params) = match (action.find('('), action.ends_with(')')) {
            (Some(open), true) => (&action[..open], inline_params(&action[open + 1..action.len() - 1])),
            _ => (action, input.as_deref().map_or(Ok(Parameters::new()), inline_params)),
        };
        let name = name.trim().trim_matches(['[', ']', '"', '\'', '`']);
        if name.is_empty() || is_finish(name) {
            continue;
        }

        let call_id = react_id(items.len());
        let raw = match &input {
            Some(inp) => format!("Action: {action}\nAction Input: {inp}"),
            None => format!("Action: {action}"),
        };
        items.push(match (valid_name(name), params) {
            (true, Ok(params)) => ParsedItem::Call(ToolCall::new(call_id, name, params)),
            (true, Err(reason)) => ParsedItem::Failure(ParseFailure {
                call_id,
                tool_name: Some(name.to_string()),
                reason,
                raw,
            }),
            (false, _) => ParsedItem::Failure(ParseFailure {
                call_id,
                tool_name: None,
                reason: format!("unrecognized action name {name:?}"),
                raw,
            }),
        });
    }
    items
}

// ── Final answer ──────────────────────────────────────────────────────────

fn strip_think(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find("<think>") {
        out.push_str(&rest[..open]);
        match rest[open..].find("</think>") {
            Some(close) => rest = &rest[open + close + "</think>".len()..],
            None => return out,
        }
    }
    out.push_str(rest);
    out
}

/// The answer text of a response with no tool calls.
///
/// Uses whatever follows the last `Final Answer:` marker; without a marker,
/// the whole text minus `Thought:` and `Observation:` lines.
pub fn extract_final_answer(text: &str) -> Option<String> {
    let cleaned = strip_think(text);
    let lowered = cleaned.to_ascii_lowercase();
    let answer = match lowered.rfind(FINAL_ANSWER_MARKER) {
        Some(pos) => cleaned[pos + FINAL_ANSWER_MARKER.len()..]
            .trim_start_matches('*')
            .trim()
            .to_string(),
        None => cleaned
            .lines()
            .filter(|l| label_value(l, "Thought").is_none() && label_value(l, "Observation").is_none())
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string(),
    };
    (!answer.is_empty()).then_some(answer)
}
