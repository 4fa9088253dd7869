//! Structured-response repair for LLM output.
//!
//! Backends frequently wrap JSON in markdown fences, surround it with prose,
//! leave trailing commas, or stop mid-document when they hit a token limit.
//! Every phase funnels raw text through [`repair_json`] / [`parse_typed`],
//! which never fail: they return the best value they can recover together
//! with a `degraded` flag.
//!
//! # Repair Steps
//!
//! 1. Direct parse of the trimmed text
//! 2. Strip wrappers: code fences (terminated or not), then pick the widest
//!    `{...}` / `[...]` region out of the surrounding prose, so bracketed
//!    asides like citation markers `[1]` are skipped
//! 3. Remove trailing separators before `}` / `]`
//! 4. If the document is truncated, cut it back to the last member boundary
//!    at the shallowest recoverable nesting level and close what is open
//! 5. Otherwise fall back to a default value
//!
//! Steps 1-3 keep `degraded = false`; steps 4-5 set it.
//!
//! # Example
//!
//! ```
//! use keyword_forge::utils::json_repair::repair_json;
//!
//! let repaired = repair_json(r#"{"a":1,"b":[1,2,"#);
//! assert_eq!(repaired.value, serde_json::json!({"a": 1}));
//! assert!(repaired.degraded);
//! ```

use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::OnceLock;

/// Output of the repair parser.
#[derive(Debug, Clone, PartialEq)]
pub struct Repaired<T> {
    /// Recovered value, or a default when nothing could be salvaged.
    pub value: T,
    /// True when the value came from truncation salvage or defaulting.
    pub degraded: bool,
}

impl<T> Repaired<T> {
    fn clean(value: T) -> Self {
        Self {
            value,
            degraded: false,
        }
    }

    fn degraded(value: T) -> Self {
        Self {
            value,
            degraded: true,
        }
    }
}

/// A position where the document could be cut and closed again.
#[derive(Debug, Clone)]
struct CutPoint {
    /// Byte offset; the kept prefix is `text[..end]`.
    end: usize,
    /// Closers still open after the prefix, innermost last.
    open: Vec<char>,
}

impl CutPoint {
    fn depth(&self) -> usize {
        self.open.len()
    }

    fn render(&self, text: &str) -> String {
        let prefix = text[..self.end].trim_end();
        let prefix = prefix.trim_end_matches(|c: char| c == ',' || c.is_whitespace());
        let mut out = String::with_capacity(prefix.len() + self.open.len());
        out.push_str(prefix);
        out.extend(self.open.iter().rev());
        out
    }
}

/// How a scan over a container ended.
#[derive(Debug)]
enum ScanOutcome {
    /// The root container closed at this byte offset (inclusive).
    Balanced(usize),
    /// Input ended (or a mismatched closer appeared) before the root closed.
    Truncated {
        /// Byte offset where usable input stops.
        stop: usize,
        member_cuts: Vec<CutPoint>,
        opener_cuts: Vec<CutPoint>,
    },
}

/// Parse raw backend text into a JSON value, repairing what can be repaired.
pub fn repair_json(raw: &str) -> Repaired<Value> {
    let trimmed = raw.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Repaired::clean(value);
    }

    let scope = strip_fences(trimmed);
    let mut candidates = find_containers(scope);
    if candidates.is_empty() {
        tracing::debug!(
            preview = %preview(trimmed),
            "No JSON container found in response, using default"
        );
        return Repaired::degraded(Value::Null);
    }

    // The widest container is the document; bracketed asides such as
    // citation markers `[1]` are shorter than it.
    candidates.sort_by(|a, b| b.span.cmp(&a.span));

    // An empty salvage only wins when nothing else yields a value.
    let mut fallback: Option<Repaired<Value>> = None;
    for candidate in candidates {
        let repaired = match candidate.body {
            ContainerBody::Parsed(value) => return Repaired::clean(value),
            ContainerBody::Broken(text) => {
                tracing::debug!(start = candidate.start, "Balanced JSON failed to parse, salvaging");
                salvage(&text)
            }
            ContainerBody::Truncated(text) => match scan_container(&text) {
                ScanOutcome::Truncated {
                    stop,
                    member_cuts,
                    opener_cuts,
                } => salvage_from(&text[..stop], member_cuts, opener_cuts),
                ScanOutcome::Balanced(_) => salvage(&text),
            },
        };
        if !is_empty_container(&repaired.value) {
            return repaired;
        }
        if fallback.is_none() && !repaired.value.is_null() {
            fallback = Some(repaired);
        }
    }

    fallback.unwrap_or_else(|| Repaired::degraded(Value::Null))
}

fn is_empty_container(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Parse raw backend text into `T`.
///
/// Falls back to `T::default()` with `degraded = true` when nothing can be
/// recovered or when the recovered value does not fit `T`.
pub fn parse_typed<T>(raw: &str) -> Repaired<T>
where
    T: DeserializeOwned + Default,
{
    let repaired = repair_json(raw);
    if repaired.value.is_null() {
        return Repaired::degraded(T::default());
    }
    match serde_json::from_value::<T>(repaired.value) {
        Ok(value) => Repaired {
            value,
            degraded: repaired.degraded,
        },
        Err(err) => {
            tracing::debug!(error = %err, "Recovered JSON does not match expected shape");
            Repaired::degraded(T::default())
        }
    }
}

fn fence_regex() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    // An unterminated fence runs to the end of the input.
    FENCE
        .get_or_init(|| Regex::new(r"```[A-Za-z0-9_-]*[ \t]*\r?\n?([\s\S]*?)(?:```|\z)").ok())
        .as_ref()
}

/// Return the content of the first code fence that holds a container, or
/// the input unchanged when there is none.
pub fn strip_fences(content: &str) -> &str {
    if !content.contains("```") {
        return content;
    }
    let Some(re) = fence_regex() else {
        return content;
    };
    re.captures_iter(content)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .find(|block| block.contains('{') || block.contains('['))
        .unwrap_or(content)
}

/// A `{...}` or `[...]` region found in surrounding prose.
#[derive(Debug)]
struct Container {
    /// Byte offset of the opening delimiter.
    start: usize,
    /// Bytes covered, closing delimiter included when there is one.
    span: usize,
    body: ContainerBody,
}

#[derive(Debug)]
enum ContainerBody {
    /// Balanced and valid after trailing separators were removed.
    Parsed(Value),
    /// Balanced but not valid JSON.
    Broken(String),
    /// Never closed, or cut by a mismatched closer.
    Truncated(String),
}

/// Every top-level container in `scope`, in order of appearance.
///
/// A balanced container hides the ones nested inside it. A container that
/// runs to the end of input ends the search.
fn find_containers(scope: &str) -> Vec<Container> {
    let mut found = Vec::new();
    let mut from = 0;

    while let Some(offset) = scope[from..].find(['{', '[']) {
        let start = from + offset;
        let rest = &scope[start..];

        match scan_container(rest) {
            ScanOutcome::Balanced(end) => {
                let cleaned = remove_trailing_separators(&rest[..=end]);
                let body = match serde_json::from_str::<Value>(&cleaned) {
                    Ok(value) => ContainerBody::Parsed(value),
                    Err(_) => ContainerBody::Broken(cleaned),
                };
                found.push(Container {
                    start,
                    span: end + 1,
                    body,
                });
                from = start + end + 1;
            }
            ScanOutcome::Truncated { stop, .. } => {
                found.push(Container {
                    start,
                    span: stop,
                    body: ContainerBody::Truncated(remove_trailing_separators(&rest[..stop])),
                });
                if stop == rest.len() {
                    break;
                }
                from = start + 1;
            }
        }
    }

    found
}

/// Drop commas that directly precede a closing brace or bracket, ignoring
/// string contents.
pub fn remove_trailing_separators(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len());
    let mut in_string = false;
    let mut escape_next = false;

    for (i, &c) in chars.iter().enumerate() {
        if escape_next {
            escape_next = false;
            out.push(c);
            continue;
        }

        match c {
            '\\' if in_string => {
                escape_next = true;
            }
            '"' => {
                in_string = !in_string;
            }
            ',' if !in_string => {
                let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
                if matches!(next, Some('}') | Some(']')) {
                    continue;
                }
            }
            _ => {}
        }
        out.push(c);
    }

    out
}

/// Byte offset of the delimiter closing the container `s` starts with.
///
/// Handles nested braces and brackets, string literals and escapes.
pub fn find_container_end(s: &str) -> Option<usize> {
    match scan_container(s) {
        ScanOutcome::Balanced(end) => Some(end),
        ScanOutcome::Truncated { .. } => None,
    }
}

fn scan_container(s: &str) -> ScanOutcome {
    let mut open: Vec<char> = Vec::new();
    let mut member_cuts = Vec::new();
    let mut opener_cuts = Vec::new();
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match c {
            '\\' if in_string => {
                escape_next = true;
            }
            '"' => {
                in_string = !in_string;
            }
            '{' | '[' if !in_string => {
                open.push(if c == '{' { '}' } else { ']' });
                opener_cuts.push(CutPoint {
                    end: i + 1,
                    open: open.clone(),
                });
            }
            '}' | ']' if !in_string => {
                if open.last() != Some(&c) {
                    return ScanOutcome::Truncated {
                        stop: i,
                        member_cuts,
                        opener_cuts,
                    };
                }
                open.pop();
                if open.is_empty() {
                    return ScanOutcome::Balanced(i);
                }
                member_cuts.push(CutPoint {
                    end: i + 1,
                    open: open.clone(),
                });
            }
            ',' if !in_string && !open.is_empty() => {
                member_cuts.push(CutPoint {
                    end: i,
                    open: open.clone(),
                });
            }
            _ => {}
        }
    }

    ScanOutcome::Truncated {
        stop: s.len(),
        member_cuts,
        opener_cuts,
    }
}

fn salvage(text: &str) -> Repaired<Value> {
    // Re-scan without the final delimiter so the scan reports cut points.
    let body = &text[..text.len().saturating_sub(1)];
    match scan_container(body) {
        ScanOutcome::Truncated {
            stop,
            member_cuts,
            opener_cuts,
        } => salvage_from(&body[..stop], member_cuts, opener_cuts),
        ScanOutcome::Balanced(_) => Repaired::degraded(Value::Null),
    }
}

/// Try member boundaries from the shallowest level outwards (latest first
/// within a level), then bare container openings, latest first.
fn salvage_from(
    text: &str,
    mut member_cuts: Vec<CutPoint>,
    opener_cuts: Vec<CutPoint>,
) -> Repaired<Value> {
    member_cuts.sort_by(|a, b| a.depth().cmp(&b.depth()).then(b.end.cmp(&a.end)));

    let candidates = member_cuts
        .iter()
        .chain(opener_cuts.iter().rev())
        .filter(|cut| cut.end <= text.len());

    for cut in candidates {
        let candidate = cut.render(text);
        if let Ok(value) = serde_json::from_str::<Value>(&candidate) {
            tracing::debug!(
                kept_bytes = cut.end,
                total_bytes = text.len(),
                depth = cut.depth(),
                "Salvaged truncated JSON"
            );
            return Repaired::degraded(value);
        }
    }

    tracing::debug!(preview = %preview(text), "Could not salvage JSON, using default");
    Repaired::degraded(Value::Null)
}

fn preview(s: &str) -> String {
    s.chars().take(80).collect()
}
