//! Response parsing for LLM outputs.
//!
//! Extracts SQL and JSON payloads from completions that may wrap them in
//! markdown code fences. Everything extracted here is still untrusted input;
//! callers validate it against their own schemas before use.

use std::ops::Range;

/// Result of parsing an LLM response for SQL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResponse {
    /// Explanatory text around the extracted payload.
    pub text: String,
    /// Extracted SQL query, if found.
    pub sql: Option<String>,
}

/// Parses an LLM response to extract SQL from markdown code blocks.
///
/// Looks for ```sql blocks first, then bare ``` blocks. A response that is
/// itself a bare SELECT/WITH statement is treated as SQL.
pub fn parse_llm_response(response: &str) -> ParsedResponse {
    for lang in ["sql", ""] {
        if let Some(span) = fenced_block(response, lang) {
            return ParsedResponse {
                text: splice_out(response, &span.block),
                sql: Some(response[span.body].trim().to_string()),
            };
        }
    }

    let trimmed = response.trim();
    let upper = trimmed.to_uppercase();
    if upper.starts_with("SELECT") || upper.starts_with("WITH") {
        return ParsedResponse {
            text: String::new(),
            sql: Some(trimmed.to_string()),
        };
    }

    ParsedResponse {
        text: trimmed.to_string(),
        sql: None,
    }
}

/// Extracts the SQL payload from a response, if any.
pub fn extract_sql(response: &str) -> Option<String> {
    parse_llm_response(response).sql
}

/// Extracts a JSON payload from a response: a ```json block if present,
/// otherwise the first balanced object or array in the text.
pub fn extract_json_payload(response: &str) -> Option<serde_json::Value> {
    for lang in ["json", ""] {
        if let Some(span) = fenced_block(response, lang) {
            if let Ok(value) = serde_json::from_str(response[span.body].trim()) {
                return Some(value);
            }
        }
    }

    // Fall back to the first balanced {...} or [...] span.
    for open in ['{', '['] {
        let close = if open == '{' { '}' } else { ']' };
        if let Some(start) = response.find(open) {
            let mut depth = 0usize;
            let mut in_string = false;
            let mut escaped = false;
            for (offset, c) in response[start..].char_indices() {
                if escaped {
                    escaped = false;
                    continue;
                }
                match c {
                    '\\' if in_string => escaped = true,
                    '"' => in_string = !in_string,
                    c if c == open && !in_string => depth += 1,
                    c if c == close && !in_string => {
                        depth -= 1;
                        if depth == 0 {
                            let candidate = &response[start..start + offset + c.len_utf8()];
                            if let Ok(value) = serde_json::from_str(candidate) {
                                return Some(value);
                            }
                            break;
                        }
                    }
                    _ => {}
                }
            }
        }
    }
    None
}

/// Byte spans of one fenced code block: the whole block including its
/// fences, and the body between them.
struct FenceSpan {
    block: Range<usize>,
    body: Range<usize>,
}

/// Finds the first fenced block whose opening tag is exactly `lang`
/// (the empty string matches an untagged fence).
///
/// Works line by line: a fence only opens or closes at the start of a line,
/// and an open non-matching fence is skipped as a whole so a ```sql block
/// never half-matches a search for a bare fence.
fn fenced_block(text: &str, lang: &str) -> Option<FenceSpan> {
    enum Scan {
        Outside,
        SkippingForeign,
        InMatch { block_start: usize, body_start: usize },
    }

    let mut state = Scan::Outside;
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if let Some(tag) = line.trim_end().strip_prefix("```").map(str::trim) {
            state = match state {
                Scan::Outside if tag == lang => Scan::InMatch {
                    block_start: offset,
                    body_start: offset + line.len(),
                },
                Scan::Outside => Scan::SkippingForeign,
                Scan::SkippingForeign if tag.is_empty() => Scan::Outside,
                Scan::InMatch { block_start, body_start } if tag.is_empty() => {
                    return Some(FenceSpan {
                        block: block_start..offset + line.len(),
                        body: body_start..offset,
                    });
                }
                unchanged => unchanged,
            };
        }
        offset += line.len();
    }
    None
}

/// Removes a span from the text, joining the trimmed surroundings.
fn splice_out(text: &str, span: &Range<usize>) -> String {
    let before = text[..span.start].trim_end();
    let after = text[span.end..].trim_start();
    match (before.is_empty(), after.is_empty()) {
        (true, _) => after.to_string(),
        (_, true) => before.to_string(),
        _ => format!("{before}\n{after}"),
    }
}
