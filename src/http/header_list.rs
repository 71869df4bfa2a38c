//! Parsing of comma-separated header lists.
//!
//! Handles quoted strings (commas and semicolons inside quotes are not
//! separators), `;`-parameters, q-value ordering and media-type matching.

use axum::http::header::HeaderName;
use axum::http::HeaderMap;
use std::cmp::Ordering;

/// One list element with its parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub value: String,
    pub params: Vec<(String, String)>,
}

impl Element {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A list element weighted by its `q` parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct QualityItem {
    pub value: String,
    pub params: Vec<(String, String)>,
    pub quality: f32,
}

/// Split on `sep` outside of quoted strings. Empty pieces are dropped.
fn split_unquoted(input: &str, sep: u8) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut escaped = false;
    for (i, b) in input.bytes().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_quotes => escaped = true,
            b'"' => in_quotes = !in_quotes,
            _ if b == sep && !in_quotes => {
                push_trimmed(&mut out, &input[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    push_trimmed(&mut out, &input[start..]);
    out
}

fn push_trimmed<'a>(out: &mut Vec<&'a str>, piece: &'a str) {
    let piece = piece.trim_matches(|c| c == ' ' || c == '\t');
    if !piece.is_empty() {
        out.push(piece);
    }
}

/// Split a single header value into its list elements.
pub fn split_list(value: &str) -> Vec<&str> {
    split_unquoted(value, b',')
}

/// Every list element across all values of `name`.
pub fn header_values(headers: &HeaderMap, name: &HeaderName) -> Vec<String> {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(split_list)
        .map(str::to_string)
        .collect()
}

/// Like [`header_values`], lowercased for token comparison.
pub fn header_tokens(headers: &HeaderMap, name: &HeaderName) -> Vec<String> {
    header_values(headers, name)
        .into_iter()
        .map(|v| v.to_ascii_lowercase())
        .collect()
}

/// Whether any element of `name` equals `token`, ignoring case.
pub fn has_token(headers: &HeaderMap, name: &HeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(split_list)
        .any(|v| v.eq_ignore_ascii_case(token))
}

/// Parse `value; k=v; k2="v 2"` into an [`Element`].
pub fn parse_element(raw: &str) -> Element {
    let mut parts = split_unquoted(raw, b';').into_iter();
    let value = parts.next().unwrap_or_default().to_string();
    let params = parts
        .map(|p| match p.split_once('=') {
            Some((k, v)) => (k.trim().to_string(), unquote(v.trim())),
            None => (p.to_string(), String::new()),
        })
        .collect();
    Element { value, params }
}

fn unquote(value: &str) -> String {
    match value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
    {
        Some(inner) => {
            let mut out = String::with_capacity(inner.len());
            let mut chars = inner.chars();
            while let Some(c) = chars.next() {
                if c == '\\' {
                    if let Some(next) = chars.next() {
                        out.push(next);
                    }
                } else {
                    out.push(c);
                }
            }
            out
        }
        None => value.to_string(),
    }
}

/// Parse a q-value, keeping at most three decimal places.
///
/// Zero means "not acceptable" and yields `None`, as do values outside
/// `0..=1`.
pub fn parse_quality(raw: &str) -> Option<f32> {
    let raw = raw.trim();
    let truncated = match raw.find('.') {
        Some(dot) if raw.len() > dot + 4 => &raw[..dot + 4],
        _ => raw,
    };
    let q: f32 = truncated.parse().ok()?;
    (q > 0.0 && q <= 1.0).then_some(q)
}

/// Elements of `name` sorted by descending quality.
///
/// Entries whose `q` is out of range or not a number are discarded. Equal
/// qualities keep header order.
pub fn quality_list(headers: &HeaderMap, name: &HeaderName) -> Vec<QualityItem> {
    let mut items: Vec<QualityItem> = header_values(headers, name)
        .iter()
        .filter_map(|raw| {
            let element = parse_element(raw);
            let quality = match element.param("q") {
                Some(q) => parse_quality(q)?,
                None => 1.0,
            };
            let params = element
                .params
                .into_iter()
                .filter(|(k, _)| !k.eq_ignore_ascii_case("q"))
                .collect();
            Some(QualityItem {
                value: element.value,
                params,
                quality,
            })
        })
        .collect();
    items.sort_by(|a, b| b.quality.partial_cmp(&a.quality).unwrap_or(Ordering::Equal));
    items
}

/// Index of the first candidate matching `target`.
///
/// `*` matches any type or subtype on either side. Returns `None` when the
/// target or any candidate is not of the form `type/subtype`.
pub fn match_media_type(target: &str, candidates: &[&str]) -> Option<usize> {
    let target = split_media_type(target)?;
    let parsed: Vec<(&str, &str)> = candidates
        .iter()
        .map(|c| split_media_type(c))
        .collect::<Option<_>>()?;
    parsed
        .iter()
        .position(|candidate| media_part_matches(target.0, candidate.0) && media_part_matches(target.1, candidate.1))
}

fn split_media_type(raw: &str) -> Option<(&str, &str)> {
    let essence = raw.split(';').next().unwrap_or_default().trim();
    let (kind, subtype) = essence.split_once('/')?;
    Some((kind.trim(), subtype.trim()))
}

fn media_part_matches(a: &str, b: &str) -> bool {
    a == "*" || b == "*" || a.eq_ignore_ascii_case(b)
}
