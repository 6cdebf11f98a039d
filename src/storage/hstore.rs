//! Manual hstore literal encode/decode.
//!
//! The backend's map column round-trips through its text representation
//! (`"k"=>"v", "k2"=>"v2"`); we serialize and parse that literal ourselves
//! rather than depend on driver-level hstore support, mirroring the
//! original backend's own `_serialize_hstore`/`_parse_hstore` pair.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use super::NodeValue;

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
                continue;
            }
        }
        out.push(c);
    }
    out
}

/// Serializes a map into an hstore literal: `"k"=>"v", "k2"=>"v2"`.
pub fn serialize(value: &NodeValue) -> String {
    value
        .iter()
        .map(|(k, v)| format!("\"{}\"=>\"{}\"", escape(k), escape(v)))
        .collect::<Vec<_>>()
        .join(", ")
}

static PAIR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""((?:[^"\\]|\\.)*)"\s*=>\s*"((?:[^"\\]|\\.)*)""#).unwrap());

/// Parses an hstore literal as returned by Postgres's text output (or
/// produced by `serialize` above) into a plain map. An empty string
/// parses to an empty map.
pub fn parse(text: &str) -> NodeValue {
    let mut out = HashMap::new();
    for cap in PAIR_RE.captures_iter(text) {
        let key = unescape(&cap[1]);
        let val = unescape(&cap[2]);
        out.insert(key, val);
    }
    out
}
