//! Parses and qualifies node identifiers.
//!
//! A node identifier is a dotted or slashed string
//! `namespace.collection.label_1.label_2...`. Both `.` and `/` are accepted
//! as separators on input and normalized to `.`; leading separators are
//! stripped before splitting.

use crate::error::{AppError, AppResult};

/// A parsed node identifier: namespace, collection, and the remaining
/// in-collection label path (joined back with `.`, possibly empty).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodePath {
    pub namespace: String,
    pub collection: String,
    /// In-collection label path, e.g. `a.b`. Empty string denotes the
    /// collection root.
    pub label: String,
}

impl NodePath {
    /// The label path split into its individual segments.
    pub fn label_segments(&self) -> Vec<&str> {
        if self.label.is_empty() {
            Vec::new()
        } else {
            self.label.split('.').collect()
        }
    }

    /// The label path of this node's parent, or `None` if this node is
    /// already the collection root or a first-level label (whose parent
    /// is the root itself, represented by `Some("")`).
    pub fn parent_label(&self) -> Option<String> {
        let segs = self.label_segments();
        match segs.len() {
            0 => None,
            1 => Some(String::new()),
            n => Some(segs[..n - 1].join(".")),
        }
    }

    /// Fully-qualified external path: `ns.coll.label`, dropping the
    /// trailing separator when `label` is empty.
    pub fn qualify(&self) -> String {
        if self.label.is_empty() {
            format!("{}.{}", self.namespace, self.collection)
        } else {
            format!("{}.{}.{}", self.namespace, self.collection, self.label)
        }
    }

    pub fn with_label(&self, label: impl Into<String>) -> NodePath {
        NodePath {
            namespace: self.namespace.clone(),
            collection: self.collection.clone(),
            label: label.into(),
        }
    }
}

/// Parses a raw request path (with an optional trailing `.format` suffix
/// already stripped by the caller) into a `NodePath`.
///
/// Fewer than two non-empty segments is a path error. A request of
/// exactly two segments targets the collection root (`label = ""`).
pub fn parse(raw: &str) -> AppResult<NodePath> {
    let normalized = raw.replace('/', ".");
    let trimmed = normalized.trim_start_matches('.');
    if trimmed.is_empty() {
        return Err(AppError::PathError("empty node path".into()));
    }

    let mut parts = trimmed.splitn(3, '.');
    let namespace = parts.next().unwrap_or("").to_string();
    let collection = parts
        .next()
        .ok_or_else(|| AppError::PathError(format!("path `{raw}` needs a namespace and a collection")))?
        .to_string();
    if namespace.is_empty() || collection.is_empty() {
        return Err(AppError::PathError(format!("path `{raw}` needs a namespace and a collection")));
    }
    let label = parts.next().unwrap_or("").to_string();

    Ok(NodePath { namespace, collection, label })
}

/// Splits the trailing `.json`/`.xml` format suffix off a raw URI tail.
/// The suffix only ever affects the declared response content-type (no
/// XML encoding path exists); both `.json` and `.xml` degrade to the
/// same JSON body.
pub fn split_format_suffix(raw: &str) -> (&str, &str) {
    if let Some(idx) = raw.rfind('.') {
        let (head, tail) = raw.split_at(idx);
        let suffix = &tail[1..];
        if suffix.eq_ignore_ascii_case("json") || suffix.eq_ignore_ascii_case("xml") {
            return (head, suffix);
        }
    }
    (raw, "json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_three_segments() {
        let p = parse("test.table.a.b").unwrap();
        assert_eq!(p.namespace, "test");
        assert_eq!(p.collection, "table");
        assert_eq!(p.label, "a.b");
    }

    #[test]
    fn two_segments_targets_collection_root() {
        let p = parse("test.table").unwrap();
        assert_eq!(p.label, "");
        assert_eq!(p.qualify(), "test.table");
    }

    #[test]
    fn slash_separators_normalize() {
        let p = parse("/test/table/a/b").unwrap();
        assert_eq!(p.namespace, "test");
        assert_eq!(p.collection, "table");
        assert_eq!(p.label, "a.b");
    }

    #[test]
    fn single_segment_is_a_path_error() {
        assert!(parse("test").is_err());
        assert!(parse("").is_err());
    }

    #[test]
    fn parent_label_of_first_level_is_root() {
        let p = parse("test.table.a").unwrap();
        assert_eq!(p.parent_label(), Some(String::new()));
    }

    #[test]
    fn parent_label_of_nested_label() {
        let p = parse("test.table.a.b").unwrap();
        assert_eq!(p.parent_label(), Some("a".to_string()));
    }

    #[test]
    fn parent_label_of_root_is_none() {
        let p = parse("test.table").unwrap();
        assert_eq!(p.parent_label(), None);
    }

    #[test]
    fn format_suffix_strips_json_and_xml() {
        assert_eq!(split_format_suffix("test.table.a.json"), ("test.table.a", "json"));
        assert_eq!(split_format_suffix("test.table.a.xml"), ("test.table.a", "xml"));
        assert_eq!(split_format_suffix("test.table.a"), ("test.table.a", "json"));
    }

    #[test]
    fn qualify_with_label() {
        let p = parse("test.table").unwrap();
        let child = p.with_label("a");
        assert_eq!(child.qualify(), "test.table.a");
    }
}
