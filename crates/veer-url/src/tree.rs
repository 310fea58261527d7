//! Structured URL tree model
//!
//! A parsed URL is a tree of segment groups keyed by outlet name. The root
//! group never carries segments of its own: all path content lives in
//! children so every run of segments is associated with an outlet.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Name of the default (primary) outlet.
pub const PRIMARY_OUTLET: &str = "primary";

/// Matrix parameters of a single segment, and positional route params.
pub type Params = BTreeMap<String, String>;

/// Query parameters of a full URL tree.
pub type QueryParams = BTreeMap<String, QueryValue>;

/// A query parameter value: a single value, or a list when the key repeats.
///
/// `?a=1` yields `Single("1")`; `?a=1&a=2` yields `List(["1", "2"])`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryValue {
    Single(String),
    List(Vec<String>),
}

impl QueryValue {
    /// First value, regardless of arity.
    pub fn first(&self) -> Option<&str> {
        match self {
            QueryValue::Single(v) => Some(v),
            QueryValue::List(vs) => vs.first().map(String::as_str),
        }
    }

    /// All values as a slice-like iterator.
    pub fn values(&self) -> impl Iterator<Item = &str> {
        let vs: Vec<&str> = match self {
            QueryValue::Single(v) => vec![v.as_str()],
            QueryValue::List(vs) => vs.iter().map(String::as_str).collect(),
        };
        vs.into_iter()
    }

    /// Append another occurrence of the same key.
    pub fn push(&mut self, value: String) {
        match self {
            QueryValue::Single(existing) => {
                *self = QueryValue::List(vec![std::mem::take(existing), value]);
            }
            QueryValue::List(vs) => vs.push(value),
        }
    }
}

impl From<&str> for QueryValue {
    fn from(v: &str) -> Self {
        QueryValue::Single(v.to_string())
    }
}

impl From<String> for QueryValue {
    fn from(v: String) -> Self {
        QueryValue::Single(v)
    }
}

/// One path element: the segment text plus its matrix parameters.
///
/// Equality is structural over both the path and the parameter map.
///
/// # Examples
///
/// ```
/// use veer_url::UrlSegment;
///
/// let seg = UrlSegment::new("33").with_parameter("expand", "true");
/// assert_eq!(seg.path, "33");
/// assert_eq!(seg.parameters.get("expand").map(String::as_str), Some("true"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlSegment {
    /// Decoded path text of this segment.
    pub path: String,
    /// Decoded matrix parameters attached to this segment.
    pub parameters: Params,
}

impl UrlSegment {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            parameters: Params::new(),
        }
    }

    pub fn with_parameters(path: impl Into<String>, parameters: Params) -> Self {
        Self {
            path: path.into(),
            parameters,
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }
}

/// Node in the URL tree: an ordered run of segments plus named children.
///
/// Children are keyed by outlet name; [`PRIMARY_OUTLET`] is the reserved
/// default key. There is no parent back-reference: consumers that need
/// ancestry walk down from the tree root.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UrlSegmentGroup {
    /// Segments belonging to this group, in path order.
    pub segments: Vec<UrlSegment>,
    /// Child groups, keyed by outlet name.
    pub children: HashMap<String, UrlSegmentGroup>,
}

impl UrlSegmentGroup {
    pub fn new(segments: Vec<UrlSegment>, children: HashMap<String, UrlSegmentGroup>) -> Self {
        Self { segments, children }
    }

    /// Group with segments and no children.
    pub fn from_segments(segments: Vec<UrlSegment>) -> Self {
        Self {
            segments,
            children: HashMap::new(),
        }
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    pub fn number_of_children(&self) -> usize {
        self.children.len()
    }

    /// The primary-outlet child, if present.
    pub fn primary_child(&self) -> Option<&UrlSegmentGroup> {
        self.children.get(PRIMARY_OUTLET)
    }

    /// Joined segment paths, `/`-separated, ignoring matrix params.
    ///
    /// Useful in error messages; the serializer is the real inverse of the
    /// parser.
    pub fn segment_path(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.path.as_str())
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// A fully parsed URL.
///
/// Immutable by convention: operations that change a tree build a new one.
/// The root group's `segments` is always empty (all content is in children).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UrlTree {
    pub root: UrlSegmentGroup,
    pub query_params: QueryParams,
    pub fragment: Option<String>,
}

impl UrlTree {
    pub fn new(root: UrlSegmentGroup, query_params: QueryParams, fragment: Option<String>) -> Self {
        debug_assert!(
            root.segments.is_empty(),
            "URL tree root group must not carry segments"
        );
        Self {
            root,
            query_params,
            fragment,
        }
    }

    /// Empty tree, equivalent to parsing `/`.
    pub fn empty() -> Self {
        Self::default()
    }

    /// First value of a query parameter.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query_params.get(key).and_then(QueryValue::first)
    }
}

/// Structural equality of two segment lists (paths and matrix params).
pub fn equal_segments(a: &[UrlSegment], b: &[UrlSegment]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x == y)
}

/// Path-only equality of two segment lists, ignoring matrix params.
pub fn equal_path(a: &[UrlSegment], b: &[UrlSegment]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.path == y.path)
}

/// Deep structural equality of two segment groups.
pub fn equal_segment_groups(a: &UrlSegmentGroup, b: &UrlSegmentGroup) -> bool {
    if !equal_segments(&a.segments, &b.segments) {
        return false;
    }
    if a.number_of_children() != b.number_of_children() {
        return false;
    }
    a.children.iter().all(|(outlet, child)| {
        b.children
            .get(outlet)
            .is_some_and(|other| equal_segment_groups(child, other))
    })
}
