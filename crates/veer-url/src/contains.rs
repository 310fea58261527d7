//! Tree containment checks
//!
//! Compares two URL trees along four independently configurable axes: path
//! segments, matrix params, query params, and fragment. Used by the router's
//! `is_active` API and same-URL detection.

use crate::tree::{equal_path, Params, QueryParams, UrlSegmentGroup, UrlTree, PRIMARY_OUTLET};

/// How path segments are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathCompare {
    /// The containee's segments must equal the container's exactly.
    Exact,
    /// The containee may be a prefix of the container.
    Subset,
}

/// How a parameter map (matrix or query) is compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamCompare {
    /// Maps must be equal.
    Exact,
    /// Every containee entry must be present in the container.
    Subset,
    /// Parameters are not considered.
    Ignored,
}

/// How the fragment is compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentCompare {
    Exact,
    Ignored,
}

/// Comparison options for [`contains_tree`].
///
/// # Examples
///
/// ```
/// use veer_url::{contains_tree, DefaultUrlSerializer, IsActiveMatchOptions, UrlSerializer};
///
/// let s = DefaultUrlSerializer::default();
/// let container = s.parse("/a/b?x=1").unwrap();
/// let containee = s.parse("/a?x=1").unwrap();
///
/// assert!(contains_tree(&container, &containee, &IsActiveMatchOptions::subset()));
/// assert!(!contains_tree(&container, &containee, &IsActiveMatchOptions::exact()));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IsActiveMatchOptions {
    pub paths: PathCompare,
    pub matrix_params: ParamCompare,
    pub query_params: ParamCompare,
    pub fragment: FragmentCompare,
}

impl IsActiveMatchOptions {
    /// All four axes compared exactly.
    pub fn exact() -> Self {
        Self {
            paths: PathCompare::Exact,
            matrix_params: ParamCompare::Exact,
            query_params: ParamCompare::Exact,
            fragment: FragmentCompare::Exact,
        }
    }

    /// Prefix path match, subset params, fragment ignored.
    pub fn subset() -> Self {
        Self {
            paths: PathCompare::Subset,
            matrix_params: ParamCompare::Subset,
            query_params: ParamCompare::Subset,
            fragment: FragmentCompare::Ignored,
        }
    }
}

/// Returns true when `containee` is contained in `container` per `options`.
pub fn contains_tree(
    container: &UrlTree,
    containee: &UrlTree,
    options: &IsActiveMatchOptions,
) -> bool {
    let paths_ok = match options.paths {
        PathCompare::Exact => {
            equal_segment_groups(&container.root, &containee.root, options.matrix_params)
        }
        PathCompare::Subset => {
            contains_segment_group(&container.root, &containee.root, options.matrix_params)
        }
    };
    if !paths_ok {
        return false;
    }
    let query_ok = match options.query_params {
        ParamCompare::Exact => container.query_params == containee.query_params,
        ParamCompare::Subset => contains_query_params(&container.query_params, &containee.query_params),
        ParamCompare::Ignored => true,
    };
    if !query_ok {
        return false;
    }
    match options.fragment {
        FragmentCompare::Exact => container.fragment == containee.fragment,
        FragmentCompare::Ignored => true,
    }
}

fn contains_query_params(container: &QueryParams, containee: &QueryParams) -> bool {
    containee
        .iter()
        .all(|(key, value)| container.get(key) == Some(value))
}

fn contains_params(container: &Params, containee: &Params) -> bool {
    containee
        .iter()
        .all(|(key, value)| container.get(key) == Some(value))
}

fn matrix_params_match(
    container: &[crate::tree::UrlSegment],
    containee: &[crate::tree::UrlSegment],
    mode: ParamCompare,
) -> bool {
    containee.iter().enumerate().all(|(i, seg)| match mode {
        ParamCompare::Exact => container[i].parameters == seg.parameters,
        ParamCompare::Subset => contains_params(&container[i].parameters, &seg.parameters),
        ParamCompare::Ignored => true,
    })
}

fn equal_segment_groups(
    container: &UrlSegmentGroup,
    containee: &UrlSegmentGroup,
    matrix: ParamCompare,
) -> bool {
    if !equal_path(&container.segments, &containee.segments) {
        return false;
    }
    if !matrix_params_match(&container.segments, &containee.segments, matrix) {
        return false;
    }
    if container.number_of_children() != containee.number_of_children() {
        return false;
    }
    containee.children.iter().all(|(outlet, child)| {
        container
            .children
            .get(outlet)
            .is_some_and(|other| equal_segment_groups(other, child, matrix))
    })
}

fn contains_segment_group(
    container: &UrlSegmentGroup,
    containee: &UrlSegmentGroup,
    matrix: ParamCompare,
) -> bool {
    contains_segment_group_helper(container, containee, &containee.segments, matrix)
}

/// Walks the container downward through primary children while consuming the
/// containee's segment list.
fn contains_segment_group_helper(
    container: &UrlSegmentGroup,
    containee: &UrlSegmentGroup,
    containee_paths: &[crate::tree::UrlSegment],
    matrix: ParamCompare,
) -> bool {
    if container.segments.len() > containee_paths.len() {
        // Container has extra trailing segments; the containee must end here.
        let current = &container.segments[..containee_paths.len()];
        if !equal_path(current, containee_paths) {
            return false;
        }
        if containee.has_children() {
            return false;
        }
        matrix_params_match(current, containee_paths, matrix)
    } else if container.segments.len() == containee_paths.len() {
        if !equal_path(&container.segments, containee_paths) {
            return false;
        }
        if !matrix_params_match(&container.segments, containee_paths, matrix) {
            return false;
        }
        containee.children.iter().all(|(outlet, child)| {
            container
                .children
                .get(outlet)
                .is_some_and(|other| contains_segment_group(other, child, matrix))
        })
    } else {
        // Containee continues past this group; follow the primary child.
        let current = &containee_paths[..container.segments.len()];
        let next = &containee_paths[container.segments.len()..];
        if !equal_path(&container.segments, current) {
            return false;
        }
        if !matrix_params_match(&container.segments, current, matrix) {
            return false;
        }
        match container.children.get(PRIMARY_OUTLET) {
            Some(primary) => contains_segment_group_helper(primary, containee, next, matrix),
            None => false,
        }
    }
}
