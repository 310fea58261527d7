//! Shared matching machinery
//!
//! Both the redirect resolver and the recognizer traverse the URL tree with
//! the same primitives: structural path matching, empty-path handling
//! (squashing trivial groups so empty-path routing layers do not add tree
//! depth), and outlet-aware candidate ordering. No-match is an ordinary
//! `Result` value, never an unwind.

use crate::config::{PathMatch, Route, Routes};
use crate::errors::NoMatch;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use veer_url::{Params, UrlSegment, UrlSegmentGroup, PRIMARY_OUTLET};

/// Successful structural match of one route against the head of a segment
/// list.
#[derive(Debug, Clone, Default)]
pub(crate) struct PathMatchResult {
    pub consumed: Vec<UrlSegment>,
    pub remaining: Vec<UrlSegment>,
    /// `:name` tokens mapped to the segment they captured.
    pub positional_segments: BTreeMap<String, UrlSegment>,
}

impl PathMatchResult {
    /// Positional params as plain string values.
    pub fn positional_params(&self) -> Params {
        self.positional_segments
            .iter()
            .map(|(k, v)| (k.clone(), v.path.clone()))
            .collect()
    }

    /// Matched params for a snapshot: positional params plus the matrix
    /// params of the last consumed segment.
    pub fn snapshot_params(&self) -> Params {
        let mut params = self.positional_params();
        if let Some(last) = self.consumed.last() {
            for (k, v) in &last.parameters {
                params.insert(k.clone(), v.clone());
            }
        }
        params
    }
}

/// Match `route` against the head of `segments` within `segment_group`.
///
/// Empty-path routes match without consuming anything; with `PathMatch::Full`
/// they additionally require the group to be exhausted.
pub(crate) fn match_segments(
    segment_group: &UrlSegmentGroup,
    route: &Route,
    segments: &[UrlSegment],
) -> Result<PathMatchResult, NoMatch> {
    if route.path.as_deref() == Some("") {
        if route.path_match == PathMatch::Full
            && (segment_group.has_children() || !segments.is_empty())
        {
            return Err(NoMatch);
        }
        return Ok(PathMatchResult {
            consumed: Vec::new(),
            remaining: segments.to_vec(),
            positional_segments: BTreeMap::new(),
        });
    }

    if let Some(matcher) = &route.matcher {
        let result = matcher(segments, segment_group, route).ok_or(NoMatch)?;
        let remaining = segments[result.consumed.len()..].to_vec();
        return Ok(PathMatchResult {
            consumed: result.consumed,
            remaining,
            positional_segments: result.pos_params,
        });
    }

    default_url_matcher(segments, segment_group, route)
}

/// Default pattern matcher for `a/:id`-style paths.
fn default_url_matcher(
    segments: &[UrlSegment],
    segment_group: &UrlSegmentGroup,
    route: &Route,
) -> Result<PathMatchResult, NoMatch> {
    let path = route.path.as_deref().unwrap_or_default();
    let parts: Vec<&str> = path.split('/').collect();

    if parts.len() > segments.len() {
        return Err(NoMatch);
    }
    if route.path_match == PathMatch::Full
        && (segment_group.has_children() || parts.len() < segments.len())
    {
        return Err(NoMatch);
    }

    let mut positional = BTreeMap::new();
    for (part, segment) in parts.iter().zip(segments) {
        if let Some(name) = part.strip_prefix(':') {
            positional.insert(name.to_string(), segment.clone());
        } else if *part != segment.path {
            return Err(NoMatch);
        }
    }

    Ok(PathMatchResult {
        consumed: segments[..parts.len()].to_vec(),
        remaining: segments[parts.len()..].to_vec(),
        positional_segments: positional,
    })
}

/// An empty-path route matches here when the remaining URL allows it.
pub(crate) fn empty_path_match(
    segment_group: &UrlSegmentGroup,
    sliced_segments: &[UrlSegment],
    route: &Route,
) -> bool {
    if (segment_group.has_children() || !sliced_segments.is_empty())
        && route.path_match == PathMatch::Full
    {
        return false;
    }
    route.path.as_deref() == Some("")
}

/// Candidates for `outlet` first, in declaration order, then the rest.
pub(crate) fn sort_by_matching_outlets(routes: &Routes, outlet: &str) -> Routes {
    let mut sorted: Vec<Arc<Route>> = routes
        .iter()
        .filter(|r| r.outlet_name() == outlet)
        .cloned()
        .collect();
    sorted.extend(routes.iter().filter(|r| r.outlet_name() != outlet).cloned());
    sorted
}

/// Result of [`split`]: the (possibly rewritten) group plus the segments
/// still to match inside it.
pub(crate) struct Split {
    pub segment_group: UrlSegmentGroup,
    pub sliced_segments: Vec<UrlSegment>,
}

/// Rewrites the segment group so empty-path routes can match where the URL
/// has no corresponding text, then squashes trivial nesting.
pub(crate) fn split(
    segment_group: &UrlSegmentGroup,
    consumed_segments: &[UrlSegment],
    sliced_segments: &[UrlSegment],
    config: &Routes,
) -> Split {
    if !sliced_segments.is_empty()
        && contains_empty_path_matches_with_named_outlets(segment_group, sliced_segments, config)
    {
        let children = create_children_for_empty_paths(
            config,
            UrlSegmentGroup::new(sliced_segments.to_vec(), segment_group.children.clone()),
        );
        let group = UrlSegmentGroup::new(consumed_segments.to_vec(), children);
        return Split {
            segment_group: merge_trivial_children(group),
            sliced_segments: Vec::new(),
        };
    }

    if sliced_segments.is_empty()
        && contains_empty_path_matches(segment_group, sliced_segments, config)
    {
        let children = add_empty_paths_to_children_if_needed(
            segment_group,
            sliced_segments,
            config,
            segment_group.children.clone(),
        );
        let group = UrlSegmentGroup::new(segment_group.segments.clone(), children);
        return Split {
            segment_group: merge_trivial_children(group),
            sliced_segments: sliced_segments.to_vec(),
        };
    }

    Split {
        segment_group: merge_trivial_children(segment_group.clone()),
        sliced_segments: sliced_segments.to_vec(),
    }
}

fn contains_empty_path_matches_with_named_outlets(
    segment_group: &UrlSegmentGroup,
    sliced_segments: &[UrlSegment],
    routes: &Routes,
) -> bool {
    routes.iter().any(|r| {
        empty_path_match(segment_group, sliced_segments, r) && r.outlet_name() != PRIMARY_OUTLET
    })
}

fn contains_empty_path_matches(
    segment_group: &UrlSegmentGroup,
    sliced_segments: &[UrlSegment],
    routes: &Routes,
) -> bool {
    routes
        .iter()
        .any(|r| empty_path_match(segment_group, sliced_segments, r))
}

fn create_children_for_empty_paths(
    routes: &Routes,
    primary_segment: UrlSegmentGroup,
) -> HashMap<String, UrlSegmentGroup> {
    let mut children = HashMap::new();
    children.insert(PRIMARY_OUTLET.to_string(), primary_segment);
    for route in routes {
        if route.path.as_deref() == Some("") && route.outlet_name() != PRIMARY_OUTLET {
            children
                .entry(route.outlet_name().to_string())
                .or_insert_with(UrlSegmentGroup::default);
        }
    }
    children
}

fn add_empty_paths_to_children_if_needed(
    segment_group: &UrlSegmentGroup,
    sliced_segments: &[UrlSegment],
    routes: &Routes,
    mut children: HashMap<String, UrlSegmentGroup>,
) -> HashMap<String, UrlSegmentGroup> {
    for route in routes {
        if empty_path_match(segment_group, sliced_segments, route)
            && !children.contains_key(route.outlet_name())
        {
            children.insert(route.outlet_name().to_string(), UrlSegmentGroup::default());
        }
    }
    children
}

/// Squash a group whose only child is a primary group: its segments fold
/// into the parent. Idempotent.
pub(crate) fn merge_trivial_children(group: UrlSegmentGroup) -> UrlSegmentGroup {
    if group.number_of_children() != 1 {
        return group;
    }
    let mut group = group;
    match group.children.remove(PRIMARY_OUTLET) {
        Some(child) => {
            let mut segments = group.segments;
            segments.extend(child.segments);
            UrlSegmentGroup::new(segments, child.children)
        }
        None => group,
    }
}

/// Recursively squash trivial nesting and drop empty children.
pub(crate) fn squash_segment_group(group: UrlSegmentGroup) -> UrlSegmentGroup {
    let children: HashMap<String, UrlSegmentGroup> = group
        .children
        .into_iter()
        .filter_map(|(name, child)| {
            let child = squash_segment_group(child);
            (!child.segments.is_empty() || child.has_children()).then_some((name, child))
        })
        .collect();
    merge_trivial_children(UrlSegmentGroup::new(group.segments, children))
}

/// True when nothing is left to match at this group/outlet.
pub(crate) fn no_leftovers_in_url(
    segment_group: &UrlSegmentGroup,
    segments: &[UrlSegment],
    outlet: &str,
) -> bool {
    segments.is_empty() && !segment_group.children.contains_key(outlet)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{as_routes, ComponentType, Route};

    const C: ComponentType = ComponentType::new("C");

    fn segs(paths: &[&str]) -> Vec<UrlSegment> {
        paths.iter().map(|p| UrlSegment::new(*p)).collect()
    }

    #[test]
    fn test_static_path_match() {
        let group = UrlSegmentGroup::default();
        let route = Route::new("team/:id");
        let segments = segs(&["team", "33", "user"]);
        let result = match_segments(&group, &route, &segments).unwrap();
        assert_eq!(result.consumed.len(), 2);
        assert_eq!(result.remaining.len(), 1);
        assert_eq!(result.positional_params().get("id").map(String::as_str), Some("33"));
    }

    #[test]
    fn test_full_match_rejects_leftovers() {
        let group = UrlSegmentGroup::default();
        let route = Route::new("team").full_match();
        assert!(match_segments(&group, &route, &segs(&["team", "x"])).is_err());
        assert!(match_segments(&group, &route, &segs(&["team"])).is_ok());
    }

    #[test]
    fn test_empty_path_matches_without_consuming() {
        let group = UrlSegmentGroup::default();
        let route = Route::new("");
        let segments = segs(&["a"]);
        let result = match_segments(&group, &route, &segments).unwrap();
        assert!(result.consumed.is_empty());
        assert_eq!(result.remaining.len(), 1);
    }

    #[test]
    fn test_empty_path_full_match_requires_exhausted_group() {
        let group = UrlSegmentGroup::default();
        let route = Route::new("").full_match();
        assert!(match_segments(&group, &route, &segs(&["a"])).is_err());
        assert!(match_segments(&group, &route, &[]).is_ok());
    }

    #[test]
    fn test_snapshot_params_include_trailing_matrix_params() {
        let group = UrlSegmentGroup::default();
        let route = Route::new("team/:id");
        let segments = vec![
            UrlSegment::new("team"),
            UrlSegment::new("33").with_parameter("expand", "true"),
        ];
        let result = match_segments(&group, &route, &segments).unwrap();
        let params = result.snapshot_params();
        assert_eq!(params.get("id").map(String::as_str), Some("33"));
        assert_eq!(params.get("expand").map(String::as_str), Some("true"));
    }

    #[test]
    fn test_sort_by_matching_outlets_keeps_declaration_order() {
        let routes = as_routes(vec![
            Route::new("a").component(C),
            Route::new("b").outlet("aux").component(C),
            Route::new("c").component(C),
        ]);
        let sorted = sort_by_matching_outlets(&routes, "aux");
        let paths: Vec<_> = sorted.iter().map(|r| r.path_text()).collect();
        assert_eq!(paths, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_merge_trivial_children_squashes_primary_chain() {
        let inner = UrlSegmentGroup::from_segments(segs(&["b"]));
        let outer = UrlSegmentGroup::new(
            segs(&["a"]),
            [(PRIMARY_OUTLET.to_string(), inner)].into(),
        );
        let merged = merge_trivial_children(outer);
        assert_eq!(merged.segment_path(), "a/b");
        assert!(!merged.has_children());
    }

    #[test]
    fn test_merge_trivial_children_is_idempotent() {
        let inner = UrlSegmentGroup::from_segments(segs(&["b"]));
        let outer = UrlSegmentGroup::new(
            segs(&["a"]),
            [(PRIMARY_OUTLET.to_string(), inner)].into(),
        );
        let merged = merge_trivial_children(outer);
        let merged_again = merge_trivial_children(merged.clone());
        assert_eq!(merged, merged_again);
    }

    #[test]
    fn test_split_adds_empty_path_outlets() {
        let group = UrlSegmentGroup::from_segments(segs(&["a"]));
        let config = as_routes(vec![
            Route::new("a").component(C),
            Route::new("").outlet("aux").component(C),
        ]);
        let split_result = split(&group, &segs(&["a"]), &[], &config);
        assert!(split_result.segment_group.children.contains_key("aux"));
    }
}
