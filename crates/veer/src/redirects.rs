//! Redirect resolution
//!
//! Rewrites the requested URL tree against the route config until no more
//! redirects apply, producing the tree the recognizer will consume. The
//! expansion is a depth-first search over candidate routes in declaration
//! order; a candidate that does not match is ordinary backtracking, never an
//! error. Relative redirects re-enter matching at the same level with
//! further redirects suppressed, so a redirect chain at one level terminates
//! structurally. Absolute redirects restart the whole resolution and are
//! counted against a hard ceiling.

use crate::config::{RedirectContext, RedirectResult, RedirectTo, Route, Routes};
use crate::errors::{NoMatch, RouterError, MAX_ABSOLUTE_REDIRECTS};
use crate::events::EventSink;
use crate::guard::{GuardResult, RedirectCommand};
use crate::loader::RouterConfigLoader;
use crate::matching::{
    match_segments, no_leftovers_in_url, sort_by_matching_outlets, split, squash_segment_group,
    PathMatchResult,
};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::sync::Arc;
use veer_url::{
    DefaultUrlSerializer, QueryParams, QueryValue, UrlSegment, UrlSegmentGroup, UrlSerializer,
    UrlTree, PRIMARY_OUTLET,
};

/// Outcome of one expansion pass that cannot be expressed as a rewritten
/// group: unwind and let the top loop decide.
enum ExpandError {
    /// No candidate matched; recovered by backtracking, fatal only at the top.
    NoMatch,
    /// An absolute redirect target; restart resolution from it.
    Absolute(UrlTree),
    /// A `can_load` guard rejected, optionally with a redirect of its own.
    GuardRejected(Option<RedirectCommand>),
    Fatal(RouterError),
}

impl From<NoMatch> for ExpandError {
    fn from(_: NoMatch) -> Self {
        ExpandError::NoMatch
    }
}

impl From<RouterError> for ExpandError {
    fn from(err: RouterError) -> Self {
        ExpandError::Fatal(err)
    }
}

type Expand<'a, T> = BoxFuture<'a, Result<T, ExpandError>>;

/// Applies config redirects to `url_tree` until a fixed point.
///
/// Returns the URL tree recognition should run against. Every absolute
/// redirect (including `UrlTree`s returned by dynamic redirects and
/// `can_load` guards) restarts the resolution; more than
/// [`MAX_ABSOLUTE_REDIRECTS`] restarts is a hard
/// [`RouterError::InfiniteRedirect`].
pub(crate) async fn apply_redirects(
    loader: &RouterConfigLoader,
    events: &EventSink,
    navigation_id: u64,
    config: &Routes,
    url_tree: &UrlTree,
) -> Result<UrlTree, RouterError> {
    let mut tree = url_tree.clone();
    for _ in 0..MAX_ABSOLUTE_REDIRECTS {
        let expander = Expander {
            loader,
            events,
            navigation_id,
            url_tree: &tree,
        };
        match expander
            .expand_segment_group(config, &tree.root, PRIMARY_OUTLET, true)
            .await
        {
            Ok(root) => {
                let squashed = squash_segment_group(root);
                // A root group never carries segments of its own.
                let root = if squashed.segments.is_empty() {
                    squashed
                } else {
                    UrlSegmentGroup::new(
                        Vec::new(),
                        [(PRIMARY_OUTLET.to_string(), squashed)].into(),
                    )
                };
                return Ok(UrlTree::new(
                    root,
                    tree.query_params.clone(),
                    tree.fragment.clone(),
                ));
            }
            Err(ExpandError::Absolute(next)) => {
                tracing::debug!(target_url = %next, "absolute redirect, restarting resolution");
                tree = next;
            }
            Err(ExpandError::GuardRejected(Some(command))) => {
                tracing::debug!(target_url = %command.url, "load guard redirected, restarting resolution");
                tree = command.url;
            }
            Err(ExpandError::GuardRejected(None)) => {
                return Err(RouterError::cancelled(
                    "a load guard rejected the navigation",
                    crate::errors::NavigationCancellationCode::GuardRejected,
                ));
            }
            Err(ExpandError::NoMatch) => {
                return Err(RouterError::CannotMatchAnyRoutes {
                    segment: DefaultUrlSerializer.serialize(&tree),
                });
            }
            Err(ExpandError::Fatal(err)) => return Err(err),
        }
    }
    Err(RouterError::InfiniteRedirect {
        url: DefaultUrlSerializer.serialize(url_tree),
    })
}

struct Expander<'a> {
    loader: &'a RouterConfigLoader,
    events: &'a EventSink,
    navigation_id: u64,
    /// The tree currently being resolved; source of query params for
    /// substitution into redirect targets.
    url_tree: &'a UrlTree,
}

impl<'a> Expander<'a> {
    fn expand_segment_group<'b>(
        &'b self,
        routes: &'b Routes,
        group: &'b UrlSegmentGroup,
        outlet: &'b str,
        allow_redirects: bool,
    ) -> Expand<'b, UrlSegmentGroup> {
        async move {
            if group.segments.is_empty() && group.has_children() {
                let children = self.expand_children(routes, group).await?;
                return Ok(UrlSegmentGroup::new(Vec::new(), children));
            }
            self.expand_segment(routes, group, &group.segments, outlet, allow_redirects)
                .await
        }
        .boxed()
    }

    /// Expands every child outlet, primary first so its shape is settled
    /// before named siblings.
    async fn expand_children(
        &self,
        routes: &Routes,
        group: &UrlSegmentGroup,
    ) -> Result<HashMap<String, UrlSegmentGroup>, ExpandError> {
        let mut outlets: Vec<&String> = group.children.keys().collect();
        outlets.sort_by_key(|name| (name.as_str() != PRIMARY_OUTLET, name.as_str().to_string()));

        let mut expanded = HashMap::new();
        for outlet in outlets {
            let child = &group.children[outlet];
            let expanded_child = self
                .expand_segment_group(routes, child, outlet, true)
                .await?;
            expanded.insert(outlet.clone(), expanded_child);
        }
        Ok(expanded)
    }

    /// Tries every candidate route at this level in declaration order.
    fn expand_segment<'b>(
        &'b self,
        routes: &'b Routes,
        group: &'b UrlSegmentGroup,
        segments: &'b [UrlSegment],
        outlet: &'b str,
        allow_redirects: bool,
    ) -> Expand<'b, UrlSegmentGroup> {
        async move {
            for route in sort_by_matching_outlets(routes, outlet) {
                match self
                    .expand_segment_against_route(
                        routes,
                        &route,
                        group,
                        segments,
                        outlet,
                        allow_redirects,
                    )
                    .await
                {
                    Ok(expanded) => return Ok(expanded),
                    Err(ExpandError::NoMatch) => continue,
                    Err(other) => return Err(other),
                }
            }
            if no_leftovers_in_url(group, segments, outlet) {
                return Ok(UrlSegmentGroup::default());
            }
            Err(ExpandError::NoMatch)
        }
        .boxed()
    }

    async fn expand_segment_against_route(
        &self,
        siblings: &Routes,
        route: &Arc<Route>,
        group: &UrlSegmentGroup,
        segments: &[UrlSegment],
        outlet: &str,
        allow_redirects: bool,
    ) -> Result<UrlSegmentGroup, ExpandError> {
        if route.outlet_name() != outlet
            && (outlet == PRIMARY_OUTLET
                || !crate::matching::empty_path_match(group, segments, route))
        {
            return Err(ExpandError::NoMatch);
        }
        if !self.can_match(route, segments).await? {
            return Err(ExpandError::NoMatch);
        }

        match &route.redirect_to {
            None => self.match_segment_against_route(route, group, segments).await,
            Some(_) if allow_redirects => {
                self.expand_redirect(siblings, route, group, segments, outlet).await
            }
            Some(_) => Err(ExpandError::NoMatch),
        }
    }

    async fn expand_redirect(
        &self,
        siblings: &Routes,
        route: &Arc<Route>,
        group: &UrlSegmentGroup,
        segments: &[UrlSegment],
        outlet: &str,
    ) -> Result<UrlSegmentGroup, ExpandError> {
        let matched = if route.is_wildcard() {
            PathMatchResult {
                consumed: segments.to_vec(),
                remaining: Vec::new(),
                positional_segments: Default::default(),
            }
        } else {
            match_segments(group, route, segments)?
        };

        let target = self.resolve_redirect_target(route, &matched, outlet).await?;
        let (target_text, redirect_tree) = match target {
            RedirectResult::Tree(tree) => return Err(ExpandError::Absolute(tree)),
            RedirectResult::Path(path) => {
                let parsed = DefaultUrlSerializer
                    .parse(&path)
                    .map_err(RouterError::from)?;
                let substituted = apply_redirect_commands(
                    &path,
                    &parsed,
                    &matched.consumed,
                    &matched.positional_segments,
                    &self.url_tree.query_params,
                )?;
                if path.starts_with('/') {
                    return Err(ExpandError::Absolute(substituted));
                }
                (path, substituted)
            }
        };

        let new_segments = lineralize_segments(&target_text, &redirect_tree)?;
        let mut rewritten = new_segments;
        rewritten.extend(matched.remaining.iter().cloned());
        // Re-enter matching at the same level with redirects disabled, so
        // the rewritten segments must land on a non-redirecting sibling.
        self.expand_segment(siblings, group, &rewritten, outlet, false)
            .await
    }

    async fn resolve_redirect_target(
        &self,
        route: &Arc<Route>,
        matched: &PathMatchResult,
        outlet: &str,
    ) -> Result<RedirectResult, ExpandError> {
        // Validation guarantees redirect_to is present on this path.
        let redirect_to = route
            .redirect_to
            .as_ref()
            .ok_or(ExpandError::NoMatch)?;
        match redirect_to {
            RedirectTo::Path(path) => Ok(RedirectResult::Path(path.clone())),
            RedirectTo::Dynamic(redirect) => {
                let context = RedirectContext {
                    params: matched.snapshot_params(),
                    data: route.data.clone(),
                    query_params: self.url_tree.query_params.clone(),
                    fragment: self.url_tree.fragment.clone(),
                    url: matched.consumed.clone(),
                    outlet: outlet.to_string(),
                    title: route.title.clone(),
                };
                redirect(context)
                    .await
                    .map_err(|err| ExpandError::Fatal(RouterError::Collaborator(err)))
            }
        }
    }

    async fn match_segment_against_route(
        &self,
        route: &Arc<Route>,
        group: &UrlSegmentGroup,
        segments: &[UrlSegment],
    ) -> Result<UrlSegmentGroup, ExpandError> {
        if route.is_wildcard() {
            if route.load_children.is_some() {
                // Force the load so a broken lazy config fails here, not at
                // recognition.
                self.child_config(route, segments).await?;
            }
            return Ok(UrlSegmentGroup::from_segments(segments.to_vec()));
        }

        let matched = match_segments(group, route, segments)?;
        let child_config = self.child_config(route, &matched.consumed).await?;

        let split_result = split(group, &matched.consumed, &matched.remaining, &child_config);
        let child_group = split_result.segment_group;
        let sliced = split_result.sliced_segments;

        if sliced.is_empty() && child_group.has_children() {
            let children = self.expand_children(&child_config, &child_group).await?;
            return Ok(UrlSegmentGroup::new(matched.consumed, children));
        }
        if child_config.is_empty() && sliced.is_empty() {
            return Ok(UrlSegmentGroup::from_segments(matched.consumed));
        }

        let expanded = self
            .expand_segment(&child_config, &child_group, &sliced, PRIMARY_OUTLET, true)
            .await?;
        let mut segments = matched.consumed;
        segments.extend(expanded.segments);
        Ok(UrlSegmentGroup::new(segments, expanded.children))
    }

    /// Runs `can_match` guards; any non-allow answer rejects the candidate in
    /// favor of the next one, redirecting candidates included.
    async fn can_match(
        &self,
        route: &Arc<Route>,
        segments: &[UrlSegment],
    ) -> Result<bool, ExpandError> {
        for guard in &route.can_match {
            let result = guard
                .can_match(route.clone(), segments.to_vec())
                .await
                .map_err(|err| ExpandError::Fatal(RouterError::Collaborator(err)))?;
            if !result.is_allow() {
                tracing::debug!(path = route.path_text(), "can_match rejected candidate");
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Child config of a matched route, running `can_load` guards before
    /// triggering a lazy load.
    async fn child_config(
        &self,
        route: &Arc<Route>,
        consumed: &[UrlSegment],
    ) -> Result<Routes, ExpandError> {
        if let Some(children) = &route.children {
            return Ok(children.clone());
        }
        if route.load_children.is_none() {
            return Ok(Vec::new());
        }

        for guard in &route.can_load {
            let result = guard
                .can_load(route.clone(), consumed.to_vec())
                .await
                .map_err(|err| ExpandError::Fatal(RouterError::Collaborator(err)))?;
            match result {
                GuardResult::Allow => {}
                GuardResult::Deny => return Err(ExpandError::GuardRejected(None)),
                GuardResult::Redirect(command) => {
                    return Err(ExpandError::GuardRejected(Some(command)))
                }
            }
        }

        self.loader
            .children(self.events, self.navigation_id, route)
            .await
            .map_err(ExpandError::Fatal)
    }
}

/// Flatten a redirect target tree into a plain segment list.
fn lineralize_segments(target: &str, tree: &UrlTree) -> Result<Vec<UrlSegment>, ExpandError> {
    let mut segments = Vec::new();
    let mut group = &tree.root;
    loop {
        segments.extend(group.segments.iter().cloned());
        if group.number_of_children() == 0 {
            return Ok(segments);
        }
        match (group.number_of_children(), group.primary_child()) {
            (1, Some(primary)) => group = primary,
            _ => {
                return Err(ExpandError::Fatal(RouterError::NamedOutletRedirect {
                    target: target.to_string(),
                }))
            }
        }
    }
}

/// Builds the substituted redirect tree: `:name` tokens in segments and
/// query values are replaced from the actual match.
fn apply_redirect_commands(
    target: &str,
    redirect_tree: &UrlTree,
    actual_segments: &[UrlSegment],
    pos_params: &std::collections::BTreeMap<String, UrlSegment>,
    actual_query_params: &QueryParams,
) -> Result<UrlTree, RouterError> {
    let root = create_segment_group(target, &redirect_tree.root, actual_segments, pos_params)?;
    let query_params =
        create_query_params(&redirect_tree.query_params, actual_query_params);
    Ok(UrlTree::new(root, query_params, redirect_tree.fragment.clone()))
}

fn create_segment_group(
    target: &str,
    group: &UrlSegmentGroup,
    actual_segments: &[UrlSegment],
    pos_params: &std::collections::BTreeMap<String, UrlSegment>,
) -> Result<UrlSegmentGroup, RouterError> {
    let segments = create_segments(target, &group.segments, actual_segments, pos_params)?;
    let mut children = HashMap::new();
    for (name, child) in &group.children {
        children.insert(
            name.clone(),
            create_segment_group(target, child, actual_segments, pos_params)?,
        );
    }
    Ok(UrlSegmentGroup::new(segments, children))
}

fn create_segments(
    target: &str,
    redirect_segments: &[UrlSegment],
    actual_segments: &[UrlSegment],
    pos_params: &std::collections::BTreeMap<String, UrlSegment>,
) -> Result<Vec<UrlSegment>, RouterError> {
    redirect_segments
        .iter()
        .map(|segment| match segment.path.strip_prefix(':') {
            Some(name) => find_pos_param(target, name, pos_params),
            None => Ok(find_or_return(segment, actual_segments)),
        })
        .collect()
}

fn find_pos_param(
    target: &str,
    name: &str,
    pos_params: &std::collections::BTreeMap<String, UrlSegment>,
) -> Result<UrlSegment, RouterError> {
    pos_params
        .get(name)
        .cloned()
        .ok_or_else(|| RouterError::MissingRedirectParam {
            target: target.to_string(),
            param: name.to_string(),
        })
}

/// A literal redirect segment reuses the matching actual segment when one
/// exists, keeping its matrix params.
fn find_or_return(redirect_segment: &UrlSegment, actual_segments: &[UrlSegment]) -> UrlSegment {
    actual_segments
        .iter()
        .find(|s| s.path == redirect_segment.path)
        .cloned()
        .unwrap_or_else(|| redirect_segment.clone())
}

fn create_query_params(
    redirect_params: &QueryParams,
    actual_params: &QueryParams,
) -> QueryParams {
    let mut result = QueryParams::new();
    for (key, value) in redirect_params {
        let substituted = match value {
            QueryValue::Single(v) => match v.strip_prefix(':') {
                Some(name) => actual_params.get(name).cloned(),
                None => Some(value.clone()),
            },
            QueryValue::List(_) => Some(value.clone()),
        };
        if let Some(v) = substituted {
            result.insert(key.clone(), v);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{as_routes, ComponentType, Route};

    const HOME: ComponentType = ComponentType::new("Home");
    const TEAM: ComponentType = ComponentType::new("Team");

    fn parse(url: &str) -> UrlTree {
        DefaultUrlSerializer.parse(url).unwrap()
    }

    fn serialize(tree: &UrlTree) -> String {
        DefaultUrlSerializer.serialize(tree)
    }

    async fn resolve(config: Routes, url: &str) -> Result<UrlTree, RouterError> {
        let loader = RouterConfigLoader::new();
        let events = EventSink::new();
        apply_redirects(&loader, &events, 1, &config, &parse(url)).await
    }

    #[tokio::test]
    async fn test_empty_path_redirects_to_absolute_target() {
        let config = as_routes(vec![
            Route::new("dashboard").component(HOME),
            Route::new("").redirect_to("/dashboard").full_match(),
        ]);
        let tree = resolve(config, "/").await.unwrap();
        assert_eq!(serialize(&tree), "/dashboard");
    }

    #[tokio::test]
    async fn test_relative_redirect_substitutes_positional_params() {
        let config = as_routes(vec![
            Route::new("old/:id").redirect_to("team/:id"),
            Route::new("team/:id").component(TEAM),
        ]);
        let tree = resolve(config, "/old/33").await.unwrap();
        assert_eq!(serialize(&tree), "/team/33");
    }

    #[tokio::test]
    async fn test_missing_positional_param_is_an_error() {
        let config = as_routes(vec![
            Route::new("old").redirect_to("team/:id"),
            Route::new("team/:id").component(TEAM),
        ]);
        let err = resolve(config, "/old").await.unwrap_err();
        assert!(matches!(err, RouterError::MissingRedirectParam { .. }));
    }

    #[tokio::test]
    async fn test_self_redirect_terminates_with_infinite_redirect_error() {
        let config = as_routes(vec![Route::new("a").redirect_to("/a")]);
        let err = resolve(config, "/a").await.unwrap_err();
        assert!(matches!(err, RouterError::InfiniteRedirect { .. }));
    }

    #[tokio::test]
    async fn test_no_match_reports_the_url() {
        let config = as_routes(vec![Route::new("dashboard").component(HOME)]);
        let err = resolve(config, "/nowhere").await.unwrap_err();
        assert!(matches!(err, RouterError::CannotMatchAnyRoutes { .. }));
    }

    #[tokio::test]
    async fn test_wildcard_redirect_catches_everything() {
        let config = as_routes(vec![
            Route::new("dashboard").component(HOME),
            Route::new("**").redirect_to("/dashboard"),
        ]);
        let tree = resolve(config, "/some/missing/page").await.unwrap();
        assert_eq!(serialize(&tree), "/dashboard");
    }

    #[tokio::test]
    async fn test_query_param_substitution() {
        let config = as_routes(vec![
            Route::new("legacy/:id").redirect_to("/team/:id?from=:id"),
            Route::new("team/:id").component(TEAM),
        ]);
        let tree = resolve(config, "/legacy/7?id=7").await.unwrap();
        assert_eq!(tree.query_param("from"), Some("7"));
    }

    #[tokio::test]
    async fn test_can_load_deny_cancels() {
        let config = as_routes(vec![Route::new("admin")
            .load_children(Arc::new(|| {
                Box::pin(async { Ok(vec![Route::new("").component(HOME)]) })
            }))
            .can_load(Arc::new(
                |_route: Arc<Route>, _segments: Vec<UrlSegment>| async {
                    Ok(GuardResult::Deny)
                },
            ))]);
        let err = resolve(config, "/admin").await.unwrap_err();
        assert_eq!(
            err.cancellation_code(),
            Some(crate::errors::NavigationCancellationCode::GuardRejected)
        );
    }

    #[tokio::test]
    async fn test_can_match_denied_redirect_falls_through_to_next_candidate() {
        let config = as_routes(vec![
            Route::new("page").redirect_to("/dashboard").can_match(Arc::new(
                |_route: Arc<Route>, _segments: Vec<UrlSegment>| async {
                    Ok(GuardResult::Deny)
                },
            )),
            Route::new("page").component(TEAM),
            Route::new("dashboard").component(HOME),
        ]);
        let tree = resolve(config, "/page").await.unwrap();
        assert_eq!(serialize(&tree), "/page");
    }

    #[tokio::test]
    async fn test_nested_redirect_inside_children() {
        let config = as_routes(vec![Route::new("team/:id").component(TEAM).children(vec![
            Route::new("user/:name").component(HOME),
            Route::new("legacy/:name").redirect_to("user/:name"),
        ])]);
        let tree = resolve(config, "/team/33/legacy/victor").await.unwrap();
        assert_eq!(serialize(&tree), "/team/33/user/victor");
    }
}
