//! Route recognition
//!
//! Maps the redirect-resolved URL tree onto the route config, producing the
//! immutable snapshot tree for this navigation. Candidates are tried in
//! declaration order; redirect routes are skipped (they were consumed by the
//! redirect stage), `can_match` rejection moves on to the next candidate,
//! and a level where two matched siblings claim the same outlet is a hard
//! error.

use crate::config::{ComponentType, Route, Routes};
use crate::errors::{NoMatch, RouterError};
use crate::events::EventSink;
use crate::loader::RouterConfigLoader;
use crate::matching::{match_segments, no_leftovers_in_url, sort_by_matching_outlets, split};
use crate::state::{
    inherit_params, refresh_inherited_data, ActivatedRouteSnapshot, ParamsInheritanceStrategy,
    RouterStateSnapshot,
};
use crate::tree::{Tree, TreeNode};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;
use veer_url::{UrlSegment, UrlSegmentGroup, UrlTree, PRIMARY_OUTLET};

enum RecognizeError {
    NoMatch,
    Fatal(RouterError),
}

impl From<NoMatch> for RecognizeError {
    fn from(_: NoMatch) -> Self {
        RecognizeError::NoMatch
    }
}

impl From<RouterError> for RecognizeError {
    fn from(err: RouterError) -> Self {
        RecognizeError::Fatal(err)
    }
}

/// Recognizes `url_tree` against `config`.
///
/// The returned snapshot tree has inherited params folded in and the merged
/// data view computed; resolved data is filled in later by the resolver
/// stage.
pub(crate) async fn recognize(
    loader: &RouterConfigLoader,
    events: &EventSink,
    navigation_id: u64,
    root_component: Option<ComponentType>,
    config: &Routes,
    url_tree: &UrlTree,
    serialized_url: &str,
    strategy: ParamsInheritanceStrategy,
) -> Result<RouterStateSnapshot, RouterError> {
    let recognizer = Recognizer {
        loader,
        events,
        navigation_id,
        url_tree,
    };
    let children = recognizer
        .process_segment_group(config, &url_tree.root, PRIMARY_OUTLET)
        .await
        .map_err(|err| match err {
            RecognizeError::NoMatch => RouterError::CannotMatchAnyRoutes {
                segment: serialized_url.to_string(),
            },
            RecognizeError::Fatal(fatal) => fatal,
        })?;

    let root = ActivatedRouteSnapshot::root(
        root_component,
        url_tree.query_params.clone(),
        url_tree.fragment.clone(),
    );
    let mut root_node = TreeNode {
        value: root,
        children,
    };
    inherit_params(&mut root_node, strategy);

    let shared = share(root_node);
    refresh_inherited_data(&shared, strategy, None);
    Ok(RouterStateSnapshot::new(
        serialized_url.to_string(),
        Tree::new(shared),
    ))
}

fn share(node: TreeNode<ActivatedRouteSnapshot>) -> TreeNode<Arc<ActivatedRouteSnapshot>> {
    TreeNode {
        value: Arc::new(node.value),
        children: node.children.into_iter().map(share).collect(),
    }
}

struct Recognizer<'a> {
    loader: &'a RouterConfigLoader,
    events: &'a EventSink,
    navigation_id: u64,
    url_tree: &'a UrlTree,
}

type Recognized<'a> = BoxFuture<'a, Result<Vec<TreeNode<ActivatedRouteSnapshot>>, RecognizeError>>;

impl<'a> Recognizer<'a> {
    fn process_segment_group<'b>(
        &'b self,
        config: &'b Routes,
        group: &'b UrlSegmentGroup,
        outlet: &'b str,
    ) -> Recognized<'b> {
        async move {
            if group.segments.is_empty() && group.has_children() {
                return self.process_children(config, group).await;
            }
            self.process_segment(config, group, &group.segments, outlet)
                .await
        }
        .boxed()
    }

    /// Recognizes every child outlet, primary first, and checks that no two
    /// matched siblings claim the same outlet.
    async fn process_children(
        &self,
        config: &Routes,
        group: &UrlSegmentGroup,
    ) -> Result<Vec<TreeNode<ActivatedRouteSnapshot>>, RecognizeError> {
        let mut outlets: Vec<&String> = group.children.keys().collect();
        outlets.sort_by_key(|name| (name.as_str() != PRIMARY_OUTLET, name.as_str().to_string()));

        let mut children = Vec::new();
        for outlet in outlets {
            let child = &group.children[outlet];
            let nodes = self.process_segment_group(config, child, outlet).await?;
            children.extend(nodes);
        }
        check_outlet_uniqueness(&children)?;
        sort_by_outlet(&mut children);
        Ok(children)
    }

    fn process_segment<'b>(
        &'b self,
        config: &'b Routes,
        group: &'b UrlSegmentGroup,
        segments: &'b [UrlSegment],
        outlet: &'b str,
    ) -> Recognized<'b> {
        async move {
            for route in sort_by_matching_outlets(config, outlet) {
                match self
                    .process_segment_against_route(&route, group, segments, outlet)
                    .await
                {
                    Ok(nodes) => return Ok(nodes),
                    Err(RecognizeError::NoMatch) => continue,
                    Err(fatal) => return Err(fatal),
                }
            }
            if no_leftovers_in_url(group, segments, outlet) {
                return Ok(Vec::new());
            }
            Err(RecognizeError::NoMatch)
        }
        .boxed()
    }

    async fn process_segment_against_route(
        &self,
        route: &Arc<Route>,
        group: &UrlSegmentGroup,
        segments: &[UrlSegment],
        outlet: &str,
    ) -> Result<Vec<TreeNode<ActivatedRouteSnapshot>>, RecognizeError> {
        // Redirects were resolved before recognition.
        if route.redirect_to.is_some() {
            return Err(RecognizeError::NoMatch);
        }
        if route.outlet_name() != outlet
            && (outlet == PRIMARY_OUTLET
                || !crate::matching::empty_path_match(group, segments, route))
        {
            return Err(RecognizeError::NoMatch);
        }
        if !self.can_match(route, segments).await? {
            return Err(RecognizeError::NoMatch);
        }

        let (snapshot, consumed, remaining) = if route.is_wildcard() {
            // Wildcard swallows the rest of this branch, children included.
            let params = segments
                .last()
                .map(|s| s.parameters.clone())
                .unwrap_or_default();
            let snapshot = ActivatedRouteSnapshot::new(
                segments.to_vec(),
                params,
                self.url_tree.query_params.clone(),
                self.url_tree.fragment.clone(),
                route.outlet_name().to_string(),
                Some(route.clone()),
            );
            return Ok(vec![TreeNode::leaf(snapshot)]);
        } else {
            let matched = match_segments(group, route, segments)?;
            let snapshot = ActivatedRouteSnapshot::new(
                matched.consumed.clone(),
                matched.snapshot_params(),
                self.url_tree.query_params.clone(),
                self.url_tree.fragment.clone(),
                route.outlet_name().to_string(),
                Some(route.clone()),
            );
            (snapshot, matched.consumed, matched.remaining)
        };

        let child_config = self.child_config(route).await?;
        let split_result = split(group, &consumed, &remaining, &child_config);
        let child_group = split_result.segment_group;
        let sliced = split_result.sliced_segments;

        let children = if sliced.is_empty() && child_group.has_children() {
            self.process_children(&child_config, &child_group).await?
        } else if child_config.is_empty() && sliced.is_empty() {
            Vec::new()
        } else {
            self.process_segment(&child_config, &child_group, &sliced, PRIMARY_OUTLET)
                .await?
        };

        Ok(vec![TreeNode { value: snapshot, children }])
    }

    /// Runs `can_match` guards; any non-allow answer rejects the candidate in
    /// favor of the next one.
    async fn can_match(
        &self,
        route: &Arc<Route>,
        segments: &[UrlSegment],
    ) -> Result<bool, RecognizeError> {
        for guard in &route.can_match {
            let result = guard
                .can_match(route.clone(), segments.to_vec())
                .await
                .map_err(|err| RecognizeError::Fatal(RouterError::Collaborator(err)))?;
            if !result.is_allow() {
                tracing::debug!(path = route.path_text(), "can_match rejected candidate");
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn child_config(&self, route: &Arc<Route>) -> Result<Routes, RecognizeError> {
        if !route.has_child_config() {
            return Ok(Vec::new());
        }
        // Lazy configs were loaded (and memoized) by the redirect stage.
        self.loader
            .children(self.events, self.navigation_id, route)
            .await
            .map_err(RecognizeError::Fatal)
    }
}

fn check_outlet_uniqueness(
    nodes: &[TreeNode<ActivatedRouteSnapshot>],
) -> Result<(), RecognizeError> {
    let mut seen: Vec<&TreeNode<ActivatedRouteSnapshot>> = Vec::new();
    for node in nodes {
        if let Some(previous) = seen.iter().find(|n| n.value.outlet == node.value.outlet) {
            return Err(RecognizeError::Fatal(RouterError::DuplicateOutlet {
                path_a: segment_text(&previous.value.url),
                path_b: segment_text(&node.value.url),
            }));
        }
        seen.push(node);
    }
    Ok(())
}

fn segment_text(segments: &[UrlSegment]) -> String {
    segments
        .iter()
        .map(|s| s.path.as_str())
        .collect::<Vec<_>>()
        .join("/")
}

fn sort_by_outlet(nodes: &mut [TreeNode<ActivatedRouteSnapshot>]) {
    nodes.sort_by(|a, b| {
        let a_primary = a.value.outlet == PRIMARY_OUTLET;
        let b_primary = b.value.outlet == PRIMARY_OUTLET;
        b_primary
            .cmp(&a_primary)
            .then_with(|| a.value.outlet.cmp(&b.value.outlet))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::as_routes;
    use veer_url::{DefaultUrlSerializer, UrlSerializer};

    const ROOT: ComponentType = ComponentType::new("Root");
    const TEAM: ComponentType = ComponentType::new("Team");
    const USER: ComponentType = ComponentType::new("User");
    const CHAT: ComponentType = ComponentType::new("Chat");
    const NOT_FOUND: ComponentType = ComponentType::new("NotFound");

    async fn run(config: Routes, url: &str) -> Result<RouterStateSnapshot, RouterError> {
        let loader = RouterConfigLoader::new();
        let events = EventSink::new();
        let tree = DefaultUrlSerializer.parse(url).unwrap();
        recognize(
            &loader,
            &events,
            1,
            Some(ROOT),
            &config,
            &tree,
            url,
            ParamsInheritanceStrategy::default(),
        )
        .await
    }

    fn team_config() -> Routes {
        as_routes(vec![Route::new("team/:id").component(TEAM).children(vec![
            Route::new("user/:name").component(USER),
            Route::new("chat").outlet("right").component(CHAT),
        ])])
    }

    #[tokio::test]
    async fn test_recognizes_nested_routes_with_params() {
        let state = run(team_config(), "/team/33/user/victor").await.unwrap();
        let root = state.root();
        assert_eq!(root.component(), Some(ROOT));

        let team = state.first_child(&root).unwrap();
        assert_eq!(team.param("id"), Some("33"));
        assert_eq!(team.component(), Some(TEAM));

        let user = state.first_child(&team).unwrap();
        assert_eq!(user.param("name"), Some("victor"));
        // Parent params do not leak into a component-bearing child.
        assert_eq!(user.param("id"), None);
    }

    #[tokio::test]
    async fn test_recognizes_named_outlets() {
        let state = run(team_config(), "/team/33/(user/victor//right:chat)")
            .await
            .unwrap();
        let team = state.first_child(&state.root()).unwrap();
        let children = state.children(&team);
        assert_eq!(children.len(), 2);
        // Primary sorts first.
        assert_eq!(children[0].outlet, PRIMARY_OUTLET);
        assert_eq!(children[1].outlet, "right");
        assert_eq!(children[1].component(), Some(CHAT));
    }

    #[tokio::test]
    async fn test_matrix_params_merge_into_route_params() {
        let config = as_routes(vec![Route::new("team/:id").component(TEAM)]);
        let state = run(config, "/team/33;expand=true").await.unwrap();
        let team = state.first_child(&state.root()).unwrap();
        assert_eq!(team.param("id"), Some("33"));
        assert_eq!(team.param("expand"), Some("true"));
    }

    #[tokio::test]
    async fn test_wildcard_consumes_everything() {
        let config = as_routes(vec![
            Route::new("team/:id").component(TEAM),
            Route::new("**").component(NOT_FOUND),
        ]);
        let state = run(config, "/no/such/route").await.unwrap();
        let node = state.first_child(&state.root()).unwrap();
        assert_eq!(node.component(), Some(NOT_FOUND));
        assert_eq!(node.url.len(), 3);
        assert!(state.children(&node).is_empty());
    }

    #[tokio::test]
    async fn test_unmatched_url_is_an_error() {
        let config = as_routes(vec![Route::new("team/:id").component(TEAM)]);
        let err = run(config, "/teams/33").await.unwrap_err();
        assert!(matches!(err, RouterError::CannotMatchAnyRoutes { .. }));
    }

    #[tokio::test]
    async fn test_can_match_rejection_falls_through_to_next_candidate() {
        let config = as_routes(vec![
            Route::new("page")
                .component(TEAM)
                .can_match(Arc::new(
                    |_route: Arc<Route>, _segments: Vec<UrlSegment>| async {
                        Ok(crate::guard::GuardResult::Deny)
                    },
                )),
            Route::new("page").component(NOT_FOUND),
        ]);
        let state = run(config, "/page").await.unwrap();
        let node = state.first_child(&state.root()).unwrap();
        assert_eq!(node.component(), Some(NOT_FOUND));
    }

    #[tokio::test]
    async fn test_params_inherit_through_pathless_parent() {
        let config = as_routes(vec![Route::new("team/:id").component(TEAM).children(vec![
            Route::new("").children(vec![Route::new("settings").component(USER)]),
        ])]);
        let state = run(config, "/team/33/settings").await.unwrap();
        let team = state.first_child(&state.root()).unwrap();
        let pathless = state.first_child(&team).unwrap();
        let settings = state.first_child(&pathless).unwrap();
        assert_eq!(settings.param("id"), Some("33"));
    }

    #[tokio::test]
    async fn test_route_data_appears_in_snapshot() {
        let config = as_routes(vec![Route::new("about")
            .component(TEAM)
            .data_entry("section", serde_json::json!("info"))]);
        let state = run(config, "/about").await.unwrap();
        let about = state.first_child(&state.root()).unwrap();
        assert_eq!(about.data().get("section"), Some(&serde_json::json!("info")));
    }
}
