//! Guard computation and execution
//!
//! Diffs the future snapshot tree against the current one to find which
//! routes need activation guards and which need deactivation guards, honoring
//! each route's `run_guards_and_resolvers` policy. Deactivation checks are
//! collected child-first; activation checks root-first. Execution runs
//! deactivation first, then each activation check in path order with its
//! guard set raced concurrently, where the first non-allow verdict wins.

use crate::config::{ComponentType, RunGuardsAndResolvers};
use crate::errors::RouterError;
use crate::events::{Event, EventSink};
use crate::guard::GuardResult;
use crate::outlet::ChildrenOutletContexts;
use crate::state::{ActivatedRouteSnapshot, RouterStateSnapshot};
use crate::tree::TreeNode;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use veer_url::{equal_path, equal_segments};

/// One route that needs its activation guards run, with its full ancestor
/// path (root first).
pub(crate) struct CanActivateCheck {
    pub path: Vec<Arc<ActivatedRouteSnapshot>>,
}

impl CanActivateCheck {
    pub(crate) fn route(&self) -> &Arc<ActivatedRouteSnapshot> {
        // Paths always contain at least the checked route.
        self.path.last().unwrap_or_else(|| unreachable!())
    }
}

/// One route leaving the state whose deactivation guards must consent.
pub(crate) struct CanDeactivateCheck {
    pub component: Option<ComponentType>,
    pub route: Arc<ActivatedRouteSnapshot>,
}

#[derive(Default)]
pub(crate) struct Checks {
    pub can_activate: Vec<CanActivateCheck>,
    pub can_deactivate: Vec<CanDeactivateCheck>,
}

/// Diff `future` against `curr` and collect the guard work.
///
/// Routes that pair up with an unchanged config and whose policy says not to
/// re-run inherit the current snapshot's data and resolved data instead.
pub(crate) fn get_all_route_guards(
    future: &RouterStateSnapshot,
    curr: &RouterStateSnapshot,
    contexts: &ChildrenOutletContexts,
) -> Checks {
    let mut checks = Checks::default();
    let future_root = &future.tree.root;
    let curr_root = &curr.tree.root;
    let path = vec![future_root.value.clone()];
    traverse_child_routes(
        future_root,
        Some(curr_root),
        Some(contexts),
        &path,
        true,
        &mut checks,
    );
    checks
}

type SnapshotNode = TreeNode<Arc<ActivatedRouteSnapshot>>;

fn traverse_child_routes(
    future_node: &SnapshotNode,
    curr_node: Option<&SnapshotNode>,
    contexts: Option<&ChildrenOutletContexts>,
    future_path: &[Arc<ActivatedRouteSnapshot>],
    ancestors_unchanged: bool,
    checks: &mut Checks,
) {
    let mut prev_children: HashMap<&str, &SnapshotNode> = curr_node
        .map(|node| {
            node.children
                .iter()
                .map(|child| (child.value.outlet.as_str(), child))
                .collect()
        })
        .unwrap_or_default();

    for child in &future_node.children {
        let mut path = future_path.to_vec();
        path.push(child.value.clone());
        traverse_routes(
            child,
            prev_children.remove(child.value.outlet.as_str()),
            contexts,
            &path,
            ancestors_unchanged,
            checks,
        );
    }
    for (name, deactivated) in prev_children {
        let context = contexts.and_then(|c| c.get_context(name));
        deactivate_route_and_its_children(deactivated, context.as_deref(), checks);
    }
}

fn traverse_routes(
    future_node: &SnapshotNode,
    curr_node: Option<&SnapshotNode>,
    parent_contexts: Option<&ChildrenOutletContexts>,
    future_path: &[Arc<ActivatedRouteSnapshot>],
    ancestors_unchanged: bool,
    checks: &mut Checks,
) {
    let future = &future_node.value;
    let context = parent_contexts.and_then(|c| c.get_context(&future.outlet));

    match curr_node {
        Some(curr_node) if same_config(future, &curr_node.value) => {
            let curr = &curr_node.value;
            let node_unchanged = equal_segments(&curr.url, &future.url)
                && curr.params == future.params;
            let unchanged = ancestors_unchanged && node_unchanged;
            let should_run = should_run_guards_and_resolvers(curr, future, unchanged);

            if should_run {
                checks.can_activate.push(CanActivateCheck {
                    path: future_path.to_vec(),
                });
            } else {
                // Not re-running: the future snapshot keeps what the current
                // one already computed.
                future.set_data(curr.data());
                future.set_resolved_data(curr.resolved_data());
            }

            let next_contexts = if future.expects_component() {
                context.as_ref().map(|c| c.children())
            } else {
                parent_contexts
            };
            traverse_child_routes(
                future_node,
                Some(curr_node),
                next_contexts,
                future_path,
                unchanged,
                checks,
            );

            if should_run {
                let component = context
                    .as_ref()
                    .and_then(|c| c.outlet())
                    .filter(|o| o.is_activated())
                    .and_then(|o| o.component());
                checks.can_deactivate.push(CanDeactivateCheck {
                    component,
                    route: curr.clone(),
                });
            }
        }
        _ => {
            if let Some(curr_node) = curr_node {
                deactivate_route_and_its_children(curr_node, context.as_deref(), checks);
            }
            checks.can_activate.push(CanActivateCheck {
                path: future_path.to_vec(),
            });
            let next_contexts = if future.expects_component() {
                context.as_ref().map(|c| c.children())
            } else {
                parent_contexts
            };
            traverse_child_routes(future_node, None, next_contexts, future_path, false, checks);
        }
    }
}

fn deactivate_route_and_its_children(
    node: &SnapshotNode,
    context: Option<&crate::outlet::OutletContext>,
    checks: &mut Checks,
) {
    let component = context
        .and_then(|c| c.outlet())
        .filter(|o| o.is_activated())
        .and_then(|o| o.component());

    for child in &node.children {
        let child_context = context.and_then(|c| c.children().get_context(&child.value.outlet));
        deactivate_route_and_its_children(child, child_context.as_deref(), checks);
    }
    checks.can_deactivate.push(CanDeactivateCheck {
        component,
        route: node.value.clone(),
    });
}

fn same_config(a: &ActivatedRouteSnapshot, b: &ActivatedRouteSnapshot) -> bool {
    match (&a.route_config, &b.route_config) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

fn should_run_guards_and_resolvers(
    curr: &ActivatedRouteSnapshot,
    future: &ActivatedRouteSnapshot,
    params_and_path_unchanged: bool,
) -> bool {
    let mode = future
        .route_config
        .as_ref()
        .map(|c| c.run_guards_and_resolvers.clone())
        .unwrap_or_default();
    match mode {
        RunGuardsAndResolvers::Always => true,
        RunGuardsAndResolvers::ParamsChange => !params_and_path_unchanged,
        RunGuardsAndResolvers::ParamsOrQueryParamsChange => {
            !params_and_path_unchanged || curr.query_params != future.query_params
        }
        RunGuardsAndResolvers::PathParamsChange => !equal_path(&curr.url, &future.url),
        RunGuardsAndResolvers::PathParamsOrQueryParamsChange => {
            !equal_path(&curr.url, &future.url) || curr.query_params != future.query_params
        }
        RunGuardsAndResolvers::Custom(decide) => decide(curr, future),
    }
}

// ============================================================================
// Execution
// ============================================================================

/// Run all collected guards. Returns the first non-allow verdict, or `Allow`.
pub(crate) async fn check_guards(
    events: &EventSink,
    navigation_id: u64,
    checks: &Checks,
    future_state: &Arc<RouterStateSnapshot>,
    curr_state: &Arc<RouterStateSnapshot>,
) -> Result<GuardResult, RouterError> {
    for check in &checks.can_deactivate {
        let config = match &check.route.route_config {
            Some(config) => config.clone(),
            None => continue,
        };
        for guard in &config.can_deactivate {
            let verdict = guard
                .can_deactivate(
                    check.component,
                    check.route.clone(),
                    curr_state.clone(),
                    future_state.clone(),
                )
                .await?;
            if !verdict.is_allow() {
                tracing::debug!(path = check.route.config_path(), "can_deactivate rejected");
                return Ok(verdict);
            }
        }
    }

    for check in &checks.can_activate {
        let route = check.route().clone();
        if check.path.len() > 1 {
            events.emit(Event::ChildActivationStart {
                id: navigation_id,
                route_path: check.path[check.path.len() - 2].config_path(),
            });
        }
        events.emit(Event::ActivationStart {
            id: navigation_id,
            route_path: route.config_path(),
        });

        let verdict = run_activation_check(check, &route, future_state).await?;
        if !verdict.is_allow() {
            tracing::debug!(path = route.config_path(), "can_activate rejected");
            return Ok(verdict);
        }
    }
    Ok(GuardResult::Allow)
}

/// Races every `can_activate_child` of the ancestors plus the route's own
/// `can_activate` guards; the first completed non-allow verdict preempts the
/// rest.
async fn run_activation_check(
    check: &CanActivateCheck,
    route: &Arc<ActivatedRouteSnapshot>,
    future_state: &Arc<RouterStateSnapshot>,
) -> Result<GuardResult, RouterError> {
    let mut futures: FuturesUnordered<BoxFuture<'_, anyhow::Result<GuardResult>>> =
        FuturesUnordered::new();

    for ancestor in &check.path[..check.path.len() - 1] {
        let Some(config) = &ancestor.route_config else {
            continue;
        };
        for guard in &config.can_activate_child {
            let guard = guard.clone();
            let route = route.clone();
            let state = future_state.clone();
            futures.push(Box::pin(async move {
                guard.can_activate_child(route, state).await
            }));
        }
    }
    if let Some(config) = &route.route_config {
        for guard in &config.can_activate {
            let guard = guard.clone();
            let route = route.clone();
            let state = future_state.clone();
            futures.push(Box::pin(
                async move { guard.can_activate(route, state).await },
            ));
        }
    }

    while let Some(result) = futures.next().await {
        let verdict = result?;
        if !verdict.is_allow() {
            return Ok(verdict);
        }
    }
    Ok(GuardResult::Allow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{as_routes, Route, Routes};
    use crate::events::EventSink;
    use crate::loader::RouterConfigLoader;
    use crate::recognize::recognize;
    use crate::state::ParamsInheritanceStrategy;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use veer_url::{DefaultUrlSerializer, UrlSerializer, UrlTree};

    const TEAM: ComponentType = ComponentType::new("Team");
    const USER: ComponentType = ComponentType::new("User");

    async fn snapshot(config: &Routes, url: &str) -> Arc<RouterStateSnapshot> {
        let loader = RouterConfigLoader::new();
        let events = EventSink::new();
        let tree = DefaultUrlSerializer.parse(url).unwrap();
        Arc::new(
            recognize(
                &loader,
                &events,
                1,
                Some(ComponentType::new("Root")),
                config,
                &tree,
                url,
                ParamsInheritanceStrategy::default(),
            )
            .await
            .unwrap(),
        )
    }

    fn team_config() -> Routes {
        as_routes(vec![Route::new("team/:id")
            .component(TEAM)
            .children(vec![Route::new("user/:name").component(USER)])])
    }

    #[tokio::test]
    async fn test_unchanged_routes_produce_no_checks() {
        let config = team_config();
        let curr = snapshot(&config, "/team/33/user/victor").await;
        let future = snapshot(&config, "/team/33/user/victor").await;
        let contexts = ChildrenOutletContexts::default();
        let checks = get_all_route_guards(&future, &curr, &contexts);
        assert!(checks.can_activate.is_empty());
        assert!(checks.can_deactivate.is_empty());
    }

    #[tokio::test]
    async fn test_param_change_rechecks_the_changed_subtree() {
        let config = team_config();
        let curr = snapshot(&config, "/team/33/user/victor").await;
        let future = snapshot(&config, "/team/33/user/fedor").await;
        let contexts = ChildrenOutletContexts::default();
        let checks = get_all_route_guards(&future, &curr, &contexts);
        // Only the user route changed.
        assert_eq!(checks.can_activate.len(), 1);
        assert_eq!(checks.can_activate[0].route().param("name"), Some("fedor"));
        assert_eq!(checks.can_deactivate.len(), 1);
        assert_eq!(checks.can_deactivate[0].route.param("name"), Some("victor"));
    }

    #[tokio::test]
    async fn test_config_change_deactivates_children_first() {
        let config = as_routes(vec![
            Route::new("a")
                .component(TEAM)
                .children(vec![Route::new("x").component(USER)]),
            Route::new("b").component(TEAM),
        ]);
        let curr = snapshot(&config, "/a/x").await;
        let future = snapshot(&config, "/b").await;
        let contexts = ChildrenOutletContexts::default();
        let checks = get_all_route_guards(&future, &curr, &contexts);
        assert_eq!(checks.can_activate.len(), 1);
        let deactivated: Vec<_> = checks
            .can_deactivate
            .iter()
            .map(|c| c.route.config_path())
            .collect();
        assert_eq!(deactivated, vec!["x", "a"]);
    }

    #[tokio::test]
    async fn test_first_non_allow_verdict_preempts_slower_guards() {
        let calls = Arc::new(AtomicUsize::new(0));
        let slow_calls = calls.clone();
        let config = as_routes(vec![Route::new("admin")
            .component(TEAM)
            .can_activate(Arc::new(
                move |_route: Arc<ActivatedRouteSnapshot>, _state: Arc<RouterStateSnapshot>| {
                    let calls = slow_calls.clone();
                    async move {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(GuardResult::Allow)
                    }
                },
            ))
            .can_activate(Arc::new(
                |_route: Arc<ActivatedRouteSnapshot>, _state: Arc<RouterStateSnapshot>| async {
                    Ok(GuardResult::Deny)
                },
            ))]);
        let empty_config = as_routes(vec![]);
        let curr = snapshot(&empty_config, "/").await;
        let future = snapshot(&config, "/admin").await;
        let contexts = ChildrenOutletContexts::default();
        let checks = get_all_route_guards(&future, &curr, &contexts);
        let events = EventSink::new();

        let started = std::time::Instant::now();
        let verdict = check_guards(&events, 1, &checks, &future, &curr)
            .await
            .unwrap();
        assert!(!verdict.is_allow());
        // The fast denial preempted the slow guard.
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_ancestor_child_guards_race_alongside_own_activation_guards() {
        let calls = Arc::new(AtomicUsize::new(0));
        let child_calls = calls.clone();
        let own_calls = calls.clone();
        let config = as_routes(vec![Route::new("team/:id")
            .component(TEAM)
            .can_activate_child(Arc::new(
                move |_route: Arc<ActivatedRouteSnapshot>, _state: Arc<RouterStateSnapshot>| {
                    let calls = child_calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(GuardResult::Allow)
                    }
                },
            ))
            .children(vec![Route::new("user/:name").component(USER).can_activate(
                Arc::new(
                    move |_route: Arc<ActivatedRouteSnapshot>, _state: Arc<RouterStateSnapshot>| {
                        let calls = own_calls.clone();
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            Ok(GuardResult::Allow)
                        }
                    },
                ),
            )])]);
        let empty_config = as_routes(vec![]);
        let curr = snapshot(&empty_config, "/").await;
        let future = snapshot(&config, "/team/33/user/victor").await;
        let contexts = ChildrenOutletContexts::default();
        let checks = get_all_route_guards(&future, &curr, &contexts);
        let events = EventSink::new();

        let verdict = check_guards(&events, 1, &checks, &future, &curr)
            .await
            .unwrap();
        assert!(verdict.is_allow());
        // The user check ran the parent's child guard and its own guard; the
        // team check ran no guards of its own.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_guard_redirect_verdict_carries_the_target() {
        let login = DefaultUrlSerializer.parse("/login").unwrap();
        let login_for_guard = login.clone();
        let config = as_routes(vec![Route::new("admin").component(TEAM).can_activate(
            Arc::new(
                move |_route: Arc<ActivatedRouteSnapshot>, _state: Arc<RouterStateSnapshot>| {
                    let url: UrlTree = login_for_guard.clone();
                    async move { Ok(GuardResult::from(url)) }
                },
            ),
        )]);
        let empty_config = as_routes(vec![]);
        let curr = snapshot(&empty_config, "/").await;
        let future = snapshot(&config, "/admin").await;
        let contexts = ChildrenOutletContexts::default();
        let checks = get_all_route_guards(&future, &curr, &contexts);
        let events = EventSink::new();

        let verdict = check_guards(&events, 1, &checks, &future, &curr)
            .await
            .unwrap();
        match verdict {
            GuardResult::Redirect(command) => assert_eq!(command.url, login),
            other => panic!("expected redirect, got {other:?}"),
        }
    }
}
