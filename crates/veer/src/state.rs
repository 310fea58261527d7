//! Router state trees
//!
//! Each navigation produces a fresh immutable [`RouterStateSnapshot`] (tree
//! of [`ActivatedRouteSnapshot`]). The live [`RouterState`] persists across
//! navigations: its [`ActivatedRoute`] nodes are observable-backed and are
//! reused in place when the reuse strategy allows, so subscribers keep their
//! subscriptions across navigations.

use crate::config::{ComponentType, Data, Route};
use crate::tree::{Tree, TreeNode};
use once_cell::sync::OnceCell;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use veer_url::{equal_segments, Params, QueryParams, UrlSegment, PRIMARY_OUTLET};

/// When a child route inherits params and data from its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParamsInheritanceStrategy {
    /// Inherit only through path-less or component-less parents.
    #[default]
    EmptyOnly,
    /// Inherit through every parent.
    Always,
}

/// Immutable point-in-time state of one activated route.
///
/// `data` and `resolved_data` are late-stamped by the resolver stage; the
/// component slot is late-stamped for `load_component` routes. Everything
/// else is fixed at recognition.
#[derive(Debug)]
pub struct ActivatedRouteSnapshot {
    /// URL segments this route consumed.
    pub url: Vec<UrlSegment>,
    /// Positional params plus trailing matrix params of the last consumed
    /// segment, with inherited params folded in.
    pub params: Params,
    pub query_params: QueryParams,
    pub fragment: Option<String>,
    pub outlet: String,
    /// Back-reference to the matched config entry; reuse/equality key.
    pub route_config: Option<Arc<Route>>,
    data: RwLock<Data>,
    resolved_data: RwLock<Data>,
    component: OnceCell<ComponentType>,
}

impl ActivatedRouteSnapshot {
    pub(crate) fn new(
        url: Vec<UrlSegment>,
        params: Params,
        query_params: QueryParams,
        fragment: Option<String>,
        outlet: String,
        route_config: Option<Arc<Route>>,
    ) -> Self {
        let component = OnceCell::new();
        let initial_data = route_config
            .as_ref()
            .map(|c| c.data.clone())
            .unwrap_or_default();
        if let Some(c) = route_config.as_ref().and_then(|c| c.component) {
            let _ = component.set(c);
        }
        Self {
            url,
            params,
            query_params,
            fragment,
            outlet,
            route_config,
            data: RwLock::new(initial_data),
            resolved_data: RwLock::new(Data::new()),
            component,
        }
    }

    /// Root snapshot of a navigation; consumes no URL.
    pub(crate) fn root(
        component: Option<ComponentType>,
        query_params: QueryParams,
        fragment: Option<String>,
    ) -> Self {
        let slot = OnceCell::new();
        if let Some(c) = component {
            let _ = slot.set(c);
        }
        Self {
            url: Vec::new(),
            params: Params::new(),
            query_params,
            fragment,
            outlet: PRIMARY_OUTLET.to_string(),
            route_config: None,
            data: RwLock::new(Data::new()),
            resolved_data: RwLock::new(Data::new()),
            component: slot,
        }
    }

    /// Merged static + inherited + resolved data.
    pub fn data(&self) -> Data {
        match self.data.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn resolved_data(&self) -> Data {
        match self.resolved_data.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub(crate) fn set_data(&self, data: Data) {
        match self.data.write() {
            Ok(mut guard) => *guard = data,
            Err(poisoned) => *poisoned.into_inner() = data,
        }
    }

    pub(crate) fn set_resolved_data(&self, data: Data) {
        match self.resolved_data.write() {
            Ok(mut guard) => *guard = data,
            Err(poisoned) => *poisoned.into_inner() = data,
        }
    }

    /// Component token of this route, once known.
    pub fn component(&self) -> Option<ComponentType> {
        self.component.get().copied()
    }

    pub(crate) fn stamp_component(&self, component: ComponentType) {
        let _ = self.component.set(component);
    }

    /// Whether this route will have a component once loading completes.
    pub(crate) fn expects_component(&self) -> bool {
        self.component.get().is_some()
            || self
                .route_config
                .as_ref()
                .is_some_and(|c| c.load_component.is_some())
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Page title: explicit config title, else a string `title` data value.
    pub fn title(&self) -> Option<String> {
        if let Some(title) = self.route_config.as_ref().and_then(|c| c.title.clone()) {
            return Some(title);
        }
        match self.data().get("title") {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            _ => None,
        }
    }

    /// Config path for diagnostics and events; empty at the root.
    pub fn config_path(&self) -> String {
        self.route_config
            .as_ref()
            .map(|c| c.path_text().to_string())
            .unwrap_or_default()
    }
}

/// Snapshot of the whole router state for one navigation.
#[derive(Debug, Clone)]
pub struct RouterStateSnapshot {
    /// Serialized URL this snapshot was recognized from.
    pub url: String,
    pub(crate) tree: Tree<Arc<ActivatedRouteSnapshot>>,
}

impl RouterStateSnapshot {
    pub(crate) fn new(url: String, tree: Tree<Arc<ActivatedRouteSnapshot>>) -> Self {
        Self { url, tree }
    }

    pub fn root(&self) -> Arc<ActivatedRouteSnapshot> {
        self.tree.root.value.clone()
    }

    pub fn children(&self, node: &Arc<ActivatedRouteSnapshot>) -> Vec<Arc<ActivatedRouteSnapshot>> {
        self.tree.children(node)
    }

    pub fn first_child(
        &self,
        node: &Arc<ActivatedRouteSnapshot>,
    ) -> Option<Arc<ActivatedRouteSnapshot>> {
        self.tree.first_child(node)
    }

    pub fn parent(&self, node: &Arc<ActivatedRouteSnapshot>) -> Option<Arc<ActivatedRouteSnapshot>> {
        self.tree.parent(node)
    }

    pub fn siblings(&self, node: &Arc<ActivatedRouteSnapshot>) -> Vec<Arc<ActivatedRouteSnapshot>> {
        self.tree.siblings(node)
    }

    pub fn path_from_root(
        &self,
        node: &Arc<ActivatedRouteSnapshot>,
    ) -> Vec<Arc<ActivatedRouteSnapshot>> {
        self.tree.path_from_root(node)
    }
}

/// Live, observable-backed counterpart of a snapshot node.
///
/// Only the reconciliation/advance step pushes new values into the channels,
/// and only when the value actually changed; subscribers can therefore
/// distinguish "nothing changed" from "re-navigated to the same route".
#[derive(Debug)]
pub struct ActivatedRoute {
    url: watch::Sender<Vec<UrlSegment>>,
    params: watch::Sender<Params>,
    query_params: watch::Sender<QueryParams>,
    fragment: watch::Sender<Option<String>>,
    data: watch::Sender<Data>,
    pub outlet: String,
    pub route_config: Option<Arc<Route>>,
    snapshot: Mutex<Arc<ActivatedRouteSnapshot>>,
    future_snapshot: Mutex<Arc<ActivatedRouteSnapshot>>,
}

impl ActivatedRoute {
    pub(crate) fn from_snapshot(snapshot: Arc<ActivatedRouteSnapshot>) -> Self {
        Self {
            url: watch::Sender::new(snapshot.url.clone()),
            params: watch::Sender::new(snapshot.params.clone()),
            query_params: watch::Sender::new(snapshot.query_params.clone()),
            fragment: watch::Sender::new(snapshot.fragment.clone()),
            data: watch::Sender::new(snapshot.data()),
            outlet: snapshot.outlet.clone(),
            route_config: snapshot.route_config.clone(),
            snapshot: Mutex::new(snapshot.clone()),
            future_snapshot: Mutex::new(snapshot),
        }
    }

    /// Current snapshot (the last one advanced to).
    pub fn snapshot(&self) -> Arc<ActivatedRouteSnapshot> {
        match self.snapshot.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub(crate) fn future_snapshot(&self) -> Arc<ActivatedRouteSnapshot> {
        match self.future_snapshot.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Stage the snapshot this route will advance to at the commit point.
    pub(crate) fn stage(&self, future: Arc<ActivatedRouteSnapshot>) {
        match self.future_snapshot.lock() {
            Ok(mut guard) => *guard = future,
            Err(poisoned) => *poisoned.into_inner() = future,
        }
    }

    /// Publish the staged snapshot, pushing each changed value to its
    /// subscribers. Unchanged values are not re-emitted.
    pub(crate) fn advance(&self) {
        let future = self.future_snapshot();
        match self.snapshot.lock() {
            Ok(mut guard) => *guard = future.clone(),
            Err(poisoned) => *poisoned.into_inner() = future.clone(),
        }

        self.url.send_if_modified(|current| {
            if equal_segments(current, &future.url) {
                false
            } else {
                *current = future.url.clone();
                true
            }
        });
        self.params.send_if_modified(|current| {
            if *current == future.params {
                false
            } else {
                *current = future.params.clone();
                true
            }
        });
        self.query_params.send_if_modified(|current| {
            if *current == future.query_params {
                false
            } else {
                *current = future.query_params.clone();
                true
            }
        });
        self.fragment.send_if_modified(|current| {
            if *current == future.fragment {
                false
            } else {
                *current = future.fragment.clone();
                true
            }
        });
        let data = future.data();
        self.data.send_if_modified(|current| {
            if *current == data {
                false
            } else {
                *current = data.clone();
                true
            }
        });
    }

    pub fn url(&self) -> watch::Receiver<Vec<UrlSegment>> {
        self.url.subscribe()
    }

    pub fn params(&self) -> watch::Receiver<Params> {
        self.params.subscribe()
    }

    pub fn query_params(&self) -> watch::Receiver<QueryParams> {
        self.query_params.subscribe()
    }

    pub fn fragment(&self) -> watch::Receiver<Option<String>> {
        self.fragment.subscribe()
    }

    pub fn data(&self) -> watch::Receiver<Data> {
        self.data.subscribe()
    }

    /// Params as an async stream; the current value is yielded first.
    pub fn params_stream(&self) -> WatchStream<Params> {
        WatchStream::new(self.params.subscribe())
    }

    /// Merged data as an async stream; the current value is yielded first.
    pub fn data_stream(&self) -> WatchStream<Data> {
        WatchStream::new(self.data.subscribe())
    }

    pub fn component(&self) -> Option<ComponentType> {
        self.snapshot().component()
    }
}

/// Live router state persisting across navigations.
#[derive(Debug, Clone)]
pub struct RouterState {
    pub snapshot: Arc<RouterStateSnapshot>,
    pub(crate) tree: Tree<Arc<ActivatedRoute>>,
}

impl RouterState {
    pub(crate) fn new(snapshot: Arc<RouterStateSnapshot>, tree: Tree<Arc<ActivatedRoute>>) -> Self {
        Self { snapshot, tree }
    }

    /// State before any navigation: a bare root.
    pub(crate) fn empty(root_component: Option<ComponentType>) -> Self {
        let root_snapshot = Arc::new(ActivatedRouteSnapshot::root(
            root_component,
            QueryParams::new(),
            None,
        ));
        let snapshot = Arc::new(RouterStateSnapshot::new(
            "/".to_string(),
            Tree::new(TreeNode::leaf(root_snapshot.clone())),
        ));
        let root = Arc::new(ActivatedRoute::from_snapshot(root_snapshot));
        Self::new(snapshot, Tree::new(TreeNode::leaf(root)))
    }

    pub fn root(&self) -> Arc<ActivatedRoute> {
        self.tree.root.value.clone()
    }

    pub fn children(&self, node: &Arc<ActivatedRoute>) -> Vec<Arc<ActivatedRoute>> {
        self.tree.children(node)
    }

    pub fn first_child(&self, node: &Arc<ActivatedRoute>) -> Option<Arc<ActivatedRoute>> {
        self.tree.first_child(node)
    }

    pub fn siblings(&self, node: &Arc<ActivatedRoute>) -> Vec<Arc<ActivatedRoute>> {
        self.tree.siblings(node)
    }

    pub fn path_from_root(&self, node: &Arc<ActivatedRoute>) -> Vec<Arc<ActivatedRoute>> {
        self.tree.path_from_root(node)
    }
}

// ============================================================================
// Params/data inheritance
// ============================================================================

/// Whether a child sees its parent's params/data transparently: empty-path
/// children always do, and so does every child of a component-less route.
fn inherits_from_parent(
    strategy: ParamsInheritanceStrategy,
    child_config: &Option<Arc<Route>>,
    parent_expects_component: bool,
) -> bool {
    if strategy == ParamsInheritanceStrategy::Always {
        return true;
    }
    let child_path_less = child_config
        .as_ref()
        .is_some_and(|c| c.path.as_deref() == Some(""));
    child_path_less || !parent_expects_component
}

/// Fold inherited params into each node, root to leaves. Runs on the plain
/// tree before snapshots are shared.
pub(crate) fn inherit_params(
    node: &mut TreeNode<ActivatedRouteSnapshot>,
    strategy: ParamsInheritanceStrategy,
) {
    fn rec(
        node: &mut TreeNode<ActivatedRouteSnapshot>,
        strategy: ParamsInheritanceStrategy,
        inherited: Option<&Params>,
    ) {
        if let Some(inherited) = inherited {
            let mut merged = inherited.clone();
            // Own params win on key collisions.
            for (k, v) in &node.value.params {
                merged.insert(k.clone(), v.clone());
            }
            node.value.params = merged;
        }
        let parent_expects_component = node.value.expects_component();
        let own = node.value.params.clone();
        for child in &mut node.children {
            let inherits = inherits_from_parent(
                strategy,
                &child.value.route_config,
                parent_expects_component,
            );
            rec(child, strategy, inherits.then_some(&own));
        }
    }
    rec(node, strategy, None);
}

/// Recompute each node's merged data from static config data, resolved data
/// and the parent's effective data. Runs after recognition and again after
/// the resolver stage.
pub(crate) fn refresh_inherited_data(
    node: &TreeNode<Arc<ActivatedRouteSnapshot>>,
    strategy: ParamsInheritanceStrategy,
    inherited: Option<&Data>,
) {
    let mut data = Data::new();
    if let Some(inherited) = inherited {
        data.extend(inherited.clone());
    }
    if let Some(config) = &node.value.route_config {
        data.extend(config.data.clone());
    }
    data.extend(node.value.resolved_data());
    node.value.set_data(data.clone());

    let parent_expects_component = node.value.expects_component();
    for child in &node.children {
        let inherits = inherits_from_parent(
            strategy,
            &child.value.route_config,
            parent_expects_component,
        );
        refresh_inherited_data(child, strategy, inherits.then_some(&data));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Route;

    fn snapshot_for(route: Option<Arc<Route>>, params: Params) -> ActivatedRouteSnapshot {
        ActivatedRouteSnapshot::new(
            Vec::new(),
            params,
            QueryParams::new(),
            None,
            PRIMARY_OUTLET.to_string(),
            route,
        )
    }

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_params_inherit_from_componentless_parent() {
        let parent_route = Arc::new(Route::new("team/:id"));
        let child_route = Arc::new(Route::new("child").component(ComponentType::new("Child")));
        let mut tree = TreeNode::new(
            snapshot_for(Some(parent_route), params(&[("id", "33")])),
            vec![TreeNode::leaf(snapshot_for(
                Some(child_route),
                params(&[("name", "bob")]),
            ))],
        );
        inherit_params(&mut tree, ParamsInheritanceStrategy::EmptyOnly);
        let child = &tree.children[0].value;
        assert_eq!(child.param("id"), Some("33"));
        assert_eq!(child.param("name"), Some("bob"));
    }

    #[test]
    fn test_empty_path_child_inherits_from_component_parent() {
        let parent_route = Arc::new(Route::new("team/:id").component(ComponentType::new("Team")));
        let child_route = Arc::new(Route::new("").component(ComponentType::new("Child")));
        let mut tree = TreeNode::new(
            snapshot_for(Some(parent_route), params(&[("id", "33")])),
            vec![TreeNode::leaf(snapshot_for(Some(child_route), Params::new()))],
        );
        inherit_params(&mut tree, ParamsInheritanceStrategy::EmptyOnly);
        assert_eq!(tree.children[0].value.param("id"), Some("33"));
    }

    #[test]
    fn test_params_do_not_inherit_through_component_route() {
        let parent_route = Arc::new(Route::new("team/:id").component(ComponentType::new("Team")));
        let child_route = Arc::new(Route::new("user/:name").component(ComponentType::new("User")));
        let mut tree = TreeNode::new(
            snapshot_for(Some(parent_route), params(&[("id", "33")])),
            vec![TreeNode::leaf(snapshot_for(
                Some(child_route),
                params(&[("name", "bob")]),
            ))],
        );
        inherit_params(&mut tree, ParamsInheritanceStrategy::EmptyOnly);
        let child = &tree.children[0].value;
        assert_eq!(child.param("id"), None);
        assert_eq!(child.param("name"), Some("bob"));
    }

    #[test]
    fn test_params_always_strategy_inherits_everywhere() {
        let parent_route = Arc::new(Route::new("team/:id").component(ComponentType::new("Team")));
        let child_route = Arc::new(Route::new("user/:name").component(ComponentType::new("User")));
        let mut tree = TreeNode::new(
            snapshot_for(Some(parent_route), params(&[("id", "33")])),
            vec![TreeNode::leaf(snapshot_for(
                Some(child_route),
                params(&[("name", "bob")]),
            ))],
        );
        inherit_params(&mut tree, ParamsInheritanceStrategy::Always);
        assert_eq!(tree.children[0].value.param("id"), Some("33"));
    }

    #[test]
    fn test_siblings_exclude_the_node_itself() {
        let root = Arc::new(snapshot_for(None, Params::new()));
        let left = Arc::new(snapshot_for(None, params(&[("side", "left")])));
        let right = Arc::new(snapshot_for(None, params(&[("side", "right")])));
        let state = RouterStateSnapshot::new(
            "/".to_string(),
            Tree::new(TreeNode::new(
                root,
                vec![
                    TreeNode::leaf(left.clone()),
                    TreeNode::leaf(right.clone()),
                ],
            )),
        );
        let siblings = state.siblings(&left);
        assert_eq!(siblings.len(), 1);
        assert!(Arc::ptr_eq(&siblings[0], &right));
        assert!(state.siblings(&state.root()).is_empty());
    }

    #[test]
    fn test_advance_pushes_only_changed_values() {
        let first = Arc::new(snapshot_for(None, params(&[("id", "1")])));
        let route = ActivatedRoute::from_snapshot(first);
        let mut params_rx = route.params();
        let mut url_rx = route.url();
        params_rx.borrow_and_update();
        url_rx.borrow_and_update();

        let next = Arc::new(snapshot_for(None, params(&[("id", "2")])));
        route.stage(next);
        route.advance();

        assert!(params_rx.has_changed().unwrap());
        assert!(!url_rx.has_changed().unwrap());
        assert_eq!(route.snapshot().param("id"), Some("2"));
    }

    #[test]
    fn test_data_refresh_merges_resolved_over_static() {
        let config = Arc::new(
            Route::new("a")
                .component(ComponentType::new("A"))
                .data_entry("kind", serde_json::json!("static")),
        );
        let node = TreeNode::leaf(Arc::new(snapshot_for(Some(config), Params::new())));
        node.value
            .set_resolved_data([("user".to_string(), serde_json::json!("bob"))].into());
        refresh_inherited_data(&node, ParamsInheritanceStrategy::EmptyOnly, None);
        let data = node.value.data();
        assert_eq!(data.get("kind"), Some(&serde_json::json!("static")));
        assert_eq!(data.get("user"), Some(&serde_json::json!("bob")));
    }
}
