//! Route reuse strategy
//!
//! Decides, per node, whether the reconciler keeps the live `ActivatedRoute`
//! from the previous state or creates a fresh one, and whether deactivated
//! subtrees are destroyed or stashed for later re-attachment.

use crate::state::{ActivatedRoute, ActivatedRouteSnapshot};
use crate::tree::TreeNode;
use std::sync::Arc;

/// A deactivated live subtree preserved for re-attachment, together with the
/// host-side rendering state that belongs to it.
#[derive(Clone)]
pub struct DetachedRouteHandle {
    pub route: TreeNode<Arc<ActivatedRoute>>,
    pub(crate) contexts: std::collections::HashMap<String, Arc<crate::outlet::OutletContext>>,
    pub(crate) attached: Option<crate::outlet::AttachedRef>,
}

/// Customizes route reuse during reconciliation.
pub trait RouteReuseStrategy: Send + Sync {
    /// Whether `future` should reuse the live route built for `curr`.
    fn should_reuse_route(
        &self,
        future: &ActivatedRouteSnapshot,
        curr: &ActivatedRouteSnapshot,
    ) -> bool;

    /// Whether this subtree should be stashed instead of destroyed when it
    /// deactivates.
    fn should_detach(&self, route: &ActivatedRouteSnapshot) -> bool;

    /// Store a detached subtree, or clear a stored one with `None`.
    fn store(&self, route: &ActivatedRouteSnapshot, handle: Option<DetachedRouteHandle>);

    /// Whether a stored subtree should be re-attached for `route`.
    fn should_attach(&self, route: &ActivatedRouteSnapshot) -> bool;

    /// The stored subtree for `route`, if any. May be called more than once
    /// per navigation; implementations should not remove the handle here,
    /// the engine clears it through [`RouteReuseStrategy::store`].
    fn retrieve(&self, route: &ActivatedRouteSnapshot) -> Option<DetachedRouteHandle>;
}

/// Default strategy: reuse exactly when the matched config entry is the same
/// `Route` instance, never detach.
#[derive(Default)]
pub struct BaseRouteReuseStrategy;

impl RouteReuseStrategy for BaseRouteReuseStrategy {
    fn should_reuse_route(
        &self,
        future: &ActivatedRouteSnapshot,
        curr: &ActivatedRouteSnapshot,
    ) -> bool {
        match (&future.route_config, &curr.route_config) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }

    fn should_detach(&self, _route: &ActivatedRouteSnapshot) -> bool {
        false
    }

    fn store(&self, _route: &ActivatedRouteSnapshot, _handle: Option<DetachedRouteHandle>) {}

    fn should_attach(&self, _route: &ActivatedRouteSnapshot) -> bool {
        false
    }

    fn retrieve(&self, _route: &ActivatedRouteSnapshot) -> Option<DetachedRouteHandle> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ComponentType, Route};
    use veer_url::{Params, QueryParams, PRIMARY_OUTLET};

    fn snapshot(config: Option<Arc<Route>>) -> ActivatedRouteSnapshot {
        ActivatedRouteSnapshot::new(
            Vec::new(),
            Params::new(),
            QueryParams::new(),
            None,
            PRIMARY_OUTLET.to_string(),
            config,
        )
    }

    #[test]
    fn test_base_strategy_reuses_on_config_identity() {
        let strategy = BaseRouteReuseStrategy;
        let config = Arc::new(Route::new("a").component(ComponentType::new("A")));
        let twin = Arc::new(Route::new("a").component(ComponentType::new("A")));

        assert!(strategy.should_reuse_route(&snapshot(Some(config.clone())), &snapshot(Some(config))));
        let other = Arc::new(Route::new("a").component(ComponentType::new("A")));
        assert!(!strategy.should_reuse_route(&snapshot(Some(twin)), &snapshot(Some(other))));
        assert!(strategy.should_reuse_route(&snapshot(None), &snapshot(None)));
    }
}
