//! Outlet integration
//!
//! Outlets are the rendering seams of the engine. The engine never renders
//! anything itself; a host registers an [`OutletHandle`] per outlet name and
//! the activation stage drives it. Contexts form a tree mirroring the route
//! hierarchy, and survive across navigations so detached subtrees can be
//! re-attached.

use crate::config::ComponentType;
use crate::state::ActivatedRoute;
use async_trait::async_trait;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Opaque rendered-subtree token passed back on re-attach.
pub type AttachedRef = Arc<dyn Any + Send + Sync>;

/// Host-side rendering surface for one outlet.
#[async_trait]
pub trait OutletHandle: Send + Sync {
    /// Render `route` into this outlet.
    async fn activate(&self, route: Arc<ActivatedRoute>) -> anyhow::Result<()>;

    /// Tear down whatever this outlet currently renders.
    async fn deactivate(&self) -> anyhow::Result<()>;

    /// Remove the rendered subtree without destroying it.
    async fn detach(&self) -> anyhow::Result<AttachedRef>;

    /// Restore a previously detached subtree.
    async fn attach(&self, handle: AttachedRef, route: Arc<ActivatedRoute>) -> anyhow::Result<()>;

    fn is_activated(&self) -> bool;

    /// Component currently rendered, if any.
    fn component(&self) -> Option<ComponentType>;
}

/// State the engine tracks for one outlet position.
#[derive(Default)]
pub struct OutletContext {
    outlet: Mutex<Option<Arc<dyn OutletHandle>>>,
    route: Mutex<Option<Arc<ActivatedRoute>>>,
    children: ChildrenOutletContexts,
}

impl OutletContext {
    pub fn outlet(&self) -> Option<Arc<dyn OutletHandle>> {
        self.outlet.lock().ok().and_then(|guard| guard.clone())
    }

    pub(crate) fn set_outlet(&self, outlet: Option<Arc<dyn OutletHandle>>) {
        if let Ok(mut guard) = self.outlet.lock() {
            *guard = outlet;
        }
    }

    pub fn route(&self) -> Option<Arc<ActivatedRoute>> {
        self.route.lock().ok().and_then(|guard| guard.clone())
    }

    pub(crate) fn set_route(&self, route: Option<Arc<ActivatedRoute>>) {
        if let Ok(mut guard) = self.route.lock() {
            *guard = route;
        }
    }

    pub fn children(&self) -> &ChildrenOutletContexts {
        &self.children
    }
}

/// Context tree node: the named outlet positions under one activated route.
#[derive(Default)]
pub struct ChildrenOutletContexts {
    contexts: Mutex<HashMap<String, Arc<OutletContext>>>,
}

impl ChildrenOutletContexts {
    /// Called by the host when an outlet appears in the rendered tree.
    pub fn on_child_outlet_created(&self, name: &str, outlet: Arc<dyn OutletHandle>) {
        let context = self.get_or_create_context(name);
        context.set_outlet(Some(outlet));
    }

    /// Called by the host when an outlet leaves the rendered tree. The
    /// context itself is kept so its state survives the outlet's absence.
    pub fn on_child_outlet_destroyed(&self, name: &str) {
        if let Some(context) = self.get_context(name) {
            context.set_outlet(None);
        }
    }

    pub fn get_or_create_context(&self, name: &str) -> Arc<OutletContext> {
        let mut contexts = match self.contexts.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        contexts
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(OutletContext::default()))
            .clone()
    }

    pub fn get_context(&self, name: &str) -> Option<Arc<OutletContext>> {
        match self.contexts.lock() {
            Ok(guard) => guard.get(name).cloned(),
            Err(poisoned) => poisoned.into_inner().get(name).cloned(),
        }
    }

    /// Take the whole context subtree, leaving this level empty. The result
    /// can be stashed with a detached route and restored later.
    pub(crate) fn on_outlet_deactivated(&self) -> HashMap<String, Arc<OutletContext>> {
        match self.contexts.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    /// Restore a context subtree stashed by [`Self::on_outlet_deactivated`].
    pub(crate) fn on_outlet_reattached(&self, restored: HashMap<String, Arc<OutletContext>>) {
        match self.contexts.lock() {
            Ok(mut guard) => *guard = restored,
            Err(poisoned) => *poisoned.into_inner() = restored,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veer_url::PRIMARY_OUTLET;

    #[test]
    fn test_contexts_are_created_on_demand_and_shared() {
        let contexts = ChildrenOutletContexts::default();
        let a = contexts.get_or_create_context(PRIMARY_OUTLET);
        let b = contexts.get_or_create_context(PRIMARY_OUTLET);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(contexts.get_context("missing").is_none());
    }

    #[test]
    fn test_deactivation_takes_and_reattach_restores_the_subtree() {
        let contexts = ChildrenOutletContexts::default();
        let context = contexts.get_or_create_context(PRIMARY_OUTLET);
        context.children().get_or_create_context("right");

        let taken = contexts.on_outlet_deactivated();
        assert!(contexts.get_context(PRIMARY_OUTLET).is_none());

        contexts.on_outlet_reattached(taken);
        let restored = contexts.get_context(PRIMARY_OUTLET).unwrap();
        assert!(Arc::ptr_eq(&restored, &context));
    }
}
