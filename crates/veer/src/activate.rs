//! Activation
//!
//! The commit stage of a navigation: tears down routes that left the state
//! (children first), then activates the new tree (parents first), driving
//! registered outlet handles and pushing staged snapshots into the live
//! routes' observable channels. The reuse strategy may divert a deactivated
//! subtree into storage, and re-attach it later instead of a fresh
//! activation.

use crate::errors::RouterError;
use crate::events::{Event, EventSink};
use crate::outlet::ChildrenOutletContexts;
use crate::reuse::{DetachedRouteHandle, RouteReuseStrategy};
use crate::state::{ActivatedRoute, RouterState};
use crate::tree::TreeNode;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::sync::Arc;

type RouteNode = TreeNode<Arc<ActivatedRoute>>;
type Activation<'a> = BoxFuture<'a, Result<(), RouterError>>;

pub(crate) struct ActivateRoutes<'a> {
    pub strategy: &'a dyn RouteReuseStrategy,
    pub events: &'a EventSink,
    pub navigation_id: u64,
}

impl<'a> ActivateRoutes<'a> {
    /// Swap the rendered tree from `prev` to `next`.
    pub(crate) async fn activate(
        &self,
        next: &RouterState,
        prev: Option<&RouterState>,
        contexts: &ChildrenOutletContexts,
    ) -> Result<(), RouterError> {
        let future_root = &next.tree.root;
        let prev_root = prev.map(|p| &p.tree.root);
        self.deactivate_child_routes(future_root, prev_root, contexts)
            .await?;
        future_root.value.advance();
        self.activate_child_routes(future_root, prev_root, contexts)
            .await
    }

    fn deactivate_child_routes<'b>(
        &'b self,
        future_node: &'b RouteNode,
        curr_node: Option<&'b RouteNode>,
        contexts: &'b ChildrenOutletContexts,
    ) -> Activation<'b> {
        async move {
            let mut prev_children: HashMap<&str, &RouteNode> = curr_node
                .map(|node| {
                    node.children
                        .iter()
                        .map(|child| (child.value.outlet.as_str(), child))
                        .collect()
                })
                .unwrap_or_default();

            for child in &future_node.children {
                let prev = prev_children.remove(child.value.outlet.as_str());
                self.deactivate_routes(child, prev, contexts).await?;
            }
            for (_, removed) in prev_children {
                self.deactivate_route_and_its_children(removed, contexts)
                    .await?;
            }
            Ok(())
        }
        .boxed()
    }

    async fn deactivate_routes(
        &self,
        future_node: &RouteNode,
        curr_node: Option<&RouteNode>,
        parent_contexts: &ChildrenOutletContexts,
    ) -> Result<(), RouterError> {
        let future = &future_node.value;
        match curr_node {
            // Reused instance: nothing to tear down here, recurse.
            Some(curr_node) if Arc::ptr_eq(future, &curr_node.value) => {
                if future.snapshot().expects_component() {
                    if let Some(context) = parent_contexts.get_context(&future.outlet) {
                        self.deactivate_child_routes(
                            future_node,
                            Some(curr_node),
                            context.children(),
                        )
                        .await?;
                    }
                } else {
                    self.deactivate_child_routes(future_node, Some(curr_node), parent_contexts)
                        .await?;
                }
            }
            Some(curr_node) => {
                self.deactivate_route_and_its_children(curr_node, parent_contexts)
                    .await?;
            }
            None => {}
        }
        Ok(())
    }

    async fn deactivate_route_and_its_children(
        &self,
        node: &RouteNode,
        parent_contexts: &ChildrenOutletContexts,
    ) -> Result<(), RouterError> {
        if self.strategy.should_detach(&node.value.snapshot()) {
            self.detach_and_store(node, parent_contexts).await
        } else {
            self.deactivate_route_and_outlet(node, parent_contexts)
                .await
        }
    }

    /// Stash the subtree (rendered state included) instead of destroying it.
    async fn detach_and_store(
        &self,
        node: &RouteNode,
        parent_contexts: &ChildrenOutletContexts,
    ) -> Result<(), RouterError> {
        let context = parent_contexts.get_context(&node.value.outlet);
        let contexts = context
            .as_ref()
            .filter(|_| node.value.snapshot().expects_component())
            .map(|c| c.children().on_outlet_deactivated())
            .unwrap_or_default();
        let attached = match context.as_ref().and_then(|c| c.outlet()) {
            Some(outlet) if outlet.is_activated() => {
                Some(outlet.detach().await.map_err(RouterError::Collaborator)?)
            }
            _ => None,
        };
        tracing::debug!(path = node.value.snapshot().config_path(), "detached route subtree");
        self.strategy.store(
            &node.value.snapshot(),
            Some(DetachedRouteHandle {
                route: node.clone(),
                contexts,
                attached,
            }),
        );
        Ok(())
    }

    fn deactivate_route_and_outlet<'b>(
        &'b self,
        node: &'b RouteNode,
        parent_contexts: &'b ChildrenOutletContexts,
    ) -> Activation<'b> {
        async move {
            let context = parent_contexts.get_context(&node.value.outlet);
            let child_contexts = if node.value.snapshot().expects_component() {
                context.as_ref().map(|c| c.children())
            } else {
                Some(parent_contexts)
            };

            if let Some(child_contexts) = child_contexts {
                for child in &node.children {
                    self.deactivate_route_and_its_children(child, child_contexts)
                        .await?;
                }
            }

            if let Some(context) = context {
                if let Some(outlet) = context.outlet() {
                    if outlet.is_activated() {
                        outlet.deactivate().await.map_err(RouterError::Collaborator)?;
                    }
                }
                context.children().on_outlet_deactivated();
                context.set_route(None);
            }
            Ok(())
        }
        .boxed()
    }

    fn activate_child_routes<'b>(
        &'b self,
        future_node: &'b RouteNode,
        curr_node: Option<&'b RouteNode>,
        contexts: &'b ChildrenOutletContexts,
    ) -> Activation<'b> {
        async move {
            let prev_children: HashMap<&str, &RouteNode> = curr_node
                .map(|node| {
                    node.children
                        .iter()
                        .map(|child| (child.value.outlet.as_str(), child))
                        .collect()
                })
                .unwrap_or_default();

            for child in &future_node.children {
                let prev = prev_children.get(child.value.outlet.as_str()).copied();
                self.activate_routes(child, prev, contexts).await?;
                self.events.emit(Event::ActivationEnd {
                    id: self.navigation_id,
                    route_path: child.value.snapshot().config_path(),
                });
            }
            if !future_node.children.is_empty() {
                self.events.emit(Event::ChildActivationEnd {
                    id: self.navigation_id,
                    route_path: future_node.value.snapshot().config_path(),
                });
            }
            Ok(())
        }
        .boxed()
    }

    async fn activate_routes(
        &self,
        future_node: &RouteNode,
        curr_node: Option<&RouteNode>,
        parent_contexts: &ChildrenOutletContexts,
    ) -> Result<(), RouterError> {
        let future = &future_node.value;
        future.advance();

        let reused = curr_node.is_some_and(|c| Arc::ptr_eq(future, &c.value));
        if reused {
            if future.snapshot().expects_component() {
                let context = parent_contexts.get_or_create_context(&future.outlet);
                self.activate_child_routes(future_node, curr_node, context.children())
                    .await?;
            } else {
                self.activate_child_routes(future_node, curr_node, parent_contexts)
                    .await?;
            }
            return Ok(());
        }

        if future.snapshot().expects_component() {
            let context = parent_contexts.get_or_create_context(&future.outlet);
            let snapshot = future.snapshot();
            if self.strategy.should_attach(&snapshot) {
                if let Some(handle) = self.strategy.retrieve(&snapshot) {
                    self.strategy.store(&snapshot, None);
                    context.children().on_outlet_reattached(handle.contexts);
                    context.set_route(Some(future.clone()));
                    if let (Some(outlet), Some(attached)) = (context.outlet(), handle.attached) {
                        outlet
                            .attach(attached, future.clone())
                            .await
                            .map_err(RouterError::Collaborator)?;
                    }
                    tracing::debug!(path = snapshot.config_path(), "re-attached route subtree");
                    self.activate_child_routes(future_node, None, context.children())
                        .await?;
                    return Ok(());
                }
            }
            context.set_route(Some(future.clone()));
            if let Some(outlet) = context.outlet() {
                outlet
                    .activate(future.clone())
                    .await
                    .map_err(RouterError::Collaborator)?;
            }
            self.activate_child_routes(future_node, None, context.children())
                .await?;
        } else {
            self.activate_child_routes(future_node, None, parent_contexts)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{as_routes, ComponentType, Route, Routes};
    use crate::loader::RouterConfigLoader;
    use crate::outlet::{AttachedRef, OutletHandle};
    use crate::recognize::recognize;
    use crate::reconcile::create_router_state;
    use crate::reuse::BaseRouteReuseStrategy;
    use crate::state::{ParamsInheritanceStrategy, RouterStateSnapshot};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use veer_url::{DefaultUrlSerializer, UrlSerializer};

    const A: ComponentType = ComponentType::new("A");
    const B: ComponentType = ComponentType::new("B");

    #[derive(Default)]
    struct RecordingOutlet {
        activated: AtomicBool,
        log: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl OutletHandle for RecordingOutlet {
        async fn activate(&self, route: Arc<ActivatedRoute>) -> anyhow::Result<()> {
            self.activated.store(true, Ordering::SeqCst);
            if let Ok(mut log) = self.log.lock() {
                log.push(format!(
                    "activate {}",
                    route.component().map(|c| c.name).unwrap_or("?")
                ));
            }
            Ok(())
        }

        async fn deactivate(&self) -> anyhow::Result<()> {
            self.activated.store(false, Ordering::SeqCst);
            if let Ok(mut log) = self.log.lock() {
                log.push("deactivate".to_string());
            }
            Ok(())
        }

        async fn detach(&self) -> anyhow::Result<AttachedRef> {
            self.activated.store(false, Ordering::SeqCst);
            Ok(Arc::new(()))
        }

        async fn attach(&self, _handle: AttachedRef, _route: Arc<ActivatedRoute>) -> anyhow::Result<()> {
            self.activated.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn is_activated(&self) -> bool {
            self.activated.load(Ordering::SeqCst)
        }

        fn component(&self) -> Option<ComponentType> {
            None
        }
    }

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

    #[tokio::test]
    async fn test_outlet_sees_activation_and_deactivation() {
        let config = as_routes(vec![
            Route::new("a").component(A),
            Route::new("b").component(B),
        ]);
        let outlet = Arc::new(RecordingOutlet::default());
        let contexts = ChildrenOutletContexts::default();
        contexts.on_child_outlet_created(veer_url::PRIMARY_OUTLET, outlet.clone());

        let strategy = BaseRouteReuseStrategy;
        let events = EventSink::new();
        let activator = ActivateRoutes {
            strategy: &strategy,
            events: &events,
            navigation_id: 1,
        };

        let first = create_router_state(&strategy, snapshot(&config, "/a").await, None).unwrap();
        activator.activate(&first, None, &contexts).await.unwrap();
        assert!(outlet.is_activated());

        let second =
            create_router_state(&strategy, snapshot(&config, "/b").await, Some(&first)).unwrap();
        activator
            .activate(&second, Some(&first), &contexts)
            .await
            .unwrap();

        let log = outlet.log.lock().unwrap().clone();
        assert_eq!(log, vec!["activate A", "deactivate", "activate B"]);
    }

    #[tokio::test]
    async fn test_reused_routes_are_not_reactivated() {
        let config = as_routes(vec![Route::new("team/:id").component(A)]);
        let outlet = Arc::new(RecordingOutlet::default());
        let contexts = ChildrenOutletContexts::default();
        contexts.on_child_outlet_created(veer_url::PRIMARY_OUTLET, outlet.clone());

        let strategy = BaseRouteReuseStrategy;
        let events = EventSink::new();
        let activator = ActivateRoutes {
            strategy: &strategy,
            events: &events,
            navigation_id: 1,
        };

        let first =
            create_router_state(&strategy, snapshot(&config, "/team/1").await, None).unwrap();
        activator.activate(&first, None, &contexts).await.unwrap();

        let second =
            create_router_state(&strategy, snapshot(&config, "/team/2").await, Some(&first))
                .unwrap();
        activator
            .activate(&second, Some(&first), &contexts)
            .await
            .unwrap();

        // One activation only; the param change flowed through the live
        // route's channels instead.
        let log = outlet.log.lock().unwrap().clone();
        assert_eq!(log, vec!["activate A"]);
        let team = second.first_child(&second.root()).unwrap();
        assert_eq!(team.snapshot().param("id"), Some("2"));
    }
}
