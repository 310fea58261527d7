//! Lazy route config loading
//!
//! Child configs and components declared with loader closures are fetched at
//! most once per `Route` instance. Concurrent requests for the same route
//! share a single in-flight load, and a load that fails is retried by the
//! next navigation that needs it.

use crate::config::{validate_config, ComponentType, Route, Routes};
use crate::errors::RouterError;
use crate::events::{Event, EventSink};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};

/// Memoizing loader for `load_children` / `load_component` routes.
///
/// Keyed by the reference identity of the route `Arc`, matching the identity
/// semantics used everywhere else for route configs.
pub(crate) struct RouterConfigLoader {
    children: Mutex<HashMap<usize, Arc<OnceCell<Routes>>>>,
    components: Mutex<HashMap<usize, Arc<OnceCell<ComponentType>>>>,
}

impl RouterConfigLoader {
    pub(crate) fn new() -> Self {
        Self {
            children: Mutex::new(HashMap::new()),
            components: Mutex::new(HashMap::new()),
        }
    }

    /// Child config for `route`, loading it on first use.
    ///
    /// Loaded configs run through the same validation as the static config
    /// before becoming visible.
    pub(crate) async fn children(
        &self,
        events: &EventSink,
        navigation_id: u64,
        route: &Arc<Route>,
    ) -> Result<Routes, RouterError> {
        if let Some(children) = &route.children {
            return Ok(children.clone());
        }
        let loader = route.load_children.clone().ok_or_else(|| {
            RouterError::InvalidConfig {
                path: route.path_text().to_string(),
                reason: "route has neither children nor a child loader".into(),
            }
        })?;

        let cell = {
            let mut table = self.children.lock().await;
            table
                .entry(Arc::as_ptr(route) as usize)
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };
        cell.get_or_try_init(|| async {
            events.emit(Event::RouteConfigLoadStart {
                id: navigation_id,
                route_path: route.path_text().to_string(),
            });
            let loaded = loader().await.map_err(RouterError::Collaborator)?;
            let routes: Routes = loaded.into_iter().map(Arc::new).collect();
            validate_config(&routes)?;
            events.emit(Event::RouteConfigLoadEnd {
                id: navigation_id,
                route_path: route.path_text().to_string(),
            });
            tracing::debug!(path = route.path_text(), routes = routes.len(), "loaded child config");
            Ok::<_, RouterError>(routes)
        })
        .await
        .cloned()
    }

    /// Component for `route`, loading it on first use.
    pub(crate) async fn component(
        &self,
        events: &EventSink,
        navigation_id: u64,
        route: &Arc<Route>,
    ) -> Result<ComponentType, RouterError> {
        if let Some(component) = route.component {
            return Ok(component);
        }
        let loader = route.load_component.clone().ok_or_else(|| {
            RouterError::InvalidConfig {
                path: route.path_text().to_string(),
                reason: "route has neither a component nor a component loader".into(),
            }
        })?;

        let cell = {
            let mut table = self.components.lock().await;
            table
                .entry(Arc::as_ptr(route) as usize)
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };
        cell.get_or_try_init(|| async {
            events.emit(Event::RouteConfigLoadStart {
                id: navigation_id,
                route_path: route.path_text().to_string(),
            });
            let component = loader().await.map_err(RouterError::Collaborator)?;
            events.emit(Event::RouteConfigLoadEnd {
                id: navigation_id,
                route_path: route.path_text().to_string(),
            });
            Ok::<_, RouterError>(component)
        })
        .await
        .copied()
    }
}
