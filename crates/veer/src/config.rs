//! Declarative route configuration
//!
//! A route tree is a list of [`Route`] values built with the builder-style
//! methods below. Configuration is validated eagerly at router construction
//! (and again for each lazily loaded sub-config): invalid combinations are a
//! programmer-error class and must never surface mid-navigation.
//!
//! ## Example
//!
//! ```
//! use veer::{ComponentType, Route};
//!
//! const USER: ComponentType = ComponentType::new("UserComponent");
//!
//! let config = vec![
//!     Route::new("team/:id").children(vec![
//!         Route::new("user/:name").component(USER),
//!     ]),
//! ];
//! ```

use crate::errors::RouterError;
use crate::guard::{CanActivate, CanActivateChild, CanDeactivate, CanLoad, CanMatch, Resolve};
use crate::state::ActivatedRouteSnapshot;
use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use veer_url::{Params, QueryParams, UrlSegment, UrlSegmentGroup, UrlTree, PRIMARY_OUTLET};

/// Static data attached to a route and merged into snapshots.
pub type Data = BTreeMap<String, serde_json::Value>;

/// Opaque token identifying a routed component.
///
/// The rendering layer owns the actual component; the router only needs a
/// stable identity to diff, reuse and hand to the outlet sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComponentType {
    pub name: &'static str,
}

impl ComponentType {
    pub const fn new(name: &'static str) -> Self {
        Self { name }
    }
}

/// Wildcard path matching every remaining segment list.
pub const WILDCARD_PATH: &str = "**";

/// How much of the remaining URL a route's `path` must cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PathMatch {
    /// The path may be a prefix of the remaining segments.
    #[default]
    Prefix,
    /// The path must consume all remaining segments (and the group must have
    /// no children).
    Full,
}

/// When guards and resolvers of a reused route run again.
#[derive(Clone, Default)]
pub enum RunGuardsAndResolvers {
    Always,
    #[default]
    ParamsChange,
    ParamsOrQueryParamsChange,
    PathParamsChange,
    PathParamsOrQueryParamsChange,
    Custom(Arc<dyn Fn(&ActivatedRouteSnapshot, &ActivatedRouteSnapshot) -> bool + Send + Sync>),
}

impl fmt::Debug for RunGuardsAndResolvers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunGuardsAndResolvers::Always => "Always",
            RunGuardsAndResolvers::ParamsChange => "ParamsChange",
            RunGuardsAndResolvers::ParamsOrQueryParamsChange => "ParamsOrQueryParamsChange",
            RunGuardsAndResolvers::PathParamsChange => "PathParamsChange",
            RunGuardsAndResolvers::PathParamsOrQueryParamsChange => {
                "PathParamsOrQueryParamsChange"
            }
            RunGuardsAndResolvers::Custom(_) => "Custom",
        };
        f.write_str(name)
    }
}

/// Result of a custom URL matcher.
#[derive(Debug, Clone)]
pub struct UrlMatchResult {
    pub consumed: Vec<UrlSegment>,
    pub pos_params: BTreeMap<String, UrlSegment>,
}

/// Custom structural matcher; returning `None` means no match.
pub type UrlMatcher =
    Arc<dyn Fn(&[UrlSegment], &UrlSegmentGroup, &Route) -> Option<UrlMatchResult> + Send + Sync>;

/// Context handed to a dynamic `redirect_to` function.
#[derive(Debug, Clone)]
pub struct RedirectContext {
    pub params: Params,
    pub data: Data,
    pub query_params: QueryParams,
    pub fragment: Option<String>,
    pub url: Vec<UrlSegment>,
    pub outlet: String,
    pub title: Option<String>,
}

/// Redirect target computed by a dynamic `redirect_to` function.
#[derive(Debug, Clone)]
pub enum RedirectResult {
    /// A path, interpreted like a static `redirect_to` string.
    Path(String),
    /// A full tree; always treated as an absolute redirect.
    Tree(UrlTree),
}

pub type RedirectFn =
    Arc<dyn Fn(RedirectContext) -> BoxFuture<'static, anyhow::Result<RedirectResult>> + Send + Sync>;

/// Declarative redirect rule.
#[derive(Clone)]
pub enum RedirectTo {
    /// Static target path; `:name` tokens copy matched positional segments,
    /// a leading `/` makes the redirect absolute.
    Path(String),
    /// Computed at match time from the redirect context.
    Dynamic(RedirectFn),
}

impl fmt::Debug for RedirectTo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RedirectTo::Path(p) => write!(f, "RedirectTo::Path({p:?})"),
            RedirectTo::Dynamic(_) => f.write_str("RedirectTo::Dynamic"),
        }
    }
}

/// Loader closure producing a lazily loaded child config.
pub type LoadChildrenFn =
    Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<Vec<Route>>> + Send + Sync>;

/// Loader closure producing a lazily loaded component token.
pub type LoadComponentFn =
    Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<ComponentType>> + Send + Sync>;

/// Route config shared across navigations. Reference identity of the `Arc`
/// is the reuse/equality key.
pub type Routes = Vec<Arc<Route>>;

/// One route definition.
#[derive(Clone, Default)]
pub struct Route {
    pub path: Option<String>,
    pub matcher: Option<UrlMatcher>,
    pub path_match: PathMatch,
    pub redirect_to: Option<RedirectTo>,
    pub outlet: Option<String>,
    pub component: Option<ComponentType>,
    pub load_component: Option<LoadComponentFn>,
    pub children: Option<Routes>,
    pub load_children: Option<LoadChildrenFn>,
    pub can_activate: Vec<Arc<dyn CanActivate>>,
    pub can_activate_child: Vec<Arc<dyn CanActivateChild>>,
    pub can_deactivate: Vec<Arc<dyn CanDeactivate>>,
    pub can_match: Vec<Arc<dyn CanMatch>>,
    pub can_load: Vec<Arc<dyn CanLoad>>,
    pub resolve: BTreeMap<String, Arc<dyn Resolve>>,
    pub data: Data,
    pub title: Option<String>,
    pub run_guards_and_resolvers: RunGuardsAndResolvers,
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("path", &self.path)
            .field("outlet", &self.outlet)
            .field("redirect_to", &self.redirect_to)
            .field("component", &self.component)
            .field("path_match", &self.path_match)
            .finish_non_exhaustive()
    }
}

impl Route {
    /// Route matching a path pattern like `team/:id` or `**`.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Route matched by a custom matcher instead of a path pattern.
    pub fn with_matcher(matcher: UrlMatcher) -> Self {
        Self {
            matcher: Some(matcher),
            ..Self::default()
        }
    }

    pub fn component(mut self, component: ComponentType) -> Self {
        self.component = Some(component);
        self
    }

    pub fn load_component(mut self, loader: LoadComponentFn) -> Self {
        self.load_component = Some(loader);
        self
    }

    pub fn children(mut self, children: Vec<Route>) -> Self {
        self.children = Some(children.into_iter().map(Arc::new).collect());
        self
    }

    pub fn load_children(mut self, loader: LoadChildrenFn) -> Self {
        self.load_children = Some(loader);
        self
    }

    pub fn redirect_to(mut self, target: impl Into<String>) -> Self {
        self.redirect_to = Some(RedirectTo::Path(target.into()));
        self
    }

    pub fn redirect_to_fn(mut self, redirect: RedirectFn) -> Self {
        self.redirect_to = Some(RedirectTo::Dynamic(redirect));
        self
    }

    /// Require the path to consume all remaining segments.
    pub fn full_match(mut self) -> Self {
        self.path_match = PathMatch::Full;
        self
    }

    pub fn outlet(mut self, name: impl Into<String>) -> Self {
        self.outlet = Some(name.into());
        self
    }

    pub fn can_activate(mut self, guard: Arc<dyn CanActivate>) -> Self {
        self.can_activate.push(guard);
        self
    }

    pub fn can_activate_child(mut self, guard: Arc<dyn CanActivateChild>) -> Self {
        self.can_activate_child.push(guard);
        self
    }

    pub fn can_deactivate(mut self, guard: Arc<dyn CanDeactivate>) -> Self {
        self.can_deactivate.push(guard);
        self
    }

    pub fn can_match(mut self, guard: Arc<dyn CanMatch>) -> Self {
        self.can_match.push(guard);
        self
    }

    pub fn can_load(mut self, guard: Arc<dyn CanLoad>) -> Self {
        self.can_load.push(guard);
        self
    }

    pub fn resolve(mut self, key: impl Into<String>, resolver: Arc<dyn Resolve>) -> Self {
        self.resolve.insert(key.into(), resolver);
        self
    }

    pub fn data_entry(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn run_guards_and_resolvers(mut self, mode: RunGuardsAndResolvers) -> Self {
        self.run_guards_and_resolvers = mode;
        self
    }

    /// Effective outlet name of this route.
    pub fn outlet_name(&self) -> &str {
        self.outlet.as_deref().unwrap_or(PRIMARY_OUTLET)
    }

    /// Path text for diagnostics; empty for matcher routes.
    pub fn path_text(&self) -> &str {
        self.path.as_deref().unwrap_or("")
    }

    pub fn is_wildcard(&self) -> bool {
        self.path.as_deref() == Some(WILDCARD_PATH)
    }

    /// Whether this route can ever produce child routes.
    pub fn has_child_config(&self) -> bool {
        self.children.is_some() || self.load_children.is_some()
    }
}

/// Wrap plainly built routes into the shared config representation.
pub fn as_routes(routes: Vec<Route>) -> Routes {
    routes.into_iter().map(Arc::new).collect()
}

/// Validate a config tree; run eagerly at construction and after each lazy
/// load.
pub fn validate_config(routes: &Routes) -> Result<(), RouterError> {
    for route in routes {
        validate_route(route)?;
        if let Some(children) = &route.children {
            validate_config(children)?;
        }
    }
    Ok(())
}

fn invalid(route: &Route, reason: &str) -> RouterError {
    RouterError::InvalidConfig {
        path: route.path_text().to_string(),
        reason: reason.to_string(),
    }
}

fn validate_route(route: &Route) -> Result<(), RouterError> {
    if route.redirect_to.is_some() && route.children.is_some() {
        return Err(invalid(route, "redirect_to and children cannot be used together"));
    }
    if route.redirect_to.is_some() && route.load_children.is_some() {
        return Err(invalid(route, "redirect_to and load_children cannot be used together"));
    }
    if route.redirect_to.is_some() && (route.component.is_some() || route.load_component.is_some())
    {
        return Err(invalid(route, "redirect_to and a component cannot be used together"));
    }
    if route.children.is_some() && route.load_children.is_some() {
        return Err(invalid(route, "children and load_children cannot be used together"));
    }
    if route.path.is_some() && route.matcher.is_some() {
        return Err(invalid(route, "path and matcher cannot be used together"));
    }
    if route.path.is_none() && route.matcher.is_none() {
        return Err(invalid(route, "one of path or matcher is required"));
    }
    if let Some(path) = &route.path {
        if path.starts_with('/') {
            return Err(invalid(route, "path cannot start with a slash"));
        }
        if path == WILDCARD_PATH && route.children.is_some() {
            return Err(invalid(route, "a wildcard route cannot have children"));
        }
    }
    if route.outlet.as_deref().is_some_and(|o| o != PRIMARY_OUTLET)
        && route.component.is_none()
        && route.load_component.is_none()
        && !route.has_child_config()
    {
        return Err(invalid(
            route,
            "a componentless route without children cannot have a named outlet",
        ));
    }
    if route.path.as_deref() == Some("")
        && route.redirect_to.is_some()
        && matches!(route.path_match, PathMatch::Prefix)
    {
        // Matches every URL and is a frequent source of redirect loops.
        tracing::warn!(
            "empty-path route with redirect_to and prefix matching matches all URLs; \
             consider path_match full"
        );
    }
    Ok(())
}
