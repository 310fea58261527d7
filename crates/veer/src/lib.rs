//! # Veer
//!
//! A client-side navigation engine: URL-driven view state for single-page
//! applications, independent of any rendering layer.
//!
//! ## Features
//!
//! - **URL trees** - structured URLs with matrix params, named outlets,
//!   query params and fragments (via [`veer_url`])
//! - **Route configuration** - nested routes, positional params, wildcards,
//!   custom matchers, redirects and lazy-loaded children
//! - **Guards** - `can_activate`, `can_activate_child`, `can_deactivate`,
//!   `can_match` and `can_load`, with allow/deny/redirect verdicts
//! - **Resolvers** - per-key async data resolution before activation
//! - **Route reuse** - pluggable strategy deciding what survives a
//!   navigation, including detach/re-attach of live subtrees
//! - **Cancellable navigations** - a newer request supersedes an in-flight
//!   one at every stage boundary
//! - **Event stream** - ordered lifecycle events per navigation
//!
//! ## Quick start
//!
//! ```
//! use veer::{ComponentType, NavigationExtras, Route, Router};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), veer::RouterError> {
//! let router = Router::builder(vec![
//!     Route::new("").redirect_to("/dashboard").full_match(),
//!     Route::new("dashboard").component(ComponentType::new("Dashboard")),
//!     Route::new("team/:id").component(ComponentType::new("Team")),
//! ])
//! .build()?;
//!
//! let committed = router
//!     .navigate_by_url("/team/33", NavigationExtras::default())
//!     .await?;
//! assert!(committed);
//! assert_eq!(router.url().await, "/team/33");
//! # Ok(())
//! # }
//! ```
//!
//! ## Pipeline
//!
//! Each navigation runs through redirect resolution, recognition, guard
//! checks, data resolution, component loading and finally reconciliation and
//! activation of the live state. Any stage can cancel; the [`Router`] emits
//! an [`Event`] at every boundary.

mod activate;
mod checks;
mod config;
mod create_url_tree;
mod errors;
mod events;
mod guard;
mod loader;
mod location;
mod matching;
mod outlet;
mod recognize;
mod reconcile;
mod redirects;
mod resolve_data;
mod reuse;
mod router;
mod state;
mod tree;

pub use config::{
    as_routes, validate_config, ComponentType, Data, LoadChildrenFn, LoadComponentFn, PathMatch,
    RedirectContext, RedirectFn, RedirectResult, RedirectTo, Route, Routes, RunGuardsAndResolvers,
    UrlMatchResult, UrlMatcher, WILDCARD_PATH,
};
pub use create_url_tree::{commands, Command};
pub use errors::{NavigationCancellationCode, RouterError, MAX_ABSOLUTE_REDIRECTS};
pub use events::Event;
pub use guard::{
    CanActivate, CanActivateChild, CanDeactivate, CanLoad, CanMatch, GuardResult, RedirectCommand,
    Resolve, ResolveResult,
};
pub use location::{Location, LocationChange, MemoryLocation};
pub use outlet::{AttachedRef, ChildrenOutletContexts, OutletContext, OutletHandle};
pub use reuse::{BaseRouteReuseStrategy, DetachedRouteHandle, RouteReuseStrategy};
pub use router::{
    NavigationErrorAction, NavigationErrorHandler, NavigationExtras, OnSameUrlNavigation,
    QueryParamsHandling, Router, RouterBuilder,
};
pub use state::{
    ActivatedRoute, ActivatedRouteSnapshot, ParamsInheritanceStrategy, RouterState,
    RouterStateSnapshot,
};

pub use veer_url::{
    contains_tree, DefaultUrlSerializer, IsActiveMatchOptions, Params, ParseError, QueryParams,
    QueryValue, UrlSegment, UrlSegmentGroup, UrlSerializer, UrlTree, PRIMARY_OUTLET,
};
