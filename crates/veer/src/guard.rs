//! Guard and resolver interfaces
//!
//! Each guard kind is a single async capability trait. Plain async functions
//! are adapted through blanket impls, so the core pipeline only ever deals
//! with one calling convention.

use crate::config::{ComponentType, Route};
use crate::state::{ActivatedRouteSnapshot, RouterStateSnapshot};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use veer_url::{UrlSegment, UrlTree};

/// Guard verdict.
#[derive(Debug, Clone)]
pub enum GuardResult {
    /// Continue the navigation.
    Allow,
    /// Stop the navigation; it resolves `false`.
    Deny,
    /// Cancel the navigation and schedule a new one to the given target.
    Redirect(RedirectCommand),
}

impl GuardResult {
    pub fn is_allow(&self) -> bool {
        matches!(self, GuardResult::Allow)
    }
}

impl From<bool> for GuardResult {
    fn from(allowed: bool) -> Self {
        if allowed {
            GuardResult::Allow
        } else {
            GuardResult::Deny
        }
    }
}

impl From<UrlTree> for GuardResult {
    fn from(url: UrlTree) -> Self {
        GuardResult::Redirect(RedirectCommand::new(url))
    }
}

/// Redirect target returned by a guard or resolver.
#[derive(Debug, Clone)]
pub struct RedirectCommand {
    pub url: UrlTree,
    /// Replace the current history entry instead of pushing a new one.
    pub replace_url: bool,
}

impl RedirectCommand {
    pub fn new(url: UrlTree) -> Self {
        Self {
            url,
            replace_url: false,
        }
    }

    pub fn replacing(url: UrlTree) -> Self {
        Self {
            url,
            replace_url: true,
        }
    }
}

/// Result of a data resolver.
#[derive(Debug, Clone)]
pub enum ResolveResult {
    /// A value for the resolver's data key.
    Data(serde_json::Value),
    /// Cancel the navigation and redirect.
    Redirect(RedirectCommand),
    /// The resolver produced nothing; the navigation is cancelled with
    /// `NoDataFromResolver`.
    Empty,
}

/// Decides whether a route (and its subtree) may be activated.
#[async_trait]
pub trait CanActivate: Send + Sync {
    async fn can_activate(
        &self,
        route: Arc<ActivatedRouteSnapshot>,
        state: Arc<RouterStateSnapshot>,
    ) -> anyhow::Result<GuardResult>;
}

/// Decides whether children of a route may be activated.
#[async_trait]
pub trait CanActivateChild: Send + Sync {
    async fn can_activate_child(
        &self,
        child: Arc<ActivatedRouteSnapshot>,
        state: Arc<RouterStateSnapshot>,
    ) -> anyhow::Result<GuardResult>;
}

/// Decides whether the current route may be left.
#[async_trait]
pub trait CanDeactivate: Send + Sync {
    async fn can_deactivate(
        &self,
        component: Option<ComponentType>,
        route: Arc<ActivatedRouteSnapshot>,
        current_state: Arc<RouterStateSnapshot>,
        future_state: Arc<RouterStateSnapshot>,
    ) -> anyhow::Result<GuardResult>;
}

/// Decides whether a route config may structurally match at all. A denial
/// skips the candidate instead of failing the navigation.
#[async_trait]
pub trait CanMatch: Send + Sync {
    async fn can_match(
        &self,
        route: Arc<Route>,
        segments: Vec<UrlSegment>,
    ) -> anyhow::Result<GuardResult>;
}

/// Decides whether a lazy child config may be loaded.
#[async_trait]
pub trait CanLoad: Send + Sync {
    async fn can_load(
        &self,
        route: Arc<Route>,
        segments: Vec<UrlSegment>,
    ) -> anyhow::Result<GuardResult>;
}

/// Produces one data value for a route before it activates.
#[async_trait]
pub trait Resolve: Send + Sync {
    async fn resolve(
        &self,
        route: Arc<ActivatedRouteSnapshot>,
        state: Arc<RouterStateSnapshot>,
    ) -> anyhow::Result<ResolveResult>;
}

// Function-style guards: adapted once, here, into the capability traits.

#[async_trait]
impl<F, Fut> CanActivate for F
where
    F: Fn(Arc<ActivatedRouteSnapshot>, Arc<RouterStateSnapshot>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<GuardResult>> + Send + 'static,
{
    async fn can_activate(
        &self,
        route: Arc<ActivatedRouteSnapshot>,
        state: Arc<RouterStateSnapshot>,
    ) -> anyhow::Result<GuardResult> {
        self(route, state).await
    }
}

#[async_trait]
impl<F, Fut> CanActivateChild for F
where
    F: Fn(Arc<ActivatedRouteSnapshot>, Arc<RouterStateSnapshot>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<GuardResult>> + Send + 'static,
{
    async fn can_activate_child(
        &self,
        child: Arc<ActivatedRouteSnapshot>,
        state: Arc<RouterStateSnapshot>,
    ) -> anyhow::Result<GuardResult> {
        self(child, state).await
    }
}

#[async_trait]
impl<F, Fut> CanMatch for F
where
    F: Fn(Arc<Route>, Vec<UrlSegment>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<GuardResult>> + Send + 'static,
{
    async fn can_match(
        &self,
        route: Arc<Route>,
        segments: Vec<UrlSegment>,
    ) -> anyhow::Result<GuardResult> {
        self(route, segments).await
    }
}

#[async_trait]
impl<F, Fut> CanLoad for F
where
    F: Fn(Arc<Route>, Vec<UrlSegment>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<GuardResult>> + Send + 'static,
{
    async fn can_load(
        &self,
        route: Arc<Route>,
        segments: Vec<UrlSegment>,
    ) -> anyhow::Result<GuardResult> {
        self(route, segments).await
    }
}

#[async_trait]
impl<F, Fut> Resolve for F
where
    F: Fn(Arc<ActivatedRouteSnapshot>, Arc<RouterStateSnapshot>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<ResolveResult>> + Send + 'static,
{
    async fn resolve(
        &self,
        route: Arc<ActivatedRouteSnapshot>,
        state: Arc<RouterStateSnapshot>,
    ) -> anyhow::Result<ResolveResult> {
        self(route, state).await
    }
}
