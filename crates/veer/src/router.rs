//! Navigation orchestrator
//!
//! [`Router`] owns the route configuration and the live state, and drives
//! each navigation through the full pipeline: redirect resolution,
//! recognition, guards, resolvers, component loading, reconciliation and
//! activation. Navigations are cancellable at every stage boundary; a newer
//! request supersedes any in-flight one, and a guard's redirect verdict
//! cancels the current navigation and schedules a follow-up.

use crate::activate::ActivateRoutes;
use crate::checks::{check_guards, get_all_route_guards};
use crate::config::{as_routes, validate_config, ComponentType, Route, Routes};
use crate::create_url_tree::{create_url_tree, Command};
use crate::errors::{
    NavigationCancellationCode, RouterError, MAX_ABSOLUTE_REDIRECTS,
};
use crate::events::{Event, EventSink};
use crate::guard::{GuardResult, RedirectCommand};
use crate::loader::RouterConfigLoader;
use crate::location::{Location, MemoryLocation};
use crate::outlet::ChildrenOutletContexts;
use crate::recognize::recognize;
use crate::reconcile::create_router_state;
use crate::redirects::apply_redirects;
use crate::resolve_data::resolve_data;
use crate::reuse::{BaseRouteReuseStrategy, RouteReuseStrategy};
use crate::state::{
    ActivatedRouteSnapshot, ParamsInheritanceStrategy, RouterState, RouterStateSnapshot,
};
use crate::tree::TreeNode;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};
use veer_url::{
    contains_tree, DefaultUrlSerializer, IsActiveMatchOptions, QueryParams, UrlSerializer, UrlTree,
};

/// What to do when a navigation targets the URL the router is already at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnSameUrlNavigation {
    /// Resolve to `false` without running the pipeline.
    #[default]
    Ignore,
    /// Run the full pipeline again.
    Reload,
}

/// How query params from [`NavigationExtras`] combine with the current ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryParamsHandling {
    /// Use only the supplied query params.
    #[default]
    Replace,
    /// Current params overlaid with the supplied ones.
    Merge,
    /// Keep the current params, ignoring the supplied ones.
    Preserve,
}

/// Per-navigation options.
#[derive(Clone, Default)]
pub struct NavigationExtras {
    /// Anchor for relative commands; defaults to the state root.
    pub relative_to: Option<Arc<ActivatedRouteSnapshot>>,
    pub query_params: Option<QueryParams>,
    pub fragment: Option<String>,
    pub query_params_handling: QueryParamsHandling,
    /// Keep the current fragment instead of `fragment`.
    pub preserve_fragment: bool,
    /// Commit without touching the history stack.
    pub skip_location_change: bool,
    /// Replace the current history entry instead of pushing.
    pub replace_url: bool,
    /// Opaque state stored with the history entry.
    pub state: Option<serde_json::Value>,
    /// Overrides the router-wide same-URL policy for this navigation.
    pub on_same_url_navigation: Option<OnSameUrlNavigation>,
}

/// Disposition returned by a [`NavigationErrorHandler`].
pub enum NavigationErrorAction {
    /// Let the error propagate to the caller.
    Fail,
    /// Swallow the error and navigate to the given target instead.
    Redirect(RedirectCommand),
}

/// Hook consulted when a navigation fails with a hard (non-cancellation)
/// error, after the `NavigationError` event was emitted.
pub type NavigationErrorHandler =
    Arc<dyn Fn(&RouterError) -> NavigationErrorAction + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NavigationSource {
    /// `navigate`/`navigate_by_url` call.
    Imperative,
    /// History change reported by the location; the URL is already current.
    Popstate,
}

enum PipelineOutcome {
    Committed { url_after_redirects: String },
    Redirected(RedirectCommand),
}

struct RouterInner {
    /// URL tree after redirects, matching the committed state.
    current_url_tree: UrlTree,
    /// URL tree as requested, before redirects.
    raw_url_tree: UrlTree,
    state: RouterState,
}

/// The navigation engine.
pub struct Router {
    config: Routes,
    root_component: Option<ComponentType>,
    serializer: Arc<dyn UrlSerializer>,
    location: Arc<dyn Location>,
    reuse: Arc<dyn RouteReuseStrategy>,
    params_strategy: ParamsInheritanceStrategy,
    on_same_url_navigation: OnSameUrlNavigation,
    error_handler: Option<NavigationErrorHandler>,
    loader: RouterConfigLoader,
    contexts: ChildrenOutletContexts,
    events: EventSink,
    inner: Mutex<RouterInner>,
    /// Id of the most recently requested navigation; an in-flight navigation
    /// with a smaller id is superseded.
    navigation_counter: AtomicU64,
    /// Id of the navigation [`Router::abort`] was last called for; 0 = none.
    abort_tx: watch::Sender<u64>,
    /// Set once a navigation has committed; the same-URL skip only applies
    /// after that.
    navigated: AtomicBool,
}

impl Router {
    pub fn builder(routes: Vec<Route>) -> RouterBuilder {
        RouterBuilder::new(routes)
    }

    /// Subscribe to the navigation event stream.
    pub fn events(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Root contexts the rendering layer registers its outlets into.
    pub fn root_contexts(&self) -> &ChildrenOutletContexts {
        &self.contexts
    }

    pub fn parse_url(&self, url: &str) -> Result<UrlTree, RouterError> {
        Ok(self.serializer.parse(url)?)
    }

    pub fn serialize_url(&self, tree: &UrlTree) -> String {
        self.serializer.serialize(tree)
    }

    /// URL tree of the last committed navigation, after redirects.
    pub async fn current_url_tree(&self) -> UrlTree {
        self.inner.lock().await.current_url_tree.clone()
    }

    /// Serialized current URL.
    pub async fn url(&self) -> String {
        let inner = self.inner.lock().await;
        self.serializer.serialize(&inner.current_url_tree)
    }

    pub async fn state(&self) -> RouterState {
        self.inner.lock().await.state.clone()
    }

    pub async fn state_snapshot(&self) -> Arc<RouterStateSnapshot> {
        self.inner.lock().await.state.snapshot.clone()
    }

    /// Whether `url` is contained in the current URL per `options`.
    pub async fn is_active(&self, url: &UrlTree, options: &IsActiveMatchOptions) -> bool {
        let inner = self.inner.lock().await;
        contains_tree(&inner.current_url_tree, url, options)
    }

    /// Navigate to a command list anchored per `extras.relative_to`.
    ///
    /// Resolves to `true` when the navigation committed and `false` when it
    /// was cancelled (guard denial, supersession, same-URL skip).
    pub async fn navigate(
        &self,
        commands: Vec<Command>,
        extras: NavigationExtras,
    ) -> Result<bool, RouterError> {
        let tree = self.url_tree_for(&commands, &extras).await?;
        self.navigate_recursive(tree, extras, NavigationSource::Imperative, 0)
            .await
    }

    /// Navigate to an absolute URL string.
    pub async fn navigate_by_url(
        &self,
        url: &str,
        extras: NavigationExtras,
    ) -> Result<bool, RouterError> {
        let tree = self.serializer.parse(url)?;
        self.navigate_recursive(tree, extras, NavigationSource::Imperative, 0)
            .await
    }

    /// Navigate to a URL tree built elsewhere, e.g. by [`Router::create_url_tree`].
    pub async fn navigate_by_url_tree(
        &self,
        tree: UrlTree,
        extras: NavigationExtras,
    ) -> Result<bool, RouterError> {
        self.navigate_recursive(tree, extras, NavigationSource::Imperative, 0)
            .await
    }

    /// Navigate to whatever URL the location currently reports.
    pub async fn initial_navigation(&self) -> Result<bool, RouterError> {
        let path = self.location.path();
        let tree = self.serializer.parse(&path)?;
        self.navigate_recursive(tree, NavigationExtras::default(), NavigationSource::Popstate, 0)
            .await
    }

    /// Build the URL tree a `navigate` call with these arguments would target,
    /// without navigating.
    pub async fn create_url_tree(
        &self,
        commands: &[Command],
        extras: &NavigationExtras,
    ) -> Result<UrlTree, RouterError> {
        self.url_tree_for(commands, extras).await
    }

    /// Follow location changes (back/forward) with navigations for as long as
    /// the location's change stream stays open.
    pub fn listen(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let router = Arc::clone(self);
        tokio::spawn(async move {
            let mut changes = router.location.subscribe();
            loop {
                let change = match changes.recv().await {
                    Ok(change) => change,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let tree = match router.serializer.parse(&change.path) {
                    Ok(tree) => tree,
                    Err(err) => {
                        tracing::warn!(path = change.path, %err, "ignoring unparseable location change");
                        continue;
                    }
                };
                if let Err(err) = router
                    .navigate_recursive(
                        tree,
                        NavigationExtras::default(),
                        NavigationSource::Popstate,
                        0,
                    )
                    .await
                {
                    tracing::warn!(path = change.path, %err, "location-change navigation failed");
                }
            }
        })
    }

    /// Abort the in-flight navigation, if any.
    ///
    /// The navigation resolves `false` with the `Aborted` cancellation code;
    /// a stage awaiting a guard or resolver stops awaiting it. Committed
    /// navigations are unaffected.
    pub fn abort(&self) {
        let in_flight = self.navigation_counter.load(Ordering::SeqCst);
        self.abort_tx.send_replace(in_flight);
    }

    /// Resolves when navigation `id` is aborted; pends forever otherwise.
    async fn wait_for_abort(&self, id: u64) {
        let mut rx = self.abort_tx.subscribe();
        loop {
            if *rx.borrow_and_update() == id {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Run one pipeline stage, racing it against an abort of navigation `id`.
    async fn abortable<T>(
        &self,
        id: u64,
        stage: impl std::future::Future<Output = Result<T, RouterError>>,
    ) -> Result<T, RouterError> {
        tokio::select! {
            result = stage => result,
            _ = self.wait_for_abort(id) => Err(Self::aborted(id)),
        }
    }

    fn aborted(id: u64) -> RouterError {
        RouterError::cancelled(
            format!("navigation {id} aborted"),
            NavigationCancellationCode::Aborted,
        )
    }

    async fn url_tree_for(
        &self,
        commands: &[Command],
        extras: &NavigationExtras,
    ) -> Result<UrlTree, RouterError> {
        let (snapshot, current_tree) = {
            let inner = self.inner.lock().await;
            (inner.state.snapshot.clone(), inner.current_url_tree.clone())
        };
        let anchor = extras
            .relative_to
            .clone()
            .unwrap_or_else(|| snapshot.root());

        let query_params = match extras.query_params_handling {
            QueryParamsHandling::Replace => extras.query_params.clone().unwrap_or_default(),
            QueryParamsHandling::Preserve => current_tree.query_params.clone(),
            QueryParamsHandling::Merge => {
                let mut merged = current_tree.query_params.clone();
                merged.extend(extras.query_params.clone().unwrap_or_default());
                merged
            }
        };
        let fragment = if extras.preserve_fragment {
            current_tree.fragment.clone()
        } else {
            extras.fragment.clone()
        };

        create_url_tree(&anchor, &snapshot, commands, query_params, fragment)
    }

    fn navigate_recursive(
        &self,
        raw: UrlTree,
        extras: NavigationExtras,
        source: NavigationSource,
        redirect_depth: usize,
    ) -> BoxFuture<'_, Result<bool, RouterError>> {
        async move {
            let url = self.serializer.serialize(&raw);

            if source == NavigationSource::Imperative && self.navigated.load(Ordering::SeqCst) {
                let same_url = {
                    let inner = self.inner.lock().await;
                    self.serializer.serialize(&inner.raw_url_tree) == url
                };
                let policy = extras
                    .on_same_url_navigation
                    .unwrap_or(self.on_same_url_navigation);
                if same_url && policy == OnSameUrlNavigation::Ignore {
                    return Ok(false);
                }
            }

            let id = self.navigation_counter.fetch_add(1, Ordering::SeqCst) + 1;
            self.events.emit(Event::NavigationStart {
                id,
                url: url.clone(),
            });

            match self.run_pipeline(id, &raw, &url, &extras, source).await {
                Ok(PipelineOutcome::Committed { url_after_redirects }) => {
                    self.events.emit(Event::NavigationEnd {
                        id,
                        url,
                        url_after_redirects,
                    });
                    Ok(true)
                }
                Ok(PipelineOutcome::Redirected(command)) => {
                    let target = self.serializer.serialize(&command.url);
                    self.events.emit(Event::NavigationCancel {
                        id,
                        url,
                        reason: format!("a guard requested a redirect to '{target}'"),
                        code: NavigationCancellationCode::Redirect,
                    });
                    if redirect_depth + 1 >= MAX_ABSOLUTE_REDIRECTS {
                        return Err(RouterError::InfiniteRedirect { url: target });
                    }
                    let follow_up = NavigationExtras {
                        skip_location_change: extras.skip_location_change,
                        replace_url: extras.replace_url || command.replace_url,
                        ..NavigationExtras::default()
                    };
                    self.navigate_recursive(command.url, follow_up, source, redirect_depth + 1)
                        .await
                }
                Err(err) => match err.cancellation_code() {
                    Some(code) => {
                        self.events.emit(Event::NavigationCancel {
                            id,
                            url,
                            reason: err.to_string(),
                            code,
                        });
                        Ok(false)
                    }
                    None => {
                        self.events.emit(Event::NavigationError {
                            id,
                            url,
                            error: err.to_string(),
                        });
                        if source == NavigationSource::Popstate {
                            // The location already shows the failed target;
                            // move it back to the committed URL.
                            let current = self.url().await;
                            self.location.replace_state(&current, None);
                        }
                        if let Some(handler) = &self.error_handler {
                            if let NavigationErrorAction::Redirect(command) = handler(&err) {
                                if redirect_depth + 1 < MAX_ABSOLUTE_REDIRECTS {
                                    let follow_up = NavigationExtras {
                                        replace_url: command.replace_url,
                                        ..NavigationExtras::default()
                                    };
                                    return self
                                        .navigate_recursive(
                                            command.url,
                                            follow_up,
                                            NavigationSource::Imperative,
                                            redirect_depth + 1,
                                        )
                                        .await;
                                }
                            }
                        }
                        Err(err)
                    }
                },
            }
        }
        .boxed()
    }

    async fn run_pipeline(
        &self,
        id: u64,
        raw: &UrlTree,
        url: &str,
        extras: &NavigationExtras,
        source: NavigationSource,
    ) -> Result<PipelineOutcome, RouterError> {
        let target = self
            .abortable(id, apply_redirects(&self.loader, &self.events, id, &self.config, raw))
            .await?;
        self.check_stale(id)?;
        let url_after_redirects = self.serializer.serialize(&target);

        let future = Arc::new(
            self.abortable(
                id,
                recognize(
                    &self.loader,
                    &self.events,
                    id,
                    self.root_component,
                    &self.config,
                    &target,
                    &url_after_redirects,
                    self.params_strategy,
                ),
            )
            .await?,
        );
        self.events.emit(Event::RoutesRecognized {
            id,
            url: url.to_string(),
            url_after_redirects: url_after_redirects.clone(),
        });
        self.check_stale(id)?;

        let curr_snapshot = self.inner.lock().await.state.snapshot.clone();

        self.events.emit(Event::GuardsCheckStart {
            id,
            url: url.to_string(),
            url_after_redirects: url_after_redirects.clone(),
        });
        let checks = get_all_route_guards(&future, &curr_snapshot, &self.contexts);
        let verdict = self
            .abortable(
                id,
                check_guards(&self.events, id, &checks, &future, &curr_snapshot),
            )
            .await?;
        self.events.emit(Event::GuardsCheckEnd {
            id,
            url: url.to_string(),
            url_after_redirects: url_after_redirects.clone(),
            should_activate: verdict.is_allow(),
        });
        match verdict {
            GuardResult::Allow => {}
            GuardResult::Deny => {
                return Err(RouterError::cancelled(
                    "a guard rejected the navigation",
                    NavigationCancellationCode::GuardRejected,
                ));
            }
            GuardResult::Redirect(command) => {
                return Ok(PipelineOutcome::Redirected(command));
            }
        }
        self.check_stale(id)?;

        self.events.emit(Event::ResolveStart {
            id,
            url: url.to_string(),
            url_after_redirects: url_after_redirects.clone(),
        });
        if let Some(command) = self
            .abortable(id, resolve_data(self.params_strategy, &checks, &future))
            .await?
        {
            return Ok(PipelineOutcome::Redirected(command));
        }
        self.events.emit(Event::ResolveEnd {
            id,
            url: url.to_string(),
            url_after_redirects: url_after_redirects.clone(),
        });
        self.check_stale(id)?;

        self.load_components(id, &future).await?;
        self.check_stale(id)?;

        // Commit under the state lock; a navigation that went stale while
        // waiting for the lock must not activate.
        let mut inner = self.inner.lock().await;
        self.check_stale(id)?;

        let new_state =
            create_router_state(self.reuse.as_ref(), future.clone(), Some(&inner.state))?;
        let activation = ActivateRoutes {
            strategy: self.reuse.as_ref(),
            events: &self.events,
            navigation_id: id,
        };
        activation
            .activate(&new_state, Some(&inner.state), &self.contexts)
            .await?;

        inner.state = new_state;
        inner.current_url_tree = target;
        inner.raw_url_tree = raw.clone();
        self.navigated.store(true, Ordering::SeqCst);

        if !extras.skip_location_change {
            match source {
                NavigationSource::Imperative => {
                    if extras.replace_url {
                        self.location
                            .replace_state(&url_after_redirects, extras.state.clone());
                    } else {
                        self.location.go(&url_after_redirects, extras.state.clone());
                    }
                }
                NavigationSource::Popstate => {
                    // The history entry already exists; only correct it when
                    // redirects moved the URL away from what it shows.
                    if self.location.path() != url_after_redirects {
                        self.location
                            .replace_state(&url_after_redirects, extras.state.clone());
                    }
                }
            }
        }

        Ok(PipelineOutcome::Committed { url_after_redirects })
    }

    /// Load the component of every route that still needs one.
    async fn load_components(
        &self,
        id: u64,
        state: &RouterStateSnapshot,
    ) -> Result<(), RouterError> {
        let mut stack: Vec<&TreeNode<Arc<ActivatedRouteSnapshot>>> = vec![&state.tree.root];
        while let Some(node) = stack.pop() {
            stack.extend(node.children.iter());
            let snapshot = &node.value;
            if snapshot.component().is_some() {
                continue;
            }
            let Some(config) = &snapshot.route_config else {
                continue;
            };
            if config.component.is_none() && config.load_component.is_none() {
                continue;
            }
            let component = self.loader.component(&self.events, id, config).await?;
            snapshot.stamp_component(component);
        }
        Ok(())
    }

    fn check_stale(&self, id: u64) -> Result<(), RouterError> {
        if *self.abort_tx.borrow() == id {
            return Err(Self::aborted(id));
        }
        let latest = self.navigation_counter.load(Ordering::SeqCst);
        if latest != id {
            return Err(RouterError::cancelled(
                format!("navigation {id} superseded by navigation {latest}"),
                NavigationCancellationCode::SupersededByNewNavigation,
            ));
        }
        Ok(())
    }
}

/// Builds a [`Router`] from a route configuration.
pub struct RouterBuilder {
    routes: Vec<Route>,
    root_component: Option<ComponentType>,
    serializer: Arc<dyn UrlSerializer>,
    location: Arc<dyn Location>,
    reuse: Arc<dyn RouteReuseStrategy>,
    params_strategy: ParamsInheritanceStrategy,
    on_same_url_navigation: OnSameUrlNavigation,
    error_handler: Option<NavigationErrorHandler>,
}

impl RouterBuilder {
    pub fn new(routes: Vec<Route>) -> Self {
        Self {
            routes,
            root_component: None,
            serializer: Arc::new(DefaultUrlSerializer),
            location: Arc::new(MemoryLocation::default()),
            reuse: Arc::new(BaseRouteReuseStrategy),
            params_strategy: ParamsInheritanceStrategy::default(),
            on_same_url_navigation: OnSameUrlNavigation::default(),
            error_handler: None,
        }
    }

    /// Component rendered at the state root.
    pub fn root_component(mut self, component: ComponentType) -> Self {
        self.root_component = Some(component);
        self
    }

    pub fn serializer(mut self, serializer: Arc<dyn UrlSerializer>) -> Self {
        self.serializer = serializer;
        self
    }

    pub fn location(mut self, location: Arc<dyn Location>) -> Self {
        self.location = location;
        self
    }

    pub fn reuse_strategy(mut self, strategy: Arc<dyn RouteReuseStrategy>) -> Self {
        self.reuse = strategy;
        self
    }

    pub fn params_inheritance(mut self, strategy: ParamsInheritanceStrategy) -> Self {
        self.params_strategy = strategy;
        self
    }

    pub fn on_same_url_navigation(mut self, policy: OnSameUrlNavigation) -> Self {
        self.on_same_url_navigation = policy;
        self
    }

    /// Consulted when a navigation fails with a hard error; may convert the
    /// failure into a redirect navigation.
    pub fn error_handler(mut self, handler: NavigationErrorHandler) -> Self {
        self.error_handler = Some(handler);
        self
    }

    /// Validate the configuration and assemble the router.
    pub fn build(self) -> Result<Arc<Router>, RouterError> {
        let config = as_routes(self.routes);
        validate_config(&config)?;
        Ok(Arc::new(Router {
            config,
            root_component: self.root_component,
            serializer: self.serializer,
            location: self.location,
            reuse: self.reuse,
            params_strategy: self.params_strategy,
            on_same_url_navigation: self.on_same_url_navigation,
            error_handler: self.error_handler,
            loader: RouterConfigLoader::new(),
            contexts: ChildrenOutletContexts::default(),
            events: EventSink::new(),
            inner: Mutex::new(RouterInner {
                current_url_tree: UrlTree::empty(),
                raw_url_tree: UrlTree::empty(),
                state: RouterState::empty(self.root_component),
            }),
            navigation_counter: AtomicU64::new(0),
            abort_tx: watch::Sender::new(0),
            navigated: AtomicBool::new(false),
        }))
    }
}
