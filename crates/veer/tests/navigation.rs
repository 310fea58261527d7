//! End-to-end navigation tests
//!
//! Each test drives a full navigation through the router: redirects,
//! recognition, guards, resolvers, reconciliation and activation, asserting
//! on the committed URL, the live state and the event stream.

use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use veer::{
    commands, ActivatedRouteSnapshot, ComponentType, DefaultUrlSerializer, Event, GuardResult,
    IsActiveMatchOptions, NavigationCancellationCode, NavigationExtras, RedirectCommand,
    ResolveResult, Route, Router, RouterError, RouterStateSnapshot, UrlSerializer,
};

const DASHBOARD: ComponentType = ComponentType::new("Dashboard");
const TEAM: ComponentType = ComponentType::new("Team");
const USER: ComponentType = ComponentType::new("User");
const LOGIN: ComponentType = ComponentType::new("Login");
const ADMIN: ComponentType = ComponentType::new("Admin");
const NOT_FOUND: ComponentType = ComponentType::new("NotFound");
const CHAT: ComponentType = ComponentType::new("Chat");

fn base_routes() -> Vec<Route> {
    vec![
        Route::new("").redirect_to("/dashboard").full_match(),
        Route::new("dashboard").component(DASHBOARD),
        Route::new("team/:id").component(TEAM).children(vec![
            Route::new("user/:name").component(USER),
            Route::new("chat").component(CHAT).outlet("right"),
        ]),
        Route::new("**").component(NOT_FOUND),
    ]
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn event_name(event: &Event) -> &'static str {
    match event {
        Event::NavigationStart { .. } => "NavigationStart",
        Event::RouteConfigLoadStart { .. } => "RouteConfigLoadStart",
        Event::RouteConfigLoadEnd { .. } => "RouteConfigLoadEnd",
        Event::RoutesRecognized { .. } => "RoutesRecognized",
        Event::GuardsCheckStart { .. } => "GuardsCheckStart",
        Event::ChildActivationStart { .. } => "ChildActivationStart",
        Event::ActivationStart { .. } => "ActivationStart",
        Event::GuardsCheckEnd { .. } => "GuardsCheckEnd",
        Event::ResolveStart { .. } => "ResolveStart",
        Event::ResolveEnd { .. } => "ResolveEnd",
        Event::ActivationEnd { .. } => "ActivationEnd",
        Event::ChildActivationEnd { .. } => "ChildActivationEnd",
        Event::NavigationEnd { .. } => "NavigationEnd",
        Event::NavigationCancel { .. } => "NavigationCancel",
        Event::NavigationError { .. } => "NavigationError",
    }
}

// ============================================================================
// Recognition and state
// ============================================================================

#[tokio::test]
async fn test_navigation_builds_param_tree() {
    let router = Router::builder(base_routes()).build().unwrap();
    assert!(router
        .navigate_by_url("/team/33/user/victor", NavigationExtras::default())
        .await
        .unwrap());

    let state = router.state().await;
    let team = state.first_child(&state.root()).unwrap();
    let user = state.first_child(&team).unwrap();
    assert_eq!(team.snapshot().param("id"), Some("33"));
    assert_eq!(team.component(), Some(TEAM));
    assert_eq!(user.snapshot().param("name"), Some("victor"));
    assert_eq!(user.component(), Some(USER));
}

#[tokio::test]
async fn test_named_outlet_navigation() {
    let router = Router::builder(base_routes()).build().unwrap();
    assert!(router
        .navigate_by_url(
            "/team/33/(user/victor//right:chat)",
            NavigationExtras::default()
        )
        .await
        .unwrap());

    let state = router.state().await;
    let team = state.first_child(&state.root()).unwrap();
    let children = state.children(&team);
    assert_eq!(children.len(), 2);
    assert_eq!(children[0].snapshot().outlet, "primary");
    assert_eq!(children[1].snapshot().outlet, "right");
    assert_eq!(children[1].component(), Some(CHAT));
}

#[tokio::test]
async fn test_wildcard_catches_unmatched_urls() {
    let router = Router::builder(base_routes()).build().unwrap();
    assert!(router
        .navigate_by_url("/no/such/page", NavigationExtras::default())
        .await
        .unwrap());

    let state = router.state().await;
    let node = state.first_child(&state.root()).unwrap();
    assert_eq!(node.component(), Some(NOT_FOUND));
    assert_eq!(router.url().await, "/no/such/page");
}

// ============================================================================
// Redirects
// ============================================================================

#[tokio::test]
async fn test_empty_path_redirect() {
    let router = Router::builder(base_routes()).build().unwrap();
    assert!(router
        .navigate_by_url("/", NavigationExtras::default())
        .await
        .unwrap());
    assert_eq!(router.url().await, "/dashboard");

    let state = router.state().await;
    let node = state.first_child(&state.root()).unwrap();
    assert_eq!(node.component(), Some(DASHBOARD));
}

#[tokio::test]
async fn test_redirect_loop_is_detected() {
    let router = Router::builder(vec![
        Route::new("a").redirect_to("/b"),
        Route::new("b").redirect_to("/a"),
    ])
    .build()
    .unwrap();

    let err = router
        .navigate_by_url("/a", NavigationExtras::default())
        .await
        .unwrap_err();
    assert!(matches!(err, RouterError::InfiniteRedirect { .. }));
}

// ============================================================================
// Guards
// ============================================================================

#[tokio::test]
async fn test_guard_redirect_cancels_and_follows_up() {
    let login_url = DefaultUrlSerializer.parse("/login").unwrap();
    let router = Router::builder(vec![
        Route::new("dashboard").component(DASHBOARD),
        Route::new("login").component(LOGIN),
        Route::new("admin").component(ADMIN).can_activate(Arc::new({
            let login_url = login_url.clone();
            move |_route: Arc<ActivatedRouteSnapshot>, _state: Arc<RouterStateSnapshot>| {
                let login_url = login_url.clone();
                async move { Ok(GuardResult::Redirect(RedirectCommand::new(login_url))) }
            }
        })),
    ])
    .build()
    .unwrap();
    let mut events = router.events();

    let committed = router
        .navigate_by_url("/admin", NavigationExtras::default())
        .await
        .unwrap();
    // The original navigation is cancelled; the follow-up to /login commits.
    assert!(committed);
    assert_eq!(router.url().await, "/login");

    let events = drain(&mut events);
    let cancel = events
        .iter()
        .find_map(|event| match event {
            Event::NavigationCancel { url, code, .. } => Some((url.clone(), *code)),
            _ => None,
        })
        .unwrap();
    assert_eq!(cancel.0, "/admin");
    assert_eq!(cancel.1, NavigationCancellationCode::Redirect);
    assert!(events
        .iter()
        .any(|event| matches!(event, Event::NavigationEnd { url, .. } if url == "/login")));
}

#[tokio::test]
async fn test_superseding_navigation_cancels_in_flight_one() {
    init_tracing();
    let router = Router::builder(vec![
        Route::new("slow").component(ADMIN).can_activate(Arc::new(
            |_route: Arc<ActivatedRouteSnapshot>, _state: Arc<RouterStateSnapshot>| async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(GuardResult::Allow)
            },
        )),
        Route::new("fast").component(DASHBOARD),
    ])
    .build()
    .unwrap();

    let slow = {
        let router = router.clone();
        tokio::spawn(async move {
            router
                .navigate_by_url("/slow", NavigationExtras::default())
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(router
        .navigate_by_url("/fast", NavigationExtras::default())
        .await
        .unwrap());

    let slow = slow.await.unwrap().unwrap();
    assert!(!slow);
    assert_eq!(router.url().await, "/fast");
}

// ============================================================================
// Resolvers
// ============================================================================

#[tokio::test]
async fn test_resolver_data_lands_in_snapshot() {
    let router = Router::builder(vec![Route::new("user/:name").component(USER).resolve(
        "profile",
        Arc::new(
            |route: Arc<ActivatedRouteSnapshot>, _state: Arc<RouterStateSnapshot>| async move {
                let name = route.param("name").unwrap_or_default().to_string();
                Ok(ResolveResult::Data(json!({ "name": name })))
            },
        ),
    )])
    .build()
    .unwrap();

    assert!(router
        .navigate_by_url("/user/victor", NavigationExtras::default())
        .await
        .unwrap());
    let state = router.state().await;
    let user = state.first_child(&state.root()).unwrap();
    assert_eq!(
        user.snapshot().data().get("profile"),
        Some(&json!({ "name": "victor" }))
    );
}

#[tokio::test]
async fn test_empty_resolver_cancels_navigation() {
    let router = Router::builder(vec![Route::new("user/:name").component(USER).resolve(
        "profile",
        Arc::new(
            |_route: Arc<ActivatedRouteSnapshot>, _state: Arc<RouterStateSnapshot>| async {
                Ok(ResolveResult::Empty)
            },
        ),
    )])
    .build()
    .unwrap();
    let mut events = router.events();

    let committed = router
        .navigate_by_url("/user/victor", NavigationExtras::default())
        .await
        .unwrap();
    assert!(!committed);

    let cancelled = drain(&mut events).into_iter().any(|event| {
        matches!(
            event,
            Event::NavigationCancel {
                code: NavigationCancellationCode::NoDataFromResolver,
                ..
            }
        )
    });
    assert!(cancelled);
}

// ============================================================================
// Reuse across navigations
// ============================================================================

#[tokio::test]
async fn test_unchanged_routes_survive_navigation() {
    let team_guard_calls = Arc::new(AtomicUsize::new(0));
    let calls = team_guard_calls.clone();
    let router = Router::builder(vec![Route::new("team/:id")
        .component(TEAM)
        .can_activate(Arc::new(
            move |_route: Arc<ActivatedRouteSnapshot>, _state: Arc<RouterStateSnapshot>| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(GuardResult::Allow)
                }
            },
        ))
        .children(vec![Route::new("user/:name").component(USER)])])
    .build()
    .unwrap();

    assert!(router
        .navigate_by_url("/team/33/user/victor", NavigationExtras::default())
        .await
        .unwrap());
    let state = router.state().await;
    let team_before = state.first_child(&state.root()).unwrap();
    let user_before = state.first_child(&team_before).unwrap();
    let mut user_params = user_before.params();
    assert_eq!(team_guard_calls.load(Ordering::SeqCst), 1);

    assert!(router
        .navigate_by_url("/team/33/user/jim", NavigationExtras::default())
        .await
        .unwrap());
    let state = router.state().await;
    let team_after = state.first_child(&state.root()).unwrap();
    let user_after = state.first_child(&team_after).unwrap();

    // Same config and params: the live routes are the same objects, and the
    // team guard did not run again.
    assert!(Arc::ptr_eq(&team_before, &team_after));
    assert!(Arc::ptr_eq(&user_before, &user_after));
    assert_eq!(team_guard_calls.load(Ordering::SeqCst), 1);

    // The reused user route observed its new params.
    assert!(user_params.has_changed().unwrap());
    assert_eq!(
        user_params.borrow_and_update().get("name").map(String::as_str),
        Some("jim")
    );
}

// ============================================================================
// Events
// ============================================================================

#[tokio::test]
async fn test_successful_navigation_event_order() {
    init_tracing();
    let router = Router::builder(base_routes()).build().unwrap();
    let mut events = router.events();

    assert!(router
        .navigate_by_url("/dashboard", NavigationExtras::default())
        .await
        .unwrap());

    let names: Vec<&str> = drain(&mut events).iter().map(event_name).collect();
    assert_eq!(
        names,
        vec![
            "NavigationStart",
            "RoutesRecognized",
            "GuardsCheckStart",
            "ChildActivationStart",
            "ActivationStart",
            "GuardsCheckEnd",
            "ResolveStart",
            "ResolveEnd",
            "ActivationEnd",
            "ChildActivationEnd",
            "NavigationEnd",
        ]
    );
}

#[tokio::test]
async fn test_all_events_share_the_navigation_id() {
    let router = Router::builder(base_routes()).build().unwrap();
    let mut events = router.events();

    router
        .navigate_by_url("/dashboard", NavigationExtras::default())
        .await
        .unwrap();
    let first: Vec<Event> = drain(&mut events);
    router
        .navigate_by_url("/team/5", NavigationExtras::default())
        .await
        .unwrap();
    let second: Vec<Event> = drain(&mut events);

    assert!(!first.is_empty() && !second.is_empty());
    assert!(first.iter().all(|event| event.id() == first[0].id()));
    assert!(second.iter().all(|event| event.id() == second[0].id()));
    assert!(second[0].id() > first[0].id());
}

// ============================================================================
// URL construction and active checks
// ============================================================================

#[tokio::test]
async fn test_relative_commands_against_live_state() {
    let router = Router::builder(base_routes()).build().unwrap();
    router
        .navigate_by_url("/team/33/user/victor", NavigationExtras::default())
        .await
        .unwrap();

    let snapshot = router.state_snapshot().await;
    let team = snapshot.first_child(&snapshot.root()).unwrap();
    let user = snapshot.first_child(&team).unwrap();

    let tree = router
        .create_url_tree(
            &commands(["../jim"]),
            &NavigationExtras {
                relative_to: Some(user),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(router.serialize_url(&tree), "/team/33/user/jim");
}

#[tokio::test]
async fn test_is_active_after_navigation() {
    let router = Router::builder(base_routes()).build().unwrap();
    router
        .navigate_by_url("/team/33/user/victor", NavigationExtras::default())
        .await
        .unwrap();

    let exact = router.parse_url("/team/33/user/victor").unwrap();
    let subset = router.parse_url("/team/33").unwrap();
    let other = router.parse_url("/team/44").unwrap();

    assert!(router.is_active(&exact, &IsActiveMatchOptions::exact()).await);
    assert!(router.is_active(&subset, &IsActiveMatchOptions::subset()).await);
    assert!(!router.is_active(&other, &IsActiveMatchOptions::subset()).await);
}
