//! Router event stream
//!
//! Every navigation emits an ordered sequence of events tagged with the
//! navigation id and the serialized URLs involved. Events fan out to all
//! subscribers over a broadcast channel; subscribers that fall behind lose
//! the oldest events rather than blocking navigation.

use crate::errors::NavigationCancellationCode;
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// One lifecycle event of a navigation.
#[derive(Debug, Clone)]
pub enum Event {
    /// A navigation was requested.
    NavigationStart { id: u64, url: String },
    /// A lazy route config load began.
    RouteConfigLoadStart { id: u64, route_path: String },
    /// A lazy route config load finished.
    RouteConfigLoadEnd { id: u64, route_path: String },
    /// Redirects were applied and the URL was recognized against the config.
    RoutesRecognized {
        id: u64,
        url: String,
        url_after_redirects: String,
    },
    /// Guard evaluation is starting.
    GuardsCheckStart {
        id: u64,
        url: String,
        url_after_redirects: String,
    },
    /// A route subtree is about to be activated (fired in tree order).
    ChildActivationStart { id: u64, route_path: String },
    /// A route is about to be activated (fired in tree order).
    ActivationStart { id: u64, route_path: String },
    /// Guard evaluation finished.
    GuardsCheckEnd {
        id: u64,
        url: String,
        url_after_redirects: String,
        should_activate: bool,
    },
    /// Data resolution is starting.
    ResolveStart {
        id: u64,
        url: String,
        url_after_redirects: String,
    },
    /// Data resolution finished.
    ResolveEnd {
        id: u64,
        url: String,
        url_after_redirects: String,
    },
    /// A route finished activating.
    ActivationEnd { id: u64, route_path: String },
    /// A route subtree finished activating.
    ChildActivationEnd { id: u64, route_path: String },
    /// The navigation committed.
    NavigationEnd {
        id: u64,
        url: String,
        url_after_redirects: String,
    },
    /// The navigation was cancelled.
    NavigationCancel {
        id: u64,
        url: String,
        reason: String,
        code: NavigationCancellationCode,
    },
    /// The navigation failed with an error.
    NavigationError { id: u64, url: String, error: String },
}

impl Event {
    /// Navigation id this event belongs to.
    pub fn id(&self) -> u64 {
        match self {
            Event::NavigationStart { id, .. }
            | Event::RouteConfigLoadStart { id, .. }
            | Event::RouteConfigLoadEnd { id, .. }
            | Event::RoutesRecognized { id, .. }
            | Event::GuardsCheckStart { id, .. }
            | Event::ChildActivationStart { id, .. }
            | Event::ActivationStart { id, .. }
            | Event::GuardsCheckEnd { id, .. }
            | Event::ResolveStart { id, .. }
            | Event::ResolveEnd { id, .. }
            | Event::ActivationEnd { id, .. }
            | Event::ChildActivationEnd { id, .. }
            | Event::NavigationEnd { id, .. }
            | Event::NavigationCancel { id, .. }
            | Event::NavigationError { id, .. } => *id,
        }
    }
}

/// Emits events to whoever is listening; silent when nobody is.
#[derive(Debug, Clone)]
pub(crate) struct EventSink {
    tx: broadcast::Sender<Event>,
}

impl EventSink {
    pub(crate) fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub(crate) fn emit(&self, event: Event) {
        tracing::trace!(?event, "router event");
        // Send fails only when there are no subscribers.
        let _ = self.tx.send(event);
    }
}
