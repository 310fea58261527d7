//! History integration
//!
//! The engine talks to the host's history stack through the [`Location`]
//! trait: committed navigations push or replace entries, and externally
//! triggered changes (back/forward) flow the other way as a change stream
//! the router subscribes to. [`MemoryLocation`] is a complete in-process
//! implementation, useful for tests and headless hosts.

use std::sync::Mutex;
use tokio::sync::broadcast;

const CHANGE_CHANNEL_CAPACITY: usize = 32;

/// An externally triggered URL change, such as the back button.
#[derive(Debug, Clone)]
pub struct LocationChange {
    /// Path including query string and fragment.
    pub path: String,
    /// History state stored with the entry.
    pub state: Option<serde_json::Value>,
}

/// Seam between the router and the host's history stack.
pub trait Location: Send + Sync {
    /// Current path, including query string and fragment.
    fn path(&self) -> String;

    /// Push a new history entry.
    fn go(&self, path: &str, state: Option<serde_json::Value>);

    /// Replace the current history entry.
    fn replace_state(&self, path: &str, state: Option<serde_json::Value>);

    /// Changes initiated outside the router.
    fn subscribe(&self) -> broadcast::Receiver<LocationChange>;
}

struct MemoryHistory {
    entries: Vec<LocationChange>,
    index: usize,
}

/// In-process history stack.
pub struct MemoryLocation {
    history: Mutex<MemoryHistory>,
    tx: broadcast::Sender<LocationChange>,
}

impl Default for MemoryLocation {
    fn default() -> Self {
        Self::new("/")
    }
}

impl MemoryLocation {
    pub fn new(initial_path: &str) -> Self {
        let (tx, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            history: Mutex::new(MemoryHistory {
                entries: vec![LocationChange {
                    path: initial_path.to_string(),
                    state: None,
                }],
                index: 0,
            }),
            tx,
        }
    }

    fn with_history<R>(&self, f: impl FnOnce(&mut MemoryHistory) -> R) -> R {
        let mut guard = match self.history.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    /// Move one entry back, notifying subscribers like a popstate event.
    pub fn back(&self) {
        let change = self.with_history(|h| {
            if h.index == 0 {
                return None;
            }
            h.index -= 1;
            Some(h.entries[h.index].clone())
        });
        if let Some(change) = change {
            let _ = self.tx.send(change);
        }
    }

    /// Move one entry forward, notifying subscribers.
    pub fn forward(&self) {
        let change = self.with_history(|h| {
            if h.index + 1 >= h.entries.len() {
                return None;
            }
            h.index += 1;
            Some(h.entries[h.index].clone())
        });
        if let Some(change) = change {
            let _ = self.tx.send(change);
        }
    }

    pub fn history_length(&self) -> usize {
        self.with_history(|h| h.entries.len())
    }
}

impl Location for MemoryLocation {
    fn path(&self) -> String {
        self.with_history(|h| h.entries[h.index].path.clone())
    }

    fn go(&self, path: &str, state: Option<serde_json::Value>) {
        self.with_history(|h| {
            // Forward entries are discarded, like a browser push.
            h.entries.truncate(h.index + 1);
            h.entries.push(LocationChange {
                path: path.to_string(),
                state,
            });
            h.index = h.entries.len() - 1;
        });
    }

    fn replace_state(&self, path: &str, state: Option<serde_json::Value>) {
        self.with_history(|h| {
            h.entries[h.index] = LocationChange {
                path: path.to_string(),
                state,
            };
        });
    }

    fn subscribe(&self) -> broadcast::Receiver<LocationChange> {
        self.tx.subscribe()
    }
}
