//! Error taxonomy
//!
//! Three classes, with different propagation rules:
//! - configuration errors are fatal at registration time and never occur
//!   mid-navigation;
//! - navigation-cancelling conditions resolve the navigation to `false`
//!   without propagating an exception to application code;
//! - anything else thrown by a guard, resolver or loader surfaces through the
//!   `NavigationError` event and the navigation result.
//!
//! No-match during the redirect/recognition search is not an error at all: it
//! is an ordinary control-flow value ([`NoMatch`]) recovered by backtracking.

use thiserror::Error;
use veer_url::ParseError;

/// Hard ceiling on consecutive absolute redirects within one resolution.
///
/// Exceeding it is always a hard [`RouterError::InfiniteRedirect`].
pub const MAX_ABSOLUTE_REDIRECTS: usize = 31;

/// Why a navigation was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationCancellationCode {
    /// A guard or resolver returned a redirect; a follow-up navigation was
    /// scheduled.
    Redirect,
    /// A newer navigation was requested before this one committed.
    SupersededByNewNavigation,
    /// A required resolver completed without producing a value.
    NoDataFromResolver,
    /// A guard returned a denial.
    GuardRejected,
    /// The navigation was aborted through its abort signal.
    Aborted,
}

/// Errors surfaced by the router.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("invalid configuration of route '{path}': {reason}")]
    InvalidConfig { path: String, reason: String },

    #[error("cannot match any routes, url segment: '{segment}'")]
    CannotMatchAnyRoutes { segment: String },

    #[error("two segments cannot have the same outlet name: '{path_a}' and '{path_b}'")]
    DuplicateOutlet { path_a: String, path_b: String },

    #[error("detected possible infinite redirect while navigating to '{url}'")]
    InfiniteRedirect { url: String },

    #[error("redirect target '{target}' references unknown positional parameter ':{param}'")]
    MissingRedirectParam { target: String, param: String },

    #[error("redirect target '{target}' contains named outlets, which cannot be flattened")]
    NamedOutletRedirect { target: String },

    #[error("resolver for key '{key}' of route '{path}' completed without a value")]
    NoDataFromResolver { key: String, path: String },

    #[error("relative navigation has more '..' segments than ancestors")]
    InvalidDoubleDots,

    #[error("navigation cancelled: {reason}")]
    NavigationCancelled {
        reason: String,
        code: NavigationCancellationCode,
    },

    #[error(transparent)]
    Parse(#[from] ParseError),

    /// A guard, resolver or loader failed with its own error.
    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),
}

impl RouterError {
    /// Cancellations resolve the navigation to `false`; everything else is a
    /// real failure.
    pub fn cancellation_code(&self) -> Option<NavigationCancellationCode> {
        match self {
            RouterError::NavigationCancelled { code, .. } => Some(*code),
            RouterError::NoDataFromResolver { .. } => {
                Some(NavigationCancellationCode::NoDataFromResolver)
            }
            _ => None,
        }
    }

    pub(crate) fn cancelled(
        reason: impl Into<String>,
        code: NavigationCancellationCode,
    ) -> Self {
        RouterError::NavigationCancelled {
            reason: reason.into(),
            code,
        }
    }
}

/// Backtracking signal of the matching search: the candidate route did not
/// match, try the next one.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct NoMatch;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_code_extraction() {
        let err = RouterError::cancelled("superseded", NavigationCancellationCode::SupersededByNewNavigation);
        assert_eq!(
            err.cancellation_code(),
            Some(NavigationCancellationCode::SupersededByNewNavigation)
        );
        let err = RouterError::CannotMatchAnyRoutes {
            segment: "a/b".into(),
        };
        assert_eq!(err.cancellation_code(), None);
    }
}
