//! Resolver execution
//!
//! Runs the data resolvers of every route the guard stage marked for
//! re-activation. Routes resolve in path order; within one route, distinct
//! resolver keys run concurrently. A resolver that completes without a value
//! cancels the navigation, and a redirect from a resolver behaves like a
//! guard redirect. When everything resolved, the merged data view of the
//! whole snapshot tree is recomputed so descendants see updated inherited
//! data.

use crate::checks::Checks;
use crate::errors::RouterError;
use crate::guard::{RedirectCommand, ResolveResult};
use crate::state::{refresh_inherited_data, ParamsInheritanceStrategy, RouterStateSnapshot};
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;

/// Run resolvers for all activation-checked routes of `future_state`.
///
/// Returns a redirect command when a resolver asked for one; `Ok(None)` means
/// every resolver produced data.
pub(crate) async fn resolve_data(
    strategy: ParamsInheritanceStrategy,
    checks: &Checks,
    future_state: &Arc<RouterStateSnapshot>,
) -> Result<Option<RedirectCommand>, RouterError> {
    for check in &checks.can_activate {
        let route = check.route();
        let Some(config) = &route.route_config else {
            continue;
        };
        if config.resolve.is_empty() {
            continue;
        }

        let mut pending = FuturesUnordered::new();
        for (key, resolver) in &config.resolve {
            let key = key.clone();
            let resolver = resolver.clone();
            let route = route.clone();
            let state = future_state.clone();
            pending.push(async move {
                let result = resolver.resolve(route, state).await;
                (key, result)
            });
        }

        let mut resolved = route.resolved_data();
        while let Some((key, result)) = pending.next().await {
            match result.map_err(RouterError::Collaborator)? {
                ResolveResult::Data(value) => {
                    resolved.insert(key, value);
                }
                ResolveResult::Redirect(command) => {
                    tracing::debug!(key, path = route.config_path(), "resolver redirected");
                    return Ok(Some(command));
                }
                ResolveResult::Empty => {
                    return Err(RouterError::NoDataFromResolver {
                        key,
                        path: route.config_path(),
                    });
                }
            }
        }
        route.set_resolved_data(resolved);
    }

    refresh_inherited_data(&future_state.tree.root, strategy, None);
    Ok(None)
}
