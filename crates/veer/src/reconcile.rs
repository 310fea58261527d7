//! State reconciliation
//!
//! Builds the live `RouterState` for a recognized snapshot tree, reusing
//! `ActivatedRoute` instances from the previous state wherever the reuse
//! strategy allows. Reused routes keep their observable channels alive with
//! the new snapshot staged; subscribers see updated values only when the
//! navigation commits and `advance` runs.

use crate::errors::RouterError;
use crate::reuse::RouteReuseStrategy;
use crate::state::{ActivatedRoute, ActivatedRouteSnapshot, RouterState, RouterStateSnapshot};
use crate::tree::{Tree, TreeNode};
use anyhow::anyhow;
use std::sync::Arc;

/// Create the live state for `snapshot`, pairing nodes against `prev`.
pub(crate) fn create_router_state(
    strategy: &dyn RouteReuseStrategy,
    snapshot: Arc<RouterStateSnapshot>,
    prev: Option<&RouterState>,
) -> Result<RouterState, RouterError> {
    let root = create_node(strategy, &snapshot.tree.root, prev.map(|p| &p.tree.root))?;
    Ok(RouterState::new(snapshot, Tree::new(root)))
}

type SnapshotNode = TreeNode<Arc<ActivatedRouteSnapshot>>;
type RouteNode = TreeNode<Arc<ActivatedRoute>>;

fn create_node(
    strategy: &dyn RouteReuseStrategy,
    curr: &SnapshotNode,
    prev: Option<&RouteNode>,
) -> Result<RouteNode, RouterError> {
    if let Some(prev) = prev {
        if strategy.should_reuse_route(&curr.value, &prev.value.snapshot()) {
            let value = prev.value.clone();
            value.stage(curr.value.clone());
            let children = create_or_reuse_children(strategy, curr, prev)?;
            return Ok(TreeNode::new(value, children));
        }
    }

    if strategy.should_attach(&curr.value) {
        if let Some(handle) = strategy.retrieve(&curr.value) {
            let mut tree = handle.route;
            stage_future_snapshots(curr, &mut tree)?;
            return Ok(tree);
        }
    }

    let value = Arc::new(ActivatedRoute::from_snapshot(curr.value.clone()));
    let children = curr
        .children
        .iter()
        .map(|child| create_node(strategy, child, None))
        .collect::<Result<_, _>>()?;
    Ok(TreeNode::new(value, children))
}

/// Pair each future child against any previous child the strategy accepts,
/// not just the one in the same position.
fn create_or_reuse_children(
    strategy: &dyn RouteReuseStrategy,
    curr: &SnapshotNode,
    prev: &RouteNode,
) -> Result<Vec<RouteNode>, RouterError> {
    curr.children
        .iter()
        .map(|child| {
            let paired = prev
                .children
                .iter()
                .find(|p| strategy.should_reuse_route(&child.value, &p.value.snapshot()));
            create_node(strategy, child, paired)
        })
        .collect()
}

/// Stage the new snapshots onto a re-attached live subtree, pairwise.
fn stage_future_snapshots(curr: &SnapshotNode, tree: &mut RouteNode) -> Result<(), RouterError> {
    let matches = match (&curr.value.route_config, &tree.value.snapshot().route_config) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    };
    if !matches {
        return Err(RouterError::Collaborator(anyhow!(
            "cannot re-attach a subtree created from a different route"
        )));
    }
    if curr.children.len() != tree.children.len() {
        return Err(RouterError::Collaborator(anyhow!(
            "cannot re-attach a subtree with a different number of children"
        )));
    }
    tree.value.stage(curr.value.clone());
    for (curr_child, tree_child) in curr.children.iter().zip(&mut tree.children) {
        stage_future_snapshots(curr_child, tree_child)?;
    }
    Ok(())
}
