//! Generic tree container for router state
//!
//! Both snapshot and live router state form trees of `Arc`-shared nodes. Tree
//! navigation (`parent`, `children`, `path_from_root`) lives here and works by
//! traversal with pointer identity, so individual nodes never carry
//! parent/child wiring of their own. One canonical tree exists per snapshot
//! generation.

use std::sync::Arc;

/// Identity comparison for node values stored in a [`Tree`].
pub trait NodeIdentity {
    fn same_node(&self, other: &Self) -> bool;
}

impl<T: ?Sized> NodeIdentity for Arc<T> {
    fn same_node(&self, other: &Self) -> bool {
        Arc::ptr_eq(self, other)
    }
}

/// A node value plus its ordered children.
#[derive(Debug, Clone)]
pub struct TreeNode<T> {
    pub value: T,
    pub children: Vec<TreeNode<T>>,
}

impl<T> TreeNode<T> {
    pub fn new(value: T, children: Vec<TreeNode<T>>) -> Self {
        Self { value, children }
    }

    pub fn leaf(value: T) -> Self {
        Self {
            value,
            children: Vec::new(),
        }
    }
}

/// Tree rooted at a single node.
#[derive(Debug, Clone)]
pub struct Tree<T> {
    pub root: TreeNode<T>,
}

impl<T: NodeIdentity + Clone> Tree<T> {
    pub fn new(root: TreeNode<T>) -> Self {
        Self { root }
    }

    /// Values from the root down to `value`, inclusive. Empty when `value`
    /// is not part of this tree.
    pub fn path_from_root(&self, value: &T) -> Vec<T> {
        let mut path = Vec::new();
        if find_path(&self.root, value, &mut path) {
            path.reverse();
        } else {
            path.clear();
        }
        path
    }

    pub fn parent(&self, value: &T) -> Option<T> {
        let path = self.path_from_root(value);
        (path.len() >= 2).then(|| path[path.len() - 2].clone())
    }

    pub fn children(&self, value: &T) -> Vec<T> {
        match self.node_of(value) {
            Some(node) => node.children.iter().map(|c| c.value.clone()).collect(),
            None => Vec::new(),
        }
    }

    pub fn first_child(&self, value: &T) -> Option<T> {
        self.node_of(value)
            .and_then(|node| node.children.first())
            .map(|c| c.value.clone())
    }

    pub fn siblings(&self, value: &T) -> Vec<T> {
        let path = self.path_from_root(value);
        if path.len() < 2 {
            return Vec::new();
        }
        let parent = &path[path.len() - 2];
        self.children(parent)
            .into_iter()
            .filter(|c| !c.same_node(value))
            .collect()
    }

    /// The subtree node holding `value`.
    pub fn node_of(&self, value: &T) -> Option<&TreeNode<T>> {
        find_node(&self.root, value)
    }
}

fn find_node<'a, T: NodeIdentity>(node: &'a TreeNode<T>, value: &T) -> Option<&'a TreeNode<T>> {
    if node.value.same_node(value) {
        return Some(node);
    }
    node.children.iter().find_map(|c| find_node(c, value))
}

/// Fills `path` leaf-first on success.
fn find_path<T: NodeIdentity + Clone>(node: &TreeNode<T>, value: &T, path: &mut Vec<T>) -> bool {
    if node.value.same_node(value) {
        path.push(node.value.clone());
        return true;
    }
    for child in &node.children {
        if find_path(child, value, path) {
            path.push(node.value.clone());
            return true;
        }
    }
    false
}
