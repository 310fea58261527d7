//! URL construction from navigation commands
//!
//! Builds a new URL tree from a command list, optionally relative to an
//! activated route. The current URL structure is reconstructed from the
//! snapshot tree, so relative climbing (`..`) works without any parent
//! wiring: the path from the root to the anchor route doubles as the climb
//! stack.

use crate::errors::RouterError;
use crate::matching::squash_segment_group;
use crate::state::{ActivatedRouteSnapshot, RouterStateSnapshot};
use crate::tree::TreeNode;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use veer_url::{Params, QueryParams, UrlSegment, UrlSegmentGroup, UrlTree, PRIMARY_OUTLET};

/// One element of a navigation command list.
#[derive(Debug, Clone)]
pub enum Command {
    /// Path text. In the first command, `/`-separated parts are split out,
    /// a leading `/` makes the navigation absolute, `..` climbs, and `.` is
    /// ignored.
    Path(String),
    /// Matrix params attached to the preceding path command.
    Params(Params),
    /// Commands per outlet; `None` removes that outlet from the URL.
    Outlets(BTreeMap<String, Option<Vec<Command>>>),
}

impl From<&str> for Command {
    fn from(path: &str) -> Self {
        Command::Path(path.to_string())
    }
}

impl From<String> for Command {
    fn from(path: String) -> Self {
        Command::Path(path)
    }
}

impl From<Params> for Command {
    fn from(params: Params) -> Self {
        Command::Params(params)
    }
}

/// Shorthand for building a command list from path parts.
pub fn commands<const N: usize>(parts: [&str; N]) -> Vec<Command> {
    parts.iter().map(|p| Command::from(*p)).collect()
}

struct Navigation {
    is_absolute: bool,
    double_dots: usize,
    commands: Vec<Command>,
}

fn compute_navigation(commands: &[Command]) -> Navigation {
    if let [Command::Path(p)] = commands {
        if p == "/" {
            return Navigation {
                is_absolute: true,
                double_dots: 0,
                commands: Vec::new(),
            };
        }
    }

    let mut is_absolute = false;
    let mut double_dots = 0;
    let mut out = Vec::new();
    for (i, command) in commands.iter().enumerate() {
        if i == 0 {
            if let Command::Path(text) = command {
                for (part_index, part) in text.split('/').enumerate() {
                    match part {
                        "." if part_index == 0 => {}
                        "" if part_index == 0 => is_absolute = true,
                        ".." => double_dots += 1,
                        "" => {}
                        other => out.push(Command::Path(other.to_string())),
                    }
                }
                continue;
            }
        }
        out.push(command.clone());
    }
    Navigation {
        is_absolute,
        double_dots,
        commands: out,
    }
}

/// Build the target URL tree for `commands` anchored at `relative_to`.
///
/// Query params and fragment are supplied by the caller; command processing
/// only shapes the segment tree.
pub(crate) fn create_url_tree(
    relative_to: &Arc<ActivatedRouteSnapshot>,
    state: &RouterStateSnapshot,
    command_list: &[Command],
    query_params: QueryParams,
    fragment: Option<String>,
) -> Result<UrlTree, RouterError> {
    // Rebuild the URL structure from the snapshot tree; one group per route
    // node, so the path to the anchor is the climb stack.
    let root_group = build_group(&state.tree.root);
    let chain = group_chain(state, relative_to);

    if command_list.is_empty() {
        return Ok(finish(root_group, query_params, fragment));
    }
    let nav = compute_navigation(command_list);
    if nav.is_absolute && nav.commands.is_empty() && nav.double_dots == 0 {
        return Ok(finish(UrlSegmentGroup::default(), query_params, fragment));
    }

    let (new_group, replace_at) = if nav.is_absolute {
        (
            update_segment_group_children(&root_group, 0, &nav.commands),
            0,
        )
    } else {
        let mut chain_pos = chain.len().saturating_sub(1);
        let target = group_at(&root_group, &chain[..chain_pos + 1]);
        let modifier = match nav.commands.first() {
            Some(Command::Params(_)) => 0usize,
            _ => 1,
        };
        let mut index = (target.segments.len() + modifier).saturating_sub(1);
        let mut double_dots = nav.double_dots;
        let mut target = target;
        while double_dots > index {
            double_dots -= index;
            if chain_pos == 0 {
                return Err(RouterError::InvalidDoubleDots);
            }
            chain_pos -= 1;
            target = group_at(&root_group, &chain[..chain_pos + 1]);
            index = target.segments.len();
        }
        index -= double_dots;

        let updated = update_segment_group(Some(target), index, &nav.commands);
        (updated, chain_pos)
    };

    let new_root = replace_group(&root_group, &chain[1..replace_at + 1], new_group);
    Ok(finish(new_root, query_params, fragment))
}

fn finish(root: UrlSegmentGroup, query_params: QueryParams, fragment: Option<String>) -> UrlTree {
    let squashed = squash_segment_group(root);
    let root = if squashed.segments.is_empty() {
        squashed
    } else {
        UrlSegmentGroup::new(Vec::new(), [(PRIMARY_OUTLET.to_string(), squashed)].into())
    };
    UrlTree::new(root, query_params, fragment)
}

fn build_group(node: &TreeNode<Arc<ActivatedRouteSnapshot>>) -> UrlSegmentGroup {
    let children = node
        .children
        .iter()
        .map(|child| (child.value.outlet.clone(), build_group(child)))
        .collect();
    UrlSegmentGroup::new(node.value.url.clone(), children)
}

/// Outlet names leading from the root to `target` in the rebuilt group tree.
/// The first element stands for the root itself.
fn group_chain(state: &RouterStateSnapshot, target: &Arc<ActivatedRouteSnapshot>) -> Vec<String> {
    let path = state.path_from_root(target);
    let mut chain = vec![PRIMARY_OUTLET.to_string()];
    chain.extend(path.iter().skip(1).map(|s| s.outlet.clone()));
    chain
}

fn group_at<'a>(root: &'a UrlSegmentGroup, chain: &[String]) -> &'a UrlSegmentGroup {
    let mut group = root;
    for outlet in &chain[1..] {
        match group.children.get(outlet) {
            Some(child) => group = child,
            None => return group,
        }
    }
    group
}

/// Rebuild the tree with the group at `path` replaced.
fn replace_group(
    root: &UrlSegmentGroup,
    path: &[String],
    replacement: UrlSegmentGroup,
) -> UrlSegmentGroup {
    match path.split_first() {
        None => replacement,
        Some((outlet, rest)) => {
            let mut children = root.children.clone();
            if let Some(child) = root.children.get(outlet) {
                children.insert(outlet.clone(), replace_group(child, rest, replacement));
            }
            UrlSegmentGroup::new(root.segments.clone(), children)
        }
    }
}

// ============================================================================
// Command application
// ============================================================================

fn update_segment_group(
    group: Option<&UrlSegmentGroup>,
    start_index: usize,
    commands: &[Command],
) -> UrlSegmentGroup {
    let empty = UrlSegmentGroup::default();
    let group = group.unwrap_or(&empty);
    if group.segments.is_empty() && group.has_children() {
        return update_segment_group_children(group, start_index, commands);
    }

    let m = prefixed_with(group, start_index, commands);
    let sliced = &commands[m.command_index..];
    if m.matched && m.path_index < group.segments.len() {
        let rest = UrlSegmentGroup::new(
            group.segments[m.path_index..].to_vec(),
            group.children.clone(),
        );
        let prefix = group.segments[..m.path_index].to_vec();
        let wrapper =
            UrlSegmentGroup::new(prefix, [(PRIMARY_OUTLET.to_string(), rest)].into());
        update_segment_group_children(&wrapper, 0, sliced)
    } else if m.matched && sliced.is_empty() {
        UrlSegmentGroup::from_segments(group.segments.clone())
    } else if m.matched && !group.has_children() {
        create_new_segment_group(group, start_index, commands)
    } else if m.matched {
        update_segment_group_children(group, 0, sliced)
    } else {
        create_new_segment_group(group, start_index, commands)
    }
}

fn update_segment_group_children(
    group: &UrlSegmentGroup,
    start_index: usize,
    commands: &[Command],
) -> UrlSegmentGroup {
    if commands.is_empty() {
        return UrlSegmentGroup::from_segments(group.segments.clone());
    }

    let outlets = commands_by_outlet(commands);
    let mut children: HashMap<String, UrlSegmentGroup> = HashMap::new();
    for (outlet, outlet_commands) in &outlets {
        if let Some(outlet_commands) = outlet_commands {
            children.insert(
                outlet.clone(),
                update_segment_group(group.children.get(outlet), start_index, outlet_commands),
            );
        }
    }
    for (outlet, child) in &group.children {
        if !outlets.contains_key(outlet) {
            children.insert(outlet.clone(), child.clone());
        }
    }
    UrlSegmentGroup::new(group.segments.clone(), children)
}

fn commands_by_outlet(commands: &[Command]) -> BTreeMap<String, Option<Vec<Command>>> {
    if let Some(Command::Outlets(outlets)) = commands.first() {
        return outlets.clone();
    }
    [(PRIMARY_OUTLET.to_string(), Some(commands.to_vec()))].into()
}

struct Prefix {
    matched: bool,
    path_index: usize,
    command_index: usize,
}

const NO_MATCH: Prefix = Prefix {
    matched: false,
    path_index: 0,
    command_index: 0,
};

/// How far `commands` walk along the existing segments unchanged.
fn prefixed_with(group: &UrlSegmentGroup, start_index: usize, commands: &[Command]) -> Prefix {
    let mut command_index = 0;
    let mut path_index = start_index;

    while path_index < group.segments.len() {
        if command_index >= commands.len() {
            return NO_MATCH;
        }
        let segment = &group.segments[path_index];
        let path = match &commands[command_index] {
            Command::Outlets(_) => break,
            Command::Params(_) => return NO_MATCH,
            Command::Path(p) => p,
        };
        match commands.get(command_index + 1) {
            Some(Command::Params(params)) => {
                if segment.path != *path || segment.parameters != *params {
                    return NO_MATCH;
                }
                command_index += 2;
            }
            _ => {
                if segment.path != *path || !segment.parameters.is_empty() {
                    return NO_MATCH;
                }
                command_index += 1;
            }
        }
        path_index += 1;
    }
    Prefix {
        matched: true,
        path_index,
        command_index,
    }
}

fn create_new_segment_group(
    group: &UrlSegmentGroup,
    start_index: usize,
    commands: &[Command],
) -> UrlSegmentGroup {
    let mut segments = group.segments[..start_index.min(group.segments.len())].to_vec();
    let mut i = 0;
    while i < commands.len() {
        match &commands[i] {
            Command::Outlets(outlets) => {
                let children = create_new_segment_children(outlets);
                return UrlSegmentGroup::new(segments, children);
            }
            Command::Params(params) if i == 0 => {
                // Matrix params applied to the segment being re-anchored.
                if let Some(existing) = group.segments.get(start_index) {
                    segments.push(UrlSegment::with_parameters(
                        existing.path.clone(),
                        params.clone(),
                    ));
                }
                i += 1;
            }
            Command::Params(_) => {
                // Dangling params without a path; ignored.
                i += 1;
            }
            Command::Path(path) => match commands.get(i + 1) {
                Some(Command::Params(params)) => {
                    segments.push(UrlSegment::with_parameters(path.clone(), params.clone()));
                    i += 2;
                }
                _ => {
                    segments.push(UrlSegment::new(path.clone()));
                    i += 1;
                }
            },
        }
    }
    UrlSegmentGroup::from_segments(segments)
}

fn create_new_segment_children(
    outlets: &BTreeMap<String, Option<Vec<Command>>>,
) -> HashMap<String, UrlSegmentGroup> {
    let mut children = HashMap::new();
    for (outlet, commands) in outlets {
        if let Some(commands) = commands {
            children.insert(
                outlet.clone(),
                create_new_segment_group(&UrlSegmentGroup::default(), 0, commands),
            );
        }
    }
    children
}
