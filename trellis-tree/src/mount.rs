//! Mounted nested-grammar trees
//!
//!     Mixed parsing never splices foreign node ids into a host tree.
//!     Instead the covering host node carries a `MOUNT` per-node prop with a
//!     `MountedTree`: the independently parsed inner tree, the overlay
//!     ranges it covers (or `None` for the node's whole span), and the
//!     identity of the parser that produced it. Consumers that want the
//!     merged view descend through the mount; incremental re-parses use the
//!     recorded identity to decide whether an old mount is still usable.

use std::sync::Arc;

use crate::input::Range;
use crate::tree::Tree;

#[derive(Debug)]
pub struct MountedTree {
    /// The nested parse result, positioned in host-document coordinates.
    pub tree: Arc<Tree>,
    /// Disjoint, increasing sub-ranges of the host node that the inner tree
    /// covers. `None` means the whole node.
    pub overlay: Option<Vec<Range>>,
    /// Identity of the inner parser, for reuse checks across parses.
    pub parser_name: Arc<str>,
}

impl MountedTree {
    pub fn new(tree: Arc<Tree>, overlay: Option<Vec<Range>>, parser_name: Arc<str>) -> MountedTree {
        if let Some(ranges) = &overlay {
            debug_assert!(ranges.windows(2).all(|w| w[0].to <= w[1].from));
        }
        MountedTree {
            tree,
            overlay,
            parser_name,
        }
    }

    /// Whether `pos` falls inside the mounted region.
    pub fn covers(&self, pos: u32, node_from: u32, node_to: u32) -> bool {
        match &self.overlay {
            None => pos >= node_from && pos < node_to,
            Some(ranges) => ranges.iter().any(|r| r.contains(pos)),
        }
    }
}

/// Produce a new root tree in which the node with the given span and type
/// carries `mount`. Only the spine down to the node is rebuilt; everything
/// else is shared. When the node sits inside a flat buffer, that one
/// subtree is split out of the buffer and materialized.
///
/// Returns `None` when no such node exists.
pub fn attach(
    root: &Arc<Tree>,
    from: u32,
    to: u32,
    type_id: u16,
    mount: MountedTree,
) -> Option<Arc<Tree>> {
    let mount = Arc::new(mount);
    attach_inner(root, 0, from, to, type_id, &mount)
}

fn attach_inner(
    node: &Arc<Tree>,
    node_start: u32,
    from: u32,
    to: u32,
    type_id: u16,
    mount: &Arc<MountedTree>,
) -> Option<Arc<Tree>> {
    use crate::tree::{Child, Tree};
    use crate::types::{PropKey, PropValue};

    if node_start == from && node_start + node.length() == to && node.ty().id() == type_id {
        return Some(Arc::new(
            node.with_prop(PropKey::MOUNT, PropValue::Mount(mount.clone())),
        ));
    }
    for i in 0..node.children().len() {
        let child_start = node_start + node.positions()[i];
        let child_end = child_start + node.children()[i].length();
        if from < child_start || to > child_end {
            continue;
        }
        match &node.children()[i] {
            Child::Tree(child) => {
                let new_child = attach_inner(child, child_start, from, to, type_id, mount)?;
                let mut children = node.children().to_vec();
                children[i] = Child::Tree(new_child);
                return Some(Arc::new(Tree::with_props(
                    node.ty().clone(),
                    children,
                    node.positions().to_vec(),
                    node.length(),
                    node.props().clone(),
                )));
            }
            Child::Buffer(buffer) => {
                let pieces = attach_in_buffer(buffer, child_start, from, to, type_id, mount)?;
                let mut children = node.children().to_vec();
                let mut positions = node.positions().to_vec();
                children.remove(i);
                positions.remove(i);
                for (j, (child, abs_start)) in pieces.into_iter().enumerate() {
                    children.insert(i + j, child);
                    positions.insert(i + j, abs_start - node_start);
                }
                return Some(Arc::new(Tree::with_props(
                    node.ty().clone(),
                    children,
                    positions,
                    node.length(),
                    node.props().clone(),
                )));
            }
        }
    }
    None
}

/// Split the top-level buffer entry covering `[from, to)` out of `buffer`,
/// attach the mount inside its materialized form, and return the
/// replacement children with their absolute starts.
fn attach_in_buffer(
    buffer: &Arc<crate::tree::TreeBuffer>,
    buf_start: u32,
    from: u32,
    to: u32,
    type_id: u16,
    mount: &Arc<MountedTree>,
) -> Option<Vec<(crate::tree::Child, u32)>> {
    use crate::tree::Child;

    let mut slot = 0;
    while slot < buffer.slot_count() {
        let entry_from = buf_start + buffer.from_at(slot);
        let entry_to = buf_start + buffer.to_at(slot);
        let end_slot = buffer.end_slot_at(slot);
        if from >= entry_from && to <= entry_to {
            let materialized = Arc::new(buffer.materialize(slot));
            let new_target = attach_inner(&materialized, entry_from, from, to, type_id, mount)?;
            let mut pieces = Vec::new();
            if slot > 0 {
                let before = buffer.sub_buffer(0, slot, 0);
                pieces.push((Child::Buffer(Arc::new(before)), buf_start));
            }
            pieces.push((Child::Tree(new_target), entry_from));
            if end_slot < buffer.slot_count() {
                let origin = buffer.from_at(end_slot);
                let after = buffer.sub_buffer(end_slot, buffer.slot_count(), origin);
                pieces.push((Child::Buffer(Arc::new(after)), buf_start + origin));
            }
            return Some(pieces);
        }
        slot = end_slot;
    }
    None
}
