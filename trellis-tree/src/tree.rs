//! Immutable trees and flat tree buffers
//!
//!     A syntax tree is a nesting of two encodings:
//!
//!         - `Tree`: a real node object with a type, child links and
//!           child positions relative to its own start. Children are `Arc`s,
//!           so unchanged subtrees are shared between versions of a tree.
//!         - `TreeBuffer`: a flat preorder array of `(type, from, to,
//!           end_slot)` quadruples holding a small forest of dense nodes.
//!           Buffers avoid per-node allocation where trees are bushy and
//!           shallow, which is what most token-level structure looks like.
//!
//!     Both are immutable once built. The parser does not construct nodes
//!     directly; it accumulates a flat postorder record buffer on each parse
//!     stack and hands it to [`Tree::build`], which decides which parts
//!     become buffers, balances long repetitions, and attaches per-node
//!     props recorded in the buffer (context hashes, lookahead distances).
//!
//! Buffer records
//!
//!     A parse-buffer entry is `(id, start, end, size)` where `size` is the
//!     entry count of the subtree including the entry itself. Negative sizes
//!     mark special records:
//!
//!         -1   reuse of a previously built subtree; `id` indexes the
//!              `reused` list of the build request
//!         -3   tokenizer-context change; `start`/`end` hold the hash halves
//!              for the records preceding this one
//!         -4   lookahead record; `start` holds how far the parse had peeked
//!              while producing the preceding node

use std::sync::Arc;

use crate::types::{NodeProps, NodeSet, NodeType, PropKey, PropValue};

/// Span budget under which a subtree is stored as a `TreeBuffer` instead of
/// allocated nodes.
pub const DEFAULT_BUFFER_LENGTH: u32 = 1024;

/// Target branching factor when long repetitions are rebalanced.
const BRANCH_FACTOR: usize = 8;

/// Lookahead beyond a node's end below this margin is not worth recording.
pub(crate) const LOOKAHEAD_MARGIN: u32 = 25;

/// Side bias used when resolving a position that sits exactly on a node
/// boundary.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Side {
    /// Prefer the node that ends at the position.
    Before,
    /// Prefer the node that starts at the position.
    After,
    /// Enter any node that touches the position.
    Around,
}

/// One record in a parse stack's flat output buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferEntry {
    pub id: i32,
    pub start: u32,
    pub end: u32,
    pub size: i32,
}

impl BufferEntry {
    pub const REUSE: i32 = -1;
    pub const CONTEXT: i32 = -3;
    pub const LOOKAHEAD: i32 = -4;
}

/// A child link: either a real node or a flat buffer forest.
#[derive(Clone, Debug)]
pub enum Child {
    Tree(Arc<Tree>),
    Buffer(Arc<TreeBuffer>),
}

impl Child {
    pub fn length(&self) -> u32 {
        match self {
            Child::Tree(tree) => tree.length,
            Child::Buffer(buffer) => buffer.length,
        }
    }

    pub fn as_tree(&self) -> Option<&Arc<Tree>> {
        match self {
            Child::Tree(tree) => Some(tree),
            _ => None,
        }
    }
}

/// A flat preorder forest of small nodes: quadruples
/// `(type, from, to, end_slot)`, positions relative to the buffer start,
/// `end_slot` pointing just past the node's subtree in the array.
pub struct TreeBuffer {
    pub(crate) set: NodeSet,
    pub(crate) data: Vec<u32>,
    pub(crate) length: u32,
}

impl TreeBuffer {
    pub fn new(set: NodeSet, data: Vec<u32>, length: u32) -> TreeBuffer {
        debug_assert!(data.len() % 4 == 0);
        TreeBuffer { set, data, length }
    }

    pub fn length(&self) -> u32 {
        self.length
    }

    pub fn slot_count(&self) -> usize {
        self.data.len()
    }

    pub fn type_at(&self, slot: usize) -> &NodeType {
        self.set.get(self.data[slot] as u16)
    }

    pub fn from_at(&self, slot: usize) -> u32 {
        self.data[slot + 1]
    }

    pub fn to_at(&self, slot: usize) -> u32 {
        self.data[slot + 2]
    }

    pub fn end_slot_at(&self, slot: usize) -> usize {
        self.data[slot + 3] as usize
    }

    /// Copy the entries in `[from_slot, to_slot)` into a standalone buffer
    /// with positions rebased to `origin`. Used when one buffer node has to
    /// be split out (e.g. to carry a mount) while its flat siblings stay
    /// flat.
    pub fn sub_buffer(&self, from_slot: usize, to_slot: usize, origin: u32) -> TreeBuffer {
        let mut data = Vec::with_capacity(to_slot - from_slot);
        let mut length = 0;
        let mut slot = from_slot;
        while slot < to_slot {
            data.push(self.data[slot]);
            data.push(self.data[slot + 1] - origin);
            data.push(self.data[slot + 2] - origin);
            data.push((self.data[slot + 3] as usize - from_slot) as u32);
            length = length.max(self.data[slot + 2] - origin);
            slot += 4;
        }
        TreeBuffer::new(self.set.clone(), data, length)
    }

    /// Materialize the subtree rooted at `slot` as real nodes. Used when a
    /// caller needs a stable node handle into a buffer region; siblings stay
    /// untouched.
    pub fn materialize(&self, slot: usize) -> Tree {
        let from = self.from_at(slot);
        let end_slot = self.end_slot_at(slot);
        let mut children = Vec::new();
        let mut positions = Vec::new();
        let mut child_slot = slot + 4;
        while child_slot < end_slot {
            children.push(Child::Tree(Arc::new(self.materialize(child_slot))));
            positions.push(self.from_at(child_slot) - from);
            child_slot = self.end_slot_at(child_slot);
        }
        Tree {
            ty: self.type_at(slot).clone(),
            children,
            positions,
            length: self.to_at(slot) - from,
            props: NodeProps::new(),
        }
    }
}

impl std::fmt::Debug for TreeBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TreeBuffer({} nodes, len {})", self.data.len() / 4, self.length)
    }
}

/// An immutable syntax-tree node.
pub struct Tree {
    pub(crate) ty: NodeType,
    pub(crate) children: Vec<Child>,
    /// Start offset of each child relative to this node's start.
    pub(crate) positions: Vec<u32>,
    pub(crate) length: u32,
    /// Per-node props: context hash, lookahead, mount, open flag.
    pub(crate) props: NodeProps,
}

impl Tree {
    pub fn new(ty: NodeType, children: Vec<Child>, positions: Vec<u32>, length: u32) -> Tree {
        Tree::with_props(ty, children, positions, length, NodeProps::new())
    }

    pub fn with_props(
        ty: NodeType,
        children: Vec<Child>,
        positions: Vec<u32>,
        length: u32,
        props: NodeProps,
    ) -> Tree {
        debug_assert_eq!(children.len(), positions.len());
        Tree {
            ty,
            children,
            positions,
            length,
            props,
        }
    }

    /// An empty tree of the given type.
    pub fn empty(ty: NodeType) -> Tree {
        Tree::new(ty, Vec::new(), Vec::new(), 0)
    }

    pub fn ty(&self) -> &NodeType {
        &self.ty
    }

    pub fn length(&self) -> u32 {
        self.length
    }

    pub fn children(&self) -> &[Child] {
        &self.children
    }

    pub fn positions(&self) -> &[u32] {
        &self.positions
    }

    pub fn props(&self) -> &NodeProps {
        &self.props
    }

    /// Per-node prop lookup; falls back to the node type's props.
    pub fn prop(&self, key: PropKey) -> Option<&PropValue> {
        self.props.get(key).or_else(|| self.ty.prop(key))
    }

    pub fn context_hash(&self) -> Option<u64> {
        self.props
            .get(PropKey::CONTEXT_HASH)
            .and_then(|v| v.as_int())
            .map(|v| v as u64)
    }

    pub fn lookahead(&self) -> u32 {
        self.props
            .get(PropKey::LOOKAHEAD)
            .and_then(|v| v.as_int())
            .map(|v| v as u32)
            .unwrap_or(0)
    }

    pub fn mounted(&self) -> Option<&Arc<crate::mount::MountedTree>> {
        self.props.get(PropKey::MOUNT).and_then(|v| v.as_mount())
    }

    /// A copy of this node (sharing all children) with one prop added.
    pub fn with_prop(&self, key: PropKey, value: PropValue) -> Tree {
        Tree {
            ty: self.ty.clone(),
            children: self.children.clone(),
            positions: self.positions.clone(),
            length: self.length,
            props: self.props.clone().with(key, value),
        }
    }

    /// Check the span invariant over the whole tree: sibling spans are
    /// increasing and non-overlapping, and every child fits inside its
    /// parent.
    pub fn validate(&self) -> Result<(), String> {
        let mut prev_end = 0u32;
        for (i, child) in self.children.iter().enumerate() {
            let pos = self.positions[i];
            let end = pos + child.length();
            if pos < prev_end {
                return Err(format!(
                    "child {} of {} starts at {} before previous end {}",
                    i,
                    self.ty.name(),
                    pos,
                    prev_end
                ));
            }
            if end > self.length {
                return Err(format!(
                    "child {} of {} ends at {} past parent length {}",
                    i,
                    self.ty.name(),
                    end,
                    self.length
                ));
            }
            prev_end = end;
            match child {
                Child::Tree(tree) => tree.validate()?,
                Child::Buffer(buffer) => validate_buffer(buffer)?,
            }
        }
        Ok(())
    }

    /// Build a tree from a parse stack's flat postorder buffer.
    pub fn build(data: BuildData) -> Tree {
        let mut builder = Builder {
            buf: &data.buffer,
            pos: data.buffer.len(),
            reused: &data.reused,
            set: &data.set,
            max_buffer_length: data.max_buffer_length,
            context_hash: data.context_hash,
            look_ahead: data.look_ahead,
        };
        let mut children = Vec::new();
        let mut positions = Vec::new();
        while builder.pos > 0 {
            builder.take_node(data.start, 0, &mut children, &mut positions, None);
        }
        children.reverse();
        positions.reverse();
        Tree::new(data.top, children, positions, data.length)
    }
}

impl std::fmt::Debug for Tree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Tree({} len {} children {})",
            self.ty.name(),
            self.length,
            self.children.len()
        )
    }
}

fn validate_buffer(buffer: &TreeBuffer) -> Result<(), String> {
    fn check(buffer: &TreeBuffer, slot: usize, end_slot: usize) -> Result<(), String> {
        let mut prev_end = None;
        let mut child = slot;
        while child < end_slot {
            let from = buffer.from_at(child);
            let to = buffer.to_at(child);
            let sub_end = buffer.end_slot_at(child);
            if to < from || sub_end <= child || sub_end > end_slot {
                return Err(format!("malformed buffer record at slot {}", child));
            }
            if let Some(prev) = prev_end {
                if from < prev {
                    return Err(format!(
                        "buffer record at slot {} starts at {} before previous end {}",
                        child, from, prev
                    ));
                }
            }
            if to > buffer.length {
                return Err(format!(
                    "buffer record at slot {} ends at {} past buffer length {}",
                    child, to, buffer.length
                ));
            }
            prev_end = Some(to);
            check(buffer, child + 4, sub_end)?;
            child = sub_end;
        }
        Ok(())
    }
    check(buffer, 0, buffer.data.len())
}

/// Everything `Tree::build` needs from a finished parse stack.
pub struct BuildData {
    /// Postorder record buffer, in the order the parser emitted it.
    pub buffer: Vec<BufferEntry>,
    /// Subtrees referenced by reuse records.
    pub reused: Vec<Child>,
    pub set: NodeSet,
    pub top: NodeType,
    /// Position the buffer's coordinates are relative to.
    pub start: u32,
    /// Length of the produced root node.
    pub length: u32,
    /// Tokenizer-context hash in effect at the end of the parse; context
    /// records in the buffer restore earlier hashes while reading backward.
    pub context_hash: u64,
    /// Lookahead high-water mark at the end of the parse; lookahead records
    /// restore earlier values the same way context records do.
    pub look_ahead: u32,
    pub max_buffer_length: u32,
}

struct Builder<'a> {
    buf: &'a [BufferEntry],
    /// Number of unconsumed entries; the current entry is `buf[pos - 1]`.
    pos: usize,
    reused: &'a [Child],
    set: &'a NodeSet,
    max_buffer_length: u32,
    context_hash: u64,
    look_ahead: u32,
}

impl<'a> Builder<'a> {
    fn entry(&self) -> BufferEntry {
        self.buf[self.pos - 1]
    }

    /// Consume the entry (or special record) at the cursor and append the
    /// resulting child, reading the buffer back to front so parents come
    /// before their children.
    fn take_node(
        &mut self,
        parent_start: u32,
        min_pos: usize,
        children: &mut Vec<Child>,
        positions: &mut Vec<u32>,
        in_repeat: Option<u16>,
    ) {
        let e = self.entry();
        if e.size < 0 {
            self.pos -= 1;
            match e.size {
                BufferEntry::REUSE => {
                    let node = self.reused[e.id as usize].clone();
                    positions.push(e.start - parent_start);
                    children.push(node);
                }
                BufferEntry::CONTEXT => {
                    self.context_hash = ((e.start as u64) << 32) | e.end as u64;
                }
                BufferEntry::LOOKAHEAD => {
                    self.look_ahead = e.start;
                }
                other => panic!("unrecognized buffer record size {}", other),
            }
            return;
        }

        let ty = self.set.get(e.id as u16).clone();
        let look_ahead_at_start = self.look_ahead;
        let context_at_start = self.context_hash;

        if e.end - e.start <= self.max_buffer_length {
            if let Some((size, start)) = self.find_buffer_size(self.pos - min_pos, in_repeat) {
                // Pack this node and any eligible preceding siblings into one
                // flat buffer child.
                let mut data = vec![0u32; size * 4];
                let mut index = data.len();
                let end_pos = self.pos - size;
                while self.pos > end_pos {
                    index = self.copy_to_buffer(start, &mut data, index);
                }
                debug_assert_eq!(index, 0);
                let buffer = TreeBuffer::new(self.set.clone(), data, e.end - start);
                positions.push(start - parent_start);
                children.push(Child::Buffer(Arc::new(buffer)));
                return;
            }
        }

        // Regular node: recurse over the children records.
        let end_pos = self.pos - e.size as usize;
        self.pos -= 1;
        let local_in_repeat = if ty.is_anonymous() { Some(e.id as u16) } else { None };
        let mut local_children = Vec::new();
        let mut local_positions = Vec::new();
        while self.pos > end_pos {
            let c = self.entry();
            if let Some(repeat) = local_in_repeat {
                // Nested repetition records of the same type are flattened
                // into one child list and rebalanced below.
                if c.size >= 0 && c.id as u16 == repeat {
                    self.pos -= 1;
                    continue;
                }
            }
            self.take_node(e.start, end_pos, &mut local_children, &mut local_positions, local_in_repeat);
        }
        local_children.reverse();
        local_positions.reverse();

        let node = if local_in_repeat.is_some() && local_children.len() > BRANCH_FACTOR {
            balance_range(
                &ty,
                &local_children,
                &local_positions,
                0,
                local_children.len(),
                0,
                e.end - e.start,
                context_at_start,
            )
        } else {
            make_tree(
                ty,
                local_children,
                local_positions,
                e.end - e.start,
                look_ahead_at_start.saturating_sub(e.end),
                context_at_start,
            )
        };
        positions.push(e.start - parent_start);
        children.push(node);
    }

    /// How many preceding entries (the current node first) can be packed
    /// into a single flat buffer: no special records, no anonymous nodes,
    /// and a combined span within the buffer budget. Returns the entry count
    /// and the leftmost start position, or `None` when a buffer isn't
    /// worthwhile.
    fn find_buffer_size(&self, max_entries: usize, in_repeat: Option<u16>) -> Option<(usize, u32)> {
        let min_pos = self.pos.saturating_sub(max_entries);
        let min_start = self.entry().end.saturating_sub(self.max_buffer_length);
        let mut pos = self.pos;
        let mut size = 0usize;
        let mut start = 0u32;
        while pos > min_pos {
            let e = self.buf[pos - 1];
            if e.size <= 0 {
                break;
            }
            let entries = e.size as usize;
            if pos < min_pos + entries || e.start < min_start {
                break;
            }
            if let Some(repeat) = in_repeat {
                if e.id as u16 == repeat {
                    break;
                }
            }
            let sub_start = pos - entries;
            let mut clean = true;
            for record in &self.buf[sub_start..pos] {
                if record.size <= 0 || self.set.get(record.id as u16).is_anonymous() {
                    clean = false;
                    break;
                }
            }
            if !clean {
                break;
            }
            start = e.start;
            size += entries;
            pos = sub_start;
        }
        if size > 1 {
            Some((size, start))
        } else {
            None
        }
    }

    /// Copy the subtree at the cursor into `data`, converting postorder
    /// records to the preorder quad layout. Writes backward from `index`;
    /// returns the index of the written node's first slot.
    fn copy_to_buffer(&mut self, buffer_start: u32, data: &mut [u32], mut index: usize) -> usize {
        let e = self.entry();
        self.pos -= 1;
        debug_assert!(e.size > 0);
        let start_index = index;
        if e.size > 1 {
            let end_pos = self.pos - (e.size as usize - 1);
            while self.pos > end_pos {
                index = self.copy_to_buffer(buffer_start, data, index);
            }
        }
        index -= 4;
        data[index] = e.id as u32;
        data[index + 1] = e.start - buffer_start;
        data[index + 2] = e.end - buffer_start;
        data[index + 3] = start_index as u32;
        index
    }
}

fn make_tree(
    ty: NodeType,
    children: Vec<Child>,
    positions: Vec<u32>,
    length: u32,
    look_ahead: u32,
    context_hash: u64,
) -> Child {
    let mut props = NodeProps::new();
    if context_hash != 0 {
        props.set(PropKey::CONTEXT_HASH, PropValue::Int(context_hash as i64));
    }
    if look_ahead > LOOKAHEAD_MARGIN {
        props.set(PropKey::LOOKAHEAD, PropValue::Int(look_ahead as i64));
    }
    Child::Tree(Arc::new(Tree::with_props(ty, children, positions, length, props)))
}

/// The number of leaf-level entries a child contributes when grouping a
/// repetition: nested nodes of the balanced (anonymous) type count by their
/// contents so rebalancing can redistribute reused subtrees.
fn node_size(balance_type: &NodeType, child: &Child) -> usize {
    match child {
        Child::Buffer(_) => 1,
        Child::Tree(tree) => {
            if !tree.ty.is_anonymous() || tree.ty != *balance_type {
                return 1;
            }
            let size: usize = tree
                .children
                .iter()
                .map(|c| node_size(balance_type, c))
                .sum();
            size.max(1)
        }
    }
}

/// Group `children[from..to]` into a tree of `balance_type` nodes with at
/// most [`BRANCH_FACTOR`] children per level, weighted by unwrapped size so
/// previously balanced (reused) subtrees redistribute instead of stacking.
/// `positions` are relative to the same origin as `start`.
#[allow(clippy::too_many_arguments)]
pub(crate) fn balance_range(
    balance_type: &NodeType,
    children: &[Child],
    positions: &[u32],
    from: usize,
    to: usize,
    start: u32,
    length: u32,
    context_hash: u64,
) -> Child {
    let total: usize = (from..to).map(|i| node_size(balance_type, &children[i])).sum();
    let max_child = (total * 3 / 2 + BRANCH_FACTOR - 1) / BRANCH_FACTOR;
    let mut local_children = Vec::new();
    let mut local_positions = Vec::new();
    divide(
        balance_type,
        children,
        positions,
        from,
        to,
        0,
        max_child,
        start,
        context_hash,
        &mut local_children,
        &mut local_positions,
    );
    make_tree(
        balance_type.clone(),
        local_children,
        local_positions,
        length,
        0,
        context_hash,
    )
}

#[allow(clippy::too_many_arguments)]
fn divide(
    balance_type: &NodeType,
    children: &[Child],
    positions: &[u32],
    from: usize,
    to: usize,
    offset: u32,
    max_child: usize,
    start: u32,
    context_hash: u64,
    out_children: &mut Vec<Child>,
    out_positions: &mut Vec<u32>,
) {
    let mut i = from;
    while i < to {
        let group_from = i;
        let group_start = positions[i];
        let mut group_size = node_size(balance_type, &children[i]);
        i += 1;
        while i < to {
            let next_size = node_size(balance_type, &children[i]);
            if group_size + next_size >= max_child {
                break;
            }
            group_size += next_size;
            i += 1;
        }
        if i == group_from + 1 {
            if group_size > max_child {
                // A single oversized node of the balanced type: dissolve it
                // and redistribute its children.
                if let Child::Tree(only) = &children[group_from] {
                    divide(
                        balance_type,
                        &only.children,
                        &only.positions,
                        0,
                        only.children.len(),
                        positions[group_from] + offset,
                        max_child,
                        start,
                        context_hash,
                        out_children,
                        out_positions,
                    );
                    continue;
                }
            }
            out_children.push(children[group_from].clone());
        } else {
            let group_length =
                positions[i - 1] + children[i - 1].length() - group_start;
            out_children.push(balance_range(
                balance_type,
                children,
                positions,
                group_from,
                i,
                group_start,
                group_length,
                context_hash,
            ));
        }
        out_positions.push(group_start + offset - start);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set() -> NodeSet {
        NodeSet::new(vec![
            NodeType::error(),
            NodeType::new(1, "Top", NodeType::TOP, NodeProps::new()),
            NodeType::new(2, "Word", 0, NodeProps::new()),
            NodeType::new(3, "Group", 0, NodeProps::new()),
            NodeType::new(4, "Items", NodeType::ANONYMOUS, NodeProps::new()),
        ])
    }

    fn leaf(id: i32, start: u32, end: u32) -> BufferEntry {
        BufferEntry { id, start, end, size: 1 }
    }

    #[test]
    fn build_small_forest_uses_buffer() {
        // Two words under the top node: (Word 0..3) (Word 4..7)
        let data = BuildData {
            buffer: vec![leaf(2, 0, 3), leaf(2, 4, 7)],
            reused: Vec::new(),
            set: set(),
            top: set().get(1).clone(),
            start: 0,
            length: 7,
            context_hash: 0,
            look_ahead: 0,
            max_buffer_length: DEFAULT_BUFFER_LENGTH,
        };
        let tree = Tree::build(data);
        assert_eq!(tree.length(), 7);
        assert_eq!(tree.children().len(), 1);
        assert!(matches!(tree.children()[0], Child::Buffer(_)));
        tree.validate().expect("valid tree");
    }

    #[test]
    fn build_nested_group() {
        // Group 0..7 containing two words, then a trailing word 8..9.
        let buffer = vec![
            leaf(2, 1, 3),
            leaf(2, 4, 6),
            BufferEntry { id: 3, start: 0, end: 7, size: 3 },
            leaf(2, 8, 9),
        ];
        let data = BuildData {
            buffer,
            reused: Vec::new(),
            set: set(),
            top: set().get(1).clone(),
            start: 0,
            length: 9,
            context_hash: 0,
            look_ahead: 0,
            max_buffer_length: DEFAULT_BUFFER_LENGTH,
        };
        let tree = Tree::build(data);
        tree.validate().expect("valid tree");
        assert_eq!(tree.length(), 9);
        // The group and trailing word pack into one flat buffer.
        let total: u32 = tree.children().iter().map(|c| c.length()).sum();
        assert!(total <= 9);
    }

    #[test]
    fn build_balances_long_repetition() {
        // Items node with 40 words, nested in the left-recursive shape the
        // parser produces: each Items record wraps the previous one.
        let mut buffer = Vec::new();
        let mut size = 0i32;
        for i in 0..40u32 {
            buffer.push(leaf(2, i * 2, i * 2 + 1));
            size += 1;
            buffer.push(BufferEntry { id: 4, start: 0, end: i * 2 + 1, size: size + 1 });
            size += 1;
        }
        let data = BuildData {
            buffer,
            reused: Vec::new(),
            set: set(),
            top: set().get(1).clone(),
            start: 0,
            length: 79,
            context_hash: 0,
            look_ahead: 0,
            max_buffer_length: 4, // force tree encoding
        };
        let tree = Tree::build(data);
        tree.validate().expect("valid tree");
        // One (anonymous) repetition child, balanced below the branch factor.
        assert_eq!(tree.children().len(), 1);
        let items = tree.children()[0].as_tree().expect("tree child");
        assert!(items.ty().is_anonymous());
        assert!(items.children().len() <= 8);
    }

    #[test]
    fn context_records_restore_earlier_hashes() {
        let hash: u64 = 0xdead_beef_0000_0042;
        let buffer = vec![
            leaf(2, 0, 3),
            BufferEntry {
                id: 0,
                start: (hash >> 32) as u32,
                end: hash as u32,
                size: BufferEntry::CONTEXT,
            },
            leaf(2, 4, 7),
        ];
        let data = BuildData {
            buffer,
            reused: Vec::new(),
            set: set(),
            top: set().get(1).clone(),
            start: 0,
            length: 7,
            context_hash: 99,
            look_ahead: 0,
            max_buffer_length: 0, // keep every node a real tree
        };
        let tree = Tree::build(data);
        // The word after the record (in emit order) was built under hash 99,
        // the one before it under the recorded hash.
        let first = tree.children()[0].as_tree().unwrap();
        let second = tree.children()[1].as_tree().unwrap();
        assert_eq!(first.context_hash(), Some(hash));
        assert_eq!(second.context_hash(), Some(99));
    }
}
