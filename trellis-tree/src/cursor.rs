//! Tree traversal
//!
//!     `TreeCursor` is the cheap, allocation-light way to walk a tree: it
//!     keeps a frame stack (node + absolute start) and descends into
//!     `TreeBuffer` regions lazily, without ever materializing buffer nodes.
//!     Anonymous nodes (balancing levels, repetition wrappers) are
//!     transparent: the cursor steps through them as if their children
//!     belonged to the named parent.
//!
//!     `SyntaxNode` is the stable handle: a snapshot of the cursor's path.
//!     When the handle points inside a buffer, the buffer-local subtree is
//!     materialized once; siblings stay flat.
//!
//!     There are no parent back-pointers anywhere: a cursor or node handle
//!     owns its path, so trees stay acyclic and freely shareable.

use std::sync::Arc;

use crate::tree::{Child, Side, Tree, TreeBuffer};
use crate::types::NodeType;

#[derive(Clone)]
enum Frame {
    Tree {
        node: Arc<Tree>,
        /// Absolute start position.
        start: u32,
        /// Index of this node in the parent tree's child list.
        index: usize,
    },
    Buf {
        buffer: Arc<TreeBuffer>,
        /// Absolute position of the buffer's origin.
        buf_start: u32,
        /// Slot of the current entry.
        slot: usize,
        /// Index of the buffer in the parent tree's child list.
        index: usize,
    },
}

/// A mutable walker over a tree. Every move either succeeds and repositions
/// the cursor or fails and leaves it where it was.
pub struct TreeCursor {
    frames: Vec<Frame>,
}

impl TreeCursor {
    pub fn new(root: Arc<Tree>) -> TreeCursor {
        TreeCursor {
            frames: vec![Frame::Tree {
                node: root,
                start: 0,
                index: 0,
            }],
        }
    }

    pub fn node_type(&self) -> NodeType {
        match self.frames.last().expect("cursor has a position") {
            Frame::Tree { node, .. } => node.ty().clone(),
            Frame::Buf { buffer, slot, .. } => buffer.type_at(*slot).clone(),
        }
    }

    pub fn from(&self) -> u32 {
        match self.frames.last().expect("cursor has a position") {
            Frame::Tree { start, .. } => *start,
            Frame::Buf {
                buffer,
                buf_start,
                slot,
                ..
            } => buf_start + buffer.from_at(*slot),
        }
    }

    pub fn to(&self) -> u32 {
        match self.frames.last().expect("cursor has a position") {
            Frame::Tree { node, start, .. } => start + node.length(),
            Frame::Buf {
                buffer,
                buf_start,
                slot,
                ..
            } => buf_start + buffer.to_at(*slot),
        }
    }

    /// The `Tree` object at the cursor, when the cursor is not inside a
    /// buffer region.
    pub fn tree(&self) -> Option<&Arc<Tree>> {
        match self.frames.last()? {
            Frame::Tree { node, .. } => Some(node),
            Frame::Buf { .. } => None,
        }
    }

    pub fn first_child(&mut self) -> bool {
        self.enter_child(true)
    }

    pub fn last_child(&mut self) -> bool {
        self.enter_child(false)
    }

    pub fn next_sibling(&mut self) -> bool {
        self.sibling(true)
    }

    pub fn prev_sibling(&mut self) -> bool {
        self.sibling(false)
    }

    /// Move to the parent node, skipping anonymous levels.
    pub fn parent(&mut self) -> bool {
        if self.frames.len() <= 1 {
            return false;
        }
        self.frames.pop();
        while let Some(Frame::Tree { node, .. }) = self.frames.last() {
            if node.ty().is_anonymous() && self.frames.len() > 1 {
                self.frames.pop();
            } else {
                break;
            }
        }
        true
    }

    /// Enter the child covering `pos` with the given side bias. One level of
    /// (named) descent; returns false when no child covers the position.
    pub fn enter(&mut self, pos: u32, side: Side) -> bool {
        let saved = self.frames.clone();
        if self.enter_inner(pos, side) {
            true
        } else {
            self.frames = saved;
            false
        }
    }

    /// Preorder traversal step over named nodes.
    pub fn next_node(&mut self) -> bool {
        if self.first_child() {
            return true;
        }
        loop {
            if self.next_sibling() {
                return true;
            }
            if !self.parent() {
                return false;
            }
        }
    }

    /// A stable handle for the current node. Buffer-local subtrees are
    /// materialized; tree nodes are shared.
    pub fn node(&self) -> SyntaxNode {
        let mut path = Vec::new();
        for frame in &self.frames {
            match frame {
                Frame::Tree { node, start, .. } => path.push((node.clone(), *start)),
                Frame::Buf {
                    buffer,
                    buf_start,
                    slot,
                    ..
                } => path.push((
                    Arc::new(buffer.materialize(*slot)),
                    buf_start + buffer.from_at(*slot),
                )),
            }
        }
        SyntaxNode { path }
    }

    fn enter_child(&mut self, forward: bool) -> bool {
        match self.frames.last().expect("cursor has a position").clone() {
            Frame::Tree { node, start, .. } => {
                let order: Vec<usize> = if forward {
                    (0..node.children().len()).collect()
                } else {
                    (0..node.children().len()).rev().collect()
                };
                self.enter_tree_children(&node, start, &order, forward)
            }
            Frame::Buf { buffer, buf_start, slot, index } => {
                let from = slot + 4;
                let to = buffer.end_slot_at(slot);
                if from >= to {
                    return false;
                }
                let child_slot = if forward {
                    from
                } else {
                    last_slot_in(&buffer, from, to)
                };
                self.frames.push(Frame::Buf {
                    buffer,
                    buf_start,
                    slot: child_slot,
                    index,
                });
                true
            }
        }
    }

    /// Try to position the cursor on the first acceptable child of `node`
    /// among the given child indices, descending through anonymous children.
    fn enter_tree_children(
        &mut self,
        node: &Arc<Tree>,
        start: u32,
        indices: &[usize],
        forward: bool,
    ) -> bool {
        for &i in indices {
            let child_start = start + node.positions()[i];
            match &node.children()[i] {
                Child::Tree(child) => {
                    let frame = Frame::Tree {
                        node: child.clone(),
                        start: child_start,
                        index: i,
                    };
                    if child.ty().is_anonymous() {
                        self.frames.push(frame);
                        if self.enter_child(forward) {
                            return true;
                        }
                        self.frames.pop();
                    } else {
                        self.frames.push(frame);
                        return true;
                    }
                }
                Child::Buffer(buffer) => {
                    if buffer.slot_count() == 0 {
                        continue;
                    }
                    let slot = if forward {
                        0
                    } else {
                        last_slot_in(buffer, 0, buffer.slot_count())
                    };
                    self.frames.push(Frame::Buf {
                        buffer: buffer.clone(),
                        buf_start: child_start,
                        slot,
                        index: i,
                    });
                    return true;
                }
            }
        }
        false
    }

    fn sibling(&mut self, forward: bool) -> bool {
        let saved = self.frames.clone();
        if self.sibling_inner(forward) {
            true
        } else {
            self.frames = saved;
            false
        }
    }

    fn sibling_inner(&mut self, forward: bool) -> bool {
        loop {
            if self.frames.len() <= 1 {
                return false;
            }
            let current = self.frames.pop().expect("non-empty");
            let child_index = match current {
                Frame::Buf { buffer, buf_start, slot, index } => {
                    // Sibling range within the buffer: the parent entry's
                    // children, or the buffer's top level.
                    if let Some(Frame::Buf { slot: parent_slot, .. }) = self.frames.last() {
                        let scope_from = *parent_slot + 4;
                        let scope_to = buffer.end_slot_at(*parent_slot);
                        let next = if forward {
                            let next = buffer.end_slot_at(slot);
                            (next < scope_to).then_some(next)
                        } else {
                            prev_slot_in(&buffer, scope_from, slot)
                        };
                        if let Some(next) = next {
                            self.frames.push(Frame::Buf {
                                buffer,
                                buf_start,
                                slot: next,
                                index,
                            });
                            return true;
                        }
                        // The parent buffer entry is a named node; sibling
                        // movement stops at it.
                        return false;
                    }
                    let next = if forward {
                        let next = buffer.end_slot_at(slot);
                        (next < buffer.slot_count()).then_some(next)
                    } else {
                        prev_slot_in(&buffer, 0, slot)
                    };
                    if let Some(next) = next {
                        self.frames.push(Frame::Buf {
                            buffer,
                            buf_start,
                            slot: next,
                            index,
                        });
                        return true;
                    }
                    // Fall through to the buffer's position in the parent
                    // tree's child list.
                    index
                }
                Frame::Tree { index, .. } => index,
            };
            let (node, start) = match self.frames.last() {
                Some(Frame::Tree { node, start, .. }) => (node.clone(), *start),
                _ => return false,
            };
            let indices: Vec<usize> = if forward {
                (child_index + 1..node.children().len()).collect()
            } else {
                (0..child_index).rev().collect()
            };
            if self.enter_tree_children(&node, start, &indices, forward) {
                return true;
            }
            // Exhausted this level: movement continues upward only through
            // anonymous wrappers.
            if !node.ty().is_anonymous() || self.frames.len() <= 1 {
                return false;
            }
        }
    }

    fn enter_inner(&mut self, pos: u32, side: Side) -> bool {
        match self.frames.last().expect("cursor has a position").clone() {
            Frame::Tree { node, start, .. } => self.enter_tree_at(&node, start, pos, side),
            Frame::Buf { buffer, buf_start, slot, index } => {
                let from = slot + 4;
                let to = buffer.end_slot_at(slot);
                let mut child = from;
                while child < to {
                    let cf = buf_start + buffer.from_at(child);
                    let ct = buf_start + buffer.to_at(child);
                    if covers(cf, ct, pos, side) {
                        self.frames.push(Frame::Buf {
                            buffer,
                            buf_start,
                            slot: child,
                            index,
                        });
                        return true;
                    }
                    child = buffer.end_slot_at(child);
                }
                false
            }
        }
    }

    fn enter_tree_at(&mut self, node: &Arc<Tree>, start: u32, pos: u32, side: Side) -> bool {
        for i in 0..node.children().len() {
            let child_start = start + node.positions()[i];
            let child_end = child_start + node.children()[i].length();
            if !covers(child_start, child_end, pos, side) {
                continue;
            }
            match &node.children()[i] {
                Child::Tree(child) => {
                    self.frames.push(Frame::Tree {
                        node: child.clone(),
                        start: child_start,
                        index: i,
                    });
                    if child.ty().is_anonymous() {
                        if self.enter_inner(pos, side) {
                            return true;
                        }
                        self.frames.pop();
                        continue;
                    }
                    return true;
                }
                Child::Buffer(buffer) => {
                    let mut slot = 0;
                    while slot < buffer.slot_count() {
                        let cf = child_start + buffer.from_at(slot);
                        let ct = child_start + buffer.to_at(slot);
                        if covers(cf, ct, pos, side) {
                            self.frames.push(Frame::Buf {
                                buffer: buffer.clone(),
                                buf_start: child_start,
                                slot,
                                index: i,
                            });
                            return true;
                        }
                        slot = buffer.end_slot_at(slot);
                    }
                }
            }
        }
        false
    }
}

fn covers(from: u32, to: u32, pos: u32, side: Side) -> bool {
    match side {
        Side::Before => from < pos && pos <= to,
        Side::After => from <= pos && pos < to,
        Side::Around => from <= pos && pos <= to,
    }
}

fn last_slot_in(buffer: &TreeBuffer, from: usize, to: usize) -> usize {
    let mut slot = from;
    let mut last = from;
    while slot < to {
        last = slot;
        slot = buffer.end_slot_at(slot);
    }
    last
}

fn prev_slot_in(buffer: &TreeBuffer, scope_from: usize, before: usize) -> Option<usize> {
    let mut slot = scope_from;
    let mut prev = None;
    while slot < before {
        prev = Some(slot);
        slot = buffer.end_slot_at(slot);
    }
    prev
}

/// A stable node handle: the path of tree nodes (with absolute starts) from
/// the root down. Handles into buffer regions hold materialized nodes.
#[derive(Clone)]
pub struct SyntaxNode {
    /// Root-first path; the last element is this node. Anonymous wrapper
    /// nodes are present in the path but skipped by the accessors.
    path: Vec<(Arc<Tree>, u32)>,
}

impl SyntaxNode {
    pub fn root(tree: Arc<Tree>) -> SyntaxNode {
        SyntaxNode {
            path: vec![(tree, 0)],
        }
    }

    pub fn tree(&self) -> &Arc<Tree> {
        &self.path.last().expect("non-empty path").0
    }

    pub fn node_type(&self) -> NodeType {
        self.tree().ty().clone()
    }

    pub fn from(&self) -> u32 {
        self.path.last().expect("non-empty path").1
    }

    pub fn to(&self) -> u32 {
        let (tree, start) = self.path.last().expect("non-empty path");
        start + tree.length()
    }

    pub fn parent(&self) -> Option<SyntaxNode> {
        let mut path = self.path.clone();
        path.pop()?;
        while let Some((tree, _)) = path.last() {
            if tree.ty().is_anonymous() && path.len() > 1 {
                path.pop();
            } else {
                break;
            }
        }
        if path.is_empty() {
            None
        } else {
            Some(SyntaxNode { path })
        }
    }

    /// The nearest ancestor (or this node) whose type name or group matches.
    pub fn ancestor_in(&self, name: &str) -> Option<SyntaxNode> {
        let mut node = Some(self.clone());
        while let Some(n) = node {
            if n.node_type().is_in(name) {
                return Some(n);
            }
            node = n.parent();
        }
        None
    }

    /// A cursor positioned at this node. Traversal from a materialized
    /// buffer handle continues over the materialized copy.
    pub fn cursor(&self) -> TreeCursor {
        let mut frames = Vec::with_capacity(self.path.len());
        for (i, (tree, start)) in self.path.iter().enumerate() {
            frames.push(Frame::Tree {
                node: tree.clone(),
                start: *start,
                index: i,
            });
        }
        TreeCursor { frames }
    }
}

impl std::fmt::Debug for SyntaxNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "SyntaxNode({} {}..{})",
            self.node_type().name(),
            self.from(),
            self.to()
        )
    }
}

/// Traversal entry points for shared trees. Implemented on `Arc<Tree>`
/// because cursors and node handles keep the tree alive through shared
/// ownership.
pub trait TreeExt {
    fn cursor(&self) -> TreeCursor;

    /// Descend to the innermost node covering `pos` with the given side
    /// bias.
    fn resolve(&self, pos: u32, side: Side) -> SyntaxNode;

    /// Like [`resolve`](TreeExt::resolve), but descends through mounted
    /// overlays whose region covers `pos`.
    fn resolve_inner(&self, pos: u32, side: Side) -> SyntaxNode;

    /// Structural equality: same named nodes with the same types and spans
    /// in the same order, regardless of buffer/tree encoding choices.
    fn structurally_eq(&self, other: &Arc<Tree>) -> bool;
}

impl TreeExt for Arc<Tree> {
    fn cursor(&self) -> TreeCursor {
        TreeCursor::new(self.clone())
    }

    fn resolve(&self, pos: u32, side: Side) -> SyntaxNode {
        let mut cursor = self.cursor();
        while cursor.enter(pos, side) {}
        cursor.node()
    }

    fn resolve_inner(&self, pos: u32, side: Side) -> SyntaxNode {
        let mut cursor = self.cursor();
        loop {
            let descended = cursor.enter(pos, side);
            if let Some(tree) = cursor.tree() {
                if let Some(mount) = tree.mounted() {
                    let from = cursor.from();
                    let to = cursor.to();
                    if mount.covers(pos, from, to) {
                        return mount.tree.resolve_inner(pos, side);
                    }
                }
            }
            if !descended {
                return cursor.node();
            }
        }
    }

    fn structurally_eq(&self, other: &Arc<Tree>) -> bool {
        if self.length() != other.length() || self.ty().id() != other.ty().id() {
            return false;
        }
        let mut a = self.cursor();
        let mut b = other.cursor();
        loop {
            let a_next = a.next_node();
            let b_next = b.next_node();
            if a_next != b_next {
                return false;
            }
            if !a_next {
                return true;
            }
            if a.node_type().id() != b.node_type().id() || a.from() != b.from() || a.to() != b.to()
            {
                return false;
            }
        }
    }
}
