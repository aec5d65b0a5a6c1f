//! Mixed parsing: nested grammars mounted on host nodes
//!
//!     A grammar's `NestHook` can claim a node of the host tree for a
//!     different parser, optionally narrowing the claim to an overlay — a
//!     set of disjoint ranges inside the node. The engine runs the inner
//!     parser over exactly those ranges and records the result as a
//!     `MOUNT` prop on the covering node; the host tree never contains
//!     foreign node ids, and consumers descend through the mount (see
//!     [`Tree::resolve_inner`](trellis_tree::Tree::resolve_inner)).
//!
//!     Incremental behavior falls out of host-tree reuse: a host node that
//!     survives an edit by reference keeps its mount untouched, so only
//!     regions whose host node was rebuilt are re-nested — and those look
//!     up the previous mount in the old fragments to seed the inner
//!     parse's own reuse.

use std::sync::Arc;

use trellis_tree::{
    attach, IncrementalParser, Input, MountedTree, NodeType, PartialParse, Range, Side, Tree,
    TreeExt, TreeFragment,
};

use crate::parse::{LrParser, Parse};

/// What a `NestHook` returns for a claimed node.
pub struct NestSpec {
    pub parser: Arc<dyn IncrementalParser + Send + Sync>,
    /// Sub-ranges of the node to parse; `None` claims the whole node.
    pub overlay: Option<Vec<Range>>,
}

/// Decides, per host node, whether a nested parser takes over.
pub trait NestHook: Send + Sync {
    fn nest(&self, ty: &NodeType, from: u32, to: u32, input: &dyn Input) -> Option<NestSpec>;
}

struct WorkItem {
    from: u32,
    to: u32,
    type_id: u16,
    ranges: Vec<Range>,
    overlay: Option<Vec<Range>>,
    parser: Arc<dyn IncrementalParser + Send + Sync>,
}

/// A `PartialParse` that first runs the host grammar, then resolves every
/// nest claim. Each `advance` call completes one unit: a host-parse step,
/// or one nested region.
pub(crate) struct MixedParse<'a> {
    parser: &'a LrParser,
    input: &'a dyn Input,
    base: Parse<'a>,
    fragments: Vec<TreeFragment>,
    host: Option<Arc<Tree>>,
    work: Vec<WorkItem>,
}

impl<'a> MixedParse<'a> {
    pub(crate) fn new(
        parser: &'a LrParser,
        input: &'a dyn Input,
        fragments: &[TreeFragment],
        ranges: &[Range],
    ) -> MixedParse<'a> {
        MixedParse {
            base: Parse::new(parser, input, fragments, ranges, false),
            parser,
            input,
            fragments: fragments.to_vec(),
            host: None,
            work: Vec::new(),
        }
    }

    /// Walk the finished host tree and collect nest claims. Nodes that were
    /// reused with their mount intact are skipped wholesale.
    fn scan(&mut self) {
        let Some(hook) = self.parser.nest_hook() else { return };
        let Some(host) = self.host.clone() else { return };
        let mut cursor = host.cursor();
        loop {
            let mut claimed = cursor.tree().map_or(false, |t| t.mounted().is_some());
            if !claimed {
                let ty = cursor.node_type();
                let (from, to) = (cursor.from(), cursor.to());
                if let Some(spec) = hook.nest(&ty, from, to, self.input) {
                    let ranges = spec
                        .overlay
                        .clone()
                        .unwrap_or_else(|| vec![Range::new(from, to)]);
                    if ranges.iter().any(|r| !r.is_empty()) {
                        self.work.push(WorkItem {
                            from,
                            to,
                            type_id: ty.id(),
                            ranges,
                            overlay: spec.overlay,
                            parser: spec.parser,
                        });
                        claimed = true;
                    }
                }
            }
            let moved = if claimed {
                // Never descend into a claimed subtree.
                loop {
                    if cursor.next_sibling() {
                        break true;
                    }
                    if !cursor.parent() {
                        break false;
                    }
                }
            } else {
                cursor.next_node()
            };
            if !moved {
                break;
            }
        }
    }

    /// Look up the previous parse's mount for this region, so the inner
    /// parse can reuse its own old tree.
    fn inner_fragments(&self, item: &WorkItem) -> Vec<TreeFragment> {
        for fragment in &self.fragments {
            if fragment.offset != 0 || fragment.from > item.from || fragment.to < item.to {
                continue;
            }
            let mid = item.from + (item.to - item.from) / 2;
            let mut node = Some(fragment.tree.resolve(mid, Side::Around));
            while let Some(n) = node {
                if n.from() == item.from && n.to() == item.to {
                    if let Some(mount) = n.tree().mounted() {
                        if mount.parser_name.as_ref() == item.parser.name() {
                            return TreeFragment::add_tree(mount.tree.clone(), &[], false);
                        }
                    }
                }
                node = n.parent();
            }
        }
        Vec::new()
    }
}

impl PartialParse for MixedParse<'_> {
    fn advance(&mut self) -> Option<Arc<Tree>> {
        if self.host.is_none() {
            let tree = self.base.advance()?;
            self.host = Some(tree);
            self.scan();
            if self.work.is_empty() {
                return self.host.clone();
            }
            return None;
        }
        if let Some(item) = self.work.pop() {
            let fragments = self.inner_fragments(&item);
            let tree = {
                let mut inner = item.parser.start_parse(self.input, &fragments, &item.ranges);
                loop {
                    if let Some(tree) = inner.advance() {
                        break tree;
                    }
                }
            };
            let mount = MountedTree::new(tree, item.overlay.clone(), item.parser.name().into());
            if let Some(host) = &self.host {
                if let Some(new_host) = attach(host, item.from, item.to, item.type_id, mount) {
                    self.host = Some(new_host);
                }
            }
            if self.work.is_empty() {
                return self.host.clone();
            }
            return None;
        }
        self.host.clone()
    }

    fn parsed_pos(&self) -> u32 {
        match &self.host {
            Some(tree) => tree.length(),
            None => self.base.parsed_pos(),
        }
    }

    fn stop_at(&mut self, pos: u32) {
        self.base.stop_at(pos);
    }

    fn stopped_at(&self) -> Option<u32> {
        self.base.stopped_at()
    }
}
