//! Tree fragments: carrying subtrees across edits
//!
//!     After a parse, the produced tree is wrapped in fragments; after an
//!     edit, `apply_changes` maps those fragments through the changed
//!     ranges. A surviving fragment is a claim that its tree, shifted by
//!     `offset`, still correctly describes `[from, to)` of the *new*
//!     document. The parser walks fragments with a cursor and splices
//!     matching old nodes into the new parse without re-tokenizing them —
//!     this is what makes re-parsing proportional to the edit, not to the
//!     document.
//!
//!     Fragment edges that touch an edit are marked open (`open_start` /
//!     `open_end`): nodes there saw text that has since changed, so the
//!     reuse cursor backs off inward to the nearest provably unaffected
//!     boundary instead of trusting them verbatim.
//!
//!     `ChangedRange` is the interchange format at the edit boundary and
//!     the only persisted structure that matters for cross-version
//!     compatibility; when old fragments don't apply, the cost is a full
//!     reparse, never a crash.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::tree::Tree;

/// Gaps between edits shorter than this are not worth keeping as separate
/// reuse windows.
pub const DEFAULT_MIN_GAP: u32 = 128;

/// One edited span: `[from_a, to_a)` in the old document was replaced by
/// `[from_b, to_b)` in the new one. Lists of changes are sorted and
/// non-overlapping in both coordinate spaces.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ChangedRange {
    pub from_a: u32,
    pub to_a: u32,
    pub from_b: u32,
    pub to_b: u32,
}

/// A reusable piece of a previous parse. Positions in `tree` are new-document
/// positions plus `offset`.
#[derive(Clone, Debug)]
pub struct TreeFragment {
    pub from: u32,
    pub to: u32,
    pub tree: Arc<Tree>,
    pub offset: i64,
    /// The fragment's start edge touches edited text and cannot be trusted.
    pub open_start: bool,
    /// Same for the end edge.
    pub open_end: bool,
}

impl TreeFragment {
    /// Wrap a freshly produced tree as the fragment set for the next parse.
    /// Fragments of an older generation that reach past the tree are kept
    /// (they can cover input the new parse never reached, e.g. after a
    /// stopped parse).
    pub fn add_tree(tree: Arc<Tree>, prev: &[TreeFragment], partial: bool) -> Vec<TreeFragment> {
        let mut result = vec![TreeFragment {
            from: 0,
            to: tree.length(),
            tree: tree.clone(),
            offset: 0,
            open_start: false,
            open_end: partial,
        }];
        for fragment in prev {
            if fragment.to > tree.length() {
                result.push(fragment.clone());
            }
        }
        result
    }

    /// Map `fragments` through `changes`. Fragment windows shrink to the
    /// unedited gaps between changes (gaps under `min_gap` are dropped
    /// entirely), offsets accumulate the size difference of preceding
    /// edits, and window edges produced by cutting are marked open.
    pub fn apply_changes(
        fragments: &[TreeFragment],
        changes: &[ChangedRange],
        min_gap: u32,
    ) -> Vec<TreeFragment> {
        if changes.is_empty() {
            return fragments.to_vec();
        }
        let mut result = Vec::new();
        let mut iter = fragments.iter();
        let mut next_f = iter.next();
        let mut change_index = 0usize;
        let mut pos: u32 = 0;
        // Accumulated old-minus-new length of the changes before `pos`;
        // converts old-document positions to new-document positions.
        let mut off: i64 = 0;
        loop {
            let next_c = changes.get(change_index);
            let next_pos = next_c.map(|c| c.from_a).unwrap_or(u32::MAX);
            if next_pos as i64 - pos as i64 >= min_gap as i64 {
                while let Some(fragment) = next_f {
                    if fragment.from >= next_pos {
                        break;
                    }
                    if pos >= fragment.from || next_pos <= fragment.to || off != 0 {
                        let cut_from = fragment.from.max(pos) as i64 - off;
                        let cut_to = fragment.to.min(next_pos) as i64 - off;
                        if cut_from < cut_to {
                            result.push(TreeFragment {
                                from: cut_from as u32,
                                to: cut_to as u32,
                                tree: fragment.tree.clone(),
                                offset: fragment.offset + off,
                                open_start: fragment.open_start || change_index > 0,
                                open_end: fragment.open_end || next_c.is_some(),
                            });
                        }
                    } else {
                        result.push(fragment.clone());
                    }
                    if fragment.to > next_pos {
                        break;
                    }
                    next_f = iter.next();
                }
            }
            let Some(change) = next_c else { break };
            pos = change.to_a;
            off += change.to_a as i64 - change.to_b as i64;
            change_index += 1;
        }
        result
    }

    /// The position in the fragment's tree corresponding to a new-document
    /// position.
    pub fn tree_pos(&self, doc_pos: u32) -> u32 {
        (doc_pos as i64 + self.offset) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Tree;
    use crate::types::{NodeProps, NodeType};

    fn dummy_tree(length: u32) -> Arc<Tree> {
        let ty = NodeType::new(0, "\u{26a0}", NodeType::ERROR, NodeProps::new());
        Arc::new(Tree::with_props(ty, Vec::new(), Vec::new(), length, NodeProps::new()))
    }

    fn fragments_for(length: u32) -> Vec<TreeFragment> {
        TreeFragment::add_tree(dummy_tree(length), &[], false)
    }

    #[test]
    fn no_changes_keeps_fragments() {
        let fragments = fragments_for(100);
        let mapped = TreeFragment::apply_changes(&fragments, &[], 1);
        assert_eq!(mapped.len(), 1);
        assert_eq!((mapped[0].from, mapped[0].to), (0, 100));
        assert!(!mapped[0].open_start && !mapped[0].open_end);
    }

    #[test]
    fn insert_splits_and_shifts() {
        let fragments = fragments_for(100);
        // Insert 4 characters at position 50.
        let changes = [ChangedRange {
            from_a: 50,
            to_a: 50,
            from_b: 50,
            to_b: 54,
        }];
        let mapped = TreeFragment::apply_changes(&fragments, &changes, 1);
        assert_eq!(mapped.len(), 2);
        assert_eq!((mapped[0].from, mapped[0].to), (0, 50));
        assert!(!mapped[0].open_start);
        assert!(mapped[0].open_end);
        assert_eq!(mapped[0].offset, 0);
        // The right half moved 4 to the right in the new document; its tree
        // positions stay where they were.
        assert_eq!((mapped[1].from, mapped[1].to), (54, 104));
        assert!(mapped[1].open_start);
        assert!(!mapped[1].open_end);
        assert_eq!(mapped[1].tree_pos(54), 50);
    }

    #[test]
    fn narrow_gap_is_dropped() {
        let fragments = fragments_for(100);
        let changes = [
            ChangedRange { from_a: 10, to_a: 12, from_b: 10, to_b: 12 },
            ChangedRange { from_a: 20, to_a: 22, from_b: 20, to_b: 22 },
        ];
        let mapped = TreeFragment::apply_changes(&fragments, &changes, 32);
        // The 12..20 sliver between the edits is below min_gap; only the
        // leading and trailing windows survive. The leading window is also
        // below min_gap? No: 0..10 is below 32 as well, so just the tail.
        assert_eq!(mapped.len(), 1);
        assert_eq!((mapped[0].from, mapped[0].to), (22, 100));
        assert!(mapped[0].open_start);
    }

    #[test]
    fn deletion_shifts_left() {
        let fragments = fragments_for(100);
        // Delete characters 30..40.
        let changes = [ChangedRange {
            from_a: 30,
            to_a: 40,
            from_b: 30,
            to_b: 30,
        }];
        let mapped = TreeFragment::apply_changes(&fragments, &changes, 1);
        assert_eq!(mapped.len(), 2);
        assert_eq!((mapped[1].from, mapped[1].to), (30, 90));
        // New position 30 corresponds to old tree position 40.
        assert_eq!(mapped[1].tree_pos(30), 40);
    }

    #[test]
    fn add_tree_keeps_fragments_past_the_end() {
        let old = fragments_for(200);
        let result = TreeFragment::add_tree(dummy_tree(100), &old, true);
        assert_eq!(result.len(), 2);
        assert!(result[0].open_end);
        assert_eq!((result[1].from, result[1].to), (0, 200));
    }
}
