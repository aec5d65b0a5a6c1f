//! Incremental reuse: fragments carried across edits.

use std::collections::HashSet;
use std::sync::Arc;

use trellis_lr::testing::paren_grammar;
use trellis_tree::{
    ChangedRange, Child, IncrementalParser, PropKey, Range, StringInput, Tree, TreeFragment,
};

/// A document of `units` top-level paren groups, each wide enough to be
/// stored as a real tree rather than packed into a flat buffer.
fn wide_document(units: usize) -> String {
    let unit = format!("({})", "()".repeat(600));
    unit.repeat(units)
}

/// Descend to the deepest `Tree`-encoded node containing `pos`, returning
/// it with its absolute start.
fn deepest_tree_at(root: &Arc<Tree>, pos: u32) -> (Arc<Tree>, u32) {
    let mut node = root.clone();
    let mut start = 0;
    loop {
        let mut next = None;
        for (i, child) in node.children().iter().enumerate() {
            let child_start = start + node.positions()[i];
            let child_end = child_start + child.length();
            if pos >= child_start && pos < child_end {
                if let Child::Tree(tree) = child {
                    next = Some((tree.clone(), child_start));
                }
                break;
            }
        }
        match next {
            Some((tree, tree_start)) => {
                node = tree;
                start = tree_start;
            }
            None => return (node, start),
        }
    }
}

fn collect_tree_ptrs(tree: &Arc<Tree>, out: &mut HashSet<usize>) {
    for child in tree.children() {
        if let Child::Tree(inner) = child {
            out.insert(Arc::as_ptr(inner) as usize);
            collect_tree_ptrs(inner, out);
        }
    }
}

#[test]
fn edit_at_the_end_reuses_leading_subtrees() {
    let parser = paren_grammar();
    let old_text = wide_document(10);
    let unit_len = old_text.len() as u32 / 10;
    let old_input = StringInput::new(&old_text);
    let old_tree = parser.parse(&old_input, &[]);
    old_tree.validate().expect("old tree valid");

    // Insert "()" just before the closing paren of the last unit.
    let edit_pos = old_text.len() as u32 - 1;
    let mut new_text = old_text.clone();
    new_text.insert_str(edit_pos as usize, "()");
    let changes = [ChangedRange {
        from_a: edit_pos,
        to_a: edit_pos,
        from_b: edit_pos,
        to_b: edit_pos + 2,
    }];
    let fragments = TreeFragment::apply_changes(
        &TreeFragment::add_tree(old_tree.clone(), &[], false),
        &changes,
        trellis_tree::fragment::DEFAULT_MIN_GAP,
    );

    let new_input = StringInput::new(&new_text);
    let new_tree = parser.parse(&new_input, &fragments);
    assert_eq!(new_tree.length(), old_text.len() as u32 + 2);
    new_tree.validate().expect("new tree valid");

    // Far from the edit, the new tree points at the old tree's nodes.
    for probe in [100, unit_len + 100, 5 * unit_len + 7] {
        let (old_node, old_start) = deepest_tree_at(&old_tree, probe);
        let (new_node, new_start) = deepest_tree_at(&new_tree, probe);
        assert_eq!(old_start, new_start);
        assert!(
            Arc::ptr_eq(&old_node, &new_node),
            "expected reuse at position {}",
            probe
        );
    }

    // The rebuild is proportional to the edit: the edited unit's interior
    // is rebuilt, everything else is shared by reference.
    let mut old_ptrs = HashSet::new();
    collect_tree_ptrs(&old_tree, &mut old_ptrs);
    let mut new_ptrs = HashSet::new();
    collect_tree_ptrs(&new_tree, &mut new_ptrs);
    let fresh: usize = new_ptrs.difference(&old_ptrs).count();
    let shared: usize = new_ptrs.intersection(&old_ptrs).count();
    assert!(
        shared >= new_ptrs.len() / 2,
        "expected broad sharing, got {} of {}",
        shared,
        new_ptrs.len()
    );
    assert!(
        fresh <= new_ptrs.len() / 3,
        "expected a bounded rebuild, got {} new of {} nodes",
        fresh,
        new_ptrs.len()
    );
}

#[test]
fn edit_in_the_middle_reuses_both_sides() {
    let parser = paren_grammar();
    let old_text = wide_document(10);
    let unit_len = old_text.len() as u32 / 10;
    let old_input = StringInput::new(&old_text);
    let old_tree = parser.parse(&old_input, &[]);

    // Replace one character inside unit 5 with garbage.
    let edit_pos = 5 * unit_len + unit_len / 2;
    let mut new_text = old_text.clone();
    new_text.replace_range(edit_pos as usize..edit_pos as usize + 2, "zz");
    let changes = [ChangedRange {
        from_a: edit_pos,
        to_a: edit_pos + 2,
        from_b: edit_pos,
        to_b: edit_pos + 2,
    }];
    let fragments = TreeFragment::apply_changes(
        &TreeFragment::add_tree(old_tree.clone(), &[], false),
        &changes,
        trellis_tree::fragment::DEFAULT_MIN_GAP,
    );
    let new_input = StringInput::new(&new_text);
    let new_tree = parser.parse(&new_input, &fragments);
    assert_eq!(new_tree.length(), old_text.len() as u32);
    new_tree.validate().expect("new tree valid");

    // Left of the edit.
    let (old_node, _) = deepest_tree_at(&old_tree, 2 * unit_len + 5);
    let (new_node, _) = deepest_tree_at(&new_tree, 2 * unit_len + 5);
    assert!(Arc::ptr_eq(&old_node, &new_node), "reuse left of the edit");
    // Right of the edit (same positions; the edit kept lengths equal).
    let (old_node, _) = deepest_tree_at(&old_tree, 8 * unit_len + 5);
    let (new_node, _) = deepest_tree_at(&new_tree, 8 * unit_len + 5);
    assert!(Arc::ptr_eq(&old_node, &new_node), "reuse right of the edit");
}

#[test]
fn stop_at_produces_an_open_tree_of_exactly_that_length() {
    let parser = paren_grammar();
    let text = "()".repeat(100);
    let input = StringInput::new(&text);
    let ranges = [Range::new(0, text.len() as u32)];
    let mut parse = parser.start_parse(&input, &[], &ranges);
    parse.stop_at(10);
    let tree = loop {
        if let Some(tree) = parse.advance() {
            break tree;
        }
    };
    assert_eq!(tree.length(), 10);
    assert!(tree.prop(PropKey::OPEN).is_some(), "root must be marked open");
    tree.validate().expect("valid partial tree");
    assert_eq!(parse.stopped_at(), Some(10));
}

#[test]
#[should_panic(expected = "stop position")]
fn moving_a_stop_forward_is_a_contract_violation() {
    let parser = paren_grammar();
    let text = "()()";
    let input = StringInput::new(text);
    let ranges = [Range::new(0, 4)];
    let mut parse = parser.start_parse(&input, &[], &ranges);
    parse.stop_at(2);
    parse.stop_at(3);
}

#[test]
fn parse_is_resumable_between_advance_calls() {
    let parser = paren_grammar();
    let text = "()".repeat(50);
    let input = StringInput::new(&text);
    let ranges = [Range::new(0, text.len() as u32)];
    let mut parse = parser.start_parse(&input, &[], &ranges);
    // Drive one step at a time, observing monotone progress.
    let mut last = 0;
    let tree = loop {
        if let Some(tree) = parse.advance() {
            break tree;
        }
        let pos = parse.parsed_pos();
        assert!(pos >= last);
        last = pos;
    };
    assert_eq!(tree.length(), text.len() as u32);
}
