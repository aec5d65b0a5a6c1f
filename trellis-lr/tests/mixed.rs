//! Mixed parsing: nested grammars mounted as overlays.

use std::sync::Arc;

use trellis_lr::testing::{paren_grammar, words_grammar};
use trellis_lr::{LrParser, NestHook, NestSpec};
use trellis_tree::{
    ChangedRange, IncrementalParser, Input, NodeType, Side, StringInput, TreeExt, TreeFragment,
};

/// Claims every `Text` node of the host grammar for the words grammar.
struct NestText {
    words: Arc<LrParser>,
}

impl NestHook for NestText {
    fn nest(&self, ty: &NodeType, _from: u32, _to: u32, _input: &dyn Input) -> Option<NestSpec> {
        if ty.name() == "Text" {
            Some(NestSpec {
                parser: self.words.clone(),
                overlay: None,
            })
        } else {
            None
        }
    }
}

fn host_parser() -> LrParser {
    paren_grammar().with_nest_hook(Arc::new(NestText {
        words: Arc::new(words_grammar()),
    }))
}

#[test]
fn nested_regions_are_mounted_not_spliced() {
    let parser = host_parser();
    let text = "(hello world)()";
    let input = StringInput::new(text);
    let tree = parser.parse(&input, &[]);
    tree.validate().expect("host tree valid");

    // The host tree still speaks the host grammar: the claimed node is a
    // Text node, and the mount hangs off it as a prop.
    let node = tree.resolve(5, Side::Around);
    assert_eq!(node.node_type().name(), "Text");
    let mount = node.tree().mounted().expect("mount recorded");
    assert_eq!(mount.parser_name.as_ref(), "words");
    assert!(mount.overlay.is_none());

    // Descending through the mount reaches the words grammar's nodes.
    let inner = tree.resolve_inner(2, Side::Around);
    assert_eq!(inner.node_type().name(), "Word");
    assert_eq!((inner.from(), inner.to()), (1, 6));
    let inner = tree.resolve_inner(8, Side::Around);
    assert_eq!(inner.node_type().name(), "Word");
    assert_eq!((inner.from(), inner.to()), (7, 12));
}

#[test]
fn editing_one_region_leaves_other_mounts_untouched() {
    let parser = host_parser();
    // Two wide text regions, each in its own paren group, big enough that
    // incremental reuse engages.
    let region = "a".repeat(3000);
    let old_text = format!("({})({})", region, region.replace('a', "b"));
    let unit_len = 3002u32;
    let old_input = StringInput::new(&old_text);
    let old_tree = parser.parse(&old_input, &[]);
    old_tree.validate().expect("old tree valid");

    // Same-length edit inside the first region.
    let mut new_text = old_text.clone();
    new_text.replace_range(100..102, "zz");
    let changes = [ChangedRange { from_a: 100, to_a: 102, from_b: 100, to_b: 102 }];
    let fragments = TreeFragment::apply_changes(
        &TreeFragment::add_tree(old_tree.clone(), &[], false),
        &changes,
        trellis_tree::fragment::DEFAULT_MIN_GAP,
    );
    let new_input = StringInput::new(&new_text);
    let new_tree = parser.parse(&new_input, &fragments);
    new_tree.validate().expect("new tree valid");

    // The second region's Text node was reused by reference, mount and all.
    let probe = unit_len + 1500;
    let old_node = old_tree.resolve(probe, Side::Around);
    let new_node = new_tree.resolve(probe, Side::Around);
    assert_eq!(old_node.node_type().name(), "Text");
    assert!(
        Arc::ptr_eq(old_node.tree(), new_node.tree()),
        "unedited host region must be reused"
    );
    let old_mount = old_node.tree().mounted().expect("old mount");
    let new_mount = new_node.tree().mounted().expect("new mount");
    assert!(
        Arc::ptr_eq(&old_mount.tree, &new_mount.tree),
        "unedited nested tree must not be re-parsed"
    );

    // The edited region was re-nested: its mount is fresh.
    let old_edited = old_tree.resolve(500, Side::Around);
    let new_edited = new_tree.resolve(500, Side::Around);
    let old_mount = old_edited.tree().mounted().expect("old edited mount");
    let new_mount = new_edited.tree().mounted().expect("new edited mount");
    assert!(
        !Arc::ptr_eq(&old_mount.tree, &new_mount.tree),
        "edited nested tree must be rebuilt"
    );
    // And the nested tree still resolves inside the edited region.
    let inner = new_tree.resolve_inner(500, Side::Around);
    assert_eq!(inner.node_type().name(), "Word");
}
