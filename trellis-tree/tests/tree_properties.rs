//! Property tests over arbitrary trees: the span invariant, cursor
//! traversal and position resolution.

use std::sync::Arc;

use proptest::prelude::*;
use rstest::rstest;
use trellis_tree::{Child, NodeProps, NodeSet, NodeType, Side, Tree, TreeCursor, TreeExt};

fn node_set() -> NodeSet {
    NodeSet::new(vec![
        NodeType::error(),
        NodeType::new(1, "Root", NodeType::TOP, NodeProps::new()),
        NodeType::new(2, "Inner", 0, NodeProps::new()),
        NodeType::new(3, "Leaf", 0, NodeProps::new()),
        NodeType::new(4, "Wrap", NodeType::ANONYMOUS, NodeProps::new()),
    ])
}

#[derive(Clone, Debug)]
enum Shape {
    Leaf { length: u32 },
    Inner { anonymous: bool, children: Vec<(u32, Shape)> },
}

impl Shape {
    fn length(&self) -> u32 {
        match self {
            Shape::Leaf { length } => *length,
            Shape::Inner { children, .. } => children
                .iter()
                .map(|(gap, shape)| gap + shape.length())
                .sum::<u32>()
                .max(1),
        }
    }

    fn to_tree(&self, set: &NodeSet) -> Arc<Tree> {
        match self {
            Shape::Leaf { length } => Arc::new(Tree::new(
                set.get(3).clone(),
                Vec::new(),
                Vec::new(),
                *length,
            )),
            Shape::Inner { anonymous, children } => {
                let mut child_nodes = Vec::new();
                let mut positions = Vec::new();
                let mut pos = 0;
                for (gap, shape) in children {
                    pos += gap;
                    positions.push(pos);
                    let child = shape.to_tree(set);
                    pos += child.length();
                    child_nodes.push(Child::Tree(child));
                }
                let ty = set.get(if *anonymous { 4 } else { 2 }).clone();
                Arc::new(Tree::with_props(
                    ty,
                    child_nodes,
                    positions,
                    pos.max(1),
                    NodeProps::new(),
                ))
            }
        }
    }
}

fn arb_shape() -> impl Strategy<Value = Shape> {
    let leaf = (1u32..6).prop_map(|length| Shape::Leaf { length });
    leaf.prop_recursive(4, 32, 5, |inner| {
        (
            any::<bool>(),
            proptest::collection::vec(((0u32..3), inner), 1..5),
        )
            .prop_map(|(anonymous, children)| Shape::Inner { anonymous, children })
    })
}

fn as_root(shape: &Shape) -> Arc<Tree> {
    let set = node_set();
    let child = shape.to_tree(&set);
    let length = child.length();
    Arc::new(Tree::new(
        set.get(1).clone(),
        vec![Child::Tree(child)],
        vec![0],
        length,
    ))
}

proptest! {
    #[test]
    fn span_invariant_holds(shape in arb_shape()) {
        let tree = as_root(&shape);
        prop_assert!(tree.validate().is_ok());
    }

    #[test]
    fn cursor_walk_yields_nested_increasing_spans(shape in arb_shape()) {
        let tree = as_root(&shape);
        let mut cursor = TreeCursor::new(tree.clone());
        let mut seen = Vec::new();
        while cursor.next_node() {
            prop_assert!(cursor.from() <= cursor.to());
            prop_assert!(cursor.to() <= tree.length());
            seen.push((cursor.from(), cursor.to()));
        }
        // Preorder: each node starts at or after the previous one.
        for window in seen.windows(2) {
            prop_assert!(window[1].0 >= window[0].0);
        }
    }

    #[test]
    fn resolve_returns_a_covering_node(shape in arb_shape(), seed in 0u32..1000) {
        let tree = as_root(&shape);
        let pos = seed % (tree.length() + 1);
        let node = tree.resolve(pos, Side::Around);
        prop_assert!(node.from() <= pos && pos <= node.to());
        prop_assert!(!node.node_type().is_anonymous());
    }

    #[test]
    fn parent_chain_terminates_at_the_root(shape in arb_shape(), seed in 0u32..1000) {
        let tree = as_root(&shape);
        let pos = seed % (tree.length() + 1);
        let mut node = Some(tree.resolve(pos, Side::Around));
        let mut steps = 0;
        while let Some(n) = node {
            node = n.parent();
            steps += 1;
            prop_assert!(steps < 1000);
        }
    }
}

/// A small fixed tree for boundary-bias cases:
/// Root 0..10 [ Inner 0..4 [Leaf 1..3], Leaf 4..7 ].
fn bias_tree() -> Arc<Tree> {
    let set = node_set();
    let leaf = |len: u32| Arc::new(Tree::new(set.get(3).clone(), Vec::new(), Vec::new(), len));
    let inner = Arc::new(Tree::new(
        set.get(2).clone(),
        vec![Child::Tree(leaf(2))],
        vec![1],
        4,
    ));
    Arc::new(Tree::new(
        set.get(1).clone(),
        vec![Child::Tree(inner), Child::Tree(leaf(3))],
        vec![0, 4],
        10,
    ))
}

#[rstest]
#[case(4, Side::Before, "Inner", 0, 4)]
#[case(4, Side::After, "Leaf", 4, 7)]
#[case(3, Side::Around, "Leaf", 1, 3)]
#[case(8, Side::Around, "Root", 0, 10)]
fn resolve_honors_side_bias(
    #[case] pos: u32,
    #[case] side: Side,
    #[case] name: &str,
    #[case] from: u32,
    #[case] to: u32,
) {
    let tree = bias_tree();
    let node = tree.resolve(pos, side);
    assert_eq!(node.node_type().name(), name);
    assert_eq!((node.from(), node.to()), (from, to));
}
