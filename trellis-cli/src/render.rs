//! Tree output formats for the command line
//!
//!     Treeviz is a one-line-per-node dump: nesting becomes two-space
//!     indentation, each line showing the node name and its span. It is
//!     meant for eyeballing parse results, not for machine consumption —
//!     that's what the JSON format is for.

use std::sync::Arc;

use serde_json::{json, Value};
use trellis_tree::{Tree, TreeCursor};

pub fn treeviz(tree: &Arc<Tree>) -> String {
    let mut out = String::new();
    let mut cursor = TreeCursor::new(tree.clone());
    write_node(&mut cursor, 0, &mut out);
    out
}

fn write_node(cursor: &mut TreeCursor, depth: usize, out: &mut String) {
    for _ in 0..depth {
        out.push_str("  ");
    }
    out.push_str(&format!(
        "{} {}..{}\n",
        cursor.node_type().name(),
        cursor.from(),
        cursor.to()
    ));
    if cursor.first_child() {
        loop {
            write_node(cursor, depth + 1, out);
            if !cursor.next_sibling() {
                break;
            }
        }
        cursor.parent();
    }
}

pub fn json(tree: &Arc<Tree>) -> Value {
    let mut cursor = TreeCursor::new(tree.clone());
    json_node(&mut cursor)
}

fn json_node(cursor: &mut TreeCursor) -> Value {
    let mut children = Vec::new();
    if cursor.first_child() {
        loop {
            children.push(json_node(cursor));
            if !cursor.next_sibling() {
                break;
            }
        }
        cursor.parent();
    }
    json!({
        "type": cursor.node_type().name(),
        "from": cursor.from(),
        "to": cursor.to(),
        "error": cursor.node_type().is_error(),
        "children": children,
    })
}
