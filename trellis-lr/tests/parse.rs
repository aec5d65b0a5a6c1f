//! End-to-end parses over the fixture grammars.

use std::sync::Arc;

use rstest::rstest;
use trellis_lr::testing::{ambig_grammar, paren_grammar, words_grammar};
use trellis_lr::LrParser;
use trellis_tree::{IncrementalParser, Side, StringInput, Tree, TreeCursor, TreeExt};

fn parse(parser: &LrParser, text: &str) -> Arc<Tree> {
    let input = StringInput::new(text);
    parser.parse(&input, &[])
}

/// Compact one-line rendering of a tree: `Name from..to(children)`.
fn outline(tree: &Arc<Tree>) -> String {
    fn node(cursor: &mut TreeCursor, out: &mut String) {
        out.push_str(&format!(
            "{} {}..{}",
            cursor.node_type().name(),
            cursor.from(),
            cursor.to()
        ));
        if cursor.first_child() {
            out.push('[');
            loop {
                node(cursor, out);
                if !cursor.next_sibling() {
                    break;
                }
                out.push_str(", ");
            }
            out.push(']');
            cursor.parent();
        }
    }
    let mut out = String::new();
    node(&mut TreeCursor::new(tree.clone()), &mut out);
    out
}

#[test]
fn parses_nested_parens() {
    let tree = parse(&paren_grammar(), "(())");
    assert_eq!(tree.length(), 4);
    tree.validate().expect("span invariant");
    assert_eq!(
        outline(&tree),
        "Document 0..4[Paren 0..4[( 0..1, Paren 1..3[( 1..2, ) 2..3], ) 3..4]]"
    );
}

#[test]
fn skips_whitespace_between_tokens() {
    let tree = parse(&paren_grammar(), "( ( ) )");
    assert_eq!(tree.length(), 7);
    tree.validate().expect("span invariant");
    assert_eq!(
        outline(&tree),
        "Document 0..7[Paren 0..7[( 0..1, Paren 2..5[( 2..3, ) 4..5], ) 6..7]]"
    );
}

#[test]
fn unbalanced_open_produces_error_node_not_failure() {
    let tree = parse(&paren_grammar(), "(()");
    assert_eq!(tree.length(), 3);
    tree.validate().expect("span invariant");
    // The outer paren is kept (closed by recovery) and an error node marks
    // the missing ")".
    let mut found_error = false;
    let mut cursor = tree.cursor();
    while cursor.next_node() {
        if cursor.node_type().is_error() {
            found_error = true;
        }
    }
    assert!(found_error, "expected an error node in {}", outline(&tree));
}

#[rstest]
#[case("")]
#[case(")")]
#[case(")))(((")]
#[case("((((((((((")]
#[case("hello world")]
#[case("(a)(b)(c)")]
fn always_produces_a_covering_tree(#[case] text: &str) {
    let tree = parse(&paren_grammar(), text);
    assert_eq!(tree.length(), text.len() as u32);
    tree.validate().expect("span invariant");
}

#[test]
fn full_reparse_is_idempotent() {
    let parser = paren_grammar();
    let a = parse(&parser, "(()(()))()((");
    let b = parse(&parser, "(()(()))()((");
    assert!(a.structurally_eq(&b));
}

#[test]
fn strict_mode_rejects_malformed_input() {
    let parser = paren_grammar();
    let input = StringInput::new("(()");
    let err = parser.parse_strict(&input).expect_err("must not parse");
    assert!(err.pos <= 3);
    // Well-formed input still parses strictly.
    let ok = StringInput::new("(())");
    assert!(parser.parse_strict(&ok).is_ok());
}

#[test]
fn specializer_replaces_keyword_reading() {
    let tree = parse(&words_grammar(), "if the cat");
    tree.validate().expect("span invariant");
    assert_eq!(
        outline(&tree),
        "Document 0..10[Keyword 0..2, Word 3..6, Word 7..10]"
    );
}

#[test]
fn words_outline_snapshot() {
    let tree = parse(&words_grammar(), "if if cat");
    insta::assert_snapshot!(
        outline(&tree),
        @"Document 0..9[Keyword 0..2, Keyword 3..5, Word 6..9]"
    );
}

#[test]
fn dialect_disables_specialized_terminal() {
    let parser = words_grammar()
        .with_dialect("nokeywords")
        .expect("dialect exists");
    let input = StringInput::new("if the cat");
    let tree = parser.parse(&input, &[]);
    assert_eq!(
        outline(&tree),
        "Document 0..10[Word 0..2, Word 3..6, Word 7..10]"
    );
}

#[test]
fn unknown_dialect_is_rejected() {
    assert!(words_grammar().with_dialect("nonesuch").is_err());
}

#[test]
fn ambiguity_splits_stacks_and_scoring_picks_survivor() {
    // "x" reduces as both A and B; B carries dynamic precedence 1, so the
    // B stack must win.
    let tree = parse(&ambig_grammar(), "x");
    assert_eq!(outline(&tree), "Top 0..1[B 0..1[x 0..1]]");
}

#[test]
fn resolve_finds_innermost_paren() {
    let tree = parse(&paren_grammar(), "(())");
    let node = tree.resolve(2, Side::After);
    assert_eq!(node.node_type().name(), ")");
    assert_eq!((node.from(), node.to()), (2, 3));
    let parent = node.parent().expect("parent");
    assert_eq!(parent.node_type().name(), "Paren");
    assert_eq!((parent.from(), parent.to()), (1, 3));
}

#[test]
fn bracket_props_survive_decoding() {
    let parser = paren_grammar();
    let ty = parser.node_set().get(trellis_lr::testing::paren::N_PAREN);
    let closed = ty
        .prop(trellis_tree::PropKey::CLOSED_BY)
        .and_then(|v| v.as_names())
        .expect("closed_by prop");
    assert_eq!(closed, [")".to_string()]);
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    fn paren_soup() -> impl Strategy<Value = String> {
        // Mixes of parens, whitespace and garbage letters, valid or not.
        proptest::collection::vec(
            prop_oneof![
                Just("(".to_string()),
                Just(")".to_string()),
                Just("()".to_string()),
                Just(" ".to_string()),
                "[a-z]{1,3}",
            ],
            0..40,
        )
        .prop_map(|parts| parts.concat())
    }

    proptest! {
        #[test]
        fn recovery_always_terminates_with_a_valid_tree(text in paren_soup()) {
            let tree = parse(&paren_grammar(), &text);
            prop_assert_eq!(tree.length(), text.len() as u32);
            prop_assert!(tree.validate().is_ok());
        }

        #[test]
        fn reparsing_is_deterministic(text in paren_soup()) {
            let parser = paren_grammar();
            let a = parse(&parser, &text);
            let b = parse(&parser, &text);
            prop_assert!(a.structurally_eq(&b));
        }
    }
}
