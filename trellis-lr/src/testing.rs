//! Grammar fixtures for tests
//!
//!     Hand-assembled tables for a handful of tiny grammars, used across
//!     the unit and integration tests. They are deliberately small enough
//!     to verify by eye against the table layout documented in
//!     [`spec`](crate::spec).

use crate::parse::LrParser;
use crate::spec::{
    reduce_action, DialectSpec, GrammarSpec, NodeSpec, PatternSpec, PrecSpec, PropSpec,
    SpecializeEntry, SpecializerSpec, TokenGroupSpec, TokenPatternSpec, END, FORMAT_VERSION,
    STATE_ACCEPTING,
};

fn node(name: &str) -> NodeSpec {
    NodeSpec {
        name: name.to_string(),
        top: false,
        error: false,
        skipped: false,
        anonymous: false,
        props: Vec::new(),
    }
}

fn error_node() -> NodeSpec {
    NodeSpec {
        error: true,
        ..node("\u{26a0}")
    }
}

fn literal(term: u16, text: &str) -> TokenPatternSpec {
    TokenPatternSpec {
        term,
        pattern: PatternSpec::Literal(text.to_string()),
    }
}

fn regex(term: u16, pattern: &str) -> TokenPatternSpec {
    TokenPatternSpec {
        term,
        pattern: PatternSpec::Regex(pattern.to_string()),
    }
}

/// Balanced parentheses with text runs:
/// `Document { (Paren | Text)* }`, `Paren { "(" (Paren | Text)* ")" }`,
/// whitespace skipped.
pub mod paren {
    pub const N_DOC: u16 = 1;
    pub const N_PAREN: u16 = 2;
    pub const N_ELEMS: u16 = 3;
    pub const T_OPEN: u16 = 4;
    pub const T_CLOSE: u16 = 5;
    pub const T_EOF: u16 = 6;
    pub const T_WS: u16 = 7;
    pub const T_TEXT: u16 = 8;
}

pub fn paren_spec() -> GrammarSpec {
    use paren::*;
    // Reductions: Elems -> (empty) / Elems element; Paren -> "(" Elems ")".
    // Both Paren and Text land in state 3 after a shift, so one depth-2
    // repetition reduce covers them.
    let re0 = reduce_action(N_ELEMS, 0);
    let rep2 = reduce_action(N_ELEMS, 2);
    let rp3 = reduce_action(N_PAREN, 3);
    let rp2 = reduce_action(N_PAREN, 2);
    GrammarSpec {
        format: FORMAT_VERSION,
        name: "paren".to_string(),
        nodes: vec![
            error_node(),
            NodeSpec { top: true, ..node("Document") },
            NodeSpec {
                props: vec![PropSpec {
                    key: "closed_by".to_string(),
                    values: vec![")".to_string()],
                }],
                ..node("Paren")
            },
            NodeSpec { anonymous: true, ..node("Elems") },
            NodeSpec {
                props: vec![PropSpec {
                    key: "closed_by".to_string(),
                    values: vec![")".to_string()],
                }],
                ..node("(")
            },
            NodeSpec {
                props: vec![PropSpec {
                    key: "opened_by".to_string(),
                    values: vec!["(".to_string()],
                }],
                ..node(")")
            },
            NodeSpec { anonymous: true, ..node("eof") },
            NodeSpec { anonymous: true, skipped: true, ..node("ws") },
            node("Text"),
        ],
        top_node: N_DOC,
        start_state: 0,
        eof_term: T_EOF,
        // States: 0 start, 1 top-level list (accepting), 2 after "(",
        // 3 after a finished element, 4 inside "(...", 5 after ")".
        #[rustfmt::skip]
        states: vec![
            0,               END, 12, 1, re0,  re0,
            STATE_ACCEPTING, 0,   12, 1, 0,    0,
            0,               END, 12, 1, re0,  re0,
            0,               END, 12, 1, rep2, rep2,
            0,               5,   12, 1, 0,    rp2,
            0,               END, 12, 1, rp3,  rp3,
        ],
        #[rustfmt::skip]
        data: vec![
            T_OPEN as u32, 2, T_TEXT as u32, 3, END,                       // state 1
            T_CLOSE as u32, 5, T_OPEN as u32, 2, T_TEXT as u32, 3, END,    // state 4
            T_WS as u32, END,                                              // shared skip list
        ],
        goto_offsets: vec![END, END, 5, 0, END, END, END, END, END],
        #[rustfmt::skip]
        goto_data: vec![
            0, 1, 2, 4, END, // Elems
            1, 3, 4, 3, END, // Paren
        ],
        dynamic_precedence: Vec::new(),
        dialects: Vec::new(),
        tokens: vec![TokenGroupSpec::Patterns {
            tokens: vec![
                literal(T_OPEN, "("),
                literal(T_CLOSE, ")"),
                regex(T_WS, "[ \\t\\n]+"),
                regex(T_TEXT, "[a-z][a-z ]*"),
            ],
        }],
        specializers: Vec::new(),
    }
}

pub fn paren_grammar() -> LrParser {
    LrParser::from_spec(paren_spec()).expect("paren grammar decodes")
}

/// Lower-case words with an `if` keyword specializer and a dialect that
/// turns keywords off: `Document { (Word | Keyword)* }`.
pub mod words {
    pub const N_DOC: u16 = 1;
    pub const N_WORDS: u16 = 2;
    pub const T_WORD: u16 = 3;
    pub const T_KEYWORD: u16 = 4;
    pub const T_EOF: u16 = 5;
    pub const T_WS: u16 = 6;
}

pub fn words_spec() -> GrammarSpec {
    use words::*;
    let rw0 = reduce_action(N_WORDS, 0);
    let rw2 = reduce_action(N_WORDS, 2);
    GrammarSpec {
        format: FORMAT_VERSION,
        name: "words".to_string(),
        nodes: vec![
            error_node(),
            NodeSpec { top: true, ..node("Document") },
            NodeSpec { anonymous: true, ..node("Words") },
            node("Word"),
            node("Keyword"),
            NodeSpec { anonymous: true, ..node("eof") },
            NodeSpec { anonymous: true, skipped: true, ..node("ws") },
        ],
        top_node: N_DOC,
        start_state: 0,
        eof_term: T_EOF,
        #[rustfmt::skip]
        states: vec![
            0,               END, 5, 1, rw0, rw0,
            STATE_ACCEPTING, 0,   5, 1, 0,   0,
            0,               END, 5, 1, rw2, rw2,
            0,               END, 5, 1, rw2, rw2,
        ],
        #[rustfmt::skip]
        data: vec![
            T_WORD as u32, 2, T_KEYWORD as u32, 3, END, // state 1
            T_WS as u32, END,                           // skip list
        ],
        goto_offsets: vec![END, END, 0, END, END, END, END],
        goto_data: vec![0, 1, END],
        dynamic_precedence: Vec::new(),
        dialects: vec![DialectSpec {
            name: "nokeywords".to_string(),
            disabled: vec![T_KEYWORD],
        }],
        tokens: vec![TokenGroupSpec::Patterns {
            tokens: vec![regex(T_WORD, "[a-z]+"), regex(T_WS, "[ \\t\\n]+")],
        }],
        specializers: vec![SpecializerSpec {
            term: T_WORD,
            extend: false,
            entries: vec![SpecializeEntry {
                text: "if".to_string(),
                to: T_KEYWORD,
            }],
        }],
    }
}

pub fn words_grammar() -> LrParser {
    LrParser::from_spec(words_spec()).expect("words grammar decodes")
}

/// A deliberately ambiguous grammar: `x` parses as either `A` or `B`, with
/// dynamic precedence favoring `B`. Exercises stack splitting, merging and
/// score-based survival.
pub mod ambig {
    pub const N_TOP: u16 = 1;
    pub const N_A: u16 = 2;
    pub const N_B: u16 = 3;
    pub const T_X: u16 = 4;
    pub const T_EOF: u16 = 5;
}

pub fn ambig_spec() -> GrammarSpec {
    use ambig::*;
    let ra = reduce_action(N_A, 1);
    let rb = reduce_action(N_B, 1);
    GrammarSpec {
        format: FORMAT_VERSION,
        name: "ambig".to_string(),
        nodes: vec![
            error_node(),
            NodeSpec { top: true, ..node("Top") },
            node("A"),
            node("B"),
            node("x"),
            NodeSpec { anonymous: true, ..node("eof") },
        ],
        top_node: N_TOP,
        start_state: 0,
        eof_term: T_EOF,
        #[rustfmt::skip]
        states: vec![
            0,               0,   END, 1, 0, 0,
            0,               3,   END, 1, 0, 0,
            STATE_ACCEPTING, END, END, 1, 0, 0,
            STATE_ACCEPTING, END, END, 1, 0, 0,
        ],
        #[rustfmt::skip]
        data: vec![
            T_X as u32, 1, END,                    // state 0
            T_EOF as u32, ra, T_EOF as u32, rb, END, // state 1: ambiguous
        ],
        goto_offsets: vec![END, END, 0, 3, END, END],
        goto_data: vec![0, 2, END, 0, 3, END],
        dynamic_precedence: vec![PrecSpec { node: N_B, prec: 1 }],
        dialects: Vec::new(),
        tokens: vec![TokenGroupSpec::Patterns {
            tokens: vec![literal(T_X, "x")],
        }],
        specializers: Vec::new(),
    }
}

pub fn ambig_grammar() -> LrParser {
    LrParser::from_spec(ambig_spec()).expect("ambig grammar decodes")
}
