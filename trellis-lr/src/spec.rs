//! The serialized grammar table format
//!
//!     A grammar ships as a `GrammarSpec`: a versioned, serde-readable
//!     structure holding the flat LR tables (states, action data, goto
//!     data), the node-type declarations, token groups, specializers and
//!     dialects. The format is deliberately dumb — parallel integer arrays
//!     with offsets into a shared `data` pool — so a grammar compiler in any
//!     language can emit it and decoding stays a matter of validation, not
//!     interpretation.
//!
//!     Decoding is pure and total for well-formed input: every offset, id
//!     and length is checked up front and a broken table is rejected with a
//!     `MalformedTable` before any parsing starts. A version mismatch fails
//!     closed.
//!
//! Layout
//!
//!     states: 6 slots per state
//!         [flags, action offset, skip offset, tokenizer mask,
//!          default reduce, forced reduce]
//!     data: (terminal, action) pairs terminated by END for action lists;
//!         terminal runs terminated by END for skip lists
//!     goto_offsets[node]: offset into goto_data, or END for none;
//!         goto_data holds (state, target) pairs terminated by END
//!
//!     Actions pack into one u32: a shift stores the target state; a reduce
//!     sets bit 16 and stores the produced node id in the low bits and the
//!     pop depth above bit 19.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Format version this engine understands.
pub const FORMAT_VERSION: u32 = 1;

/// Slots per state in [`GrammarSpec::states`].
pub const STATE_WIDTH: usize = 6;

/// Sentinel terminating runs in `data` / `goto_data`, and marking absent
/// goto offsets.
pub const END: u32 = u32::MAX;

/// Bit set on reduce actions.
pub const REDUCE_FLAG: u32 = 1 << 16;
/// Mask extracting the state (shift) or node id (reduce) from an action.
pub const VALUE_MASK: u32 = 0xffff;
/// Shift amount for the reduce depth.
pub const DEPTH_SHIFT: u32 = 19;

/// Build a reduce action.
pub const fn reduce_action(node: u16, depth: u32) -> u32 {
    REDUCE_FLAG | node as u32 | (depth << DEPTH_SHIFT)
}

/// State flag: a stack in this state at the end of input has produced a
/// complete top-rule match.
pub const STATE_ACCEPTING: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrammarSpec {
    /// Must equal [`FORMAT_VERSION`]; anything else is rejected.
    pub format: u32,
    pub name: String,
    /// Node types by id; terminals and nonterminals share this space and
    /// id 0 must be the error node.
    pub nodes: Vec<NodeSpec>,
    /// Node id of the tree root produced by a finished parse.
    pub top_node: u16,
    pub start_state: u32,
    /// Terminal synthesized at end of input.
    pub eof_term: u16,
    pub states: Vec<u32>,
    pub data: Vec<u32>,
    pub goto_offsets: Vec<u32>,
    pub goto_data: Vec<u32>,
    #[serde(default)]
    pub dynamic_precedence: Vec<PrecSpec>,
    #[serde(default)]
    pub dialects: Vec<DialectSpec>,
    /// Token groups; group `i` runs when bit `i` of a state's tokenizer
    /// mask is set.
    pub tokens: Vec<TokenGroupSpec>,
    #[serde(default)]
    pub specializers: Vec<SpecializerSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub name: String,
    #[serde(default)]
    pub top: bool,
    #[serde(default)]
    pub error: bool,
    #[serde(default)]
    pub skipped: bool,
    #[serde(default)]
    pub anonymous: bool,
    #[serde(default)]
    pub props: Vec<PropSpec>,
}

/// A per-type prop: a well-known key name ("closed_by", "opened_by",
/// "group") with its name-list value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropSpec {
    pub key: String,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PrecSpec {
    pub node: u16,
    pub prec: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialectSpec {
    pub name: String,
    /// Terminals this dialect turns off.
    pub disabled: Vec<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TokenGroupSpec {
    /// Literal / regex patterns matched by the built-in tokenizer.
    Patterns { tokens: Vec<TokenPatternSpec> },
    /// A slot filled by an `ExternalTokenizer` registered under `name` at
    /// parser construction.
    External {
        name: String,
        #[serde(default)]
        contextual: bool,
        #[serde(default)]
        fallback: bool,
        #[serde(default)]
        extend: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPatternSpec {
    pub term: u16,
    pub pattern: PatternSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternSpec {
    /// Exact text.
    Literal(String),
    /// Anchored regular expression (matched at the current position only).
    Regex(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecializerSpec {
    /// The terminal whose matches are refined.
    pub term: u16,
    /// `true` keeps both readings (extend); `false` replaces the matched
    /// terminal (specialize).
    #[serde(default)]
    pub extend: bool,
    pub entries: Vec<SpecializeEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecializeEntry {
    pub text: String,
    pub to: u16,
}

/// A serialized grammar table that failed validation. Fatal: no parse is
/// attempted against a table that doesn't check out.
#[derive(Debug, Clone)]
pub enum MalformedTable {
    UnsupportedFormat {
        found: u32,
        expected: u32,
    },
    LengthMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    OffsetOutOfRange {
        what: &'static str,
        offset: usize,
        len: usize,
    },
    BadReference {
        what: &'static str,
        id: u32,
        max: u32,
    },
    BadRegex {
        pattern: String,
        error: String,
    },
    MissingExternal {
        name: String,
    },
    Invalid {
        what: &'static str,
    },
}

impl fmt::Display for MalformedTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MalformedTable::UnsupportedFormat { found, expected } => {
                write!(f, "unsupported table format {} (expected {})", found, expected)
            }
            MalformedTable::LengthMismatch { what, expected, found } => {
                write!(f, "{} has length {} (expected {})", what, found, expected)
            }
            MalformedTable::OffsetOutOfRange { what, offset, len } => {
                write!(f, "{} offset {} out of range (length {})", what, offset, len)
            }
            MalformedTable::BadReference { what, id, max } => {
                write!(f, "{} references id {} (maximum {})", what, id, max)
            }
            MalformedTable::BadRegex { pattern, error } => {
                write!(f, "token pattern {:?} does not compile: {}", pattern, error)
            }
            MalformedTable::MissingExternal { name } => {
                write!(f, "no external tokenizer registered under {:?}", name)
            }
            MalformedTable::Invalid { what } => write!(f, "invalid table: {}", what),
        }
    }
}

impl std::error::Error for MalformedTable {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_encoding_round_trips() {
        let action = reduce_action(7, 3);
        assert_ne!(action, 0);
        assert_eq!(action & REDUCE_FLAG, REDUCE_FLAG);
        assert_eq!(action & VALUE_MASK, 7);
        assert_eq!(action >> DEPTH_SHIFT, 3);
        // A zero-depth reduce of node 0 is still distinguishable from "no
        // action".
        assert_ne!(reduce_action(0, 0), 0);
    }

    #[test]
    fn spec_round_trips_through_json() {
        let spec = GrammarSpec {
            format: FORMAT_VERSION,
            name: "demo".to_string(),
            nodes: vec![NodeSpec {
                name: "\u{26a0}".to_string(),
                top: false,
                error: true,
                skipped: false,
                anonymous: false,
                props: Vec::new(),
            }],
            top_node: 0,
            start_state: 0,
            eof_term: 0,
            states: vec![0, END, END, 0, 0, 0],
            data: Vec::new(),
            goto_offsets: vec![END],
            goto_data: Vec::new(),
            dynamic_precedence: Vec::new(),
            dialects: Vec::new(),
            tokens: Vec::new(),
            specializers: Vec::new(),
        };
        let json = serde_json::to_string(&spec).expect("serialize");
        let back: GrammarSpec = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.name, "demo");
        assert_eq!(back.states.len(), STATE_WIDTH);
    }
}
