//! The decoded parse table
//!
//!     `Automaton::decode` turns a validated [`GrammarSpec`](crate::spec)
//!     into the in-memory table the stepper runs against: state records,
//!     action/skip/goto lookups, dynamic precedence, dialects and the
//!     compiled tokenizer list. The automaton is pure data — every lookup is
//!     an indexed read with no side effects — and is shared behind an `Arc`
//!     across however many concurrent parses want it.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use trellis_tree::{NodeProps, NodeSet, NodeType, PropKey, PropValue};

use crate::spec::{
    GrammarSpec, MalformedTable, PatternSpec, TokenGroupSpec, END, FORMAT_VERSION, REDUCE_FLAG,
    STATE_WIDTH, VALUE_MASK,
};
use crate::token::{ExternalTokenizer, Matcher, PatternTokenizer, Tokenizer};

/// One decoded state record.
#[derive(Debug, Clone, Copy)]
pub struct State {
    pub flags: u32,
    /// Offset of the (terminal, action) list in `data`, or `END`.
    pub actions: u32,
    /// Offset of the skip-terminal list in `data`, or `END`.
    pub skip: u32,
    pub tokenizer_mask: u32,
    pub default_reduce: u32,
    pub forced_reduce: u32,
}

/// A named dialect: a dense per-terminal disable table.
pub struct Dialect {
    pub name: String,
    disabled: Vec<bool>,
}

impl Dialect {
    pub fn allows(&self, term: u16) -> bool {
        !self.disabled.get(term as usize).copied().unwrap_or(false)
    }
}

/// The table entry for one specializer.
pub struct Specializer {
    pub extend: bool,
    pub entries: HashMap<String, u16>,
}

pub struct Automaton {
    name: Arc<str>,
    node_set: NodeSet,
    top_node: NodeType,
    start_state: u32,
    eof_term: u16,
    states: Vec<State>,
    data: Vec<u32>,
    goto_offsets: Vec<u32>,
    goto_data: Vec<u32>,
    /// Dense per-node dynamic precedence.
    dyn_prec: Vec<i32>,
    dialects: Vec<Dialect>,
    tokenizers: Vec<Tokenizer>,
    /// Specializer tables keyed by the refined terminal.
    specializers: HashMap<u16, Specializer>,
}

static KNOWN_PROPS: Lazy<HashMap<&'static str, PropKey>> = Lazy::new(|| {
    HashMap::from([
        ("closed_by", PropKey::CLOSED_BY),
        ("opened_by", PropKey::OPENED_BY),
        ("group", PropKey::GROUP),
    ])
});

impl Automaton {
    /// Decode and validate a serialized grammar. `externals` supplies the
    /// tokenizer implementations for `External` token groups, keyed by slot
    /// name.
    pub fn decode(
        spec: GrammarSpec,
        externals: &HashMap<String, Arc<dyn ExternalTokenizer>>,
    ) -> Result<Automaton, MalformedTable> {
        if spec.format != FORMAT_VERSION {
            return Err(MalformedTable::UnsupportedFormat {
                found: spec.format,
                expected: FORMAT_VERSION,
            });
        }
        if spec.nodes.is_empty() {
            return Err(MalformedTable::Invalid { what: "empty node list" });
        }
        if !spec.nodes[0].error {
            return Err(MalformedTable::Invalid { what: "node 0 must be the error type" });
        }
        if spec.nodes.len() > VALUE_MASK as usize {
            return Err(MalformedTable::Invalid { what: "too many node types" });
        }
        let node_count = spec.nodes.len() as u32;
        if spec.states.len() % STATE_WIDTH != 0 || spec.states.is_empty() {
            return Err(MalformedTable::LengthMismatch {
                what: "state array",
                expected: STATE_WIDTH,
                found: spec.states.len(),
            });
        }
        let state_count = (spec.states.len() / STATE_WIDTH) as u32;
        if spec.start_state >= state_count {
            return Err(MalformedTable::BadReference {
                what: "start state",
                id: spec.start_state,
                max: state_count - 1,
            });
        }
        check_node_ref("top node", spec.top_node, node_count)?;
        check_node_ref("eof terminal", spec.eof_term, node_count)?;
        if spec.goto_offsets.len() != spec.nodes.len() {
            return Err(MalformedTable::LengthMismatch {
                what: "goto offset array",
                expected: spec.nodes.len(),
                found: spec.goto_offsets.len(),
            });
        }
        if spec.tokens.len() > 32 {
            return Err(MalformedTable::Invalid { what: "more than 32 token groups" });
        }

        // Node types.
        let mut types = Vec::with_capacity(spec.nodes.len());
        for (id, node) in spec.nodes.iter().enumerate() {
            let mut flags = 0;
            if node.error {
                flags |= NodeType::ERROR;
            }
            if node.top {
                flags |= NodeType::TOP;
            }
            if node.skipped {
                flags |= NodeType::SKIPPED;
            }
            if node.anonymous {
                flags |= NodeType::ANONYMOUS;
            }
            let mut props = NodeProps::new();
            for prop in &node.props {
                let key = KNOWN_PROPS
                    .get(prop.key.as_str())
                    .copied()
                    .unwrap_or_else(|| PropKey::named(&prop.key));
                props.set(key, PropValue::Names(prop.values.clone().into()));
            }
            types.push(NodeType::new(id as u16, node.name.clone(), flags, props));
        }
        let node_set = NodeSet::new(types);

        // State records, with their data offsets walked and verified.
        let mut states = Vec::with_capacity(state_count as usize);
        for index in 0..state_count as usize {
            let slots = &spec.states[index * STATE_WIDTH..(index + 1) * STATE_WIDTH];
            let state = State {
                flags: slots[0],
                actions: slots[1],
                skip: slots[2],
                tokenizer_mask: slots[3],
                default_reduce: slots[4],
                forced_reduce: slots[5],
            };
            for (term, action) in walk_pairs(&spec.data, state.actions, "state action list")? {
                if term >= node_count {
                    return Err(MalformedTable::BadReference {
                        what: "action terminal",
                        id: term,
                        max: node_count - 1,
                    });
                }
                check_action(action, state_count, node_count)?;
            }
            for term in walk_run(&spec.data, state.skip, "state skip list")? {
                if term >= node_count {
                    return Err(MalformedTable::BadReference {
                        what: "skip terminal",
                        id: term,
                        max: node_count - 1,
                    });
                }
            }
            for action in [state.default_reduce, state.forced_reduce] {
                if action != 0 {
                    if action & REDUCE_FLAG == 0 {
                        return Err(MalformedTable::Invalid {
                            what: "default/forced reduce must be a reduce action",
                        });
                    }
                    check_action(action, state_count, node_count)?;
                }
            }
            if state.tokenizer_mask != 0
                && 32 - state.tokenizer_mask.leading_zeros() > spec.tokens.len() as u32
            {
                return Err(MalformedTable::BadReference {
                    what: "tokenizer mask",
                    id: state.tokenizer_mask,
                    max: (1 << spec.tokens.len()) - 1,
                });
            }
            states.push(state);
        }

        // Goto table.
        for &offset in &spec.goto_offsets {
            for (state, target) in walk_pairs(&spec.goto_data, offset, "goto list")? {
                if state >= state_count || target >= state_count {
                    return Err(MalformedTable::BadReference {
                        what: "goto entry",
                        id: state.max(target),
                        max: state_count - 1,
                    });
                }
            }
        }

        // Dynamic precedence, dense by node id.
        let mut dyn_prec = vec![0i32; spec.nodes.len()];
        for entry in &spec.dynamic_precedence {
            check_node_ref("dynamic precedence", entry.node, node_count)?;
            dyn_prec[entry.node as usize] = entry.prec;
        }

        // Dialects.
        let mut dialects = Vec::with_capacity(spec.dialects.len());
        for dialect in &spec.dialects {
            let mut disabled = vec![false; spec.nodes.len()];
            for &term in &dialect.disabled {
                check_node_ref("dialect disable", term, node_count)?;
                disabled[term as usize] = true;
            }
            dialects.push(Dialect {
                name: dialect.name.clone(),
                disabled,
            });
        }

        // Token groups.
        let mut tokenizers = Vec::with_capacity(spec.tokens.len());
        for group in &spec.tokens {
            match group {
                TokenGroupSpec::Patterns { tokens } => {
                    let mut patterns = Vec::with_capacity(tokens.len());
                    for token in tokens {
                        check_node_ref("token pattern terminal", token.term, node_count)?;
                        let matcher = match &token.pattern {
                            PatternSpec::Literal(text) => Matcher::literal(text.clone()),
                            PatternSpec::Regex(pattern) => Matcher::regex(pattern)?,
                        };
                        patterns.push((token.term, matcher));
                    }
                    tokenizers.push(Tokenizer::Patterns(PatternTokenizer::new(patterns)));
                }
                TokenGroupSpec::External {
                    name,
                    contextual,
                    fallback,
                    extend,
                } => {
                    let imp = externals
                        .get(name)
                        .cloned()
                        .ok_or_else(|| MalformedTable::MissingExternal { name: name.clone() })?;
                    tokenizers.push(Tokenizer::External {
                        name: name.clone(),
                        imp,
                        contextual: *contextual,
                        fallback: *fallback,
                        extend: *extend,
                    });
                }
            }
        }

        // Specializers.
        let mut specializers = HashMap::new();
        for spec_entry in &spec.specializers {
            check_node_ref("specializer terminal", spec_entry.term, node_count)?;
            let mut entries = HashMap::new();
            for entry in &spec_entry.entries {
                check_node_ref("specializer target", entry.to, node_count)?;
                entries.insert(entry.text.clone(), entry.to);
            }
            specializers.insert(
                spec_entry.term,
                Specializer {
                    extend: spec_entry.extend,
                    entries,
                },
            );
        }

        let top_node = node_set.get(spec.top_node).clone();
        Ok(Automaton {
            name: spec.name.into(),
            node_set,
            top_node,
            start_state: spec.start_state,
            eof_term: spec.eof_term,
            states,
            data: spec.data,
            goto_offsets: spec.goto_offsets,
            goto_data: spec.goto_data,
            dyn_prec,
            dialects,
            tokenizers,
            specializers,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node_set(&self) -> &NodeSet {
        &self.node_set
    }

    pub fn top_node(&self) -> &NodeType {
        &self.top_node
    }

    pub fn start_state(&self) -> u32 {
        self.start_state
    }

    pub fn eof_term(&self) -> u16 {
        self.eof_term
    }

    pub fn state(&self, state: u32) -> &State {
        &self.states[state as usize]
    }

    pub fn state_count(&self) -> u32 {
        self.states.len() as u32
    }

    pub fn is_accepting(&self, state: u32) -> bool {
        self.state(state).flags & crate::spec::STATE_ACCEPTING != 0
    }

    /// The (terminal, action) pairs of a state.
    pub fn actions(&self, state: u32) -> PairIter<'_> {
        PairIter::new(&self.data, self.state(state).actions)
    }

    /// Terminals skipped (consumed without a state transition) in a state.
    pub fn skip_terms(&self, state: u32) -> RunIter<'_> {
        RunIter::new(&self.data, self.state(state).skip)
    }

    /// The action for `term` in `state`'s action list.
    pub fn has_action(&self, state: u32, term: u16) -> Option<u32> {
        self.actions(state)
            .find(|&(t, _)| t == term as u32)
            .map(|(_, action)| action)
    }

    /// Whether `action` is among the legal actions of `state`.
    pub fn valid_action(&self, state: u32, action: u32) -> bool {
        if self.state(state).default_reduce == action {
            return true;
        }
        self.actions(state).any(|(_, a)| a == action)
    }

    pub fn get_goto(&self, state: u32, node: u16) -> Option<u32> {
        let offset = self.goto_offsets[node as usize];
        if offset == END {
            return None;
        }
        PairIter::new(&self.goto_data, offset)
            .find(|&(s, _)| s == state)
            .map(|(_, target)| target)
    }

    /// The shift transitions of a state, as (terminal, target) pairs.
    pub fn next_states(&self, state: u32) -> Vec<(u16, u32)> {
        let mut result = Vec::new();
        for (term, action) in self.actions(state) {
            if action & REDUCE_FLAG == 0 {
                result.push((term as u16, action & VALUE_MASK));
            }
        }
        result
    }

    pub fn dynamic_precedence(&self, node: u16) -> i32 {
        self.dyn_prec.get(node as usize).copied().unwrap_or(0)
    }

    pub fn dialect(&self, name: &str) -> Option<&Dialect> {
        self.dialects.iter().find(|d| d.name == name)
    }

    pub fn dialect_index(&self, name: &str) -> Option<usize> {
        self.dialects.iter().position(|d| d.name == name)
    }

    pub fn dialect_at(&self, index: usize) -> &Dialect {
        &self.dialects[index]
    }

    pub fn tokenizers(&self) -> &[Tokenizer] {
        &self.tokenizers
    }

    pub fn specializer(&self, term: u16) -> Option<&Specializer> {
        self.specializers.get(&term)
    }
}

impl std::fmt::Debug for Automaton {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Automaton({}, {} states, {} nodes)",
            self.name,
            self.states.len(),
            self.node_set.len()
        )
    }
}

fn check_node_ref(what: &'static str, id: u16, node_count: u32) -> Result<(), MalformedTable> {
    if (id as u32) < node_count {
        Ok(())
    } else {
        Err(MalformedTable::BadReference {
            what,
            id: id as u32,
            max: node_count - 1,
        })
    }
}

fn check_action(action: u32, state_count: u32, node_count: u32) -> Result<(), MalformedTable> {
    if action & REDUCE_FLAG != 0 {
        check_node_ref("reduce node", (action & VALUE_MASK) as u16, node_count)
    } else if (action & VALUE_MASK) >= state_count {
        Err(MalformedTable::BadReference {
            what: "shift target",
            id: action & VALUE_MASK,
            max: state_count - 1,
        })
    } else {
        Ok(())
    }
}

/// Validated iterator over (a, b) pairs terminated by `END`.
pub struct PairIter<'a> {
    data: &'a [u32],
    offset: usize,
    done: bool,
}

impl<'a> PairIter<'a> {
    fn new(data: &'a [u32], offset: u32) -> PairIter<'a> {
        PairIter {
            data,
            offset: offset as usize,
            done: offset == END,
        }
    }
}

impl Iterator for PairIter<'_> {
    type Item = (u32, u32);

    fn next(&mut self) -> Option<(u32, u32)> {
        if self.done || self.offset >= self.data.len() || self.data[self.offset] == END {
            return None;
        }
        let pair = (self.data[self.offset], self.data[self.offset + 1]);
        self.offset += 2;
        Some(pair)
    }
}

/// Iterator over a single `END`-terminated run.
pub struct RunIter<'a> {
    data: &'a [u32],
    offset: usize,
    done: bool,
}

impl<'a> RunIter<'a> {
    fn new(data: &'a [u32], offset: u32) -> RunIter<'a> {
        RunIter {
            data,
            offset: offset as usize,
            done: offset == END,
        }
    }
}

impl Iterator for RunIter<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.done || self.offset >= self.data.len() || self.data[self.offset] == END {
            return None;
        }
        let value = self.data[self.offset];
        self.offset += 1;
        Some(value)
    }
}

fn walk_pairs(
    data: &[u32],
    offset: u32,
    what: &'static str,
) -> Result<Vec<(u32, u32)>, MalformedTable> {
    if offset == END {
        return Ok(Vec::new());
    }
    let mut result = Vec::new();
    let mut i = offset as usize;
    loop {
        if i >= data.len() {
            return Err(MalformedTable::OffsetOutOfRange {
                what,
                offset: i,
                len: data.len(),
            });
        }
        if data[i] == END {
            return Ok(result);
        }
        if i + 1 >= data.len() {
            return Err(MalformedTable::OffsetOutOfRange {
                what,
                offset: i + 1,
                len: data.len(),
            });
        }
        result.push((data[i], data[i + 1]));
        i += 2;
    }
}

fn walk_run(data: &[u32], offset: u32, what: &'static str) -> Result<Vec<u32>, MalformedTable> {
    if offset == END {
        return Ok(Vec::new());
    }
    let mut result = Vec::new();
    let mut i = offset as usize;
    loop {
        if i >= data.len() {
            return Err(MalformedTable::OffsetOutOfRange {
                what,
                offset: i,
                len: data.len(),
            });
        }
        if data[i] == END {
            return Ok(result);
        }
        result.push(data[i]);
        i += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{NodeSpec, PatternSpec, TokenGroupSpec, TokenPatternSpec};

    fn minimal_spec() -> GrammarSpec {
        GrammarSpec {
            format: FORMAT_VERSION,
            name: "minimal".to_string(),
            nodes: vec![
                NodeSpec {
                    name: "\u{26a0}".to_string(),
                    top: false,
                    error: true,
                    skipped: false,
                    anonymous: false,
                    props: Vec::new(),
                },
                NodeSpec {
                    name: "Top".to_string(),
                    top: true,
                    error: false,
                    skipped: false,
                    anonymous: false,
                    props: Vec::new(),
                },
                NodeSpec {
                    name: "word".to_string(),
                    top: false,
                    error: false,
                    skipped: false,
                    anonymous: false,
                    props: Vec::new(),
                },
            ],
            top_node: 1,
            start_state: 0,
            eof_term: 0,
            states: vec![0, 0, END, 1, 0, 0],
            data: vec![2, 0, END],
            goto_offsets: vec![END, END, END],
            goto_data: Vec::new(),
            dynamic_precedence: Vec::new(),
            dialects: Vec::new(),
            tokens: vec![TokenGroupSpec::Patterns {
                tokens: vec![TokenPatternSpec {
                    term: 2,
                    pattern: PatternSpec::Regex("[a-z]+".to_string()),
                }],
            }],
            specializers: Vec::new(),
        }
    }

    #[test]
    fn decodes_minimal_grammar() {
        let automaton = Automaton::decode(minimal_spec(), &HashMap::new()).expect("decode");
        assert_eq!(automaton.state_count(), 1);
        assert_eq!(automaton.has_action(0, 2), Some(0));
        assert_eq!(automaton.has_action(0, 1), None);
        assert_eq!(automaton.node_set().get(2).name(), "word");
    }

    #[test]
    fn rejects_wrong_format() {
        let mut spec = minimal_spec();
        spec.format = 99;
        match Automaton::decode(spec, &HashMap::new()) {
            Err(MalformedTable::UnsupportedFormat { found, expected }) => {
                assert_eq!(found, 99);
                assert_eq!(expected, FORMAT_VERSION);
            }
            other => panic!("expected format error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn rejects_dangling_action_offset() {
        let mut spec = minimal_spec();
        // Action offset points past the data array.
        spec.states[1] = 40;
        assert!(matches!(
            Automaton::decode(spec, &HashMap::new()),
            Err(MalformedTable::OffsetOutOfRange { .. })
        ));
    }

    #[test]
    fn rejects_bad_shift_target() {
        let mut spec = minimal_spec();
        spec.data = vec![2, 17, END]; // shift to nonexistent state 17
        assert!(matches!(
            Automaton::decode(spec, &HashMap::new()),
            Err(MalformedTable::BadReference { .. })
        ));
    }

    #[test]
    fn rejects_bad_regex() {
        let mut spec = minimal_spec();
        spec.tokens = vec![TokenGroupSpec::Patterns {
            tokens: vec![TokenPatternSpec {
                term: 2,
                pattern: PatternSpec::Regex("[unclosed".to_string()),
            }],
        }];
        assert!(matches!(
            Automaton::decode(spec, &HashMap::new()),
            Err(MalformedTable::BadRegex { .. })
        ));
    }
}
