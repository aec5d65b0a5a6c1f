//! The parse stepper
//!
//!     `Parse` drives one document through the automaton: every call to
//!     `advance` takes the stacks sitting at the minimal input position and
//!     moves each of them one action forward, splitting on ambiguity,
//!     merging stacks that converge on the same state, and invoking the
//!     recovery ladder when nothing can move. A finished stack's record
//!     buffer is handed to `Tree::build`.
//!
//!     The stepper is also where incremental reuse happens: before
//!     tokenizing at a position, it asks the fragment cursor whether the
//!     previous parse left a node here that is valid in the current state,
//!     and if so splices the whole old subtree without touching the input.
//!
//!     `advance` is the only suspension point. Callers loop it against
//!     their own deadline; `stop_at` freezes input consumption at a
//!     position so a partial tree can be flushed instead of discarded.
//!
//! Recovery
//!
//!     A stuck stack tries, in order: restarting (only from a dead end),
//!     a bounded series of forced reductions, inserting a plausible missing
//!     terminal, and finally deleting the offending token. Deletion always
//!     consumes input, which is what bounds the whole parse by input length
//!     and makes the "a tree always comes back" promise hold for arbitrary
//!     garbage.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use trellis_tree::{
    BuildData, Child, Input, IncrementalParser, NodeSet, PartialParse, PropKey, PropValue, Range,
    Side, Tree, TreeExt, TreeFragment, DEFAULT_BUFFER_LENGTH,
};

use crate::automaton::{Automaton, Dialect};
use crate::nest::{MixedParse, NestHook};
use crate::spec::{GrammarSpec, MalformedTable};
use crate::stack::{recover, ContextTracker, Stack};
use crate::token::{ExternalTokenizer, InputStream, TokenCache};

/// Rounds of successful progress required to leave recovery mode.
const RECOVER_DIST: u32 = 5;

/// Hard cap on simultaneously live stacks outside recovery.
const MAX_STACK_COUNT: usize = 30;

/// Strict-mode parse failure: the grammar declared that every valid
/// document must parse, and this one didn't.
#[derive(Debug, Clone)]
pub struct NoParseError {
    pub pos: u32,
}

impl fmt::Display for NoParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no parse at position {}", self.pos)
    }
}

impl std::error::Error for NoParseError {}

#[derive(Debug, Clone)]
pub struct UnknownDialect(pub String);

impl fmt::Display for UnknownDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "grammar declares no dialect named {:?}", self.0)
    }
}

impl std::error::Error for UnknownDialect {}

/// A configured parser: the shared automaton plus per-instance options.
/// Cloning is cheap and configuration methods return modified copies, so
/// one decoded grammar can back many differently configured parsers.
#[derive(Clone)]
pub struct LrParser {
    automaton: Arc<Automaton>,
    strict: bool,
    dialect: Option<usize>,
    tracker: Option<Arc<dyn ContextTracker>>,
    nest: Option<Arc<dyn NestHook>>,
}

impl LrParser {
    pub fn from_spec(spec: GrammarSpec) -> Result<LrParser, MalformedTable> {
        LrParser::with_externals(spec, &HashMap::new())
    }

    pub fn with_externals(
        spec: GrammarSpec,
        externals: &HashMap<String, Arc<dyn ExternalTokenizer>>,
    ) -> Result<LrParser, MalformedTable> {
        Ok(LrParser {
            automaton: Arc::new(Automaton::decode(spec, externals)?),
            strict: false,
            dialect: None,
            tracker: None,
            nest: None,
        })
    }

    pub fn automaton(&self) -> &Automaton {
        &self.automaton
    }

    pub fn node_set(&self) -> &NodeSet {
        self.automaton.node_set()
    }

    pub fn with_strict(mut self, strict: bool) -> LrParser {
        self.strict = strict;
        self
    }

    pub fn with_context_tracker(mut self, tracker: Arc<dyn ContextTracker>) -> LrParser {
        self.tracker = Some(tracker);
        self
    }

    pub fn with_nest_hook(mut self, hook: Arc<dyn NestHook>) -> LrParser {
        self.nest = Some(hook);
        self
    }

    pub fn with_dialect(mut self, name: &str) -> Result<LrParser, UnknownDialect> {
        match self.automaton.dialect_index(name) {
            Some(index) => {
                self.dialect = Some(index);
                Ok(self)
            }
            None => Err(UnknownDialect(name.to_string())),
        }
    }

    pub(crate) fn dialect_ref(&self) -> Option<&Dialect> {
        self.dialect.map(|index| self.automaton.dialect_at(index))
    }

    pub(crate) fn nest_hook(&self) -> Option<&Arc<dyn NestHook>> {
        self.nest.as_ref()
    }

    /// Parse under the strict contract: any recovery requirement is an
    /// error instead of an error node.
    pub fn parse_strict(&self, input: &dyn Input) -> Result<Arc<Tree>, NoParseError> {
        let ranges = [Range::new(0, input.len())];
        let mut parse = Parse::new(self, input, &[], &ranges, true);
        loop {
            if let Some(tree) = parse.advance_inner()? {
                return Ok(tree);
            }
        }
    }
}

impl IncrementalParser for LrParser {
    fn start_parse<'a>(
        &'a self,
        input: &'a dyn Input,
        fragments: &[TreeFragment],
        ranges: &[Range],
    ) -> Box<dyn PartialParse + 'a> {
        if self.nest.is_some() {
            Box::new(MixedParse::new(self, input, fragments, ranges))
        } else {
            Box::new(Parse::new(self, input, fragments, ranges, self.strict))
        }
    }

    fn name(&self) -> &str {
        self.automaton.name()
    }
}

/// One in-flight parse over one input.
pub struct Parse<'a> {
    parser: &'a LrParser,
    input: &'a dyn Input,
    stream: InputStream<'a>,
    tokens: TokenCache,
    stacks: Vec<Stack>,
    recovering: u32,
    min_stack_pos: u32,
    reused: Vec<Child>,
    fragments: Option<FragmentCursor>,
    stopped_at: Option<u32>,
    strict: bool,
}

impl<'a> Parse<'a> {
    pub(crate) fn new(
        parser: &'a LrParser,
        input: &'a dyn Input,
        fragments: &[TreeFragment],
        ranges: &[Range],
        strict: bool,
    ) -> Parse<'a> {
        let stream = InputStream::new(input, ranges);
        let start = stream.clip_pos(ranges.first().map(|r| r.from).unwrap_or(0));
        let a = parser.automaton();
        let stacks = vec![Stack::start(a, parser.tracker.clone(), start)];
        let use_fragments = !fragments.is_empty()
            && stream.end.saturating_sub(start) > DEFAULT_BUFFER_LENGTH * 4;
        Parse {
            tokens: TokenCache::new(a.tokenizers().len()),
            stream,
            parser,
            input,
            stacks,
            recovering: 0,
            min_stack_pos: start,
            reused: Vec::new(),
            fragments: use_fragments.then(|| FragmentCursor::new(fragments.to_vec())),
            stopped_at: None,
            strict,
        }
    }

    /// One stepper round. `Ok(Some(tree))` when done.
    pub(crate) fn advance_inner(&mut self) -> Result<Option<Arc<Tree>>, NoParseError> {
        let a = self.parser.automaton.clone();
        let pos = self.min_stack_pos;
        let stacks = std::mem::take(&mut self.stacks);
        let mut new_stacks: Vec<Stack> = Vec::new();
        let mut stopped: Vec<Stack> = Vec::new();
        let mut stopped_tokens: Vec<(u16, u32)> = Vec::new();

        for mut stack in stacks {
            loop {
                if stack.pos > pos {
                    new_stacks.push(stack);
                    break;
                }
                if self.advance_stack(&mut stack, &mut new_stacks, true) {
                    continue;
                }
                let (term, end) = match self.tokens.main {
                    Some(main) if main.value >= 0 => (main.value as u16, main.end),
                    Some(main) => (0, main.end),
                    None => (0, stack.pos),
                };
                stopped_tokens.push((term, end));
                stopped.push(stack);
                break;
            }
        }

        if !new_stacks.is_empty() {
            // Stacks that reached an accepting state at the end of input
            // stay alive until every competitor converges, so the final
            // choice between ambiguous parses is made on scores, not on
            // scheduling order.
            let mut i = 0;
            while i < stopped.len() {
                let done = stopped[i].pos == self.stream.end && a.is_accepting(stopped[i].state);
                if done {
                    let stack = stopped.remove(i);
                    stopped_tokens.remove(i);
                    push_stack_dedup(stack, &mut new_stacks);
                } else {
                    i += 1;
                }
            }
        }

        if new_stacks.is_empty() {
            if let Some(finished) = self.find_finished(&mut stopped) {
                return Ok(Some(self.stack_to_tree(finished)));
            }
            if self.strict {
                return Err(NoParseError { pos });
            }
            if self.recovering == 0 {
                self.recovering = RECOVER_DIST;
            }
        }

        if self.recovering > 0 && !stopped.is_empty() {
            let finished = match self.stopped_at {
                Some(stop) if stopped[0].pos > stop => Some(stopped.swap_remove(0)),
                _ => self.run_recovery(stopped, &stopped_tokens, &mut new_stacks),
            };
            if let Some(mut finished) = finished {
                finished.force_all(&a);
                return Ok(Some(self.stack_to_tree(finished)));
            }
        }

        if self.recovering > 0 {
            let max_remaining = if self.recovering == 1 {
                1
            } else {
                (self.recovering as usize) * recover::MAX_STACK_COUNT / 4
            };
            if new_stacks.len() > max_remaining {
                new_stacks.sort_by_key(|stack| -stack.score);
                new_stacks.truncate(max_remaining);
            }
            if new_stacks.iter().any(|stack| stack.reduce_pos > pos) {
                self.recovering -= 1;
            }
        } else if new_stacks.len() > 1 {
            // Merge converged stacks, keeping the better score.
            let mut i = 0;
            while i < new_stacks.len() {
                let mut j = i + 1;
                let mut remove_i = false;
                while j < new_stacks.len() {
                    let equivalent = new_stacks[i].pos == new_stacks[j].pos
                        && new_stacks[i].same_state(&new_stacks[j]);
                    if equivalent {
                        if new_stacks[i].score >= new_stacks[j].score {
                            new_stacks.swap_remove(j);
                        } else {
                            remove_i = true;
                            break;
                        }
                    } else {
                        j += 1;
                    }
                }
                if remove_i {
                    new_stacks.swap_remove(i);
                } else {
                    i += 1;
                }
            }
            if new_stacks.len() > MAX_STACK_COUNT {
                new_stacks.sort_by_key(|stack| -stack.score);
                new_stacks.truncate(MAX_STACK_COUNT);
            }
        }

        self.min_stack_pos = new_stacks.iter().map(|s| s.pos).min().unwrap_or(pos);
        self.stacks = new_stacks;
        Ok(None)
    }

    /// Move one stack one action forward. False when the stack is stuck.
    /// Splits for ambiguous extra actions go to `new_stacks`.
    fn advance_stack(
        &mut self,
        stack: &mut Stack,
        new_stacks: &mut Vec<Stack>,
        allow_split: bool,
    ) -> bool {
        let parser = self.parser;
        let a = parser.automaton();
        let start = stack.pos;

        if let Some(stop) = self.stopped_at {
            if start >= stop {
                return stack.force_reduce(a);
            }
        }

        // Subtree reuse from the previous parse.
        if self.fragments.is_some() {
            let strict_cx = stack
                .context
                .as_ref()
                .map(|c| c.tracker.strict())
                .unwrap_or(false);
            let cx_hash = if strict_cx { stack.context_hash() } else { 0 };
            let mut cached = self
                .fragments
                .as_mut()
                .and_then(|fragments| fragments.node_at(start));
            while let Some(node) = cached {
                let id = node.ty().id();
                let known = (id as usize) < a.node_set().len()
                    && a.node_set().get(id).name() == node.ty().name();
                if known {
                    if let Some(next_state) = a.get_goto(stack.state, id) {
                        if node.length() > 0
                            && (!strict_cx || node.context_hash().unwrap_or(0) == cx_hash)
                        {
                            let index = self.push_reused(node.clone());
                            stack.use_node(index, &node, next_state);
                            return true;
                        }
                    }
                }
                // The whole node doesn't fit; try its leftmost child at the
                // same position.
                cached = match node.children().first() {
                    Some(Child::Tree(inner)) if node.positions()[0] == 0 => Some(inner.clone()),
                    _ => None,
                };
            }
        }

        let state = a.state(stack.state);
        if state.default_reduce != 0 {
            stack.reduce(state.default_reduce, a);
            return true;
        }

        if stack.frame_depth() >= recover::CUT_DEPTH {
            while stack.frame_depth() > recover::CUT_TO && stack.force_reduce(a) {}
        }

        let actions =
            self.tokens
                .get_actions(stack, a, parser.dialect_ref(), &mut self.stream);
        if actions.is_empty() {
            // Skippable token?
            if let Some(main) = self.tokens.main {
                if main.value >= 0 {
                    let term = main.value as u16;
                    if a.skip_terms(stack.state).any(|t| t == term as u32) {
                        stack.skip_token(term, main.start, main.end, a, self.input);
                        return true;
                    }
                }
            }
            return false;
        }
        let main_start = self.tokens.main.map(|m| m.start).unwrap_or(start);
        for (i, &(action, term, end)) in actions.iter().enumerate() {
            let last = i == actions.len() - 1 || !allow_split;
            if last {
                stack.apply(action, term, main_start, end, a, self.input);
                return true;
            }
            let mut split = stack.split();
            split.apply(action, term, main_start, end, a, self.input);
            new_stacks.push(split);
        }
        true
    }

    /// Run a stack until it either moves past its current position (queued
    /// into `new_stacks`, returns `None`) or gets stuck (returned).
    fn advance_fully(&mut self, mut stack: Stack, new_stacks: &mut Vec<Stack>) -> Option<Stack> {
        let pos = stack.pos;
        loop {
            if !self.advance_stack(&mut stack, new_stacks, false) {
                return Some(stack);
            }
            if stack.pos > pos {
                push_stack_dedup(stack, new_stacks);
                return None;
            }
        }
    }

    /// The recovery ladder, applied to every stuck stack. Returns a stack
    /// that ran out of input, to be forced to completion.
    fn run_recovery(
        &mut self,
        stopped: Vec<Stack>,
        tokens: &[(u16, u32)],
        new_stacks: &mut Vec<Stack>,
    ) -> Option<Stack> {
        let a = self.parser.automaton.clone();
        let mut finished: Option<Stack> = None;
        let mut restarted = false;
        for (i, mut stack) in stopped.into_iter().enumerate() {
            let (mut term, mut term_end) = tokens[i];
            if stack.dead_end(&a) {
                if restarted {
                    continue;
                }
                restarted = true;
                stack.restart(&a);
                match self.advance_fully(stack, new_stacks) {
                    None => continue,
                    Some(s) => stack = s,
                }
            }

            // Forced reductions, each given a chance to get moving.
            let mut force = Some(stack.split());
            for _ in 0..recover::FORCE_REDUCE_LIMIT {
                let Some(mut f) = force.take() else { break };
                if !f.force_reduce(&a) {
                    break;
                }
                force = self.advance_fully(f, new_stacks);
            }

            // Insert a plausible missing terminal.
            for insert in stack.recover_by_insert(term, &a, self.input) {
                self.advance_fully(insert, new_stacks);
            }

            let end = match self.stopped_at {
                Some(stop) => stop.min(self.stream.end),
                None => self.stream.end,
            };
            if end > stack.pos {
                // Delete the offending token; guaranteed progress.
                if term_end == stack.pos {
                    term_end = stack.pos + self.stream.char_len_at(stack.pos).max(1);
                    term = 0;
                }
                stack.recover_by_delete(term, term_end, &a);
                push_stack_dedup(stack, new_stacks);
            } else if finished.as_ref().map_or(true, |f| f.score < stack.score) {
                finished = Some(stack);
            }
        }
        finished
    }

    /// The best accepting stack that consumed all input, if any.
    fn find_finished(&self, stopped: &mut Vec<Stack>) -> Option<Stack> {
        let a = self.parser.automaton();
        let mut best: Option<usize> = None;
        for (i, stack) in stopped.iter().enumerate() {
            let at_end = stack.pos == self.stream.end
                || self.stopped_at.map_or(false, |stop| stack.pos >= stop);
            if at_end
                && a.is_accepting(stack.state)
                && best.map_or(true, |b| stopped[b].score < stack.score)
            {
                best = Some(i);
            }
        }
        best.map(|i| stopped.swap_remove(i))
    }

    fn push_reused(&mut self, tree: Arc<Tree>) -> usize {
        if let Some(Child::Tree(last)) = self.reused.last() {
            if Arc::ptr_eq(last, &tree) {
                return self.reused.len() - 1;
            }
        }
        self.reused.push(Child::Tree(tree));
        self.reused.len() - 1
    }

    fn stack_to_tree(&mut self, stack: Stack) -> Arc<Tree> {
        let a = self.parser.automaton();
        let data = BuildData {
            buffer: stack.collect_buffer(),
            reused: std::mem::take(&mut self.reused),
            set: a.node_set().clone(),
            top: a.top_node().clone(),
            start: 0,
            length: stack.pos,
            context_hash: stack.context_hash(),
            look_ahead: stack.lookahead,
            max_buffer_length: DEFAULT_BUFFER_LENGTH,
        };
        let tree = Tree::build(data);
        let tree = if self.stopped_at.is_some() {
            tree.with_prop(PropKey::OPEN, PropValue::Flag)
        } else {
            tree
        };
        Arc::new(tree)
    }
}

impl PartialParse for Parse<'_> {
    fn advance(&mut self) -> Option<Arc<Tree>> {
        self.advance_inner()
            .expect("strict grammar failed; use parse_strict to handle NoParseError")
    }

    fn parsed_pos(&self) -> u32 {
        self.min_stack_pos
    }

    fn stop_at(&mut self, pos: u32) {
        if let Some(stop) = self.stopped_at {
            assert!(pos <= stop, "can't move a stop position forward");
        }
        self.stopped_at = Some(pos);
    }

    fn stopped_at(&self) -> Option<u32> {
        self.stopped_at
    }
}

fn push_stack_dedup(stack: Stack, stacks: &mut Vec<Stack>) {
    for other in stacks.iter_mut() {
        if other.pos == stack.pos && other.same_state(&stack) {
            if other.score < stack.score {
                *other = stack;
            }
            return;
        }
    }
    stacks.push(stack);
}

/// Walks the fragments of a previous parse alongside the new one,
/// answering "is there a node starting exactly here that is safe to
/// reuse". Open fragment edges are pulled inward to the nearest boundary
/// of a non-error node, plus a margin, before anything near them is
/// offered up.
pub(crate) struct FragmentCursor {
    fragments: Vec<TreeFragment>,
    i: usize,
    fragment: Option<TreeFragment>,
    safe_from: i64,
    safe_to: i64,
    trees: Vec<Arc<Tree>>,
    start: Vec<i64>,
    index: Vec<usize>,
    next_start: i64,
}

impl FragmentCursor {
    pub(crate) fn new(fragments: Vec<TreeFragment>) -> FragmentCursor {
        let mut cursor = FragmentCursor {
            fragments,
            i: 0,
            fragment: None,
            safe_from: 0,
            safe_to: 0,
            trees: Vec::new(),
            start: Vec::new(),
            index: Vec::new(),
            next_start: 0,
        };
        cursor.next_fragment();
        cursor
    }

    fn next_fragment(&mut self) {
        self.trees.clear();
        self.start.clear();
        self.index.clear();
        if self.i == self.fragments.len() {
            self.fragment = None;
            self.next_start = i64::MAX;
            return;
        }
        let fr = self.fragments[self.i].clone();
        self.i += 1;
        self.safe_from = if fr.open_start {
            cut_at(&fr.tree, (fr.from as i64 + fr.offset).max(0) as u32, 1) as i64 - fr.offset
        } else {
            fr.from as i64
        };
        self.safe_to = if fr.open_end {
            cut_at(&fr.tree, (fr.to as i64 + fr.offset).max(0) as u32, -1) as i64 - fr.offset
        } else {
            fr.to as i64
        };
        self.trees.push(fr.tree.clone());
        self.start.push(-fr.offset);
        self.index.push(0);
        self.next_start = self.safe_from;
        self.fragment = Some(fr);
    }

    /// A reusable node starting exactly at `pos`, or None.
    pub(crate) fn node_at(&mut self, pos: u32) -> Option<Arc<Tree>> {
        let pos = pos as i64;
        if pos < self.next_start {
            return None;
        }
        while self.fragment.is_some() && self.safe_to <= pos {
            self.next_fragment();
        }
        self.fragment.as_ref()?;
        loop {
            let Some(top) = self.trees.len().checked_sub(1) else {
                self.next_fragment();
                return None;
            };
            let tree = self.trees[top].clone();
            let index = self.index[top];
            if index == tree.children().len() {
                self.trees.pop();
                self.start.pop();
                self.index.pop();
                continue;
            }
            let child = tree.children()[index].clone();
            let start = self.start[top] + tree.positions()[index] as i64;
            if start > pos {
                self.next_start = start;
                return None;
            }
            match child {
                Child::Tree(next) => {
                    if start == pos {
                        if start < self.safe_from {
                            return None;
                        }
                        let end = start + next.length() as i64;
                        if end <= self.safe_to {
                            let look_ahead = next.lookahead() as i64;
                            let fragment_to = self.fragment.as_ref().expect("fragment").to as i64;
                            if look_ahead == 0 || end + look_ahead < fragment_to {
                                return Some(next);
                            }
                        }
                    }
                    self.index[top] += 1;
                    if start + next.length() as i64 >= self.safe_from.max(pos) {
                        self.trees.push(next);
                        self.start.push(start);
                        self.index.push(0);
                    }
                }
                Child::Buffer(buffer) => {
                    // Buffer nodes are never reused individually; their
                    // combined span just moves the scan forward.
                    self.index[top] += 1;
                    self.next_start = start + buffer.length() as i64;
                }
            }
        }
    }
}

/// Walk from `pos` to a position provably clear of the edit on the given
/// side: past the boundary of a non-error node, plus a margin.
fn cut_at(tree: &Arc<Tree>, pos: u32, side: i32) -> u32 {
    const MARGIN: u32 = 25;
    let mut cursor = tree.cursor();
    let enter_side = if side < 0 { Side::Before } else { Side::After };
    while cursor.enter(pos, enter_side) {}
    loop {
        let clear = if side < 0 {
            cursor.to() < pos
        } else {
            cursor.from() > pos
        };
        if clear && !cursor.node_type().is_error() {
            return if side < 0 {
                cursor
                    .to()
                    .saturating_sub(1)
                    .min(pos.saturating_sub(MARGIN))
            } else {
                (cursor.from() + 1).max(pos + MARGIN).min(tree.length())
            };
        }
        let stepped = if side < 0 {
            cursor.prev_sibling()
        } else {
            cursor.next_sibling()
        };
        if stepped {
            // Descend toward the position from the new branch.
            while cursor.enter(pos, enter_side) {}
            continue;
        }
        if !cursor.parent() {
            return if side < 0 { 0 } else { tree.length() };
        }
    }
}
