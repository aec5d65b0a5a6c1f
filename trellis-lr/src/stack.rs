//! GLR parse stacks
//!
//!     A `Stack` is one candidate parse-in-progress: the LR state history,
//!     an output buffer of flat node records, the current input position and
//!     an accumulated score. The stepper runs several at once, splitting on
//!     ambiguity and merging or discarding stacks that converge.
//!
//!     `split` has to be cheap — ambiguity can split on every token — so the
//!     output buffer is shared copy-on-write: the live tail lives in a plain
//!     `Vec`, and splitting freezes it into an `Arc` chain segment that both
//!     stacks keep as an immutable prefix. The (fixed-width, shallow) frame
//!     history is simply copied.
//!
//!     Scores only ever rank stacks against each other: dynamic precedence
//!     adds on reduces, recovery actions subtract, and the exact magnitudes
//!     are tuning values, not API.

use std::any::Any;
use std::sync::Arc;

use trellis_tree::{BufferEntry, Input, Tree};

use crate::automaton::Automaton;
use crate::spec::{DEPTH_SHIFT, REDUCE_FLAG, VALUE_MASK};

/// Lookahead past a node's end below this margin is not recorded.
pub(crate) const LOOKAHEAD_MARGIN: u32 = 25;

/// Recovery tuning. Only the relative order of the costs is meaningful.
pub(crate) mod recover {
    /// Penalty for inserting a phantom terminal.
    pub const INSERT_COST: i32 = 200;
    /// Penalty for deleting the offending token.
    pub const DELETE_COST: i32 = 190;
    /// Penalty for a forced reduction.
    pub const REDUCE_COST: i32 = 100;
    /// Insertion candidates tried per stuck stack.
    pub const MAX_NEXT: usize = 4;
    /// Consecutive forced reductions tried per stuck stack.
    pub const FORCE_REDUCE_LIMIT: usize = 10;
    /// Stacks this deep stop attempting insertion entirely.
    pub const MAX_INSERT_STACK_DEPTH: usize = 300;
    /// Stacks this deep only try insertions that directly accept the next
    /// token.
    pub const DAMPEN_INSERT_STACK_DEPTH: usize = 120;
    /// Live-stack cap while recovering.
    pub const MAX_STACK_COUNT: usize = 12;
    /// Frame depth at which the stepper forces reductions to bound memory.
    pub const CUT_DEPTH: usize = 15_000;
    pub const CUT_TO: usize = 9_000;
}

/// Opaque tracker state carried by a stack.
pub type ContextValue = Arc<dyn Any + Send + Sync>;

/// Callbacks for context-sensitive tokenizing: the tracker value follows
/// every shift/reduce/reuse, and its hash keys token caching and stack
/// merging.
pub trait ContextTracker: Send + Sync {
    fn start(&self) -> ContextValue;

    fn hash(&self, value: &ContextValue) -> u64;

    fn shift(
        &self,
        value: &ContextValue,
        _term: u16,
        _input: &dyn Input,
        _start: u32,
        _end: u32,
    ) -> ContextValue {
        value.clone()
    }

    fn reduce(&self, value: &ContextValue, _node: u16) -> ContextValue {
        value.clone()
    }

    fn reuse(&self, value: &ContextValue, _tree: &Tree) -> ContextValue {
        value.clone()
    }

    /// When true (the default), cached contextual tokens are only reused
    /// under an identical context hash.
    fn strict(&self) -> bool {
        true
    }
}

#[derive(Clone)]
pub struct StackContext {
    pub tracker: Arc<dyn ContextTracker>,
    pub value: ContextValue,
    pub hash: u64,
}

impl StackContext {
    pub fn start(tracker: Arc<dyn ContextTracker>) -> StackContext {
        let value = tracker.start();
        let hash = tracker.hash(&value);
        StackContext {
            tracker,
            value,
            hash,
        }
    }
}

/// One shifted symbol: the state *below* it, its start position, and the
/// record count at the time it was pushed.
#[derive(Clone, Copy, Debug)]
struct Frame {
    state: u32,
    start: u32,
    buffer_base: usize,
}

/// An immutable, shared chunk of output buffer produced before a split.
struct Segment {
    parent: Option<Arc<Segment>>,
    data: Vec<BufferEntry>,
}

pub struct Stack {
    /// Current (top) LR state.
    pub state: u32,
    frames: Vec<Frame>,
    /// Input position: everything before it has been consumed.
    pub pos: u32,
    /// End of the last non-skipped content; reductions close at this
    /// position so trailing whitespace stays outside nodes.
    pub reduce_pos: u32,
    pub score: i32,
    buffer: Vec<BufferEntry>,
    chain: Option<Arc<Segment>>,
    chain_len: usize,
    pub context: Option<StackContext>,
    /// High-water mark of input read while deciding this stack's actions.
    pub lookahead: u32,
}

impl Stack {
    pub fn start(a: &Automaton, tracker: Option<Arc<dyn ContextTracker>>, pos: u32) -> Stack {
        Stack {
            state: a.start_state(),
            frames: Vec::new(),
            pos,
            reduce_pos: pos,
            score: 0,
            buffer: Vec::new(),
            chain: None,
            chain_len: 0,
            context: tracker.map(StackContext::start),
            lookahead: 0,
        }
    }

    pub fn context_hash(&self) -> u64 {
        self.context.as_ref().map(|c| c.hash).unwrap_or(0)
    }

    pub fn context_value(&self) -> Option<&ContextValue> {
        self.context.as_ref().map(|c| &c.value)
    }

    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    fn total_len(&self) -> usize {
        self.chain_len + self.buffer.len()
    }

    fn push_state(&mut self, state: u32, start: u32) {
        self.frames.push(Frame {
            state: self.state,
            start,
            buffer_base: self.total_len(),
        });
        self.state = state;
    }

    /// Apply a (shift or reduce) action for a token spanning `start..end`.
    pub fn apply(&mut self, action: u32, term: u16, start: u32, end: u32, a: &Automaton, input: &dyn Input) {
        if action & REDUCE_FLAG != 0 {
            self.reduce(action, a);
        } else {
            self.shift(action & VALUE_MASK, term, start, end, a, input);
        }
    }

    pub fn shift(&mut self, next_state: u32, term: u16, start: u32, end: u32, a: &Automaton, input: &dyn Input) {
        self.pos = end;
        self.reduce_pos = end;
        self.push_state(next_state, start);
        self.shift_context(term, start, end, input);
        if !a.node_set().get(term).is_anonymous() {
            self.buffer.push(BufferEntry {
                id: term as i32,
                start,
                end,
                size: 1,
            });
        }
    }

    /// Consume a skippable token without a state transition. The reduce
    /// position is left alone so the token stays outside enclosing nodes.
    pub fn skip_token(&mut self, term: u16, start: u32, end: u32, a: &Automaton, input: &dyn Input) {
        self.pos = end;
        self.shift_context(term, start, end, input);
        if !a.node_set().get(term).is_anonymous() {
            self.buffer.push(BufferEntry {
                id: term as i32,
                start,
                end,
                size: 1,
            });
        }
    }

    pub fn reduce(&mut self, action: u32, a: &Automaton) {
        let depth = (action >> DEPTH_SHIFT) as usize;
        let node = (action & VALUE_MASK) as u16;
        let dprec = a.dynamic_precedence(node);
        if dprec != 0 {
            self.score += dprec;
        }
        if depth == 0 {
            if let Some(target) = a.get_goto(self.state, node) {
                self.push_state(target, self.reduce_pos);
            }
            if !a.node_set().get(node).is_anonymous() {
                self.store_node(node, self.reduce_pos, self.reduce_pos, 1, true);
            }
            self.reduce_context(node);
            return;
        }
        if self.reduce_pos + LOOKAHEAD_MARGIN < self.pos {
            self.set_lookahead(self.pos);
        }
        let len = self.frames.len();
        debug_assert!(depth <= len);
        if len == 0 {
            return;
        }
        let depth = depth.min(len);
        let base = self.frames[len - depth];
        let count = self.total_len() - base.buffer_base;
        self.store_node(node, base.start, self.reduce_pos, count as i32 + 1, true);
        if let Some(target) = a.get_goto(base.state, node) {
            self.state = target;
        }
        self.frames.truncate(len - depth + 1);
        self.reduce_context(node);
    }

    /// Record a node in the output buffer. `size` is the record count of the
    /// subtree including this record. `must_sink` places the record before
    /// trailing content that ends past `end` (skipped tokens consumed after
    /// the node closed).
    pub fn store_node(&mut self, term: u16, start: u32, end: u32, mut size: i32, must_sink: bool) {
        if term == 0 {
            // Merge adjacent error records instead of piling them up, as
            // long as we're not reaching across a frame boundary.
            let in_region = self
                .frames
                .last()
                .map_or(true, |f| f.buffer_base < self.total_len());
            if in_region {
                if let Some(last) = self.buffer.last_mut() {
                    if last.id == 0 && last.size > 0 {
                        if start == end {
                            return;
                        }
                        if last.end >= start {
                            last.end = end;
                            return;
                        }
                    }
                }
            }
        }
        if !must_sink || self.pos == end || self.buffer.is_empty() {
            self.buffer.push(BufferEntry {
                id: term as i32,
                start,
                end,
                size,
            });
            return;
        }
        let mut index = self.buffer.len();
        if self.buffer[index - 1].id == 0 && self.buffer[index - 1].size > 0 {
            // Never reorder around an error record.
            self.buffer.push(BufferEntry { id: term as i32, start, end, size });
            return;
        }
        while index > 0 {
            let prev = self.buffer[index - 1];
            if prev.size < 0 || prev.end <= end {
                break;
            }
            // The moved record is no longer part of this node's subtree.
            index -= 1;
            if size > 1 {
                size -= 1;
            }
        }
        self.buffer.insert(
            index,
            BufferEntry {
                id: term as i32,
                start,
                end,
                size,
            },
        );
    }

    /// Splice a reused subtree (registered as `reused_index` by the parse)
    /// and move to `next_state`.
    pub fn use_node(&mut self, reused_index: usize, tree: &Tree, next_state: u32) {
        let start = self.pos;
        self.pos = start + tree.length();
        self.reduce_pos = self.pos;
        self.push_state(next_state, start);
        self.buffer.push(BufferEntry {
            id: reused_index as i32,
            start,
            end: self.pos,
            size: BufferEntry::REUSE,
        });
        if let Some(ctx) = &self.context {
            let value = ctx.tracker.reuse(&ctx.value, tree);
            self.update_context(value);
        }
    }

    /// Fork this stack. Both halves share the buffer produced so far.
    pub fn split(&mut self) -> Stack {
        if !self.buffer.is_empty() {
            let data = std::mem::take(&mut self.buffer);
            self.chain_len += data.len();
            self.chain = Some(Arc::new(Segment {
                parent: self.chain.take(),
                data,
            }));
        }
        Stack {
            state: self.state,
            frames: self.frames.clone(),
            pos: self.pos,
            reduce_pos: self.reduce_pos,
            score: self.score,
            buffer: Vec::new(),
            chain: self.chain.clone(),
            chain_len: self.chain_len,
            context: self.context.clone(),
            lookahead: self.lookahead,
        }
    }

    /// Apply the state's forced reduction even without a matching
    /// lookahead; recovery only. False when no legal reduction exists.
    pub fn force_reduce(&mut self, a: &Automaton) -> bool {
        let mut reduce = a.state(self.state).forced_reduce;
        if reduce & REDUCE_FLAG == 0 {
            return false;
        }
        if !a.valid_action(self.state, reduce) {
            let depth = (reduce >> DEPTH_SHIFT) as usize;
            let node = (reduce & VALUE_MASK) as u16;
            let viable = depth >= 1 && depth <= self.frames.len() && {
                let base = self.frames[self.frames.len() - depth];
                a.get_goto(base.state, node).is_some()
            };
            if !viable {
                let Some(backup) = self.find_forced_reduction(a) else {
                    return false;
                };
                reduce = backup;
            }
            self.store_node(0, self.pos, self.pos, 1, true);
            self.score -= recover::REDUCE_COST;
        }
        self.reduce_pos = self.pos;
        self.reduce(reduce, a);
        true
    }

    /// Scan states reachable through shiftless exploration for a reduction
    /// that is valid against this stack's frames, to escape states whose
    /// own forced reduction doesn't apply.
    pub fn find_forced_reduction(&self, a: &Automaton) -> Option<u32> {
        let mut seen = Vec::new();
        self.explore_forced(a, self.state, 0, &mut seen)
    }

    fn explore_forced(
        &self,
        a: &Automaton,
        state: u32,
        depth: usize,
        seen: &mut Vec<u32>,
    ) -> Option<u32> {
        if seen.contains(&state) {
            return None;
        }
        seen.push(state);
        let default = a.state(state).default_reduce;
        let actions = a
            .actions(state)
            .map(|(_, action)| action)
            .chain((default != 0).then_some(default));
        for action in actions {
            if action & REDUCE_FLAG != 0 {
                let rdepth = (action >> DEPTH_SHIFT) as usize;
                if rdepth > depth + 1 {
                    let adjusted = rdepth - depth;
                    let node = (action & VALUE_MASK) as u16;
                    if adjusted <= self.frames.len() {
                        let base = self.frames[self.frames.len() - adjusted];
                        if a.get_goto(base.state, node).is_some() {
                            return Some(
                                REDUCE_FLAG | node as u32 | ((adjusted as u32) << DEPTH_SHIFT),
                            );
                        }
                    }
                }
            } else if let Some(found) =
                self.explore_forced(a, action & VALUE_MASK, depth + 1, seen)
            {
                return Some(found);
            }
        }
        None
    }

    /// Whether this stack could eventually shift `term`, simulating any
    /// number of reductions without mutating anything.
    pub fn can_shift(&self, a: &Automaton, term: u16) -> bool {
        let mut states: Vec<u32> = self.frames.iter().map(|f| f.state).collect();
        states.push(self.state);
        for _ in 0..64 {
            let top = *states.last().expect("non-empty");
            let action = match a.state(top).default_reduce {
                0 => match a.has_action(top, term) {
                    Some(action) => action,
                    None => return false,
                },
                default => default,
            };
            if action & REDUCE_FLAG == 0 {
                return true;
            }
            let depth = (action >> DEPTH_SHIFT) as usize;
            let node = (action & VALUE_MASK) as u16;
            if depth == 0 {
                match a.get_goto(top, node) {
                    Some(target) => states.push(target),
                    None => return false,
                }
            } else {
                if depth >= states.len() {
                    return false;
                }
                states.truncate(states.len() - depth);
                let base = *states.last().expect("non-empty");
                match a.get_goto(base, node) {
                    Some(target) => states.push(target),
                    None => return false,
                }
            }
        }
        false
    }

    /// Split off stacks that pretend a missing terminal was present, for
    /// states reachable by one shift that can then accept `next`.
    pub fn recover_by_insert(&mut self, next: u16, a: &Automaton, input: &dyn Input) -> Vec<Stack> {
        if self.frames.len() >= recover::MAX_INSERT_STACK_DEPTH {
            return Vec::new();
        }
        let mut next_states = a.next_states(self.state);
        if next_states.len() > recover::MAX_NEXT * 2
            || self.frames.len() >= recover::DAMPEN_INSERT_STACK_DEPTH
        {
            let mut best: Vec<(u16, u32)> = next_states
                .iter()
                .copied()
                .filter(|&(_, s)| s != self.state && a.has_action(s, next).is_some())
                .collect();
            if self.frames.len() < recover::DAMPEN_INSERT_STACK_DEPTH {
                for &(term, s) in &next_states {
                    if best.len() >= recover::MAX_NEXT * 2 {
                        break;
                    }
                    if !best.iter().any(|&(_, b)| b == s) {
                        best.push((term, s));
                    }
                }
            }
            next_states = best;
        }
        let mut result = Vec::new();
        for &(term, target) in &next_states {
            if result.len() >= recover::MAX_NEXT {
                break;
            }
            if target == self.state {
                continue;
            }
            let mut stack = self.split();
            stack.push_state(target, stack.pos);
            stack.store_node(0, stack.pos, stack.pos, 1, true);
            let pos = stack.pos;
            stack.shift_context(term, pos, pos, input);
            stack.reduce_pos = pos;
            stack.score -= recover::INSERT_COST;
            result.push(stack);
        }
        result
    }

    /// Last-resort recovery: consume the offending token inside an error
    /// node. Always makes progress.
    pub fn recover_by_delete(&mut self, term: u16, end: u32, a: &Automaton) {
        let named = !a.node_set().get(term).is_anonymous() && term != 0;
        if named {
            self.store_node(term, self.pos, end, 1, false);
        }
        self.store_node(0, self.pos, end, if named { 2 } else { 1 }, false);
        self.pos = end;
        self.reduce_pos = end;
        self.score -= recover::DELETE_COST;
    }

    /// A stack that can neither act nor reduce: single frame, no actions.
    pub fn dead_end(&self, a: &Automaton) -> bool {
        if self.frames.len() != 1 {
            return false;
        }
        a.actions(self.state).next().is_none() && a.state(self.state).default_reduce == 0
    }

    /// Throw away this stack's progress and restart from the initial state
    /// at the current position.
    pub fn restart(&mut self, a: &Automaton) {
        self.store_node(0, self.pos, self.pos, 1, true);
        if let Some(first) = self.frames.first() {
            self.state = first.state;
        } else {
            self.state = a.start_state();
        }
        self.frames.clear();
    }

    /// Equivalent-state check for merging: same state history and context.
    pub fn same_state(&self, other: &Stack) -> bool {
        if self.state != other.state || self.frames.len() != other.frames.len() {
            return false;
        }
        if self.context_hash() != other.context_hash() {
            return false;
        }
        self.frames
            .iter()
            .zip(&other.frames)
            .all(|(a, b)| a.state == b.state)
    }

    /// Force reductions until an accepting state is reached (or no legal
    /// reduction remains), for wrapping up a stopped or recovered parse.
    pub fn force_all(&mut self, a: &Automaton) {
        while !a.is_accepting(self.state) {
            if !self.force_reduce(a) {
                self.store_node(0, self.pos, self.pos, 1, true);
                break;
            }
        }
    }

    pub fn set_lookahead(&mut self, look_ahead: u32) {
        if look_ahead > self.lookahead {
            self.buffer.push(BufferEntry {
                id: 0,
                start: self.lookahead,
                end: 0,
                size: BufferEntry::LOOKAHEAD,
            });
            self.lookahead = look_ahead;
        }
    }

    fn shift_context(&mut self, term: u16, start: u32, end: u32, input: &dyn Input) {
        if let Some(ctx) = &self.context {
            let value = ctx.tracker.shift(&ctx.value, term, input, start, end);
            self.update_context(value);
        }
    }

    fn reduce_context(&mut self, node: u16) {
        if let Some(ctx) = &self.context {
            let value = ctx.tracker.reduce(&ctx.value, node);
            self.update_context(value);
        }
    }

    fn update_context(&mut self, value: ContextValue) {
        let Some(ctx) = &self.context else { return };
        let new_hash = ctx.tracker.hash(&value);
        let old_hash = ctx.hash;
        if new_hash != old_hash {
            // Record the hash that applied to the records emitted so far.
            self.buffer.push(BufferEntry {
                id: 0,
                start: (old_hash >> 32) as u32,
                end: old_hash as u32,
                size: BufferEntry::CONTEXT,
            });
        }
        let ctx = self.context.as_mut().expect("context present");
        ctx.value = value;
        ctx.hash = new_hash;
    }

    /// Assemble the full record buffer, oldest first.
    pub fn collect_buffer(&self) -> Vec<BufferEntry> {
        let mut segments = Vec::new();
        let mut cursor = self.chain.as_ref();
        while let Some(segment) = cursor {
            segments.push(segment);
            cursor = segment.parent.as_ref();
        }
        let mut result = Vec::with_capacity(self.total_len());
        for segment in segments.into_iter().rev() {
            result.extend_from_slice(&segment.data);
        }
        result.extend_from_slice(&self.buffer);
        result
    }
}

impl std::fmt::Debug for Stack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Stack(state {} pos {} score {} depth {})",
            self.state,
            self.pos,
            self.score,
            self.frames.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::paren_grammar;
    use trellis_tree::StringInput;

    #[test]
    fn split_shares_buffer_prefix() {
        let parser = paren_grammar();
        let a = parser.automaton();
        let input = StringInput::new("()");
        let mut stack = Stack::start(a, None, 0);
        // Shift '(' then split; both halves must report the same records.
        stack.shift(1, crate::testing::paren::T_OPEN, 0, 1, a, &input);
        let before = stack.collect_buffer();
        let mut forked = stack.split();
        assert_eq!(forked.collect_buffer(), before);
        // Divergence after the split stays private.
        forked.store_node(0, 1, 1, 1, true);
        assert_eq!(stack.collect_buffer(), before);
        assert_eq!(forked.collect_buffer().len(), before.len() + 1);
    }

    #[test]
    fn error_records_merge() {
        let parser = paren_grammar();
        let a = parser.automaton();
        let mut stack = Stack::start(a, None, 0);
        stack.store_node(0, 0, 1, 1, false);
        stack.store_node(0, 1, 2, 1, false);
        let records = stack.collect_buffer();
        assert_eq!(records.len(), 1);
        assert_eq!((records[0].start, records[0].end), (0, 2));
    }
}
