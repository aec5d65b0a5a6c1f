//! Tokenizer dispatch
//!
//!     Token matching is strategy-driven: a grammar carries one tokenizer
//!     per token group (pattern tables compiled at decode time, or external
//!     implementations registered at parser construction), and each state's
//!     tokenizer mask says which groups may run there. The `TokenCache`
//!     keeps one cached token per group so that several stacks probing the
//!     same position don't re-run matchers; contextual tokenizers key their
//!     cache entry on the stack's context hash as well.
//!
//!     Tokenizers are not responsible for progress on bad input: when
//!     nothing matches at a non-end position, the cache reports a one-step
//!     error token and leaves recovery to the stepper.

use std::sync::Arc;

use trellis_tree::{Input, Range};

use crate::automaton::{Automaton, Dialect};
use crate::spec::MalformedTable;
use crate::stack::{ContextValue, Stack};

/// Initial byte window handed to pattern matchers; grown when a match runs
/// to the window edge.
const TOKEN_WINDOW: u32 = 256;

/// A chunked reader over the parse ranges of an [`Input`]. Positions between
/// ranges are invisible: advancing off a range end hops to the next range.
pub struct InputStream<'a> {
    input: &'a dyn Input,
    ranges: Vec<Range>,
    /// End of the final range.
    pub end: u32,
    pos: u32,
    token_start: u32,
    chunk: &'a str,
    chunk_start: u32,
    scratch: String,
    accepted: Option<(u16, u32)>,
    max_read: u32,
}

impl<'a> InputStream<'a> {
    pub fn new(input: &'a dyn Input, ranges: &[Range]) -> InputStream<'a> {
        let ranges: Vec<Range> = if ranges.is_empty() {
            vec![Range::new(0, input.len())]
        } else {
            ranges.to_vec()
        };
        let end = ranges.last().map(|r| r.to).unwrap_or(0);
        InputStream {
            input,
            ranges,
            end,
            pos: 0,
            token_start: 0,
            chunk: "",
            chunk_start: u32::MAX,
            scratch: String::new(),
            accepted: None,
            max_read: 0,
        }
    }

    pub fn pos(&self) -> u32 {
        self.pos
    }

    pub fn token_start(&self) -> u32 {
        self.token_start
    }

    /// Move a position out of inter-range gaps, onto the next range start
    /// (or the end).
    pub fn clip_pos(&self, pos: u32) -> u32 {
        for range in &self.ranges {
            if pos < range.from {
                return range.from;
            }
            if pos < range.to {
                return pos;
            }
        }
        self.end
    }

    /// End of the range containing `pos` (or of the last range).
    fn range_end(&self, pos: u32) -> u32 {
        for range in &self.ranges {
            if pos < range.to {
                return range.to;
            }
        }
        self.end
    }

    /// Position the stream at the start of a new token.
    pub fn reset(&mut self, pos: u32) {
        let pos = self.clip_pos(pos);
        self.pos = pos;
        self.token_start = pos;
        self.accepted = None;
        self.max_read = pos;
    }

    /// The code point at the current position, or -1 at the end.
    pub fn next(&mut self) -> i32 {
        if self.pos >= self.end {
            return -1;
        }
        self.ensure_chunk();
        match self.chunk[(self.pos - self.chunk_start) as usize..].chars().next() {
            Some(ch) => {
                self.max_read = self.max_read.max(self.pos + ch.len_utf8() as u32);
                ch as i32
            }
            None => -1,
        }
    }

    /// Advance past the current code point and return the one after it.
    pub fn advance(&mut self) -> i32 {
        if self.pos >= self.end {
            return -1;
        }
        self.ensure_chunk();
        if let Some(ch) = self.chunk[(self.pos - self.chunk_start) as usize..].chars().next() {
            self.pos = self.clip_pos(self.pos + ch.len_utf8() as u32);
        } else {
            self.pos = self.end;
        }
        self.next()
    }

    /// Record a token covering `token_start()..end`.
    pub fn accept_token(&mut self, term: u16, end: u32) {
        self.accepted = Some((term, end));
    }

    pub fn accepted(&self) -> Option<(u16, u32)> {
        self.accepted
    }

    /// How far this token run has read into the input.
    pub fn max_read(&self) -> u32 {
        self.max_read
    }

    /// Byte length of the code point at `pos`, for one-step error tokens.
    pub fn char_len_at(&mut self, pos: u32) -> u32 {
        if pos >= self.end {
            return 0;
        }
        let saved = self.pos;
        self.pos = pos;
        self.ensure_chunk();
        let len = self.chunk[(pos - self.chunk_start) as usize..]
            .chars()
            .next()
            .map(|ch| ch.len_utf8() as u32)
            .unwrap_or(0);
        self.pos = saved;
        len
    }

    /// A contiguous text window starting at the current position, up to
    /// `max` bytes and never past the containing range. The result always
    /// ends on a character boundary.
    pub fn window(&mut self, max: u32) -> &str {
        let start = self.pos;
        if start >= self.end {
            return "";
        }
        let limit = self.range_end(start).min(start.saturating_add(max));
        self.ensure_chunk();
        let offset = (start - self.chunk_start) as usize;
        let avail = self.chunk.len() - offset;
        let want = (limit - start) as usize;
        let text = if avail >= want {
            &self.chunk[offset..offset + want]
        } else {
            self.scratch = self.input.read(start, limit);
            &self.scratch
        };
        let mut cut = text.len().min(want);
        while cut > 0 && !text.is_char_boundary(cut) {
            cut -= 1;
        }
        &text[..cut]
    }

    fn ensure_chunk(&mut self) {
        let in_chunk = self.chunk_start != u32::MAX
            && self.pos >= self.chunk_start
            && ((self.pos - self.chunk_start) as usize) < self.chunk.len();
        if !in_chunk {
            let input = self.input;
            self.chunk = input.chunk(self.pos);
            self.chunk_start = self.pos;
        }
    }
}

/// A literal or anchored-regex matcher for one token pattern.
pub enum Matcher {
    Literal(String),
    Regex(regex::Regex),
}

impl Matcher {
    pub fn literal(text: String) -> Matcher {
        Matcher::Literal(text)
    }

    pub fn regex(pattern: &str) -> Result<Matcher, MalformedTable> {
        regex::Regex::new(&format!("\\A(?:{})", pattern))
            .map(Matcher::Regex)
            .map_err(|error| MalformedTable::BadRegex {
                pattern: pattern.to_string(),
                error: error.to_string(),
            })
    }

    /// Length of a match at the start of `text`.
    fn match_len(&self, text: &str) -> Option<usize> {
        match self {
            Matcher::Literal(literal) => text.starts_with(literal.as_str()).then(|| literal.len()),
            Matcher::Regex(regex) => regex.find(text).map(|m| m.end()),
        }
    }
}

/// The built-in tokenizer for a pattern token group: longest match wins,
/// declaration order breaks ties.
pub struct PatternTokenizer {
    patterns: Vec<(u16, Matcher)>,
}

impl PatternTokenizer {
    pub fn new(patterns: Vec<(u16, Matcher)>) -> PatternTokenizer {
        PatternTokenizer { patterns }
    }

    pub fn token(&self, stream: &mut InputStream<'_>, dialect: Option<&Dialect>) {
        let start = stream.token_start();
        let mut max = TOKEN_WINDOW;
        loop {
            let mut best: Option<(u16, usize)> = None;
            let mut clipped = false;
            {
                let window = stream.window(max);
                for (term, matcher) in &self.patterns {
                    if let Some(dialect) = dialect {
                        if !dialect.allows(*term) {
                            continue;
                        }
                    }
                    if let Some(len) = matcher.match_len(window) {
                        if len == window.len() && !window.is_empty() {
                            clipped = true;
                        }
                        if len > 0 && best.map_or(true, |(_, best_len)| len > best_len) {
                            best = Some((*term, len));
                        }
                    }
                }
                if clipped && window.len() as u32 >= max {
                    // A match ran to the window edge; it may extend further.
                    max *= 2;
                    continue;
                }
            }
            if let Some((term, len)) = best {
                stream.accept_token(term, start + len as u32);
            }
            return;
        }
    }
}

/// A tokenizer implemented outside the grammar tables. `contextual` keys
/// caching on the stack context, `fallback` runs only when no earlier group
/// matched, `extend` keeps other groups' readings alongside this one.
pub trait ExternalTokenizer: Send + Sync {
    fn token(&self, stream: &mut InputStream<'_>, context: Option<&ContextValue>);
}

/// One token group of a grammar.
pub enum Tokenizer {
    Patterns(PatternTokenizer),
    External {
        name: String,
        imp: Arc<dyn ExternalTokenizer>,
        contextual: bool,
        fallback: bool,
        extend: bool,
    },
}

impl Tokenizer {
    pub fn contextual(&self) -> bool {
        matches!(self, Tokenizer::External { contextual: true, .. })
    }

    pub fn fallback(&self) -> bool {
        matches!(self, Tokenizer::External { fallback: true, .. })
    }

    pub fn extend(&self) -> bool {
        matches!(self, Tokenizer::External { extend: true, .. })
    }
}

/// No-match sentinel for cached token values.
pub const NO_TOKEN: i32 = -1;

#[derive(Clone, Copy, Debug)]
pub struct CachedToken {
    pub start: u32,
    pub end: u32,
    /// Matched terminal, or [`NO_TOKEN`].
    pub value: i32,
    /// Additional reading produced by an `extend` specializer.
    pub extended: i32,
    /// Furthest input position read while producing this token.
    pub lookahead: u32,
    /// Tokenizer mask the token was computed under.
    pub mask: u32,
    /// Context hash the token was computed under.
    pub context: u64,
}

impl CachedToken {
    fn clear() -> CachedToken {
        CachedToken {
            start: u32::MAX,
            end: 0,
            value: NO_TOKEN,
            extended: NO_TOKEN,
            lookahead: 0,
            mask: 0,
            context: 0,
        }
    }
}

/// Per-parse token cache: one slot per tokenizer, plus the scratch action
/// list handed to the stepper.
pub struct TokenCache {
    tokens: Vec<CachedToken>,
    /// The winning token of the last `get_actions` call.
    pub main: Option<CachedToken>,
    /// (action, terminal, token end) triples for the stepper.
    actions: Vec<(u32, u16, u32)>,
}

impl TokenCache {
    pub fn new(tokenizer_count: usize) -> TokenCache {
        TokenCache {
            tokens: vec![CachedToken::clear(); tokenizer_count],
            main: None,
            actions: Vec::new(),
        }
    }

    /// Compute the applicable (action, terminal, end) triples for `stack`'s
    /// state at its position.
    pub fn get_actions(
        &mut self,
        stack: &mut Stack,
        a: &Automaton,
        dialect: Option<&Dialect>,
        stream: &mut InputStream<'_>,
    ) -> Vec<(u32, u16, u32)> {
        self.actions.clear();
        self.main = None;
        let mask = a.state(stack.state).tokenizer_mask;
        let context = stack.context_hash();
        let mut look_ahead = 0;
        let mut main: Option<CachedToken> = None;

        for (i, tokenizer) in a.tokenizers().iter().enumerate() {
            if mask & (1 << i) == 0 {
                continue;
            }
            if main.is_some() && !tokenizer.fallback() {
                continue;
            }
            let cache_context = if tokenizer.contextual() { context } else { 0 };
            let stale = {
                let token = &self.tokens[i];
                token.start != stack.pos || token.mask != mask || token.context != cache_context
            };
            if stale {
                self.update_cached_token(i, tokenizer, stack, a, dialect, stream);
                self.tokens[i].mask = mask;
                self.tokens[i].context = cache_context;
            }
            let token = self.tokens[i];
            if token.lookahead > token.end + crate::stack::LOOKAHEAD_MARGIN {
                look_ahead = look_ahead.max(token.lookahead);
            }
            if token.value != NO_TOKEN {
                let start_len = self.actions.len();
                if token.extended != NO_TOKEN {
                    self.add_actions(stack.state, a, token.extended as u16, token.end);
                }
                self.add_actions(stack.state, a, token.value as u16, token.end);
                if !tokenizer.extend() {
                    main = Some(token);
                    if self.actions.len() > start_len {
                        break;
                    }
                }
            }
        }
        if look_ahead > 0 {
            stack.set_lookahead(look_ahead);
        }
        if main.is_none() && stack.pos == stream.end {
            let mut eof = CachedToken::clear();
            eof.value = a.eof_term() as i32;
            eof.start = stack.pos;
            eof.end = stack.pos;
            self.add_actions(stack.state, a, a.eof_term(), stack.pos);
            main = Some(eof);
        }
        if main.is_none() {
            // Nothing matched: a one-step error token for recovery to chew
            // on.
            let mut err = CachedToken::clear();
            err.start = stack.pos;
            err.end = stack.pos + stream.char_len_at(stack.pos).max(1);
            main = Some(err);
        }
        self.main = main;
        self.actions.clone()
    }

    fn update_cached_token(
        &mut self,
        index: usize,
        tokenizer: &Tokenizer,
        stack: &Stack,
        a: &Automaton,
        dialect: Option<&Dialect>,
        stream: &mut InputStream<'_>,
    ) {
        let start = stream.clip_pos(stack.pos);
        stream.reset(start);
        match tokenizer {
            Tokenizer::Patterns(patterns) => patterns.token(stream, dialect),
            Tokenizer::External { imp, .. } => imp.token(stream, stack.context_value()),
        }
        let token = &mut self.tokens[index];
        token.start = start;
        token.extended = NO_TOKEN;
        token.lookahead = stream.max_read();
        match stream.accepted() {
            Some((term, end)) => {
                token.value = term as i32;
                token.end = end;
                if let Some(specializer) = a.specializer(term) {
                    let text = stream.input.read(start, end);
                    if let Some(&to) = specializer.entries.get(text.as_str()) {
                        if dialect.map_or(true, |d| d.allows(to)) {
                            if specializer.extend {
                                token.extended = to as i32;
                            } else {
                                token.value = to as i32;
                            }
                        }
                    }
                }
                if let Some(dialect) = dialect {
                    if token.value != NO_TOKEN && !dialect.allows(token.value as u16) {
                        token.value = NO_TOKEN;
                    }
                }
            }
            None => {
                token.value = NO_TOKEN;
                token.end = start + stream.char_len_at(start).max(1);
            }
        }
    }

    /// Append the actions `state` has for `term`, deduplicating repeats
    /// contributed by multiple readings.
    fn add_actions(&mut self, state: u32, a: &Automaton, term: u16, end: u32) {
        for (t, action) in a.actions(state) {
            if t == term as u32 && !self.actions.iter().any(|&(prev, _, _)| prev == action) {
                self.actions.push((action, term, end));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_tree::StringInput;

    #[test]
    fn stream_hops_over_range_gaps() {
        let input = StringInput::new("abcXXXdef");
        let ranges = [Range::new(0, 3), Range::new(6, 9)];
        let mut stream = InputStream::new(&input, &ranges);
        stream.reset(0);
        assert_eq!(stream.next(), 'a' as i32);
        stream.reset(2);
        assert_eq!(stream.next(), 'c' as i32);
        // Advancing off the first range lands on the second.
        assert_eq!(stream.advance(), 'd' as i32);
        assert_eq!(stream.pos(), 6);
        assert_eq!(stream.clip_pos(4), 6);
        assert_eq!(stream.clip_pos(9), 9);
    }

    #[test]
    fn window_stops_at_range_end() {
        let input = StringInput::new("abcXXXdef");
        let ranges = [Range::new(0, 3), Range::new(6, 9)];
        let mut stream = InputStream::new(&input, &ranges);
        stream.reset(1);
        assert_eq!(stream.window(100), "bc");
    }

    #[test]
    fn pattern_tokenizer_prefers_longest_match() {
        let input = StringInput::new("forward");
        let mut stream = InputStream::new(&input, &[Range::new(0, 7)]);
        stream.reset(0);
        let tokenizer = PatternTokenizer::new(vec![
            (3, Matcher::literal("for".to_string())),
            (4, Matcher::regex("[a-z]+").unwrap()),
        ]);
        tokenizer.token(&mut stream, None);
        assert_eq!(stream.accepted(), Some((4, 7)));
    }

    #[test]
    fn pattern_tokenizer_breaks_ties_by_order() {
        let input = StringInput::new("for ");
        let mut stream = InputStream::new(&input, &[Range::new(0, 4)]);
        stream.reset(0);
        let tokenizer = PatternTokenizer::new(vec![
            (3, Matcher::literal("for".to_string())),
            (4, Matcher::regex("[a-z]+").unwrap()),
        ]);
        tokenizer.token(&mut stream, None);
        assert_eq!(stream.accepted(), Some((3, 3)));
    }
}
