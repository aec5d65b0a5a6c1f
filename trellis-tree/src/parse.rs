//! The generic incremental-parser interface
//!
//!     Any parser that can produce a [`Tree`] cooperatively implements these
//!     traits; the LR engine in `trellis-lr` is the primary implementation,
//!     and mixed parsing drives nested parsers through the same surface.
//!
//!     `advance` is the single suspension point: callers run it in a loop,
//!     checking their own deadline between calls, and either drop the parse
//!     (cancellation is simply not calling again) or keep going. Partial
//!     progress is observable through `parsed_pos` at any time.

use std::sync::Arc;

use crate::fragment::TreeFragment;
use crate::input::{Input, Range};
use crate::tree::Tree;

/// An in-flight parse. Owned by exactly one caller; never shared.
pub trait PartialParse {
    /// Perform one unit of work. Returns the finished tree once the parse
    /// is complete, `None` while there is more to do.
    fn advance(&mut self) -> Option<Arc<Tree>>;

    /// Position up to which the input has been parsed. Safe to read at any
    /// point; work past it may still be discarded by error recovery.
    fn parsed_pos(&self) -> u32;

    /// Freeze input consumption at `pos`: the parse will wrap up what it has
    /// and produce a tree of exactly that length, with the root marked open.
    ///
    /// Panics when called with a position after an earlier stop position —
    /// work past it has already been discarded.
    fn stop_at(&mut self, pos: u32);

    fn stopped_at(&self) -> Option<u32>;
}

/// A parser that can start (and incrementally continue) parses.
pub trait IncrementalParser {
    /// Begin a parse of `ranges` within `input`, reusing whatever of
    /// `fragments` still applies.
    fn start_parse<'a>(
        &'a self,
        input: &'a dyn Input,
        fragments: &[TreeFragment],
        ranges: &[Range],
    ) -> Box<dyn PartialParse + 'a>;

    /// A stable identity for this parser, recorded on mounts so that a later
    /// parse can tell whether an old nested tree came from the same grammar.
    fn name(&self) -> &str;

    /// Run a parse to completion in one call.
    fn parse(&self, input: &dyn Input, fragments: &[TreeFragment]) -> Arc<Tree> {
        let ranges = [Range::new(0, input.len())];
        let mut parse = self.start_parse(input, fragments, &ranges);
        loop {
            if let Some(tree) = parse.advance() {
                return tree;
            }
        }
    }
}
