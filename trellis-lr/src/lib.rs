//! Incremental, error-tolerant LR parsing
//!
//!     This crate drives a table-based LR automaton over text and produces
//!     `trellis-tree` syntax trees. The headline behaviors:
//!
//!         - GLR-style speculative parsing: ambiguous actions split the
//!           parse stack, equivalent stacks merge, scores pick survivors.
//!         - Error tolerance: malformed documents always yield a tree;
//!           syntax errors become error nodes via a recovery ladder
//!           (restart, forced reduction, token insertion, token deletion).
//!         - Incremental reuse: fragments of a previous parse are spliced
//!           into the next one, making re-parses proportional to the edit.
//!         - Mixed parsing: a hook can hand sub-ranges of the document to
//!           other grammars, mounted as overlays on host nodes.
//!
//!     Grammars arrive as serialized tables ([`spec::GrammarSpec`]) and are
//!     decoded once into a shared, read-only [`Automaton`]. A configured
//!     [`LrParser`] is cheap to clone and implements the generic
//!     [`IncrementalParser`](trellis_tree::IncrementalParser) interface;
//!     driving a parse is a caller-paced `advance` loop with no other
//!     suspension points, so embedding in an idle-time scheduler needs no
//!     threads and no locking.

pub mod automaton;
pub mod nest;
pub mod parse;
pub mod spec;
pub mod stack;
pub mod testing;
pub mod token;

pub use automaton::{Automaton, Dialect, State};
pub use nest::{NestHook, NestSpec};
pub use parse::{LrParser, NoParseError, Parse, UnknownDialect};
pub use spec::{GrammarSpec, MalformedTable, FORMAT_VERSION};
pub use stack::{ContextTracker, ContextValue, Stack, StackContext};
pub use token::{CachedToken, ExternalTokenizer, InputStream, Matcher, PatternTokenizer, TokenCache, Tokenizer};
