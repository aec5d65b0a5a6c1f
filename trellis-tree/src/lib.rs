//! Immutable syntax trees for the trellis parser
//!
//!     This crate holds the tree side of the trellis toolchain: node types and
//!     their open property system, the immutable `Tree` / `TreeBuffer`
//!     representation with structural sharing, cursors for traversal, the
//!     fragment records that carry reusable subtrees from one parse to the
//!     next, and the mount records that attach nested-grammar trees to host
//!     nodes.
//!
//!     Nothing in here knows about LR tables or tokenizing. The parsing
//!     engine lives in `trellis-lr` and talks to this crate through
//!     [`Tree::build`](tree::Tree::build) on the way out and through the
//!     [`IncrementalParser`](parse::IncrementalParser) /
//!     [`PartialParse`](parse::PartialParse) traits on the way in.
//!
//! Sharing Model
//!
//!     Trees are immutable once constructed. Every child link is an `Arc`, so
//!     "mutation" always means building new nodes along a spine while sharing
//!     every untouched subtree. Consumers may rely on pointer identity
//!     (`Arc::ptr_eq`) to detect reuse; the incremental-parse tests do exactly
//!     that.

pub mod cursor;
pub mod fragment;
pub mod input;
pub mod mount;
pub mod parse;
pub mod tree;
pub mod types;

pub use cursor::{SyntaxNode, TreeCursor, TreeExt};
pub use fragment::{ChangedRange, TreeFragment};
pub use input::{Input, Range, StringInput};
pub use mount::{attach, MountedTree};
pub use parse::{IncrementalParser, PartialParse};
pub use tree::{BufferEntry, BuildData, Child, Side, Tree, TreeBuffer, DEFAULT_BUFFER_LENGTH};
pub use types::{NodeProps, NodeSet, NodeType, PropKey, PropValue};
