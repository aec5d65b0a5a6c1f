//! Node types and the open node-property system
//!
//!     A grammar declares a fixed set of node types, each with a stable small
//!     integer id. Terminals and nonterminals share one id space; id 0 is
//!     always the error type. A `NodeType` is a cheap clone (its payload sits
//!     behind an `Arc`) so trees and tables can hold types by value.
//!
//!     Properties come in two flavors with one representation:
//!
//!         - per-type props live on the `NodeType` and describe the whole
//!           class of nodes ("closed-by", "group", ...);
//!         - per-node props live on individual `Tree` instances and describe
//!           one concrete node (context hash, lookahead distance, a mounted
//!           overlay, the open-ended flag of a stopped parse).
//!
//!     The key space is open: well-known keys get fixed ids below
//!     `PropKey::FIRST_DYNAMIC`, and any consumer can allocate further keys
//!     by name at runtime.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;

use crate::mount::MountedTree;

/// Identifies one node property. Compared by id only.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct PropKey(pub u16);

impl PropKey {
    /// Node names that can close a node of this type (e.g. `)` for a paren
    /// expression). Used by bracket matching and indentation consumers.
    pub const CLOSED_BY: PropKey = PropKey(0);
    /// Node names that can open a node of this type.
    pub const OPENED_BY: PropKey = PropKey(1);
    /// Group names this type belongs to ("Expression", "Statement", ...).
    pub const GROUP: PropKey = PropKey(2);
    /// Per-node: a nested-grammar tree mounted on this node.
    pub const MOUNT: PropKey = PropKey(3);
    /// Per-node: tokenizer context hash in effect when the node was built.
    pub const CONTEXT_HASH: PropKey = PropKey(4);
    /// Per-node: how far past its end the parse looked while building it.
    pub const LOOKAHEAD: PropKey = PropKey(5);
    /// Per-node: the node ends at the parse's stop position, not at a real
    /// boundary in the input.
    pub const OPEN: PropKey = PropKey(6);

    pub const FIRST_DYNAMIC: u16 = 32;

    /// Look up or allocate a dynamic key under the given name. The same name
    /// always maps to the same key within a process.
    pub fn named(name: &str) -> PropKey {
        static NEXT: AtomicU16 = AtomicU16::new(PropKey::FIRST_DYNAMIC);
        static REGISTRY: Lazy<Mutex<HashMap<String, u16>>> =
            Lazy::new(|| Mutex::new(HashMap::new()));
        let mut registry = REGISTRY.lock().expect("prop registry poisoned");
        let id = *registry
            .entry(name.to_string())
            .or_insert_with(|| NEXT.fetch_add(1, Ordering::Relaxed));
        PropKey(id)
    }
}

/// A property value. The `Opaque` variant keeps the key space genuinely
/// open: consumers downcast to whatever they stored.
#[derive(Clone)]
pub enum PropValue {
    /// Presence marker.
    Flag,
    Int(i64),
    Str(Arc<str>),
    /// Node-name lists, as used by `CLOSED_BY` / `OPENED_BY` / `GROUP`.
    Names(Arc<[String]>),
    Mount(Arc<MountedTree>),
    Opaque(Arc<dyn Any + Send + Sync>),
}

impl PropValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            PropValue::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropValue::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_names(&self) -> Option<&[String]> {
        match self {
            PropValue::Names(names) => Some(names),
            _ => None,
        }
    }

    pub fn as_mount(&self) -> Option<&Arc<MountedTree>> {
        match self {
            PropValue::Mount(mount) => Some(mount),
            _ => None,
        }
    }
}

impl fmt::Debug for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropValue::Flag => write!(f, "Flag"),
            PropValue::Int(value) => write!(f, "Int({value})"),
            PropValue::Str(value) => write!(f, "Str({value:?})"),
            PropValue::Names(names) => write!(f, "Names({names:?})"),
            PropValue::Mount(mount) => write!(f, "Mount({:?})", mount.parser_name),
            PropValue::Opaque(_) => write!(f, "Opaque(..)"),
        }
    }
}

/// A small association list from prop key to value. Lookup is linear; nodes
/// carry a handful of props at most.
#[derive(Clone, Default, Debug)]
pub struct NodeProps(Vec<(PropKey, PropValue)>);

impl NodeProps {
    pub fn new() -> NodeProps {
        NodeProps(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: PropKey) -> Option<&PropValue> {
        self.0.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    pub fn contains(&self, key: PropKey) -> bool {
        self.get(key).is_some()
    }

    /// Insert or replace the value under `key`.
    pub fn set(&mut self, key: PropKey, value: PropValue) {
        if let Some(slot) = self.0.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.0.push((key, value));
        }
    }

    /// Builder-style `set`, for constructing prop lists inline.
    pub fn with(mut self, key: PropKey, value: PropValue) -> NodeProps {
        self.set(key, value);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (PropKey, &PropValue)> {
        self.0.iter().map(|(k, v)| (*k, v))
    }
}

struct NodeTypeData {
    name: String,
    id: u16,
    flags: u16,
    props: NodeProps,
}

/// One node type of a grammar. Cheap to clone; equality is id equality.
#[derive(Clone)]
pub struct NodeType(Arc<NodeTypeData>);

impl NodeType {
    pub const ERROR: u16 = 1;
    pub const TOP: u16 = 2;
    pub const SKIPPED: u16 = 4;
    /// Anonymous types structure the tree (balancing, repetitions) but are
    /// invisible to consumers: cursors step over them.
    pub const ANONYMOUS: u16 = 8;

    pub fn new(id: u16, name: impl Into<String>, flags: u16, props: NodeProps) -> NodeType {
        NodeType(Arc::new(NodeTypeData {
            name: name.into(),
            id,
            flags,
            props,
        }))
    }

    /// The error type every grammar shares at id 0.
    pub fn error() -> NodeType {
        NodeType::new(0, "\u{26a0}", NodeType::ERROR, NodeProps::new())
    }

    pub fn id(&self) -> u16 {
        self.0.id
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn is_error(&self) -> bool {
        self.0.flags & NodeType::ERROR != 0
    }

    pub fn is_top(&self) -> bool {
        self.0.flags & NodeType::TOP != 0
    }

    pub fn is_skipped(&self) -> bool {
        self.0.flags & NodeType::SKIPPED != 0
    }

    pub fn is_anonymous(&self) -> bool {
        self.0.flags & NodeType::ANONYMOUS != 0
    }

    pub fn prop(&self, key: PropKey) -> Option<&PropValue> {
        self.0.props.get(key)
    }

    /// True when this type's name or one of its `GROUP` names equals `name`.
    pub fn is_in(&self, name: &str) -> bool {
        if self.name() == name {
            return true;
        }
        match self.prop(PropKey::GROUP) {
            Some(PropValue::Names(groups)) => groups.iter().any(|g| g == name),
            _ => false,
        }
    }
}

impl PartialEq for NodeType {
    fn eq(&self, other: &NodeType) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for NodeType {}

impl fmt::Debug for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeType({} #{})", self.name(), self.id())
    }
}

/// The full set of node types for one grammar, indexed by id. Shared
/// read-only across every tree and parse that uses the grammar.
#[derive(Clone)]
pub struct NodeSet(Arc<Vec<NodeType>>);

impl NodeSet {
    /// Build a set from a type list. The list must be dense: `types[i]` has
    /// id `i`, and id 0 must be the error type.
    pub fn new(types: Vec<NodeType>) -> NodeSet {
        debug_assert!(types
            .iter()
            .enumerate()
            .all(|(i, ty)| ty.id() as usize == i));
        debug_assert!(types.first().map(|t| t.is_error()).unwrap_or(false));
        NodeSet(Arc::new(types))
    }

    pub fn get(&self, id: u16) -> &NodeType {
        &self.0[id as usize]
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn types(&self) -> &[NodeType] {
        &self.0
    }
}

impl fmt::Debug for NodeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeSet({} types)", self.0.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_keys_are_stable() {
        let a = PropKey::named("indent");
        let b = PropKey::named("indent");
        let c = PropKey::named("fold");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.0 >= PropKey::FIRST_DYNAMIC);
    }

    #[test]
    fn props_set_replaces() {
        let mut props = NodeProps::new();
        props.set(PropKey::LOOKAHEAD, PropValue::Int(10));
        props.set(PropKey::LOOKAHEAD, PropValue::Int(20));
        assert_eq!(props.get(PropKey::LOOKAHEAD).and_then(|v| v.as_int()), Some(20));
        assert_eq!(props.iter().count(), 1);
    }

    #[test]
    fn group_membership() {
        let props = NodeProps::new().with(
            PropKey::GROUP,
            PropValue::Names(vec!["Expression".to_string()].into()),
        );
        let ty = NodeType::new(3, "BinaryOp", 0, props);
        assert!(ty.is_in("BinaryOp"));
        assert!(ty.is_in("Expression"));
        assert!(!ty.is_in("Statement"));
    }
}
