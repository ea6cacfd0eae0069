//! IR node kinds and the `NodeId` handle.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU32, Ordering};

use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};
use symgen_types::{TypeRef, Value};

/// Identity of a [`Context`](crate::Context). Every node handle carries the
/// id of the context that owns it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u32);

impl ContextId {
    pub(crate) fn fresh() -> Self {
        static NEXT: AtomicU32 = AtomicU32::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Handle into a context's node arena. Lightweight (8 bytes), Copy.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    pub(crate) ctx: ContextId,
    pub(crate) index: u32,
}

impl NodeId {
    /// Position of this node in its context's arena.
    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    #[inline]
    pub fn context(&self) -> ContextId {
        self.ctx
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "n{}", self.index)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "n{}", self.index)
    }
}

/// Role of a declared argument. Fixes both how a binding generator passes
/// it and which name is used when it is read or written.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
    /// Read under its "previous" name, written under its "next" name.
    Update,
}

/// Deterministic structural hash of a node: type name, kind or operator,
/// and the content keys of its operands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentKey(pub u64);

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Operator of an `Expr` node.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ExprOp {
    /// A registered operator; `overload` indexes the registry's overload
    /// list for `name`.
    Op { name: String, overload: usize },
    /// Struct member access. Address-preserving.
    Member(String),
    /// Fixed-position element access. Address-preserving.
    Index(usize),
    /// Type-name-as-constructor: builds an aggregate (or casts a scalar).
    Construct,
}

impl ExprOp {
    /// Name used in diagnostics: `+`, `.x`, `[2]`, `construct`.
    pub fn name(&self) -> String {
        match self {
            ExprOp::Op { name, .. } => name.clone(),
            ExprOp::Member(field) => format!(".{field}"),
            ExprOp::Index(i) => format!("[{i}]"),
            ExprOp::Construct => "construct".to_string(),
        }
    }

    /// Whether applying this operator to an address yields an address.
    pub fn is_address_producing(&self) -> bool {
        matches!(self, ExprOp::Member(_) | ExprOp::Index(_))
    }
}

/// A node in the IR graph.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Constant(Value),
    /// A declared argument. Always an address.
    VarRef { name: String, dir: Direction },
    /// Snapshot of an address.
    Read(NodeId),
    /// Store `value` into `addr`.
    Write { addr: NodeId, value: NodeId },
    Expr { op: ExprOp, args: Vec<NodeId> },
}

impl NodeKind {
    /// Immediate operands, in order.
    pub fn operands(&self) -> Vec<NodeId> {
        match self {
            NodeKind::Constant(_) | NodeKind::VarRef { .. } => Vec::new(),
            NodeKind::Read(addr) => vec![*addr],
            NodeKind::Write { addr, value } => vec![*addr, *value],
            NodeKind::Expr { args, .. } => args.clone(),
        }
    }
}

/// An interned node: kind plus its type, address-ness and content key.
#[derive(Clone, Debug)]
pub struct Node {
    pub(crate) ty: TypeRef,
    pub(crate) kind: NodeKind,
    pub(crate) is_address: bool,
    pub(crate) key: ContentKey,
}

impl Node {
    #[inline]
    pub fn ty(&self) -> &TypeRef {
        &self.ty
    }

    #[inline]
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// True for argument references and member/index chains rooted at one.
    #[inline]
    pub fn is_address(&self) -> bool {
        self.is_address
    }

    #[inline]
    pub fn content_key(&self) -> ContentKey {
        self.key
    }

    pub fn as_constant(&self) -> Option<&Value> {
        match &self.kind {
            NodeKind::Constant(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_var(&self) -> Option<(&str, Direction)> {
        match &self.kind {
            NodeKind::VarRef { name, dir } => Some((name, *dir)),
            _ => None,
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(self.kind, NodeKind::Write { .. })
    }

    /// An operator, member, index or constructor applied to values.
    pub(crate) fn is_value_expr(&self) -> bool {
        !self.is_address && matches!(self.kind, NodeKind::Expr { .. })
    }
}

/// Compute the content key of a node whose operands already have keys.
pub(crate) fn content_key(
    ty: &str,
    kind: &NodeKind,
    key_of: impl Fn(NodeId) -> ContentKey,
) -> ContentKey {
    let mut h = FxHasher::default();
    ty.hash(&mut h);
    match kind {
        NodeKind::Constant(v) => {
            0u8.hash(&mut h);
            v.hash(&mut h);
        }
        NodeKind::VarRef { name, dir } => {
            1u8.hash(&mut h);
            name.hash(&mut h);
            dir.hash(&mut h);
        }
        NodeKind::Read(addr) => {
            2u8.hash(&mut h);
            key_of(*addr).hash(&mut h);
        }
        NodeKind::Write { addr, value } => {
            3u8.hash(&mut h);
            key_of(*addr).hash(&mut h);
            key_of(*value).hash(&mut h);
        }
        NodeKind::Expr { op, args } => {
            4u8.hash(&mut h);
            match op {
                ExprOp::Op { name, .. } => {
                    0u8.hash(&mut h);
                    name.hash(&mut h);
                }
                ExprOp::Member(field) => {
                    1u8.hash(&mut h);
                    field.hash(&mut h);
                }
                ExprOp::Index(i) => {
                    2u8.hash(&mut h);
                    i.hash(&mut h);
                }
                ExprOp::Construct => 3u8.hash(&mut h),
            }
            for a in args {
                key_of(*a).hash(&mut h);
            }
        }
    }
    ContentKey(h.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_ids_are_unique() {
        let a = ContextId::fresh();
        let b = ContextId::fresh();
        assert_ne!(a, b);
    }

    #[test]
    fn op_names() {
        let add = ExprOp::Op {
            name: "+".to_string(),
            overload: 0,
        };
        assert_eq!(add.name(), "+");
        assert_eq!(ExprOp::Member("x".into()).name(), ".x");
        assert_eq!(ExprOp::Index(2).name(), "[2]");
        assert!(ExprOp::Index(0).is_address_producing());
        assert!(!add.is_address_producing());
        assert!(!ExprOp::Construct.is_address_producing());
    }

    #[test]
    fn content_key_is_deterministic() {
        let kind = NodeKind::Constant(Value::Float(2.0));
        let k1 = content_key("double", &kind, |_| ContentKey(0));
        let k2 = content_key("double", &kind, |_| ContentKey(0));
        assert_eq!(k1, k2);
        let k3 = content_key("float", &kind, |_| ContentKey(0));
        assert_ne!(k1, k3);
    }

    #[test]
    fn content_key_depends_on_operand_keys() {
        let ctx = ContextId::fresh();
        let a = NodeId { ctx, index: 0 };
        let kind = NodeKind::Read(a);
        let k1 = content_key("double", &kind, |_| ContentKey(1));
        let k2 = content_key("double", &kind, |_| ContentKey(2));
        assert_ne!(k1, k2);
    }
}
