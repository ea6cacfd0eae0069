//! The function-under-construction: argument table, interned node arena,
//! write set and attached per-language code.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use symgen_types::{Lang, ScalarKind, TypeError, TypeKind, TypeRef, TypeSystem, Value};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::node::{self, ContextId, Direction, ExprOp, Node, NodeId, NodeKind};
use crate::options::ContextOptions;
use crate::registry::{Registry, RetType};

/// Operand accepted by [`Context::apply`]: a node, or a bare numeric
/// literal to be coerced into a constant.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Operand {
    Node(NodeId),
    Float(f64),
    Int(i64),
}

impl From<NodeId> for Operand {
    fn from(id: NodeId) -> Self {
        Operand::Node(id)
    }
}

impl From<f64> for Operand {
    fn from(v: f64) -> Self {
        Operand::Float(v)
    }
}

impl From<i64> for Operand {
    fn from(v: i64) -> Self {
        Operand::Int(v)
    }
}

impl From<i32> for Operand {
    fn from(v: i32) -> Self {
        Operand::Int(v as i64)
    }
}

/// A function being built as an IR graph.
///
/// Every node is interned: constructing a node structurally identical to an
/// existing one returns the existing [`NodeId`]. Nodes are never removed.
pub struct Context {
    id: ContextId,
    name: String,
    registry: Arc<Registry>,
    types: Arc<dyn TypeSystem>,
    pub(crate) options: ContextOptions,
    nodes: Vec<Node>,
    intern: HashMap<(String, NodeKind), NodeId>,
    args: IndexMap<String, NodeId>,
    writes: IndexSet<NodeId>,
    write_counters: HashMap<NodeId, usize>,
    pre_code: BTreeMap<Lang, Vec<String>>,
    post_code: BTreeMap<Lang, Vec<String>>,
    pub(crate) deriv_memo: HashMap<(NodeId, NodeId), NodeId>,
    rewrite_depth: usize,
}

impl Context {
    /// An empty context with default options.
    pub fn new(name: impl Into<String>, registry: Arc<Registry>, types: Arc<dyn TypeSystem>) -> Self {
        Self::with_options(name, registry, types, ContextOptions::default())
    }

    /// An empty context with explicit options.
    pub fn with_options(
        name: impl Into<String>,
        registry: Arc<Registry>,
        types: Arc<dyn TypeSystem>,
        options: ContextOptions,
    ) -> Self {
        Self {
            id: ContextId::fresh(),
            name: name.into(),
            registry,
            types,
            options,
            nodes: Vec::new(),
            intern: HashMap::new(),
            args: IndexMap::new(),
            writes: IndexSet::new(),
            write_counters: HashMap::new(),
            pre_code: BTreeMap::new(),
            post_code: BTreeMap::new(),
            deriv_memo: HashMap::new(),
            rewrite_depth: 0,
        }
    }

    /// Identity stamped into every [`NodeId`] this context issues.
    #[inline]
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Function name used by emission.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The operator registry shared with derived contexts.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The type system names are resolved against.
    pub fn types(&self) -> &Arc<dyn TypeSystem> {
        &self.types
    }

    /// Naming and rewrite settings.
    pub fn options(&self) -> &ContextOptions {
        &self.options
    }

    /// Total number of interned nodes.
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no node has been interned yet.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Look up a node.
    ///
    /// # Panics
    ///
    /// Panics if `id` was issued by another context. The same holds for
    /// the other infallible accessors taking a [`NodeId`] (`ty`, `is_zero`,
    /// `is_one`, `root_arg`, `fmt_node`); everything returning [`Result`]
    /// reports [`Error::ForeignNode`] instead.
    #[inline]
    pub fn node(&self, id: NodeId) -> &Node {
        assert!(id.ctx == self.id, "node {id} used with foreign context `{}`", self.name);
        &self.nodes[id.index as usize]
    }

    /// Type of a node. Panics on a foreign id, like [`Context::node`].
    #[inline]
    pub fn ty(&self, id: NodeId) -> TypeRef {
        Arc::clone(&self.node(id).ty)
    }

    /// Every interned node, in arena order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        let ctx = self.id;
        self.nodes.iter().enumerate().map(move |(i, n)| {
            (
                NodeId {
                    ctx,
                    index: i as u32,
                },
                n,
            )
        })
    }

    /// Resolve a type by name.
    pub fn lookup_type(&self, name: &str) -> Result<TypeRef> {
        self.types
            .get_type(name)
            .ok_or_else(|| Error::Type(TypeError::Unknown(name.to_string())))
    }

    // --- arguments ---------------------------------------------------------

    /// Declare output, update and input arguments as `(name, type)` pairs.
    pub fn declare_args(
        &mut self,
        outs: &[(&str, &str)],
        updates: &[(&str, &str)],
        ins: &[(&str, &str)],
    ) -> Result<()> {
        for (group, dir) in [
            (outs, Direction::Out),
            (updates, Direction::Update),
            (ins, Direction::In),
        ] {
            for (name, ty) in group {
                let ty = self.lookup_type(ty)?;
                self.declare_arg(name, &ty, dir)?;
            }
        }
        Ok(())
    }

    /// Declare one argument. Names are unique per context.
    pub fn declare_arg(&mut self, name: &str, ty: &TypeRef, dir: Direction) -> Result<NodeId> {
        if self.args.contains_key(name) {
            return Err(Error::DuplicateArg(name.to_string()));
        }
        let kind = NodeKind::VarRef {
            name: name.to_string(),
            dir,
        };
        let id = self.intern(Arc::clone(ty), kind, true);
        self.args.insert(name.to_string(), id);
        debug!(context = %self.name, arg = name, ty = %ty, ?dir, "declared argument");
        Ok(id)
    }

    /// The VarRef bound to `name`.
    pub fn arg(&self, name: &str) -> Result<NodeId> {
        self.args
            .get(name)
            .copied()
            .ok_or_else(|| Error::Undeclared(name.to_string()))
    }

    /// Declared arguments in declaration order.
    pub fn args(&self) -> impl Iterator<Item = (&str, NodeId, Direction)> + '_ {
        self.args.iter().map(move |(name, &id)| {
            let dir = match self.node(id).kind() {
                NodeKind::VarRef { dir, .. } => *dir,
                _ => Direction::In,
            };
            (name.as_str(), id, dir)
        })
    }

    /// The argument an address is rooted at, following member and index
    /// chains.
    pub fn root_arg(&self, addr: NodeId) -> Option<NodeId> {
        let mut cur = addr;
        loop {
            match self.node(cur).kind() {
                NodeKind::VarRef { .. } => return Some(cur),
                NodeKind::Expr { op, args } if op.is_address_producing() => cur = args[0],
                _ => return None,
            }
        }
    }

    // --- constants ---------------------------------------------------------

    /// Interned constant of `ty`, normalized so equal values share a node.
    pub fn constant(&mut self, ty: &TypeRef, value: impl Into<Value>) -> NodeId {
        let value = normalize(ty, value.into());
        self.intern(Arc::clone(ty), NodeKind::Constant(value), false)
    }

    /// The zero of any type, composite included.
    pub fn zero(&mut self, ty: &TypeRef) -> NodeId {
        self.constant(ty, Value::Zero)
    }

    /// The unit of a numeric scalar type.
    pub fn one(&mut self, ty: &TypeRef) -> Result<NodeId> {
        let value = match ty.scalar_kind() {
            Some(ScalarKind::F64 | ScalarKind::F32) => Value::Float(1.0),
            Some(ScalarKind::I32) => Value::Int(1),
            _ => return Err(Error::NoUnit(ty.name().to_string())),
        };
        Ok(self.constant(ty, value))
    }

    /// A zero constant, or an expression whose operator's `is_zero`
    /// predicate holds.
    pub fn is_zero(&self, id: NodeId) -> bool {
        match self.node(id).kind() {
            NodeKind::Constant(v) => v.is_zero(),
            NodeKind::Expr {
                op: ExprOp::Op { name, overload },
                args,
            } => self
                .registry
                .overload(name, *overload)
                .and_then(|o| o.rules.is_zero.as_ref())
                .is_some_and(|f| f(self, args)),
            _ => false,
        }
    }

    /// Like [`Context::is_zero`], for the unit.
    pub fn is_one(&self, id: NodeId) -> bool {
        match self.node(id).kind() {
            NodeKind::Constant(v) => v.is_one(),
            NodeKind::Expr {
                op: ExprOp::Op { name, overload },
                args,
            } => self
                .registry
                .overload(name, *overload)
                .and_then(|o| o.rules.is_one.as_ref())
                .is_some_and(|f| f(self, args)),
            _ => false,
        }
    }

    // --- expressions -------------------------------------------------------

    /// Apply an operator by name.
    ///
    /// `.field` and `[n]` select members and elements; any other name is
    /// resolved against the registry, then against the type system as a
    /// constructor.
    pub fn apply(&mut self, op: &str, args: &[Operand]) -> Result<NodeId> {
        let args = self.coerce(args)?;
        if let Some(field) = op.strip_prefix('.') {
            let base = single(op, &args)?;
            return self.member(base, field);
        }
        if let Some(i) = parse_index(op) {
            let base = single(op, &args)?;
            return self.index(base, i);
        }

        let arg_types: Vec<TypeRef> = args.iter().map(|&a| self.ty(a)).collect();
        let names: Vec<&str> = arg_types.iter().map(|t| t.name()).collect();
        let registry = Arc::clone(&self.registry);
        if let Some((overload, ov)) = registry.resolve(op, &names) {
            let ret = match &ov.ret {
                RetType::Named(n) => self.lookup_type(n)?,
                RetType::SameAs(i) => arg_types.get(*i).cloned().ok_or_else(|| Error::Arity {
                    op: op.to_string(),
                    expected: i + 1,
                    got: args.len(),
                })?,
            };
            let values = args
                .iter()
                .map(|&a| self.value_of(a))
                .collect::<Result<Vec<_>>>()?;
            let op = ExprOp::Op {
                name: op.to_string(),
                overload,
            };
            return self.dedup(op, ret, values, false);
        }
        if let Some(ty) = self.types.get_type(op) {
            return self.construct(&ty, &args);
        }
        Err(Error::NoOverload {
            op: op.to_string(),
            arg_types: names.iter().map(|s| s.to_string()).collect(),
        })
    }

    /// Member `field` of `base`. An address in, an address out.
    pub fn member(&mut self, base: NodeId, field: &str) -> Result<NodeId> {
        self.check_owned(base)?;
        let (_, ty) = self.node(base).ty.member(field)?;
        let is_address = self.node(base).is_address;
        self.dedup(ExprOp::Member(field.to_string()), ty, vec![base], is_address)
    }

    /// Element `i` of `base`, bounds-checked against a fixed template length.
    pub fn index(&mut self, base: NodeId, i: usize) -> Result<NodeId> {
        self.check_owned(base)?;
        let ty = self.node(base).ty.element(i)?;
        let is_address = self.node(base).is_address;
        self.dedup(ExprOp::Index(i), ty, vec![base], is_address)
    }

    /// Build a value of `ty` from one argument per field or element. A
    /// scalar type takes a single argument and acts as a cast.
    pub fn construct(&mut self, ty: &TypeRef, args: &[NodeId]) -> Result<NodeId> {
        for &a in args {
            self.check_owned(a)?;
        }
        let expected = match ty.kind() {
            TypeKind::Opaque => args.len(),
            _ => ty.arity().unwrap_or(args.len()),
        };
        if args.len() != expected {
            return Err(Error::ConstructorArity {
                ty: ty.name().to_string(),
                expected,
                got: args.len(),
            });
        }
        let values = args
            .iter()
            .map(|&a| self.value_of(a))
            .collect::<Result<Vec<_>>>()?;
        self.dedup(ExprOp::Construct, Arc::clone(ty), values, false)
    }

    // --- memory ------------------------------------------------------------

    /// Snapshot of the value stored at `addr`.
    pub fn read(&mut self, addr: NodeId) -> Result<NodeId> {
        self.check_owned(addr)?;
        if !self.node(addr).is_address {
            return Err(Error::NotAddress {
                action: "read",
                node: self.describe(addr),
            });
        }
        let ty = self.ty(addr);
        Ok(self.intern(ty, NodeKind::Read(addr), false))
    }

    /// Record a store of `value` into `addr`. Bare literals take the
    /// address's type.
    pub fn write(&mut self, addr: NodeId, value: impl Into<Operand>) -> Result<NodeId> {
        self.check_owned(addr)?;
        if !self.node(addr).is_address {
            return Err(Error::NotAddress {
                action: "write",
                node: self.describe(addr),
            });
        }
        if let Some((name, Direction::In)) = self.root_arg(addr).and_then(|r| self.node(r).as_var()) {
            return Err(Error::WriteToInput(name.to_string()));
        }
        let addr_ty = self.ty(addr);
        let value = match value.into() {
            Operand::Node(id) => {
                self.check_owned(id)?;
                self.value_of(id)?
            }
            Operand::Float(v) => self.constant(&addr_ty, v),
            Operand::Int(v) => self.constant(&addr_ty, v),
        };
        let value_ty = self.ty(value);
        if value_ty != addr_ty {
            return Err(Error::WriteTypeMismatch {
                expected: addr_ty.name().to_string(),
                found: value_ty.name().to_string(),
                node: self.describe(addr),
            });
        }
        let id = self.intern(addr_ty, NodeKind::Write { addr, value }, false);
        self.writes.insert(id);
        Ok(id)
    }

    /// Write to the next unused element of `addr`: the first call writes
    /// `addr[0]`, the second `addr[1]`, and so on.
    pub fn write_indexed(&mut self, addr: NodeId, value: impl Into<Operand>) -> Result<NodeId> {
        let n = self.write_counters.get(&addr).copied().unwrap_or(0);
        let elem = self.index(addr, n)?;
        let id = self.write(elem, value)?;
        self.write_counters.insert(addr, n + 1);
        Ok(id)
    }

    /// Recorded writes, in recording order.
    pub fn writes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.writes.iter().copied()
    }

    /// Number of recorded writes.
    pub fn write_count(&self) -> usize {
        self.writes.len()
    }

    // --- attached code -----------------------------------------------------

    /// Verbatim statement emitted before the generated body.
    pub fn add_pre_code(&mut self, lang: Lang, text: impl Into<String>) {
        self.pre_code.entry(lang).or_default().push(text.into());
    }

    /// Verbatim statement emitted after the generated body.
    pub fn add_post_code(&mut self, lang: Lang, text: impl Into<String>) {
        self.post_code.entry(lang).or_default().push(text.into());
    }

    /// Statements attached before the body for `lang`.
    pub fn pre_code(&self, lang: Lang) -> &[String] {
        self.pre_code.get(&lang).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Statements attached after the body for `lang`.
    pub fn post_code(&self, lang: Lang) -> &[String] {
        self.post_code.get(&lang).map(Vec::as_slice).unwrap_or(&[])
    }

    // --- internals ---------------------------------------------------------

    pub(crate) fn check_owned(&self, id: NodeId) -> Result<()> {
        if id.ctx != self.id || id.index as usize >= self.nodes.len() {
            return Err(Error::ForeignNode {
                node: id.to_string(),
            });
        }
        Ok(())
    }

    /// Short text for diagnostics.
    pub(crate) fn describe(&self, id: NodeId) -> String {
        if id.ctx != self.id {
            return id.to_string();
        }
        let mut text = self.fmt_node(id);
        if text.chars().count() > 80 {
            text = text.chars().take(77).chain("...".chars()).collect();
        }
        format!("{id} `{text}`")
    }

    /// Addresses become reads; values pass through.
    pub(crate) fn value_of(&mut self, id: NodeId) -> Result<NodeId> {
        if self.node(id).is_address {
            self.read(id)
        } else {
            Ok(id)
        }
    }

    /// Re-apply `op` to new operands through the normal construction path.
    pub(crate) fn rebuild(&mut self, op: &ExprOp, ty: &TypeRef, args: &[NodeId]) -> Result<NodeId> {
        match op {
            ExprOp::Op { name, .. } => {
                let operands: Vec<Operand> = args.iter().map(|&a| a.into()).collect();
                self.apply(name, &operands)
            }
            ExprOp::Member(field) => self.member(args[0], field),
            ExprOp::Index(i) => self.index(args[0], *i),
            ExprOp::Construct => self.construct(ty, args),
        }
    }

    fn coerce(&mut self, args: &[Operand]) -> Result<Vec<NodeId>> {
        let mut float_ty = None;
        for arg in args {
            if let Operand::Node(id) = *arg {
                self.check_owned(id)?;
                if float_ty.is_none() && self.node(id).ty.is_float() {
                    float_ty = Some(self.ty(id));
                }
            }
        }
        args.iter()
            .map(|arg| match *arg {
                Operand::Node(id) => Ok(id),
                Operand::Float(v) => {
                    let ty = match &float_ty {
                        Some(ty) => Arc::clone(ty),
                        None => self.lookup_type("double")?,
                    };
                    Ok(self.constant(&ty, v))
                }
                Operand::Int(v) => {
                    let ty = self.lookup_type("int")?;
                    Ok(self.constant(&ty, v))
                }
            })
            .collect()
    }

    fn intern(&mut self, ty: TypeRef, kind: NodeKind, is_address: bool) -> NodeId {
        let key = (ty.name().to_string(), kind);
        if let Some(&id) = self.intern.get(&key) {
            return id;
        }
        let content = node::content_key(ty.name(), &key.1, |n| self.nodes[n.index as usize].key);
        let id = NodeId {
            ctx: self.id,
            index: self.nodes.len() as u32,
        };
        self.nodes.push(Node {
            ty,
            kind: key.1.clone(),
            is_address,
            key: content,
        });
        self.intern.insert(key, id);
        trace!(context = %self.name, node = %id, key = %content, "interned");
        id
    }

    /// Fold, rewrite, then intern.
    fn dedup(&mut self, op: ExprOp, ty: TypeRef, args: Vec<NodeId>, is_address: bool) -> Result<NodeId> {
        if let Some(folded) = self.fold_immediate(&op, &ty, &args)? {
            return Ok(folded);
        }
        let limit = self.options.max_rewrites;
        if self.rewrite_depth >= limit {
            return Err(Error::RewriteLimit {
                op: op.name(),
                limit,
            });
        }
        self.rewrite_depth += 1;
        let replaced = self.rewrite(&op, &ty, &args);
        self.rewrite_depth -= 1;
        if let Some(id) = replaced? {
            trace!(context = %self.name, op = %op.name(), to = %id, "rewrote");
            return Ok(id);
        }
        Ok(self.intern(ty, NodeKind::Expr { op, args }, is_address))
    }

    fn constant_values(&self, args: &[NodeId]) -> Option<Vec<Value>> {
        args.iter()
            .map(|&a| self.node(a).as_constant().cloned())
            .collect()
    }

    fn fold_immediate(&mut self, op: &ExprOp, ty: &TypeRef, args: &[NodeId]) -> Result<Option<NodeId>> {
        match op {
            ExprOp::Op { name, overload } => {
                let registry = Arc::clone(&self.registry);
                let Some(imm) = registry.overload(name, *overload).and_then(|o| o.rules.imm.as_ref())
                else {
                    return Ok(None);
                };
                let Some(values) = self.constant_values(args) else {
                    return Ok(None);
                };
                Ok(imm(&values).map(|v| self.constant(ty, v)))
            }
            ExprOp::Construct => {
                let Some(mut values) = self.constant_values(args) else {
                    return Ok(None);
                };
                let value = match ty.kind() {
                    TypeKind::Scalar(kind) => match values.pop().and_then(|v| cast(*kind, &v)) {
                        Some(v) => v,
                        None => return Ok(None),
                    },
                    TypeKind::Opaque => return Ok(None),
                    _ => Value::Tuple(values),
                };
                Ok(Some(self.constant(ty, value)))
            }
            ExprOp::Member(_) | ExprOp::Index(_) => Ok(None),
        }
    }

    fn rewrite(&mut self, op: &ExprOp, ty: &TypeRef, args: &[NodeId]) -> Result<Option<NodeId>> {
        match op {
            ExprOp::Op { name, overload } => {
                let registry = Arc::clone(&self.registry);
                match registry.overload(name, *overload).and_then(|o| o.rules.replace.as_ref()) {
                    Some(rule) => rule(self, args),
                    None => Ok(None),
                }
            }
            ExprOp::Member(field) => {
                let slot = self.node(args[0]).ty.field(field).map(|(i, _)| i);
                self.project(op, ty, args[0], slot)
            }
            ExprOp::Index(i) => self.project(op, ty, args[0], Some(*i)),
            ExprOp::Construct => Ok(None),
        }
    }

    /// Built-in projections: a slot of a constant, of a constructor, or of a
    /// read (which becomes a read of the sub-address).
    fn project(&mut self, op: &ExprOp, ty: &TypeRef, base: NodeId, slot: Option<usize>) -> Result<Option<NodeId>> {
        let Some(slot) = slot else {
            return Ok(None);
        };
        match self.node(base).kind().clone() {
            NodeKind::Constant(v) => Ok(v.element(slot).map(|e| self.constant(ty, e))),
            NodeKind::Expr {
                op: ExprOp::Construct,
                args,
            } => Ok(args.get(slot).copied()),
            NodeKind::Read(addr) => {
                let sub = self.rebuild(op, ty, &[addr])?;
                self.read(sub).map(Some)
            }
            _ => Ok(None),
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("name", &self.name)
            .field("args", &self.args.keys().collect::<Vec<_>>())
            .field("nodes", &self.nodes.len())
            .field("writes", &self.writes.len())
            .finish_non_exhaustive()
    }
}

fn single(op: &str, args: &[NodeId]) -> Result<NodeId> {
    match args {
        [base] => Ok(*base),
        _ => Err(Error::Arity {
            op: op.to_string(),
            expected: 1,
            got: args.len(),
        }),
    }
}

fn parse_index(op: &str) -> Option<usize> {
    op.strip_prefix('[')?.strip_suffix(']')?.parse().ok()
}

/// Bring a constant into the canonical representation for its type so
/// equal values intern together.
fn normalize(ty: &TypeRef, value: Value) -> Value {
    let value = value.canonical();
    match (ty.scalar_kind(), value) {
        (Some(ScalarKind::F64), Value::Zero) => Value::Float(0.0),
        (Some(ScalarKind::F64), Value::Int(i)) => Value::Float(i as f64),
        (Some(ScalarKind::F32), Value::Zero) => Value::Float(0.0),
        (Some(ScalarKind::F32), Value::Int(i)) => Value::Float(i as f32 as f64),
        (Some(ScalarKind::F32), Value::Float(v)) => Value::Float(v as f32 as f64),
        (Some(ScalarKind::I32), Value::Zero) => Value::Int(0),
        (Some(ScalarKind::Bool), Value::Zero) => Value::Bool(false),
        (_, v) => v,
    }
}

/// Scalar conversion performed by a type-name constructor.
fn cast(kind: ScalarKind, v: &Value) -> Option<Value> {
    match kind {
        ScalarKind::F64 | ScalarKind::F32 => match v {
            Value::Zero => Some(Value::Float(0.0)),
            Value::Bool(b) => Some(Value::Float(f64::from(u8::from(*b)))),
            v => v.as_f64().map(Value::Float),
        },
        ScalarKind::I32 => match v {
            Value::Float(x) => Some(Value::Int(x.trunc() as i64)),
            Value::Int(i) => Some(Value::Int(*i)),
            Value::Bool(b) => Some(Value::Int(i64::from(*b))),
            Value::Zero => Some(Value::Int(0)),
            Value::Tuple(_) => None,
        },
        ScalarKind::Bool => match v {
            Value::Bool(b) => Some(Value::Bool(*b)),
            Value::Zero => Some(Value::Bool(false)),
            v => v.as_f64().map(|x| Value::Bool(x != 0.0)),
        },
    }
}
