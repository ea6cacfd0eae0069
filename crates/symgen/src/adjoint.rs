//! Reverse-mode differentiation: synthesis of adjoint contexts.
//!
//! [`adjoint_of`] copies a function's writes into a sibling context, seeds
//! each written address with the incoming gradient of its output, sweeps the
//! graph consumers-first pushing gradient contributions toward the reads,
//! and finally writes each read's accumulated gradient to the mirrored
//! gradient argument.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use symgen_types::{TypeKind, TypeRef};
use tracing::{debug, trace};

use crate::context::Context;
use crate::deps::Deps;
use crate::error::{Error, Result};
use crate::node::{Direction, ExprOp, NodeId, NodeKind};

/// Gradient accumulator used during the reverse sweep.
///
/// Each node collects contributions until its total is requested; after
/// that the node is finalized and further pushes are an error.
#[derive(Debug, Default)]
pub struct Backprop {
    contributions: HashMap<NodeId, Vec<NodeId>>,
    totals: HashMap<NodeId, NodeId>,
}

impl Backprop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `g` to the gradient of `target`. Constants take no gradient.
    pub fn push(&mut self, ctx: &Context, target: NodeId, g: NodeId) -> Result<()> {
        ctx.check_owned(target)?;
        ctx.check_owned(g)?;
        if self.totals.contains_key(&target) {
            return Err(Error::GradientFinalized {
                node: ctx.describe(target),
            });
        }
        if ctx.node(target).as_constant().is_some() {
            return Ok(());
        }
        self.contributions.entry(target).or_default().push(g);
        Ok(())
    }

    /// Sum of everything pushed to `node` (its type's zero if nothing was).
    /// Finalizes `node`; repeated calls return the same id.
    pub fn total(&mut self, ctx: &mut Context, node: NodeId) -> Result<NodeId> {
        if let Some(&t) = self.totals.get(&node) {
            return Ok(t);
        }
        let parts = self.contributions.remove(&node).unwrap_or_default();
        let mut acc: Option<NodeId> = None;
        for g in parts {
            acc = Some(match acc {
                Some(a) => accumulate(ctx, a, g)?,
                None => g,
            });
        }
        let total = match acc {
            Some(t) => t,
            None => {
                let ty = ctx.ty(node);
                ctx.zero(&ty)
            }
        };
        self.totals.insert(node, total);
        Ok(total)
    }

    pub fn is_finalized(&self, node: NodeId) -> bool {
        self.totals.contains_key(&node)
    }

    /// Pending (not yet summed) contributions of `node`.
    pub fn contributions(&self, node: NodeId) -> &[NodeId] {
        self.contributions.get(&node).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// `a + b`, falling back to slot-wise addition for aggregates without a
/// registered `+`.
fn accumulate(ctx: &mut Context, a: NodeId, b: NodeId) -> Result<NodeId> {
    let ty = ctx.ty(a);
    let ty_b = ctx.ty(b);
    if ctx.registry().resolve("+", &[ty.name(), ty_b.name()]).is_some() {
        return ctx.add(a, b);
    }
    if ctx.is_zero(a) {
        return Ok(b);
    }
    if ctx.is_zero(b) {
        return Ok(a);
    }
    let slots: Vec<ExprOp> = match ty.kind() {
        TypeKind::Struct(_) => ty.fields().into_iter().map(|(f, _)| ExprOp::Member(f)).collect(),
        TypeKind::Template(t) if t.len.is_some() => (0..t.len.unwrap_or(0)).map(ExprOp::Index).collect(),
        _ => return ctx.add(a, b),
    };
    let mut parts = Vec::with_capacity(slots.len());
    for op in &slots {
        let pa = project(ctx, op, a)?;
        let pb = project(ctx, op, b)?;
        parts.push(accumulate(ctx, pa, pb)?);
    }
    ctx.construct(&ty, &parts)
}

fn project(ctx: &mut Context, op: &ExprOp, base: NodeId) -> Result<NodeId> {
    match op {
        ExprOp::Member(field) => ctx.member(base, field),
        ExprOp::Index(i) => ctx.index(base, *i),
        other => Err(Error::NotAddress {
            action: "project",
            node: other.name(),
        }),
    }
}

/// Synthesize the adjoint of `primal`.
///
/// The result is a new context named `<name>Grad` sharing the registry,
/// type system and options. Its arguments are:
///
/// - outputs: the primal outputs, then `<x>Grad` for every input `x`
/// - updates: each primal update `s`, followed by `<s>Grad`
/// - inputs: the primal inputs, then `<y>Grad` for every output `y`
///
/// Arguments named in `excluded` get no gradient partner. The adjoint
/// recomputes the primal writes, so it also produces the primal outputs.
pub fn adjoint_of(primal: &Context, excluded: &[&str]) -> Result<Context> {
    for name in excluded {
        primal.arg(name)?;
    }
    let opts = primal.options().clone();
    let mut adj = Context::with_options(
        opts.grad_name(primal.name()),
        Arc::clone(primal.registry()),
        Arc::clone(primal.types()),
        opts.clone(),
    );
    debug!(
        context = primal.name(),
        nodes = primal.len(),
        writes = primal.write_count(),
        "adjoint synthesis started"
    );

    let args: Vec<(String, TypeRef, Direction)> = primal
        .args()
        .map(|(name, id, dir)| (name.to_string(), primal.ty(id), dir))
        .collect();
    let active = |name: &str| !excluded.contains(&name);
    // Gradient partner read as the incoming gradient of a written address.
    let mut seeds: HashMap<String, String> = HashMap::new();
    // Gradient partner receiving the outgoing gradient of a read.
    let mut deposits: HashMap<String, String> = HashMap::new();

    for (name, ty, dir) in &args {
        if *dir == Direction::Out {
            adj.declare_arg(name, ty, Direction::Out)?;
        }
    }
    for (name, ty, dir) in &args {
        if *dir == Direction::In && active(name) {
            let g = opts.grad_name(name);
            adj.declare_arg(&g, ty, Direction::Out)?;
            deposits.insert(name.clone(), g);
        }
    }
    for (name, ty, dir) in &args {
        if *dir == Direction::Update {
            adj.declare_arg(name, ty, Direction::Update)?;
            if active(name) {
                let g = opts.grad_name(name);
                adj.declare_arg(&g, ty, Direction::Update)?;
                seeds.insert(name.clone(), g.clone());
                deposits.insert(name.clone(), g);
            }
        }
    }
    for (name, ty, dir) in &args {
        if *dir == Direction::In {
            adj.declare_arg(name, ty, Direction::In)?;
        }
    }
    for (name, ty, dir) in &args {
        if *dir == Direction::Out && active(name) {
            let g = opts.grad_name(name);
            adj.declare_arg(&g, ty, Direction::In)?;
            seeds.insert(name.clone(), g);
        }
    }

    copy_writes(primal, &mut adj)?;

    let deps = Deps::build(&adj);
    let mut bp = Backprop::new();

    let mut seeded = HashSet::new();
    for &id in &deps.in_order {
        let NodeKind::Write { addr, .. } = *adj.node(id).kind() else {
            continue;
        };
        if !seeded.insert(addr) {
            continue;
        }
        if let Some(grad_addr) = mirror(&mut adj, addr, &seeds)? {
            let g = adj.read(grad_addr)?;
            bp.push(&adj, addr, g)?;
        }
    }

    for &id in deps.in_order.iter().rev() {
        let node = adj.node(id).clone();
        match node.kind {
            NodeKind::Write { addr, value } => {
                let g = bp.total(&mut adj, addr)?;
                bp.push(&adj, value, g)?;
            }
            NodeKind::Read(_) => {
                bp.total(&mut adj, id)?;
            }
            NodeKind::Expr { op, args } if !node.is_address => {
                let g = bp.total(&mut adj, id)?;
                backprop_expr(&mut adj, &mut bp, &node.ty, &op, &args, g)?;
            }
            _ => {}
        }
    }

    deposit(&mut adj, &mut bp, &deps, &deposits)?;

    debug!(
        adjoint = adj.name(),
        nodes = adj.len(),
        writes = adj.write_count(),
        "adjoint synthesis finished"
    );
    Ok(adj)
}

fn backprop_expr(
    ctx: &mut Context,
    bp: &mut Backprop,
    ty: &TypeRef,
    op: &ExprOp,
    args: &[NodeId],
    g: NodeId,
) -> Result<()> {
    match op {
        ExprOp::Op { name, overload } => {
            let registry = Arc::clone(ctx.registry());
            let Some(rule) = registry
                .overload(name, *overload)
                .and_then(|o| o.rules.gradient.as_ref())
            else {
                return Err(Error::NoGradientRule {
                    op: name.clone(),
                    arg_types: ctx.type_names(args),
                });
            };
            rule(ctx, bp, g, args)
        }
        ExprOp::Member(field) => {
            let base_ty = ctx.ty(args[0]);
            let (slot, _) = base_ty.member(field)?;
            let spread = spread(ctx, &base_ty, op, slot, g)?;
            bp.push(ctx, args[0], spread)
        }
        ExprOp::Index(i) => {
            let base_ty = ctx.ty(args[0]);
            let spread = spread(ctx, &base_ty, op, *i, g)?;
            bp.push(ctx, args[0], spread)
        }
        ExprOp::Construct => match ty.kind() {
            TypeKind::Scalar(_) => {
                // A cast: convert the gradient back to the source type.
                let src_ty = ctx.ty(args[0]);
                if !src_ty.is_float() {
                    return Ok(());
                }
                let back = ctx.construct(&src_ty, &[g])?;
                bp.push(ctx, args[0], back)
            }
            TypeKind::Struct(_) => {
                let fields = ty.fields();
                for ((field, _), &arg) in fields.iter().zip(args) {
                    let part = ctx.member(g, field)?;
                    bp.push(ctx, arg, part)?;
                }
                Ok(())
            }
            TypeKind::Template(_) => {
                for (i, &arg) in args.iter().enumerate() {
                    let part = ctx.index(g, i)?;
                    bp.push(ctx, arg, part)?;
                }
                Ok(())
            }
            TypeKind::Opaque => Err(Error::NoGradientRule {
                op: ty.name().to_string(),
                arg_types: ctx.type_names(args),
            }),
        },
    }
}

/// An aggregate of `ty` holding `g` in `slot` and zeros elsewhere.
fn spread(ctx: &mut Context, ty: &TypeRef, op: &ExprOp, slot: usize, g: NodeId) -> Result<NodeId> {
    let slot_types: Vec<TypeRef> = match ty.kind() {
        TypeKind::Struct(_) => ty.fields().into_iter().map(|(_, t)| t).collect(),
        TypeKind::Template(t) if t.len.is_some() => (0..t.len.unwrap_or(0))
            .map(|i| ty.element(i))
            .collect::<Result<_, _>>()?,
        _ => {
            return Err(Error::NoGradientRule {
                op: op.name(),
                arg_types: vec![ty.name().to_string()],
            })
        }
    };
    let parts: Vec<NodeId> = slot_types
        .iter()
        .enumerate()
        .map(|(i, t)| if i == slot { g } else { ctx.zero(t) })
        .collect();
    ctx.construct(ty, &parts)
}

/// Write the gradient of every read of a gradient-bearing address.
///
/// Shallow addresses are handled first so that a member read can fold in
/// the projection of its enclosing value's gradient.
fn deposit(
    ctx: &mut Context,
    bp: &mut Backprop,
    deps: &Deps,
    deposits: &HashMap<String, String>,
) -> Result<()> {
    let mut reads: Vec<(usize, NodeId, NodeId)> = Vec::new();
    for &id in &deps.in_order {
        let NodeKind::Read(addr) = *ctx.node(id).kind() else {
            continue;
        };
        let bearing = ctx
            .root_arg(addr)
            .and_then(|r| ctx.node(r).as_var())
            .is_some_and(|(name, _)| deposits.contains_key(name));
        if bearing {
            reads.push((address_depth(ctx, addr), id, addr));
        }
    }
    reads.sort_by_key(|&(depth, _, _)| depth);

    let mut effective: HashMap<NodeId, NodeId> = HashMap::new();
    for (_, read, addr) in reads {
        let mut total = bp.total(ctx, read)?;
        let mut path = Vec::new();
        let mut cur = addr;
        while let NodeKind::Expr { op, args } = ctx.node(cur).kind().clone() {
            path.push(op);
            cur = args[0];
            if let Some(&outer) = effective.get(&cur) {
                let mut share = outer;
                for op in path.iter().rev() {
                    share = project(ctx, op, share)?;
                }
                total = accumulate(ctx, total, share)?;
                break;
            }
        }
        effective.insert(addr, total);
        if ctx.is_zero(total) {
            continue;
        }
        if let Some(grad_addr) = mirror(ctx, addr, deposits)? {
            trace!(addr = %ctx.fmt_node(addr), "deposit gradient");
            ctx.write(grad_addr, total)?;
        }
    }
    Ok(())
}

fn address_depth(ctx: &Context, addr: NodeId) -> usize {
    let mut depth = 0;
    let mut cur = addr;
    while let NodeKind::Expr { args, .. } = ctx.node(cur).kind() {
        depth += 1;
        cur = args[0];
    }
    depth
}

/// The address in the gradient partner that corresponds to `addr`.
fn mirror(ctx: &mut Context, addr: NodeId, partners: &HashMap<String, String>) -> Result<Option<NodeId>> {
    match ctx.node(addr).kind().clone() {
        NodeKind::VarRef { name, .. } => partners.get(&name).map(|g| ctx.arg(g)).transpose(),
        NodeKind::Expr { op, args } if op.is_address_producing() => {
            let Some(base) = mirror(ctx, args[0], partners)? else {
                return Ok(None);
            };
            project(ctx, &op, base).map(Some)
        }
        _ => Ok(None),
    }
}

/// Copy every write of `src`, with everything it depends on, into `dst`.
fn copy_writes(src: &Context, dst: &mut Context) -> Result<()> {
    let mut copies: HashMap<NodeId, NodeId> = HashMap::new();
    let copied = |copies: &HashMap<NodeId, NodeId>, id: NodeId| {
        copies.get(&id).copied().ok_or_else(|| Error::ForeignNode {
            node: id.to_string(),
        })
    };
    for id in Deps::build(src).in_order {
        let node = src.node(id);
        let copy = match node.kind() {
            NodeKind::Constant(v) => dst.constant(node.ty(), v.clone()),
            NodeKind::VarRef { name, .. } => dst.arg(name)?,
            NodeKind::Read(addr) => {
                let addr = copied(&copies, *addr)?;
                dst.read(addr)?
            }
            NodeKind::Write { addr, value } => {
                let addr = copied(&copies, *addr)?;
                let value = copied(&copies, *value)?;
                dst.write(addr, value)?
            }
            NodeKind::Expr { op, args } => {
                let args = args
                    .iter()
                    .map(|&a| copied(&copies, a))
                    .collect::<Result<Vec<_>>>()?;
                dst.rebuild(op, node.ty(), &args)?
            }
        };
        copies.insert(id, copy);
    }
    Ok(())
}
