//! Dependency analysis over the nodes reachable from a context's writes.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;

use crate::context::Context;
use crate::node::{Node, NodeId};

/// Forward and reverse edges, a producers-first order, and consumer counts
/// for every node reachable from the write set.
#[derive(Clone, Debug, Default)]
pub struct Deps {
    /// Node → its operands.
    pub fwd: IndexMap<NodeId, Vec<NodeId>>,
    /// Node → nodes that consume it.
    pub rev: HashMap<NodeId, Vec<NodeId>>,
    /// Post-order seeded at each write in recording order. Every node
    /// appears once, after all of its operands.
    pub in_order: Vec<NodeId>,
    /// Number of consumer edges into each node. A node used twice by the
    /// same consumer counts twice.
    pub ref_count: HashMap<NodeId, usize>,
}

impl Deps {
    /// Analyze everything reachable from the writes of `ctx`.
    ///
    /// ```
    /// use std::sync::Arc;
    ///
    /// use symgen::{Context, Deps, Registry, TypeRegistry};
    ///
    /// let mut f = Context::new("f", Arc::new(Registry::with_std_ops()), Arc::new(TypeRegistry::new()));
    /// f.declare_args(&[("y", "double")], &[], &[("a", "double")])?;
    /// let (a, y) = (f.arg("a")?, f.arg("y")?);
    /// let s = f.call("sin", a)?;
    /// let sq = f.mul(s, s)?;
    /// f.write(y, sq)?;
    ///
    /// let deps = Deps::build(&f);
    /// assert_eq!(deps.ref_count(s), 2);
    /// assert_eq!(deps.consumers(s), [sq, sq]);
    /// assert_eq!(deps.operands(sq), [s, s]);
    /// assert_eq!(deps.in_order.last(), f.writes().last().as_ref());
    /// # Ok::<(), symgen::Error>(())
    /// ```
    pub fn build(ctx: &Context) -> Self {
        let mut deps = Self::default();
        for w in ctx.writes() {
            deps.visit(ctx, w);
        }
        deps
    }

    /// Iterative post-order walk from `root`.
    fn visit(&mut self, ctx: &Context, root: NodeId) {
        let mut stack = vec![(root, false)];
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                self.in_order.push(id);
                continue;
            }
            if self.fwd.contains_key(&id) {
                continue;
            }
            let operands = ctx.node(id).kind().operands();
            stack.push((id, true));
            for &op in operands.iter().rev() {
                *self.ref_count.entry(op).or_default() += 1;
                self.rev.entry(op).or_default().push(id);
                if !self.fwd.contains_key(&op) {
                    stack.push((op, false));
                }
            }
            self.fwd.insert(id, operands);
        }
    }

    /// Consumer edges into `id`; zero for writes and unreachable nodes.
    #[inline]
    pub fn ref_count(&self, id: NodeId) -> usize {
        self.ref_count.get(&id).copied().unwrap_or(0)
    }

    /// Nodes consuming `id`, once per edge.
    pub fn consumers(&self, id: NodeId) -> &[NodeId] {
        self.rev.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Operands of `id`, in order.
    pub fn operands(&self, id: NodeId) -> &[NodeId] {
        self.fwd.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether `id` is reachable from a write.
    pub fn contains(&self, id: NodeId) -> bool {
        self.fwd.contains_key(&id)
    }

    /// Number of reachable nodes.
    pub fn len(&self) -> usize {
        self.in_order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_order.is_empty()
    }
}

impl Context {
    /// `root` and every node it reaches through nodes accepted by `expand`,
    /// in arena order. Operands are interned before their consumers, so
    /// arena order puts producers first.
    pub(crate) fn operand_closure(&self, root: NodeId, expand: impl Fn(&Node) -> bool) -> Vec<NodeId> {
        let mut seen = HashSet::from([root]);
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let node = self.node(id);
            if !expand(node) {
                continue;
            }
            for op in node.kind().operands() {
                if seen.insert(op) {
                    stack.push(op);
                }
            }
        }
        let mut order: Vec<NodeId> = seen.into_iter().collect();
        order.sort_unstable_by_key(|id| id.index());
        order
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use symgen_types::TypeRegistry;

    use super::*;
    use crate::Registry;

    fn ctx() -> Context {
        let mut c = Context::new(
            "f",
            Arc::new(Registry::with_std_ops()),
            Arc::new(TypeRegistry::new()),
        );
        c.declare_args(&[("y", "double"), ("z", "double")], &[], &[("a", "double"), ("b", "double")])
            .unwrap();
        c
    }

    #[test]
    fn producers_precede_consumers() {
        let mut c = ctx();
        let (a, b) = (c.arg("a").unwrap(), c.arg("b").unwrap());
        let s = c.add(a, b).unwrap();
        let p = c.mul(s, s).unwrap();
        let q = c.call("sin", s).unwrap();
        c.write(c.arg("y").unwrap(), p).unwrap();
        c.write(c.arg("z").unwrap(), q).unwrap();

        let deps = Deps::build(&c);
        let pos: HashMap<NodeId, usize> =
            deps.in_order.iter().enumerate().map(|(i, &n)| (n, i)).collect();
        assert_eq!(pos.len(), deps.in_order.len(), "each node once");
        for (&node, operands) in &deps.fwd {
            for op in operands {
                assert!(pos[op] < pos[&node]);
            }
        }
        // s feeds p twice and q once.
        assert_eq!(deps.ref_count(s), 3);
        let consumers: HashSet<NodeId> = deps.consumers(s).iter().copied().collect();
        assert_eq!(consumers, HashSet::from([p, q]));
        assert_eq!(deps.ref_count(p), 1);
    }

    #[test]
    fn writes_appear_in_recording_order() {
        let mut c = ctx();
        let (a, b) = (c.arg("a").unwrap(), c.arg("b").unwrap());
        let z = c.arg("z").unwrap();
        let y = c.arg("y").unwrap();
        let w1 = c.write(z, a).unwrap();
        let w2 = c.write(y, b).unwrap();
        let deps = Deps::build(&c);
        let writes: Vec<NodeId> = deps
            .in_order
            .iter()
            .copied()
            .filter(|&n| c.node(n).is_write())
            .collect();
        assert_eq!(writes, [w1, w2]);
        assert_eq!(deps.ref_count(w1), 0);
    }

    #[test]
    fn unreachable_nodes_are_excluded() {
        let mut c = ctx();
        let a = c.arg("a").unwrap();
        let dead = c.call("cos", a).unwrap();
        let y = c.arg("y").unwrap();
        c.write(y, a).unwrap();
        let deps = Deps::build(&c);
        assert!(!deps.contains(dead));
        assert!(deps.contains(a));
    }

    #[test]
    fn closure_walks_producers_first() {
        let mut c = ctx();
        let (a, b) = (c.arg("a").unwrap(), c.arg("b").unwrap());
        let s = c.add(a, b).unwrap();
        let p = c.mul(s, 2.0).unwrap();

        let all = c.operand_closure(p, |_| true);
        assert!(all.windows(2).all(|w| w[0].index() < w[1].index()));
        assert_eq!(all.last(), Some(&p));
        assert!(all.contains(&a) && all.contains(&s));

        // Reads are leaves when only value expressions are expanded.
        let values = c.operand_closure(p, Node::is_value_expr);
        assert!(values.contains(&c.read(b).unwrap()));
        assert!(!values.contains(&a) && !values.contains(&b));
    }
}
