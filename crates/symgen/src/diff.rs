//! Forward-mode symbolic differentiation.

use std::sync::Arc;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::node::{ExprOp, Node, NodeId, NodeKind};

impl Context {
    /// Differentiate `node` with respect to the address `wrt`.
    ///
    /// The result is an ordinary node in this context. Derivatives are
    /// memoized per `(wrt, node)`, so shared subexpressions are only
    /// differentiated once across calls.
    pub fn deriv(&mut self, wrt: NodeId, node: NodeId) -> Result<NodeId> {
        self.check_owned(wrt)?;
        self.check_owned(node)?;
        // A read names the same variable as its address.
        let wrt = match self.node(wrt).kind() {
            NodeKind::Read(addr) => *addr,
            _ => wrt,
        };
        if !self.node(wrt).is_address() {
            return Err(Error::NotAddress {
                action: "differentiate with respect to",
                node: self.describe(wrt),
            });
        }
        if let Some(&cached) = self.deriv_memo.get(&(wrt, node)) {
            return Ok(cached);
        }
        // Operands first, so every rule's recursive `deriv` is a memo hit.
        for id in self.operand_closure(node, Node::is_value_expr) {
            self.deriv_inner(wrt, id)?;
        }
        self.deriv_inner(wrt, node)
    }

    /// Derivative of one node. Called producers first, so the operand
    /// lookups below hit the memo.
    fn deriv_inner(&mut self, wrt: NodeId, node: NodeId) -> Result<NodeId> {
        if let Some(&cached) = self.deriv_memo.get(&(wrt, node)) {
            return Ok(cached);
        }
        let ty = self.ty(node);
        let result = match self.node(node).kind().clone() {
            NodeKind::Constant(_) => self.zero(&ty),
            NodeKind::VarRef { .. } => self.unit_if(node == wrt, node)?,
            NodeKind::Read(addr) => self.unit_if(addr == wrt, node)?,
            NodeKind::Write { .. } => {
                return Err(Error::NotDifferentiable {
                    node: self.describe(node),
                })
            }
            NodeKind::Expr { .. } if self.node(node).is_address() => self.unit_if(node == wrt, node)?,
            NodeKind::Expr { op, args } => match op {
                ExprOp::Op { name, overload } => {
                    let registry = Arc::clone(self.registry());
                    let rule = registry
                        .overload(&name, overload)
                        .and_then(|o| o.rules.deriv.as_ref());
                    match rule {
                        Some(rule) => rule(self, wrt, &args)?,
                        None => {
                            return Err(Error::NoDerivRule {
                                op: name,
                                arg_types: self.type_names(&args),
                            })
                        }
                    }
                }
                ExprOp::Member(field) => {
                    // d(v.f) = (dv).f
                    let d = self.deriv_inner(wrt, args[0])?;
                    self.member(d, &field)?
                }
                ExprOp::Index(i) => {
                    let d = self.deriv_inner(wrt, args[0])?;
                    self.index(d, i)?
                }
                ExprOp::Construct => {
                    let ds = args
                        .iter()
                        .map(|&a| self.deriv_inner(wrt, a))
                        .collect::<Result<Vec<_>>>()?;
                    self.construct(&ty, &ds)?
                }
            },
        };
        self.deriv_memo.insert((wrt, node), result);
        Ok(result)
    }

    /// One of `node`'s type if `hit`, else its zero.
    fn unit_if(&mut self, hit: bool, node: NodeId) -> Result<NodeId> {
        let ty = self.ty(node);
        if hit {
            self.one(&ty)
        } else {
            Ok(self.zero(&ty))
        }
    }

    pub(crate) fn type_names(&self, args: &[NodeId]) -> Vec<String> {
        args.iter()
            .map(|&a| self.node(a).ty().name().to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use symgen_types::{TypeRegistry, Value};

    use crate::{Context, Error, OpRules, Registry};

    fn ctx_with(reg: Registry) -> Context {
        let mut types = TypeRegistry::new();
        types
            .add_struct("Point", &[("x", "double"), ("y", "double")])
            .unwrap();
        let mut c = Context::new("f", Arc::new(reg), Arc::new(types));
        c.declare_args(&[], &[], &[("x", "double"), ("z", "double"), ("p", "Point")])
            .unwrap();
        c
    }

    fn ctx() -> Context {
        ctx_with(Registry::with_std_ops())
    }

    #[test]
    fn variable_and_constant() {
        let mut c = ctx();
        let x = c.arg("x").unwrap();
        let z = c.arg("z").unwrap();
        let rx = c.read(x).unwrap();
        let d = c.deriv(x, rx).unwrap();
        assert!(c.is_one(d));
        let rz = c.read(z).unwrap();
        let d = c.deriv(x, rz).unwrap();
        assert!(c.is_zero(d));
        let k = c.add(2.0, 3.0).unwrap();
        let d = c.deriv(x, k).unwrap();
        assert!(c.is_zero(d));
    }

    #[test]
    fn square_folds_to_six_at_three() {
        let mut c = ctx();
        let x = c.arg("x").unwrap();
        let sq = c.mul(x, x).unwrap();
        let d = c.deriv(x, sq).unwrap();
        let v = c.fold(d, &[("x", Value::Float(3.0))]).unwrap();
        assert_eq!(v, Value::Float(6.0));
    }

    #[test]
    fn chain_rule_through_sin() {
        let mut c = ctx();
        let x = c.arg("x").unwrap();
        let two_x = c.mul(2.0, x).unwrap();
        let s = c.call("sin", two_x).unwrap();
        let d = c.deriv(x, s).unwrap();
        let v = c.fold(d, &[("x", Value::Float(0.5))]).unwrap();
        let expected = 2.0 * (1.0f64).cos();
        assert!((v.as_f64().unwrap() - expected).abs() < 1e-12);
    }

    #[test]
    fn derivative_is_memoized() {
        let mut c = ctx();
        let x = c.arg("x").unwrap();
        let e = c.call("exp", x).unwrap();
        let d1 = c.deriv(x, e).unwrap();
        let n = c.len();
        let d2 = c.deriv(x, e).unwrap();
        assert_eq!(d1, d2);
        assert_eq!(c.len(), n);
    }

    #[test]
    fn member_of_constructed_value() {
        let mut c = ctx();
        let x = c.arg("x").unwrap();
        let z = c.arg("z").unwrap();
        let sq = c.mul(x, x).unwrap();
        let p = c.apply("Point", &[sq.into(), z.into()]).unwrap();
        let d = c.deriv(x, p).unwrap();
        let dx = c.member(d, "x").unwrap();
        let dy = c.member(d, "y").unwrap();
        assert!(c.is_zero(dy));
        let v = c.fold(dx, &[("x", Value::Float(4.0))]).unwrap();
        assert_eq!(v, Value::Float(8.0));
    }

    #[test]
    fn with_respect_to_member_address() {
        let mut c = ctx();
        let p = c.arg("p").unwrap();
        let px = c.member(p, "x").unwrap();
        let py = c.member(p, "y").unwrap();
        let prod = c.mul(px, py).unwrap();
        let d = c.deriv(px, prod).unwrap();
        assert_eq!(d, c.read(py).unwrap());
    }

    #[test]
    fn missing_rule_is_an_error() {
        let mut reg = Registry::with_std_ops();
        reg.defop(
            "double",
            "opaque_fn",
            &["double"],
            OpRules::new().render_all(|a| format!("opaque_fn({})", a[0])),
        );
        let mut c = ctx_with(reg);
        let x = c.arg("x").unwrap();
        let e = c.call("opaque_fn", x).unwrap();
        let err = c.deriv(x, e).unwrap_err();
        assert_eq!(
            err,
            Error::NoDerivRule {
                op: "opaque_fn".into(),
                arg_types: vec!["double".into()],
            }
        );
    }

    #[test]
    fn wrt_must_be_an_address() {
        let mut c = ctx();
        let x = c.arg("x").unwrap();
        let s = c.call("sin", x).unwrap();
        assert!(matches!(c.deriv(s, s), Err(Error::NotAddress { .. })));
    }
}
