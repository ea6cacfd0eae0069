//! Constant evaluation by substitution.
//!
//! Binding arguments to constants and rebuilding a node through the normal
//! construction path lets each operator's immediate rule fold the result.

use std::collections::HashMap;

use indexmap::IndexMap;
use symgen_types::Value;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::node::{Node, NodeId, NodeKind};

impl Context {
    /// Rebuild `node` with every read of a bound address replaced by its
    /// binding. Reads of members or elements of a bound address project
    /// from the binding.
    pub fn substitute(&mut self, node: NodeId, bindings: &HashMap<NodeId, NodeId>) -> Result<NodeId> {
        self.check_owned(node)?;
        let mut memo: HashMap<NodeId, NodeId> = HashMap::new();
        for id in self.operand_closure(node, Node::is_value_expr) {
            let result = match self.node(id).kind().clone() {
                NodeKind::Constant(_) | NodeKind::VarRef { .. } => id,
                NodeKind::Read(addr) => self.bound_value(addr, bindings)?.unwrap_or(id),
                NodeKind::Write { .. } => {
                    return Err(Error::NotConstant {
                        node: self.describe(id),
                    })
                }
                NodeKind::Expr { .. } if self.node(id).is_address() => id,
                NodeKind::Expr { op, args } => {
                    let new_args: Vec<NodeId> = args
                        .iter()
                        .map(|a| memo.get(a).copied().unwrap_or(*a))
                        .collect();
                    if new_args == args {
                        id
                    } else {
                        let ty = self.ty(id);
                        self.rebuild(&op, &ty, &new_args)?
                    }
                }
            };
            memo.insert(id, result);
        }
        Ok(memo.get(&node).copied().unwrap_or(node))
    }

    /// Value an address takes under `bindings`, walking up member and index
    /// chains to a bound ancestor.
    fn bound_value(&mut self, addr: NodeId, bindings: &HashMap<NodeId, NodeId>) -> Result<Option<NodeId>> {
        if let Some(&v) = bindings.get(&addr) {
            return Ok(Some(v));
        }
        match self.node(addr).kind().clone() {
            NodeKind::Expr { op, args } if op.is_address_producing() => {
                let Some(base) = self.bound_value(args[0], bindings)? else {
                    return Ok(None);
                };
                let ty = self.ty(addr);
                self.rebuild(&op, &ty, &[base]).map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Evaluate `node` with named arguments bound to constants.
    pub fn fold(&mut self, node: NodeId, env: &[(&str, Value)]) -> Result<Value> {
        let bindings = self.bind(env)?;
        let folded = self.substitute(node, &bindings)?;
        match self.node(folded).as_constant() {
            Some(v) => Ok(v.clone()),
            None => Err(Error::NotConstant {
                node: self.describe(folded),
            }),
        }
    }

    /// Evaluate every recorded write, keyed by the written address text
    /// (`y`, `p.x`, `v[2]`). A later write to the same address wins.
    pub fn fold_writes(&mut self, env: &[(&str, Value)]) -> Result<IndexMap<String, Value>> {
        let bindings = self.bind(env)?;
        let writes: Vec<NodeId> = self.writes().collect();
        let mut out = IndexMap::new();
        for w in writes {
            let NodeKind::Write { addr, value } = *self.node(w).kind() else {
                continue;
            };
            let folded = self.substitute(value, &bindings)?;
            let v = self
                .node(folded)
                .as_constant()
                .cloned()
                .ok_or_else(|| Error::NotConstant {
                    node: self.describe(folded),
                })?;
            out.insert(self.fmt_node(addr), v);
        }
        Ok(out)
    }

    fn bind(&mut self, env: &[(&str, Value)]) -> Result<HashMap<NodeId, NodeId>> {
        env.iter()
            .map(|(name, value)| {
                let addr = self.arg(name)?;
                let ty = self.ty(addr);
                Ok((addr, self.constant(&ty, value.clone())))
            })
            .collect()
    }
}
