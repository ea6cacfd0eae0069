//! Pretty-printing for nodes.

use symgen_types::Value;

use crate::context::Context;
use crate::node::{ExprOp, NodeId, NodeKind};

enum Piece {
    Node(NodeId),
    Text(String),
}

impl Context {
    /// Format a node as a human-readable expression.
    pub fn fmt_node(&self, id: NodeId) -> String {
        let mut out = String::new();
        let mut stack = vec![Piece::Node(id)];
        while let Some(piece) = stack.pop() {
            let id = match piece {
                Piece::Text(text) => {
                    out.push_str(&text);
                    continue;
                }
                Piece::Node(id) => id,
            };
            let seq = match self.node(id).kind() {
                NodeKind::Constant(v) => {
                    out.push_str(&fmt_value(v));
                    continue;
                }
                NodeKind::VarRef { name, .. } => {
                    out.push_str(name);
                    continue;
                }
                NodeKind::Read(addr) => vec![Piece::Node(*addr)],
                NodeKind::Write { addr, value } => vec![
                    Piece::Node(*addr),
                    Piece::Text(" = ".to_string()),
                    Piece::Node(*value),
                ],
                NodeKind::Expr { op, args } => match op {
                    ExprOp::Member(field) => vec![Piece::Node(args[0]), Piece::Text(format!(".{field}"))],
                    ExprOp::Index(i) => vec![Piece::Node(args[0]), Piece::Text(format!("[{i}]"))],
                    ExprOp::Construct => call(format!("{}(", self.node(id).ty()), args),
                    ExprOp::Op { name, .. } => {
                        let symbolic = !name.starts_with(|c: char| c.is_alphanumeric() || c == '_');
                        match args.as_slice() {
                            [a] if symbolic => vec![
                                Piece::Text(format!("({name}")),
                                Piece::Node(*a),
                                Piece::Text(")".to_string()),
                            ],
                            [a, b] if symbolic => vec![
                                Piece::Text("(".to_string()),
                                Piece::Node(*a),
                                Piece::Text(format!(" {name} ")),
                                Piece::Node(*b),
                                Piece::Text(")".to_string()),
                            ],
                            _ => call(format!("{name}("), args),
                        }
                    }
                },
            };
            stack.extend(seq.into_iter().rev());
        }
        out
    }
}

/// `head` followed by comma-separated `args` and a closing parenthesis.
fn call(head: String, args: &[NodeId]) -> Vec<Piece> {
    let mut seq = vec![Piece::Text(head)];
    for (i, &a) in args.iter().enumerate() {
        if i > 0 {
            seq.push(Piece::Text(", ".to_string()));
        }
        seq.push(Piece::Node(a));
    }
    seq.push(Piece::Text(")".to_string()));
    seq
}

fn fmt_value(v: &Value) -> String {
    match v {
        Value::Float(x) => {
            if x.fract() == 0.0 && x.abs() < 1e15 {
                format!("{}", *x as i64)
            } else {
                format!("{x}")
            }
        }
        Value::Int(i) => i.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Zero => "0".to_string(),
        Value::Tuple(items) => {
            let parts: Vec<String> = items.iter().map(fmt_value).collect();
            format!("({})", parts.join(", "))
        }
    }
}
