//! Source emission for C, C++ and JavaScript.
//!
//! Statements come out in dependency order. An expression consumed more
//! than once is hoisted into a named temporary the first time it is needed;
//! everything else is inlined at its single use.
//!
//! Rendering is one pass over the producers-first order, so graph depth
//! never turns into call depth.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use symgen_types::{Lang, ScalarKind, TypeKind, TypeRef};
use tracing::debug;

use crate::context::Context;
use crate::deps::Deps;
use crate::error::{Error, Result};
use crate::node::{Direction, ExprOp, NodeId, NodeKind};

/// One generated function in one language.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmittedFunction {
    pub name: String,
    pub lang: Lang,
    /// Function header without the body, e.g. `void f(double *y, double x)`.
    pub signature: String,
    /// `signature;` for languages that need a prototype.
    pub forward_decl: Option<String>,
    /// Statements, in execution order, without indentation.
    pub body: Vec<String>,
    /// Every type the function mentions, transitively, sorted by name.
    pub types: Vec<String>,
    pub indent: String,
}

impl EmittedFunction {
    /// Complete function text.
    pub fn source(&self) -> String {
        let mut out = String::with_capacity(64 + self.body.iter().map(|s| s.len() + 8).sum::<usize>());
        out.push_str(&self.signature);
        out.push_str(" {\n");
        for stmt in &self.body {
            out.push_str(&self.indent);
            out.push_str(stmt);
            out.push('\n');
        }
        out.push_str("}\n");
        out
    }
}

impl Context {
    /// Emit this context as a function named after it.
    pub fn emit(&self, lang: Lang) -> Result<EmittedFunction> {
        Emitter::new(self, lang).run()
    }

    /// Emit in every supported language.
    pub fn emit_all(&self) -> Result<Vec<EmittedFunction>> {
        Lang::ALL.iter().map(|&lang| self.emit(lang)).collect()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    Write,
}

struct Emitter<'a> {
    ctx: &'a Context,
    lang: Lang,
    deps: Deps,
    temps: HashMap<NodeId, String>,
    /// Rendered single-use expressions not yet taken by their consumer.
    pending: HashMap<NodeId, String>,
    body: Vec<String>,
}

impl<'a> Emitter<'a> {
    fn new(ctx: &'a Context, lang: Lang) -> Self {
        Self {
            ctx,
            lang,
            deps: Deps::build(ctx),
            temps: HashMap::new(),
            pending: HashMap::new(),
            body: Vec::new(),
        }
    }

    fn run(mut self) -> Result<EmittedFunction> {
        let ctx = self.ctx;
        let lang = self.lang;
        let signature = self.signature();
        self.body.extend(ctx.pre_code(lang).iter().cloned());

        if lang == Lang::Js {
            for (name, id, dir) in ctx.args() {
                let var = match dir {
                    Direction::Out => name.to_string(),
                    Direction::Update => format!("{name}{}", ctx.options().next_suffix),
                    Direction::In => continue,
                };
                let zero = ctx.node(id).ty().literal(lang, &symgen_types::Value::Zero)?;
                self.body.push(format!("let {var} = {zero};"));
            }
        }

        let order = self.deps.in_order.clone();
        for id in order {
            let node = ctx.node(id);
            match node.kind() {
                NodeKind::Write { addr, value } => {
                    let lhs = self.address(*addr, Access::Write)?;
                    let rhs = self.take(*value)?;
                    self.body.push(format!("{lhs} = {rhs};"));
                }
                NodeKind::Expr { .. } if !node.is_address() => {
                    let text = self.render(id)?;
                    if self.deps.ref_count(id) > 1 {
                        let name = format!("{}{}", ctx.options().temp_prefix, id.index());
                        let decl = match lang {
                            Lang::C | Lang::Cpp => format!("const {} {name} = {text};", node.ty()),
                            Lang::Js => format!("const {name} = {text};"),
                        };
                        self.body.push(decl);
                        self.temps.insert(id, name);
                    } else {
                        self.pending.insert(id, text);
                    }
                }
                _ => {}
            }
        }

        self.body.extend(ctx.post_code(lang).iter().cloned());

        if lang == Lang::Js {
            let returned: Vec<String> = ctx
                .args()
                .filter_map(|(name, _, dir)| match dir {
                    Direction::Out => Some(name.to_string()),
                    Direction::Update => Some(format!("{name}{}", ctx.options().next_suffix)),
                    Direction::In => None,
                })
                .collect();
            if returned.is_empty() {
                self.body.push("return {};".to_string());
            } else {
                self.body.push(format!("return {{ {} }};", returned.join(", ")));
            }
        }

        let mut referenced = BTreeMap::new();
        for (_, id, _) in ctx.args() {
            ctx.node(id).ty().collect_referenced(&mut referenced);
        }
        for &id in self.deps.fwd.keys() {
            ctx.node(id).ty().collect_referenced(&mut referenced);
        }

        debug!(
            function = ctx.name(),
            %lang,
            statements = self.body.len(),
            temps = self.temps.len(),
            "emitted function"
        );
        Ok(EmittedFunction {
            name: ctx.name().to_string(),
            lang,
            forward_decl: lang.is_statically_declared().then(|| format!("{signature};")),
            signature,
            body: self.body,
            types: referenced.into_keys().collect(),
            indent: ctx.options().indent.clone(),
        })
    }

    fn signature(&self) -> String {
        let ctx = self.ctx;
        let opts = ctx.options();
        let mut params = Vec::new();
        let mut js_updates = Vec::new();
        for (name, id, dir) in ctx.args() {
            let ty = ctx.node(id).ty();
            let prev = format!("{name}{}", opts.prev_suffix);
            let next = format!("{name}{}", opts.next_suffix);
            match (self.lang, dir) {
                (Lang::C, Direction::Out) => params.push(format!("{ty} *{name}")),
                (Lang::C, Direction::Update) => {
                    params.push(format!("{ty} {prev}"));
                    params.push(format!("{ty} *{next}"));
                }
                (Lang::C, Direction::In) => params.push(format!("{ty} {name}")),
                (Lang::Cpp, Direction::Out) => params.push(format!("{ty} &{name}")),
                (Lang::Cpp, Direction::Update) => {
                    params.push(format!("{ty} const &{prev}"));
                    params.push(format!("{ty} &{next}"));
                }
                (Lang::Cpp, Direction::In) => params.push(format!("{ty} const &{name}")),
                (Lang::Js, Direction::Out) => {}
                (Lang::Js, Direction::Update) => js_updates.push(prev),
                (Lang::Js, Direction::In) => params.push(name.to_string()),
            }
        }
        params.extend(js_updates);
        match self.lang {
            Lang::Js => format!("function {}({})", ctx.name(), params.join(", ")),
            Lang::C | Lang::Cpp => format!("void {}({})", ctx.name(), params.join(", ")),
        }
    }

    /// Expression text of an operand. Single-use expressions are handed
    /// over, not copied.
    fn take(&mut self, id: NodeId) -> Result<String> {
        if let Some(t) = self.temps.get(&id) {
            return Ok(t.clone());
        }
        if let Some(text) = self.pending.remove(&id) {
            return Ok(text);
        }
        let ctx = self.ctx;
        let node = ctx.node(id);
        match node.kind() {
            NodeKind::Constant(v) => Ok(node.ty().literal(self.lang, v)?),
            NodeKind::VarRef { .. } => self.address(id, Access::Read),
            NodeKind::Read(addr) => self.address(*addr, Access::Read),
            NodeKind::Write { addr, .. } => self.address(*addr, Access::Write),
            NodeKind::Expr { .. } if node.is_address() => self.address(id, Access::Read),
            NodeKind::Expr { .. } => self.render(id),
        }
    }

    /// Text of a value expression from its operands' texts.
    fn render(&mut self, id: NodeId) -> Result<String> {
        let ctx = self.ctx;
        let node = ctx.node(id);
        let NodeKind::Expr { op, args } = node.kind() else {
            return self.take(id);
        };
        let parts = args
            .iter()
            .map(|&a| self.take(a))
            .collect::<Result<Vec<_>>>()?;
        match op {
            ExprOp::Op { name, overload } => {
                let render = ctx
                    .registry()
                    .overload(name, *overload)
                    .and_then(|o| o.rules.render.get(&self.lang))
                    .ok_or_else(|| Error::NoRender {
                        op: name.clone(),
                        lang: self.lang,
                    })?;
                Ok(render(&parts))
            }
            ExprOp::Member(field) => Ok(format!("{}.{field}", parts[0])),
            ExprOp::Index(i) => Ok(format!("{}[{i}]", parts[0])),
            ExprOp::Construct => Ok(self.construct(node.ty(), &parts)),
        }
    }

    fn construct(&self, ty: &TypeRef, parts: &[String]) -> String {
        let list = parts.join(", ");
        match (ty.kind(), self.lang) {
            (TypeKind::Scalar(kind), Lang::Js) => match kind {
                ScalarKind::I32 => format!("Math.trunc({list})"),
                ScalarKind::Bool => format!("Boolean({list})"),
                ScalarKind::F64 | ScalarKind::F32 => format!("Number({list})"),
            },
            (TypeKind::Scalar(_), Lang::C) => format!("(({ty})({list}))"),
            (TypeKind::Scalar(_), Lang::Cpp) => format!("{ty}({list})"),
            (TypeKind::Struct(_), Lang::Js) => {
                let fields: Vec<String> = ty
                    .fields()
                    .iter()
                    .zip(parts)
                    .map(|((name, _), v)| format!("{name}: {v}"))
                    .collect();
                format!("{{{}}}", fields.join(", "))
            }
            (TypeKind::Template(_), Lang::Js) => format!("[{list}]"),
            (TypeKind::Opaque, Lang::Js) => format!("new {ty}({list})"),
            (TypeKind::Opaque, _) => format!("{ty}({list})"),
            (_, Lang::C) => format!("({ty}){{{list}}}"),
            (_, Lang::Cpp) => format!("{ty}{{{list}}}"),
        }
    }

    fn address(&self, id: NodeId, access: Access) -> Result<String> {
        let (text, pointer) = self.address_parts(id, access)?;
        Ok(if pointer { format!("*{text}") } else { text })
    }

    /// Text of an address and whether that text is a pointer.
    fn address_parts(&self, id: NodeId, access: Access) -> Result<(String, bool)> {
        let ctx = self.ctx;
        match ctx.node(id).kind() {
            NodeKind::VarRef { name, dir } => Ok(self.var(name, *dir, access)),
            NodeKind::Expr {
                op: ExprOp::Member(field),
                args,
            } => {
                let (base, pointer) = self.address_parts(args[0], access)?;
                let text = if pointer {
                    format!("{base}->{field}")
                } else {
                    format!("{base}.{field}")
                };
                Ok((text, false))
            }
            NodeKind::Expr {
                op: ExprOp::Index(i),
                args,
            } => {
                let (base, pointer) = self.address_parts(args[0], access)?;
                let text = if pointer {
                    format!("(*{base})[{i}]")
                } else {
                    format!("{base}[{i}]")
                };
                Ok((text, false))
            }
            _ => Err(Error::NotAddress {
                action: "emit",
                node: ctx.describe(id),
            }),
        }
    }

    fn var(&self, name: &str, dir: Direction, access: Access) -> (String, bool) {
        let opts = self.ctx.options();
        let by_pointer = self.lang == Lang::C;
        match (dir, access) {
            (Direction::In, _) => (name.to_string(), false),
            (Direction::Out, _) => (name.to_string(), by_pointer),
            (Direction::Update, Access::Read) => (format!("{name}{}", opts.prev_suffix), false),
            (Direction::Update, Access::Write) => (format!("{name}{}", opts.next_suffix), by_pointer),
        }
    }
}
