//! Operator registry: named overloads with per-language render rules and
//! calculus hooks.
//!
//! A registry is built once during setup and then shared read-only by any
//! number of contexts through an `Arc<Registry>`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use symgen_types::{Lang, Value};

use crate::adjoint::Backprop;
use crate::context::Context;
use crate::error::Result;
use crate::node::NodeId;

/// Renders an application given the already-rendered operand text.
pub type RenderFn = Arc<dyn Fn(&[String]) -> String + Send + Sync>;
/// Forward derivative: `(ctx, wrt, args) -> d(op(args))/d(wrt)`.
pub type DerivFn = Arc<dyn Fn(&mut Context, NodeId, &[NodeId]) -> Result<NodeId> + Send + Sync>;
/// Reverse rule: push per-argument contributions of the upstream total `g`.
pub type GradientFn =
    Arc<dyn Fn(&mut Context, &mut Backprop, NodeId, &[NodeId]) -> Result<()> + Send + Sync>;
/// Algebraic rewrite applied before interning. `None` keeps the node.
pub type ReplaceFn = Arc<dyn Fn(&mut Context, &[NodeId]) -> Result<Option<NodeId>> + Send + Sync>;
/// Structural zero or unit test over the operands.
pub type PredicateFn = Arc<dyn Fn(&Context, &[NodeId]) -> bool + Send + Sync>;
/// Immediate evaluation over constant operands.
pub type ImmFn = Arc<dyn Fn(&[Value]) -> Option<Value> + Send + Sync>;

/// Hooks attached to one overload. Built with chained setters:
///
/// ```
/// use symgen::OpRules;
///
/// let rules = OpRules::new()
///     .render_all(|a| format!("({} + {})", a[0], a[1]))
///     .imm(|v| Some((v[0].as_f64()? + v[1].as_f64()?).into()));
/// assert_eq!(rules.render.len(), 3);
/// ```
#[derive(Clone, Default)]
pub struct OpRules {
    pub render: HashMap<Lang, RenderFn>,
    pub deriv: Option<DerivFn>,
    pub gradient: Option<GradientFn>,
    pub replace: Option<ReplaceFn>,
    pub is_zero: Option<PredicateFn>,
    pub is_one: Option<PredicateFn>,
    pub imm: Option<ImmFn>,
}

impl OpRules {
    /// No hooks at all.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rendering for one language, from the operands' texts.
    pub fn render(mut self, lang: Lang, f: impl Fn(&[String]) -> String + Send + Sync + 'static) -> Self {
        self.render.insert(lang, Arc::new(f));
        self
    }

    /// Same rendering in every language.
    pub fn render_all(mut self, f: impl Fn(&[String]) -> String + Send + Sync + 'static) -> Self {
        let f: RenderFn = Arc::new(f);
        for lang in Lang::ALL {
            self.render.insert(lang, Arc::clone(&f));
        }
        self
    }

    /// Forward derivative rule.
    pub fn deriv(
        mut self,
        f: impl Fn(&mut Context, NodeId, &[NodeId]) -> Result<NodeId> + Send + Sync + 'static,
    ) -> Self {
        self.deriv = Some(Arc::new(f));
        self
    }

    /// Reverse rule. Omitting it makes the operator non-differentiable
    /// in reverse.
    pub fn gradient(
        mut self,
        f: impl Fn(&mut Context, &mut Backprop, NodeId, &[NodeId]) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.gradient = Some(Arc::new(f));
        self
    }

    /// Rewrite tried before interning.
    pub fn replace(
        mut self,
        f: impl Fn(&mut Context, &[NodeId]) -> Result<Option<NodeId>> + Send + Sync + 'static,
    ) -> Self {
        self.replace = Some(Arc::new(f));
        self
    }

    pub fn is_zero(mut self, f: impl Fn(&Context, &[NodeId]) -> bool + Send + Sync + 'static) -> Self {
        self.is_zero = Some(Arc::new(f));
        self
    }

    pub fn is_one(mut self, f: impl Fn(&Context, &[NodeId]) -> bool + Send + Sync + 'static) -> Self {
        self.is_one = Some(Arc::new(f));
        self
    }

    /// Constant folding.
    pub fn imm(mut self, f: impl Fn(&[Value]) -> Option<Value> + Send + Sync + 'static) -> Self {
        self.imm = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for OpRules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut langs: Vec<Lang> = self.render.keys().copied().collect();
        langs.sort();
        f.debug_struct("OpRules")
            .field("render", &langs)
            .field("deriv", &self.deriv.is_some())
            .field("gradient", &self.gradient.is_some())
            .field("replace", &self.replace.is_some())
            .field("imm", &self.imm.is_some())
            .finish_non_exhaustive()
    }
}

/// One positional argument pattern.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArgPattern {
    /// Matches exactly this type name.
    Exact(String),
    /// `ANY`: matches one argument of any type.
    Any,
    /// `...`: matches all remaining arguments, including none.
    Variadic,
}

impl ArgPattern {
    /// `ANY`, `...`, or a type name.
    pub fn parse(s: &str) -> Self {
        match s {
            "ANY" => ArgPattern::Any,
            "..." => ArgPattern::Variadic,
            ty => ArgPattern::Exact(ty.to_string()),
        }
    }
}

/// Declared result type of an overload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RetType {
    Named(String),
    /// `$N`: the type of argument `N`.
    SameAs(usize),
}

impl RetType {
    /// `$N`, or a type name.
    pub fn parse(s: &str) -> Self {
        match s.strip_prefix('$').and_then(|n| n.parse().ok()) {
            Some(i) => RetType::SameAs(i),
            None => RetType::Named(s.to_string()),
        }
    }
}

/// A registered signature with its rules.
#[derive(Clone, Debug)]
pub struct Overload {
    pub name: String,
    pub ret: RetType,
    pub args: Vec<ArgPattern>,
    pub rules: OpRules,
}

impl Overload {
    /// Whether this overload accepts arguments of the given type names.
    pub fn matches(&self, arg_types: &[&str]) -> bool {
        let mut i = 0;
        for pat in &self.args {
            match pat {
                ArgPattern::Variadic => return true,
                ArgPattern::Any if i < arg_types.len() => {}
                ArgPattern::Exact(ty) if i < arg_types.len() && arg_types[i] == ty => {}
                _ => return false,
            }
            i += 1;
        }
        i == arg_types.len()
    }
}

/// Operator name → ordered overload list.
#[derive(Default)]
pub struct Registry {
    ops: HashMap<String, Vec<Overload>>,
}

impl Registry {
    /// An empty registry. See [`Registry::with_std_ops`] for the built-in
    /// scalar operators.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one overload. Resolution is first-match-wins in
    /// registration order, so overlapping patterns shadow later ones.
    pub fn defop(&mut self, ret: &str, name: &str, args: &[&str], rules: OpRules) -> &mut Self {
        let overload = Overload {
            name: name.to_string(),
            ret: RetType::parse(ret),
            args: args.iter().map(|a| ArgPattern::parse(a)).collect(),
            rules,
        };
        self.ops.entry(name.to_string()).or_default().push(overload);
        self
    }

    /// First overload of `name` accepting `arg_types`, with its position.
    pub fn resolve(&self, name: &str, arg_types: &[&str]) -> Option<(usize, &Overload)> {
        self.ops
            .get(name)?
            .iter()
            .enumerate()
            .find(|(_, o)| o.matches(arg_types))
    }

    /// Overload `index` of `name`, as returned by [`Registry::resolve`].
    pub fn overload(&self, name: &str, index: usize) -> Option<&Overload> {
        self.ops.get(name)?.get(index)
    }

    /// All overloads of `name`, in registration order.
    pub fn overloads(&self, name: &str) -> &[Overload] {
        self.ops.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether any overload of `name` exists.
    pub fn contains(&self, name: &str) -> bool {
        self.ops.contains_key(name)
    }

    /// Total number of registered overloads.
    pub fn len(&self) -> usize {
        self.ops.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.ops.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("Registry")
            .field("ops", &names)
            .field("overloads", &self.len())
            .finish()
    }
}
