//! Error type for graph construction, differentiation and emission.

use symgen_types::{Lang, TypeError};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("no overload of `{op}` accepts ({})", .arg_types.join(", "))]
    NoOverload { op: String, arg_types: Vec<String> },

    #[error("`{op}` takes {expected} argument(s), got {got}")]
    Arity {
        op: String,
        expected: usize,
        got: usize,
    },

    #[error("undeclared variable `{0}`")]
    Undeclared(String),

    #[error("argument `{0}` declared twice")]
    DuplicateArg(String),

    #[error("node {node} belongs to a different context")]
    ForeignNode { node: String },

    #[error("cannot {action} non-address node {node}")]
    NotAddress { action: &'static str, node: String },

    #[error("cannot write to input argument `{0}`")]
    WriteToInput(String),

    #[error("cannot store a `{found}` value into `{expected}` address {node}")]
    WriteTypeMismatch {
        expected: String,
        found: String,
        node: String,
    },

    #[error("constructor `{ty}` expects {expected} argument(s), got {got}")]
    ConstructorArity {
        ty: String,
        expected: usize,
        got: usize,
    },

    #[error("type `{0}` has no multiplicative unit")]
    NoUnit(String),

    #[error("operator `{op}` has no derivative rule for ({})", .arg_types.join(", "))]
    NoDerivRule { op: String, arg_types: Vec<String> },

    #[error("operator `{op}` has no gradient rule for ({})", .arg_types.join(", "))]
    NoGradientRule { op: String, arg_types: Vec<String> },

    #[error("cannot differentiate {node}")]
    NotDifferentiable { node: String },

    #[error("gradient of {node} was already finalized")]
    GradientFinalized { node: String },

    #[error("operator `{op}` has no render rule for {lang}")]
    NoRender { op: String, lang: Lang },

    #[error("rewriting `{op}` exceeded {limit} nested replacements")]
    RewriteLimit { op: String, limit: usize },

    #[error("{node} does not fold to a constant")]
    NotConstant { node: String },

    #[error(transparent)]
    Type(#[from] TypeError),
}
