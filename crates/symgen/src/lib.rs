//! symgen: symbolic expression compiler with forward and reverse derivatives.
//!
//! A [`Context`] holds one function under construction as an interned IR
//! DAG. Operators come from a shared [`Registry`] whose overloads carry the
//! per-language renders and calculus rules. From a finished context you can
//! differentiate any node ([`Context::deriv`]), synthesize the reverse-mode
//! gradient function ([`adjoint_of`]), and emit C, C++ or JavaScript source
//! ([`Context::emit`]).
//!
//! # Quick start
//!
//! ```
//! use std::sync::Arc;
//!
//! use symgen::{adjoint_of, Context, Lang, Registry, TypeRegistry, Value};
//!
//! let mut f = Context::new(
//!     "square",
//!     Arc::new(Registry::with_std_ops()),
//!     Arc::new(TypeRegistry::new()),
//! );
//! f.declare_args(&[("y", "double")], &[], &[("x", "double")])?;
//! let (x, y) = (f.arg("x")?, f.arg("y")?);
//! let sq = f.mul(x, x)?;
//! f.write(y, sq)?;
//!
//! // dy/dx at x = 3
//! let d = f.deriv(x, sq)?;
//! assert_eq!(f.fold(d, &[("x", Value::Float(3.0))])?, Value::Float(6.0));
//!
//! // The gradient function takes yGrad and writes xGrad.
//! let mut grad = adjoint_of(&f, &[])?;
//! let out = grad.fold_writes(&[("x", Value::Float(3.0)), ("yGrad", Value::Float(1.0))])?;
//! assert_eq!(out["xGrad"], Value::Float(6.0));
//!
//! let src = f.emit(Lang::C)?.source();
//! assert!(src.starts_with("void square(double *y, double x) {"));
//! # Ok::<(), symgen::Error>(())
//! ```

pub mod adjoint;
pub mod context;
pub mod deps;
mod diff;
mod display;
pub mod emit;
pub mod error;
mod eval;
pub mod node;
pub mod options;
pub mod registry;
pub mod stdops;

pub use adjoint::{adjoint_of, Backprop};
pub use context::{Context, Operand};
pub use deps::Deps;
pub use emit::EmittedFunction;
pub use error::{Error, Result};
pub use node::{ContentKey, ContextId, Direction, ExprOp, Node, NodeId, NodeKind};
pub use options::ContextOptions;
pub use registry::{ArgPattern, OpRules, Overload, Registry, RetType};
pub use stdops::register_std_ops;

pub use symgen_types::{self as types, Lang, Type, TypeKind, TypeRef, TypeRegistry, TypeSystem, Value};
