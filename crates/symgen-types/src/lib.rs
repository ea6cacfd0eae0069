//! symgen-types: type objects for the symgen compiler.
//!
//! The compiler core treats types as external collaborators: opaque
//! handles with a canonical name, optional struct fields or template
//! arguments, and a per-language literal formatter. This crate supplies
//! those handles and a simple [`TypeRegistry`] to hold them.
//!
//! ```
//! use symgen_types::{Lang, TypeRegistry, Value};
//!
//! let mut types = TypeRegistry::new();
//! let point = types.add_struct("Point", &[("x", "double"), ("y", "double")]).unwrap();
//! let origin = point.literal(Lang::Cpp, &Value::Zero).unwrap();
//! assert_eq!(origin, "Point{}");
//! ```

mod error;
mod lang;
mod registry;
mod ty;
mod value;

pub use error::TypeError;
pub use lang::Lang;
pub use registry::{TypeRegistry, TypeSystem};
pub use ty::{ScalarKind, StructInfo, TemplateInfo, Type, TypeKind, TypeRef};
pub use value::Value;
