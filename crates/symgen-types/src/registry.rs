//! A concrete, setup-time type table.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::TypeError;
use crate::ty::{ScalarKind, Type, TypeRef};

/// Lookup interface the compiler core consumes.
pub trait TypeSystem: Send + Sync {
    fn get_type(&self, name: &str) -> Option<TypeRef>;
}

/// Name → type table, populated once during setup.
///
/// [`TypeRegistry::new`] pre-populates the scalar builtins `double`,
/// `float`, `int` and `bool`.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: IndexMap<String, TypeRef>,
}

impl TypeRegistry {
    /// A registry holding the scalar builtins.
    pub fn new() -> Self {
        let mut reg = Self::empty();
        for (name, kind) in [
            ("double", ScalarKind::F64),
            ("float", ScalarKind::F32),
            ("int", ScalarKind::I32),
            ("bool", ScalarKind::Bool),
        ] {
            reg.types
                .insert(name.to_string(), Arc::new(Type::scalar(name, kind)));
        }
        reg
    }

    /// A registry with no types at all.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<TypeRef> {
        self.types.get(name).cloned()
    }

    /// Look up a type, failing with [`TypeError::Unknown`].
    pub fn require(&self, name: &str) -> Result<TypeRef, TypeError> {
        self.get(name)
            .ok_or_else(|| TypeError::Unknown(name.to_string()))
    }

    /// Add a fully built type.
    pub fn insert(&mut self, ty: Type) -> Result<TypeRef, TypeError> {
        if self.types.contains_key(ty.name()) {
            return Err(TypeError::Duplicate(ty.name().to_string()));
        }
        let ty = Arc::new(ty);
        self.types.insert(ty.name().to_string(), Arc::clone(&ty));
        Ok(ty)
    }

    /// Define a struct whose field types are given by name.
    pub fn add_struct(&mut self, name: &str, fields: &[(&str, &str)]) -> Result<TypeRef, TypeError> {
        let fields = self.resolve_fields(fields)?;
        self.insert(Type::structure(name, fields, None))
    }

    /// Define a struct that lazily grows fields of type `default_field` on
    /// first access.
    pub fn add_auto_struct(
        &mut self,
        name: &str,
        fields: &[(&str, &str)],
        default_field: &str,
    ) -> Result<TypeRef, TypeError> {
        let fields = self.resolve_fields(fields)?;
        let default = self.require(default_field)?;
        self.insert(Type::structure(name, fields, Some(default)))
    }

    /// Define a template instance, e.g. `vec3 = vec<double, 3>`.
    pub fn add_template(
        &mut self,
        name: &str,
        template: &str,
        args: &[&str],
        len: Option<usize>,
    ) -> Result<TypeRef, TypeError> {
        let args = args
            .iter()
            .map(|a| self.require(a))
            .collect::<Result<Vec<_>, _>>()?;
        self.insert(Type::template(name, template, args, len))
    }

    pub fn iter(&self) -> impl Iterator<Item = &TypeRef> {
        self.types.values()
    }

    fn resolve_fields(&self, fields: &[(&str, &str)]) -> Result<Vec<(String, TypeRef)>, TypeError> {
        fields
            .iter()
            .map(|(field, ty)| Ok((field.to_string(), self.require(ty)?)))
            .collect()
    }
}

impl TypeSystem for TypeRegistry {
    fn get_type(&self, name: &str) -> Option<TypeRef> {
        self.get(name)
    }
}
