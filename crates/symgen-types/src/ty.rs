//! Type objects: scalars, structs, templates.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use indexmap::IndexMap;

use crate::error::TypeError;
use crate::lang::Lang;
use crate::value::Value;

/// Shared handle to a type. Types compare by canonical name.
pub type TypeRef = Arc<Type>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    F64,
    F32,
    I32,
    Bool,
}

/// Named fields of a struct-like type.
///
/// Auto-extensible structs grow a field on first access to an unknown
/// name. That mutation is expected during single-threaded setup only.
#[derive(Debug)]
pub struct StructInfo {
    fields: RwLock<IndexMap<String, TypeRef>>,
    auto_extend: Option<TypeRef>,
}

#[derive(Debug)]
pub struct TemplateInfo {
    pub template: String,
    pub args: Vec<TypeRef>,
    /// Fixed element count, if the template has one.
    pub len: Option<usize>,
}

#[derive(Debug)]
pub enum TypeKind {
    Scalar(ScalarKind),
    Struct(StructInfo),
    Template(TemplateInfo),
    Opaque,
}

#[derive(Debug)]
pub struct Type {
    name: String,
    kind: TypeKind,
}

impl Type {
    pub fn scalar(name: impl Into<String>, kind: ScalarKind) -> Self {
        Self {
            name: name.into(),
            kind: TypeKind::Scalar(kind),
        }
    }

    /// A struct with fixed fields. Pass `auto_extend` to let unknown fields
    /// be added lazily with that type.
    pub fn structure(
        name: impl Into<String>,
        fields: impl IntoIterator<Item = (String, TypeRef)>,
        auto_extend: Option<TypeRef>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: TypeKind::Struct(StructInfo {
                fields: RwLock::new(fields.into_iter().collect()),
                auto_extend,
            }),
        }
    }

    pub fn template(
        name: impl Into<String>,
        template: impl Into<String>,
        args: Vec<TypeRef>,
        len: Option<usize>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: TypeKind::Template(TemplateInfo {
                template: template.into(),
                args,
                len,
            }),
        }
    }

    pub fn opaque(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: TypeKind::Opaque,
        }
    }

    /// Canonical name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn kind(&self) -> &TypeKind {
        &self.kind
    }

    pub fn scalar_kind(&self) -> Option<ScalarKind> {
        match self.kind {
            TypeKind::Scalar(k) => Some(k),
            _ => None,
        }
    }

    /// `double` or `float`.
    pub fn is_float(&self) -> bool {
        matches!(self.scalar_kind(), Some(ScalarKind::F64 | ScalarKind::F32))
    }

    pub fn is_struct(&self) -> bool {
        matches!(self.kind, TypeKind::Struct(_))
    }

    pub fn is_auto_extend(&self) -> bool {
        matches!(&self.kind, TypeKind::Struct(s) if s.auto_extend.is_some())
    }

    /// Snapshot of the struct's fields, in declaration order. Empty for
    /// non-struct types.
    pub fn fields(&self) -> Vec<(String, TypeRef)> {
        match &self.kind {
            TypeKind::Struct(s) => s
                .fields
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .map(|(k, v)| (k.clone(), Arc::clone(v)))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Position and type of a field.
    pub fn field(&self, name: &str) -> Option<(usize, TypeRef)> {
        match &self.kind {
            TypeKind::Struct(s) => {
                let fields = s.fields.read().unwrap_or_else(PoisonError::into_inner);
                fields
                    .get_full(name)
                    .map(|(i, _, ty)| (i, Arc::clone(ty)))
            }
            _ => None,
        }
    }

    /// Resolve a member, adding it if the struct is auto-extensible.
    pub fn member(&self, name: &str) -> Result<(usize, TypeRef), TypeError> {
        if let Some(found) = self.field(name) {
            return Ok(found);
        }
        match &self.kind {
            TypeKind::Struct(StructInfo {
                fields,
                auto_extend: Some(default),
            }) => {
                let mut fields = fields.write().unwrap_or_else(PoisonError::into_inner);
                let (i, _) = fields.insert_full(name.to_string(), Arc::clone(default));
                tracing::debug!(ty = %self.name, field = name, "auto-extended struct");
                Ok((i, Arc::clone(default)))
            }
            _ => Err(TypeError::NoMember {
                ty: self.name.clone(),
                field: name.to_string(),
            }),
        }
    }

    /// Element type at `index` for template-like types.
    pub fn element(&self, index: usize) -> Result<TypeRef, TypeError> {
        match &self.kind {
            TypeKind::Template(t) => {
                if let Some(len) = t.len {
                    if index >= len {
                        return Err(TypeError::IndexOutOfBounds {
                            ty: self.name.clone(),
                            index,
                            len,
                        });
                    }
                }
                t.args.first().cloned().ok_or_else(|| TypeError::NotIndexable {
                    ty: self.name.clone(),
                })
            }
            _ => Err(TypeError::NotIndexable {
                ty: self.name.clone(),
            }),
        }
    }

    /// Number of slots of an aggregate: field count, or fixed template length.
    pub fn arity(&self) -> Option<usize> {
        match &self.kind {
            TypeKind::Struct(_) => Some(self.fields().len()),
            TypeKind::Template(t) => t.len,
            TypeKind::Scalar(_) => Some(1),
            TypeKind::Opaque => None,
        }
    }

    /// This type and every type reachable through fields or template
    /// arguments, keyed by name.
    pub fn collect_referenced(self: &Arc<Self>, out: &mut BTreeMap<String, TypeRef>) {
        if out.contains_key(&self.name) {
            return;
        }
        out.insert(self.name.clone(), Arc::clone(self));
        match &self.kind {
            TypeKind::Struct(_) => {
                for (_, ty) in self.fields() {
                    ty.collect_referenced(out);
                }
            }
            TypeKind::Template(t) => {
                for ty in &t.args {
                    ty.collect_referenced(out);
                }
            }
            TypeKind::Scalar(_) | TypeKind::Opaque => {}
        }
    }

    /// Format `value` as a source literal of this type.
    pub fn literal(&self, lang: Lang, value: &Value) -> Result<String, TypeError> {
        let mismatch = || TypeError::LiteralMismatch {
            ty: self.name.clone(),
            value: format!("{value:?}"),
        };
        match &self.kind {
            TypeKind::Scalar(k) => scalar_literal(*k, lang, value).ok_or_else(mismatch),
            TypeKind::Struct(_) => {
                let fields = self.fields();
                let items: Vec<String> = match value {
                    Value::Zero => {
                        if lang != Lang::Js {
                            return Ok(self.zero_aggregate(lang));
                        }
                        fields
                            .iter()
                            .map(|(_, ty)| ty.literal(lang, &Value::Zero))
                            .collect::<Result<_, _>>()?
                    }
                    Value::Tuple(items) if items.len() == fields.len() => fields
                        .iter()
                        .zip(items)
                        .map(|((_, ty), v)| ty.literal(lang, v))
                        .collect::<Result<_, _>>()?,
                    _ => return Err(mismatch()),
                };
                Ok(match lang {
                    Lang::Js => {
                        let parts: Vec<String> = fields
                            .iter()
                            .zip(&items)
                            .map(|((name, _), lit)| format!("{name}: {lit}"))
                            .collect();
                        format!("{{{}}}", parts.join(", "))
                    }
                    Lang::C => format!("({}){{{}}}", self.name, items.join(", ")),
                    Lang::Cpp => format!("{}{{{}}}", self.name, items.join(", ")),
                })
            }
            TypeKind::Template(t) => {
                let elem = t.args.first();
                let items: Vec<String> = match (value, elem) {
                    (Value::Zero, _) if lang != Lang::Js => return Ok(self.zero_aggregate(lang)),
                    (Value::Zero, Some(elem)) => {
                        let zero = elem.literal(lang, &Value::Zero)?;
                        vec![zero; t.len.unwrap_or(0)]
                    }
                    (Value::Zero, None) => Vec::new(),
                    (Value::Tuple(items), Some(elem)) => {
                        if t.len.is_some_and(|n| n != items.len()) {
                            return Err(mismatch());
                        }
                        items
                            .iter()
                            .map(|v| elem.literal(lang, v))
                            .collect::<Result<_, _>>()?
                    }
                    _ => return Err(mismatch()),
                };
                Ok(match lang {
                    Lang::Js => format!("[{}]", items.join(", ")),
                    Lang::C => format!("({}){{{}}}", self.name, items.join(", ")),
                    Lang::Cpp => format!("{}{{{}}}", self.name, items.join(", ")),
                })
            }
            TypeKind::Opaque => match value {
                Value::Zero => Ok(match lang {
                    Lang::Js => "null".to_string(),
                    _ => self.zero_aggregate(lang),
                }),
                _ => Err(mismatch()),
            },
        }
    }

    fn zero_aggregate(&self, lang: Lang) -> String {
        match lang {
            Lang::C => format!("({}){{0}}", self.name),
            Lang::Cpp => format!("{}{{}}", self.name),
            Lang::Js => "{}".to_string(),
        }
    }
}

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Type {}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

fn scalar_literal(kind: ScalarKind, lang: Lang, value: &Value) -> Option<String> {
    match kind {
        ScalarKind::F64 => value_as_float(value).map(|v| format_float(v, lang, "")),
        ScalarKind::F32 => {
            let suffix = if lang == Lang::Js { "" } else { "f" };
            value_as_float(value).map(|v| format_float(v, lang, suffix))
        }
        ScalarKind::I32 => match value {
            Value::Int(v) => Some(v.to_string()),
            Value::Zero => Some("0".to_string()),
            Value::Float(v) if v.fract() == 0.0 => Some(format!("{}", *v as i64)),
            _ => None,
        },
        ScalarKind::Bool => match value {
            Value::Bool(b) => Some(b.to_string()),
            Value::Zero => Some("false".to_string()),
            _ => None,
        },
    }
}

fn value_as_float(value: &Value) -> Option<f64> {
    match value {
        Value::Zero => Some(0.0),
        v => v.as_f64(),
    }
}

/// Format f64 as a float literal with optional suffix.
fn format_float(v: f64, lang: Lang, suffix: &str) -> String {
    if v.is_nan() {
        return match lang {
            Lang::Js => "NaN".to_string(),
            Lang::C | Lang::Cpp => "NAN".to_string(),
        };
    }
    if v.is_infinite() {
        let sign = if v < 0.0 { "-" } else { "" };
        return match lang {
            Lang::Js => format!("{sign}Infinity"),
            Lang::C | Lang::Cpp => format!("{sign}INFINITY"),
        };
    }
    // Debug formatting always keeps a '.' or an exponent.
    format!("{v:?}{suffix}")
}
