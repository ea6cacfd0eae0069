//! Error type for type lookup and literal formatting.

/// Errors raised by the type system.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TypeError {
    #[error("unknown type `{0}`")]
    Unknown(String),
    #[error("type `{0}` is already defined")]
    Duplicate(String),
    #[error("type `{ty}` has no member `{field}`")]
    NoMember { ty: String, field: String },
    #[error("type `{ty}` cannot be indexed")]
    NotIndexable { ty: String },
    #[error("index {index} out of bounds for `{ty}` of length {len}")]
    IndexOutOfBounds { ty: String, index: usize, len: usize },
    #[error("cannot format {value} as a `{ty}` literal")]
    LiteralMismatch { ty: String, value: String },
}
