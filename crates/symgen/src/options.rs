//! Per-context configuration.

use serde::{Deserialize, Serialize};

/// Knobs shared by a context and every adjoint synthesized from it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextOptions {
    /// Maximum nesting of replace-hook rewrites for a single node.
    pub max_rewrites: usize,
    /// Prefix of hoisted temporaries: `t` gives `t12`.
    pub temp_prefix: String,
    /// Indentation of statements in [`EmittedFunction::source`](crate::EmittedFunction::source).
    pub indent: String,
    /// Suffix naming the gradient partner of an argument.
    pub grad_suffix: String,
    /// Suffix of an update argument when read.
    pub prev_suffix: String,
    /// Suffix of an update argument when written.
    pub next_suffix: String,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            max_rewrites: 64,
            temp_prefix: "t".to_string(),
            indent: "    ".to_string(),
            grad_suffix: "Grad".to_string(),
            prev_suffix: "Prev".to_string(),
            next_suffix: "Next".to_string(),
        }
    }
}

impl ContextOptions {
    /// Name of the gradient partner of `name`.
    pub fn grad_name(&self, name: &str) -> String {
        format!("{name}{}", self.grad_suffix)
    }
}
