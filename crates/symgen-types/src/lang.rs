//! Target languages for emitted code.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Target language for literal formatting and code emission.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    /// C99. Outputs are passed by pointer.
    C,
    /// C++. Outputs are passed by reference.
    Cpp,
    /// JavaScript. Outputs are returned in an object.
    Js,
}

impl Lang {
    /// Every supported language, in a stable order.
    pub const ALL: [Lang; 3] = [Lang::C, Lang::Cpp, Lang::Js];

    /// Whether functions in this language need a forward declaration.
    pub fn is_statically_declared(self) -> bool {
        matches!(self, Lang::C | Lang::Cpp)
    }

    /// Short lowercase name, as used in serialized output.
    pub fn as_str(self) -> &'static str {
        match self {
            Lang::C => "c",
            Lang::Cpp => "cpp",
            Lang::Js => "js",
        }
    }
}

impl fmt::Display for Lang {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
