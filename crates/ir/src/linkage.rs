use std::fmt;

/// Visibility of a function and whether the module owns its body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Linkage {
    /// Defined here and callable from other modules.
    Public,

    /// Defined here and only called from within the module.
    #[default]
    Private,

    /// Only declared. Calls to it are opaque to the analysis.
    External,
}

impl Linkage {
    pub fn is_external(self) -> bool {
        matches!(self, Self::External)
    }

    /// Returns `true` if a function with this linkage must come with a body.
    pub fn has_definition(self) -> bool {
        !self.is_external()
    }
}

impl fmt::Display for Linkage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Public => "public",
            Self::Private => "private",
            Self::External => "external",
        };
        write!(f, "{s}")
    }
}
