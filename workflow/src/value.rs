use syntax::ast;

/// A parameter value. Values arriving from the command line are always
/// strings; typed values come from `.task` file literals. Validation and
/// fingerprinting both operate on the canonical string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl Value {
    /// The canonical string form, as seen by task code and fingerprints.
    pub fn string_form(&self) -> String {
        match self {
            Self::Str(s) => s.clone(),
            Self::Int(i) => i.to_string(),
            Self::Bool(b) => b.to_string(),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Str(s) => write!(f, "{s}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<&ast::Literal<'_>> for Value {
    fn from(lit: &ast::Literal<'_>) -> Self {
        match lit {
            ast::Literal::Str(s) => Self::Str((*s).to_owned()),
            ast::Literal::Int(i) => Self::Int(*i),
            ast::Literal::Bool(b) => Self::Bool(*b),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}
