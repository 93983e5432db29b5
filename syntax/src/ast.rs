/// type alias just to make type signatures look more consistent.
pub type Ident<'a> = &'a str;

/// A literal value appearing in a task definition file.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal<'a> {
    Str(&'a str),
    Int(i64),
    Bool(bool),
}

/// Constraint on the values a parameter will accept.
#[derive(Debug, PartialEq)]
pub enum ValidSpec<'a> {
    /// `valid ["a", "b"]`: value must be one of the listed literals.
    OneOf(Vec<Literal<'a>>),
    /// `valid matches "^..."`: string form of the value must match the regex.
    Matches(&'a str),
}

/// One parameter block inside `params { ... }`.
#[derive(Debug, PartialEq)]
pub struct ParamSpec<'a> {
    pub name: Ident<'a>,
    pub descr: Option<&'a str>,
    pub default: Option<Literal<'a>>,
    pub required: bool,
    pub valid: Option<ValidSpec<'a>>,
}

/// The right-hand side of an input override.
#[derive(Debug, PartialEq)]
pub enum OverrideRhs<'a> {
    /// `param = "value"`
    Literal(Literal<'a>),
    /// `param = $other`: take the consumer's binding of `other`.
    FromParent(Ident<'a>),
}

/// One dependency declaration inside `inputs { ... }`.
#[derive(Debug, PartialEq)]
pub struct InputSpec<'a> {
    /// Local alias for the dependency.
    pub alias: Ident<'a>,
    /// Slash-separated name of the task being depended on.
    pub task: &'a str,
    /// Parameter overrides projected into the dependency's binding.
    pub overrides: Vec<(Ident<'a>, OverrideRhs<'a>)>,
}

/// One artifact declaration inside `outputs { ... }`.
#[derive(Debug, PartialEq)]
pub struct OutputSpec<'a> {
    pub name: Ident<'a>,
    pub descr: Option<&'a str>,
}

/// A block of bash code.
#[derive(Debug, PartialEq, Default)]
pub struct BashCode<'a> {
    /// The literal text of the code.
    pub text: &'a str,
    /// Variable names referenced in the code, in order of appearance.
    pub vars: Vec<Ident<'a>>,
}

/// Everything declared by one `.task` file.
/// The task's name is not part of the file; it comes from the file's
/// path relative to the task root.
#[derive(Debug, Default)]
pub struct TaskFile<'a> {
    pub descr: Option<&'a str>,
    pub params: Vec<ParamSpec<'a>>,
    pub inputs: Vec<InputSpec<'a>>,
    pub outputs: Vec<OutputSpec<'a>>,
    /// The `run { ... }` action; None if the file never declared one.
    pub code: Option<BashCode<'a>>,
}
