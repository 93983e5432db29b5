use anyhow::Result;
use regex::Regex;

use syntax::ast;

use crate::Value;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Task '{0}' has no run block")]
    MissingRun(String),
    #[error("Task '{0}' declares '{1}' more than once")]
    DuplicateName(String, String),
    #[error("Parameter '{1}' in task '{0}' is both required and defaulted")]
    RequiredWithDefault(String, String),
    #[error("Parameter '{1}' in task '{0}' has an invalid pattern: {2}")]
    BadValidPattern(String, String, regex::Error),
    #[error("Default of parameter '{1}' in task '{0}' fails its own validation")]
    DefaultNotValid(String, String),
}

/// Constraint on the values a parameter accepts.
#[derive(Debug)]
pub enum Valid {
    /// An enumerated list of acceptable values.
    OneOf(Vec<Value>),
    /// A predicate the string form of the value must satisfy.
    Matches(Regex),
}

impl Valid {
    pub fn accepts(&self, value: &Value) -> bool {
        let s = value.string_form();
        match self {
            Self::OneOf(vals) => vals.iter().any(|v| v.string_form() == s),
            Self::Matches(re) => re.is_match(&s),
        }
    }
}

/// Schema of one declared parameter.
#[derive(Debug)]
pub struct ParamSchema {
    pub descr: Option<String>,
    pub default: Option<Value>,
    pub required: bool,
    pub valid: Option<Valid>,
}

/// The value side of an input override.
#[derive(Debug)]
pub enum OverrideValue {
    /// A literal value.
    Literal(Value),
    /// Resolved lazily from the consumer's own binding.
    FromParent(String),
}

/// A dependency on another task, under a local alias.
#[derive(Debug)]
pub struct InputRef {
    /// Name of the task being depended on.
    pub task: String,
    /// Overrides merged into that task's binding.
    pub params: Vec<(String, OverrideValue)>,
}

/// A declared output artifact. The slot becomes a directory path at
/// scheduling time; the task's code is expected to fill it.
#[derive(Debug)]
pub struct OutputSchema {
    pub descr: Option<String>,
}

/// A task definition, immutable after load.
#[derive(Debug)]
pub struct Task {
    /// Slash-separated identifier, derived from the file path.
    pub name: String,
    pub descr: Option<String>,
    /// Declaration order is preserved; names are unique.
    pub params: Vec<(String, ParamSchema)>,
    pub inputs: Vec<(String, InputRef)>,
    pub outputs: Vec<(String, OutputSchema)>,
    /// The bash code of the run block.
    pub code: String,
    /// Variable names referenced by the code, for diagnostics.
    pub code_vars: Vec<String>,
}

impl Task {
    /// Build a task from its parsed file contents, checking the schema rules.
    pub fn create(name: &str, file: ast::TaskFile<'_>) -> Result<Self> {
        let code = file
            .code
            .ok_or_else(|| Error::MissingRun(name.to_owned()))?;

        let mut params = Vec::with_capacity(file.params.len());
        for spec in file.params {
            if spec.required && spec.default.is_some() {
                return Err(Error::RequiredWithDefault(name.to_owned(), spec.name.to_owned()).into());
            }
            let valid = match spec.valid {
                None => None,
                Some(ast::ValidSpec::OneOf(vals)) => {
                    Some(Valid::OneOf(vals.iter().map(Value::from).collect()))
                }
                Some(ast::ValidSpec::Matches(pat)) => {
                    let re = Regex::new(pat).map_err(|e| {
                        Error::BadValidPattern(name.to_owned(), spec.name.to_owned(), e)
                    })?;
                    Some(Valid::Matches(re))
                }
            };
            let default = spec.default.as_ref().map(Value::from);
            if let (Some(default), Some(valid)) = (&default, &valid) {
                if !valid.accepts(default) {
                    return Err(Error::DefaultNotValid(name.to_owned(), spec.name.to_owned()).into());
                }
            }
            push_unique(
                &mut params,
                name,
                spec.name,
                ParamSchema {
                    descr: spec.descr.map(str::to_owned),
                    default,
                    required: spec.required,
                    valid,
                },
            )?;
        }

        let mut inputs = Vec::with_capacity(file.inputs.len());
        for spec in file.inputs {
            let overrides = spec
                .overrides
                .iter()
                .map(|(param, rhs)| {
                    let value = match rhs {
                        ast::OverrideRhs::Literal(lit) => OverrideValue::Literal(Value::from(lit)),
                        ast::OverrideRhs::FromParent(p) => OverrideValue::FromParent((*p).to_owned()),
                    };
                    ((*param).to_owned(), value)
                })
                .collect();
            push_unique(
                &mut inputs,
                name,
                spec.alias,
                InputRef {
                    task: spec.task.to_owned(),
                    params: overrides,
                },
            )?;
        }

        let mut outputs = Vec::with_capacity(file.outputs.len());
        for spec in file.outputs {
            push_unique(
                &mut outputs,
                name,
                spec.name,
                OutputSchema {
                    descr: spec.descr.map(str::to_owned),
                },
            )?;
        }

        Ok(Self {
            name: name.to_owned(),
            descr: file.descr.map(str::to_owned),
            params,
            inputs,
            outputs,
            code: code.text.to_owned(),
            code_vars: code.vars.iter().map(|v| (*v).to_owned()).collect(),
        })
    }

    pub fn param(&self, name: &str) -> Option<&ParamSchema> {
        self.params.iter().find(|(n, _)| n == name).map(|(_, p)| p)
    }

    pub fn input(&self, alias: &str) -> Option<&InputRef> {
        self.inputs.iter().find(|(a, _)| a == alias).map(|(_, i)| i)
    }
}

fn push_unique<T>(vec: &mut Vec<(String, T)>, task: &str, name: &str, item: T) -> Result<()> {
    if vec.iter().any(|(n, _)| n == name) {
        return Err(Error::DuplicateName(task.to_owned(), name.to_owned()).into());
    }
    vec.push((name.to_owned(), item));
    Ok(())
}
