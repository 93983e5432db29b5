use std::collections::BTreeMap;

use anyhow::Result;

use crate::{Task, Value};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Binding non-existent parameter '{param}' in task '{task}'")]
    NoSuchParam { task: String, param: String },
    #[error("Task '{task}' is missing required parameter '{param}'")]
    MissingRequired { task: String, param: String },
    #[error("Validation of parameter '{param}' value '{value}' failed")]
    ValidationFailed { param: String, value: String },
    #[error("Malformed parameter override '{0}' (expected [alias:...]name=value)")]
    MalformedOverride(String),
}

/// A parameter override from the command line:
/// `-p [alias:...:]param=value`. An empty alias path targets the
/// target task itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliOverride {
    pub alias_path: Vec<String>,
    pub param: String,
    pub value: String,
}

impl CliOverride {
    pub fn parse(arg: &str) -> Result<Self, Error> {
        let (key, value) = arg
            .split_once('=')
            .ok_or_else(|| Error::MalformedOverride(arg.to_owned()))?;
        let mut segments: Vec<&str> = key.split(':').collect();
        let param = segments.pop().unwrap();
        if param.is_empty() || segments.iter().any(|s| s.is_empty()) {
            return Err(Error::MalformedOverride(arg.to_owned()));
        }
        Ok(Self {
            alias_path: segments.iter().map(|s| (*s).to_owned()).collect(),
            param: param.to_owned(),
            value: value.to_owned(),
        })
    }
}

/// The fully-resolved parameter map for one node. Kept sorted by name so
/// its serialization is canonical.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Binding(BTreeMap<String, Value>);

impl Binding {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Compact `k=v` rendering for schedule printing and logs.
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(self.0.len() * 16);
        for (i, (name, value)) in self.0.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            out.push_str(name);
            out.push('=');
            out.push_str(&value.string_form());
        }
        out
    }
}

/// Resolve the binding for one node of `task`.
///
/// Precedence, highest first: command-line overrides scoped to this node,
/// then the consumer's declared input overrides, then the task's own
/// defaults. A required parameter left unbound afterwards is fatal, as is
/// naming a parameter the task doesn't declare or binding a value the
/// schema rejects.
pub fn bind_params(
    task: &Task,
    cli: &[&CliOverride],
    parent: &[(String, Value)],
) -> Result<Binding, Error> {
    let mut map = BTreeMap::new();

    // lowest precedence first; later layers overwrite.
    for (name, schema) in &task.params {
        if let Some(default) = &schema.default {
            map.insert(name.clone(), default.clone());
        }
    }

    for (name, value) in parent {
        check_known(task, name)?;
        map.insert(name.clone(), value.clone());
    }

    for o in cli {
        check_known(task, &o.param)?;
        map.insert(o.param.clone(), Value::Str(o.value.clone()));
    }

    for (name, schema) in &task.params {
        match map.get(name) {
            None => {
                if schema.required {
                    return Err(Error::MissingRequired {
                        task: task.name.clone(),
                        param: name.clone(),
                    });
                }
            }
            Some(value) => {
                if let Some(valid) = &schema.valid {
                    if !valid.accepts(value) {
                        return Err(Error::ValidationFailed {
                            param: name.clone(),
                            value: value.string_form(),
                        });
                    }
                }
            }
        }
    }

    Ok(Binding(map))
}

fn check_known(task: &Task, param: &str) -> Result<(), Error> {
    if task.param(param).is_none() {
        return Err(Error::NoSuchParam {
            task: task.name.clone(),
            param: param.to_owned(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn task() -> Task {
        let text = r#"
params {
    addressee { default "world" }
    msg { valid ["hello", "goodbye"] default "hello" }
    count { required }
}
run { true }
"#;
        Task::create("greet", syntax::parse_task(text).unwrap()).unwrap()
    }

    #[test]
    fn test_parse_override() {
        let o = CliOverride::parse("a:b:x=1").unwrap();
        assert_eq!(vec!["a", "b"], o.alias_path);
        assert_eq!("x", o.param);
        assert_eq!("1", o.value);

        let o = CliOverride::parse("x=a=b").unwrap();
        assert!(o.alias_path.is_empty());
        assert_eq!("a=b", o.value);

        assert!(CliOverride::parse("novalue").is_err());
        assert!(CliOverride::parse(":x=1").is_err());
    }

    #[test]
    fn test_precedence() {
        let task = task();
        let cli = CliOverride::parse("addressee=cli").unwrap();
        let parent = vec![
            (String::from("addressee"), Value::from("parent")),
            (String::from("count"), Value::Int(3)),
        ];

        let binding = bind_params(&task, &[&cli], &parent).unwrap();
        assert_eq!(Some(&Value::from("cli")), binding.get("addressee"));
        assert_eq!(Some(&Value::Int(3)), binding.get("count"));
        assert_eq!(Some(&Value::from("hello")), binding.get("msg"));

        let binding = bind_params(&task, &[], &parent).unwrap();
        assert_eq!(Some(&Value::from("parent")), binding.get("addressee"));
    }

    #[test]
    fn test_unknown_param() {
        let task = task();
        let cli = CliOverride::parse("addresseee=markj").unwrap();
        let parent = vec![(String::from("count"), Value::Int(1))];
        let err = bind_params(&task, &[&cli], &parent).unwrap_err();
        assert!(err
            .to_string()
            .contains("Binding non-existent parameter 'addresseee'"));
    }

    #[test]
    fn test_missing_required() {
        let task = task();
        let err = bind_params(&task, &[], &[]).unwrap_err();
        assert!(err
            .to_string()
            .contains("missing required parameter 'count'"));
    }

    #[test]
    fn test_validation_failed() {
        let task = task();
        let cli = CliOverride::parse("msg=plibt").unwrap();
        let parent = vec![(String::from("count"), Value::Int(1))];
        let err = bind_params(&task, &[&cli], &parent).unwrap_err();
        assert_eq!(
            "Validation of parameter 'msg' value 'plibt' failed",
            err.to_string()
        );
    }

    #[test]
    fn test_render_is_sorted() {
        let task = task();
        let parent = vec![(String::from("count"), Value::Int(2))];
        let binding = bind_params(&task, &[], &parent).unwrap();
        assert_eq!("addressee=world count=2 msg=hello", binding.render());
    }
}
