use anyhow::Result;

use workflow::{
    bind_params, fingerprint, CliOverride, Fingerprint, OverrideValue, TaskUniverse, Value,
};

use crate::{NodeKey, Schedule, ScheduleEntry};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Unknown task '{name}' (required by '{wanted_by}')")]
    UnknownTask { name: String, wanted_by: String },
    #[error("Dependency cycle detected at task '{0}'")]
    Cycle(String),
    #[error("Unknown input alias '{0}'")]
    UnknownAlias(String),
    #[error("Input override '${param}' in task '{task}' refers to an unbound parameter")]
    UnboundProducer { task: String, param: String },
}

/// Resolve the transitive dependency graph of `target` into an execution
/// schedule: leaves first, every entry after all of its inputs, nodes with
/// equal `(task, fingerprint)` deduplicated into a single entry.
pub fn resolve(
    universe: &TaskUniverse,
    target: &str,
    cli: &[CliOverride],
) -> Result<Schedule> {
    let mut resolver = Resolver {
        universe,
        cli,
        cli_used: vec![false; cli.len()],
        entries: Vec::with_capacity(8),
        dedup: hashbrown::HashMap::new(),
        visiting: Vec::with_capacity(8),
        pathbuf: Vec::with_capacity(4),
    };

    resolver.resolve_node(target, "command line", &[])?;

    // an override that never found its node names a bogus alias path.
    for (o, used) in cli.iter().zip(&resolver.cli_used) {
        if !used {
            return Err(Error::UnknownAlias(o.alias_path.join(":")).into());
        }
    }

    let schedule = Schedule {
        entries: resolver.entries,
    };
    log::debug!(
        "resolved '{target}' into {} schedule entries",
        schedule.entries.len()
    );
    Ok(schedule)
}

struct Resolver<'a> {
    universe: &'a TaskUniverse,
    cli: &'a [CliOverride],
    cli_used: Vec<bool>,
    entries: Vec<ScheduleEntry>,
    dedup: hashbrown::HashMap<NodeKey, usize>,
    /// task names on the current DFS path, for cycle detection.
    visiting: Vec<String>,
    /// alias path of the node currently being resolved.
    pathbuf: Vec<String>,
}

impl Resolver<'_> {
    fn resolve_node(
        &mut self,
        task_name: &str,
        wanted_by: &str,
        parent_overrides: &[(String, Value)],
    ) -> Result<usize> {
        let task = self.universe.get(task_name).ok_or_else(|| Error::UnknownTask {
            name: task_name.to_owned(),
            wanted_by: wanted_by.to_owned(),
        })?;

        if self.visiting.iter().any(|t| t == task_name) {
            return Err(Error::Cycle(task_name.to_owned()).into());
        }
        self.visiting.push(task_name.to_owned());

        // overrides scoped to this node by its alias path:
        let mut scoped: Vec<&CliOverride> = Vec::with_capacity(0);
        for (i, o) in self.cli.iter().enumerate() {
            if o.alias_path == self.pathbuf {
                self.cli_used[i] = true;
                scoped.push(o);
            }
        }

        let binding = bind_params(task, &scoped, parent_overrides)?;
        log::trace!("bound {task_name} [{}]", binding.render());

        // inputs resolve with the parent binding visible to producers:
        let mut inputs = Vec::with_capacity(task.inputs.len());
        let mut input_fps: Vec<(String, Fingerprint)> = Vec::with_capacity(task.inputs.len());
        for (alias, input) in &task.inputs {
            let mut child_overrides = Vec::with_capacity(input.params.len());
            for (param, value) in &input.params {
                let value = match value {
                    OverrideValue::Literal(v) => v.clone(),
                    OverrideValue::FromParent(p) => binding
                        .get(p)
                        .cloned()
                        .ok_or_else(|| Error::UnboundProducer {
                            task: task_name.to_owned(),
                            param: p.clone(),
                        })?,
                };
                child_overrides.push((param.clone(), value));
            }

            self.pathbuf.push(alias.clone());
            let child = self.resolve_node(&input.task, task_name, &child_overrides);
            self.pathbuf.pop();
            let child = child?;

            input_fps.push((alias.clone(), self.entries[child].fingerprint.clone()));
            inputs.push((alias.clone(), child));
        }

        self.visiting.pop();

        let fp = fingerprint(task_name, &binding, &input_fps);
        let key = NodeKey {
            task: task_name.to_owned(),
            fingerprint: fp.clone(),
        };
        if let Some(&idx) = self.dedup.get(&key) {
            log::trace!("deduped {task_name} [{}]", fp.short());
            return Ok(idx);
        }

        let entry = ScheduleEntry {
            task: task_name.to_owned(),
            alias_path: self.pathbuf.join(":"),
            binding,
            fingerprint: fp,
            inputs,
            outputs: task.outputs.iter().map(|(n, _)| n.clone()).collect(),
        };
        let idx = self.entries.len();
        self.entries.push(entry);
        self.dedup.insert(key, idx);
        Ok(idx)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::path::Path;

    fn write_task(root: &Path, rel: &str, text: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, text).unwrap();
    }

    fn universe(tasks: &[(&str, &str)]) -> TaskUniverse {
        let dir = tempfile::tempdir().unwrap();
        for (rel, text) in tasks {
            write_task(dir.path(), rel, text);
        }
        TaskUniverse::load(dir.path()).unwrap()
    }

    #[test]
    fn test_topological_order_and_dedup() {
        // diamond: top -> (left, right) -> base, identical base bindings.
        let u = universe(&[
            ("base.task", "params { x { default \"1\" } }\nrun { true }"),
            ("left.task", "inputs { b: base }\nrun { true }"),
            ("right.task", "inputs { b: base }\nrun { true }"),
            ("top.task", "inputs { l: left r: right }\nrun { true }"),
        ]);
        let s = resolve(&u, "top", &[]).unwrap();

        assert_eq!(4, s.entries.len(), "base deduplicated");
        assert_eq!("top", s.target().task);
        for (i, entry) in s.entries.iter().enumerate() {
            for (_, input) in &entry.inputs {
                assert!(*input < i, "inputs precede their consumers");
            }
        }
    }

    #[test]
    fn test_distinct_bindings_not_deduped() {
        let u = universe(&[
            ("base.task", "params { x { default \"1\" } }\nrun { true }"),
            (
                "top.task",
                "inputs { a: base b: base { x = \"2\" } }\nrun { true }",
            ),
        ]);
        let s = resolve(&u, "top", &[]).unwrap();
        assert_eq!(3, s.entries.len(), "differently-bound base nodes are distinct");
    }

    #[test]
    fn test_cycle_detected() {
        let u = universe(&[
            ("a.task", "inputs { other: b }\nrun { true }"),
            ("b.task", "inputs { other: a }\nrun { true }"),
        ]);
        let err = resolve(&u, "a", &[]).unwrap_err();
        assert!(err.to_string().contains("Dependency cycle detected"));
    }

    #[test]
    fn test_aliased_override_reaches_node() {
        let u = universe(&[
            (
                "example/hello-world.task",
                "params { addressee { default \"world\" } }\nrun { true }",
            ),
            (
                "example/hello-input.task",
                "inputs { hello: example/hello-world }\nrun { true }",
            ),
        ]);
        let o = CliOverride::parse("hello:addressee=jkram").unwrap();
        let s = resolve(&u, "example/hello-input", &[o]).unwrap();
        assert_eq!(
            "addressee=jkram",
            s.entries[0].binding.render(),
            "override lands on the aliased node"
        );
    }

    #[test]
    fn test_unknown_alias_is_fatal() {
        let u = universe(&[("solo.task", "run { true }")]);
        let o = CliOverride::parse("nope:x=1").unwrap();
        let err = resolve(&u, "solo", &[o]).unwrap_err();
        assert!(err.to_string().contains("Unknown input alias 'nope'"));
    }

    #[test]
    fn test_producer_sees_parent_binding() {
        let u = universe(&[
            (
                "child.task",
                "params { greeting { default \"x\" } }\nrun { true }",
            ),
            (
                "parent.task",
                "params { msg { default \"hi\" } }\ninputs { c: child { greeting = $msg } }\nrun { true }",
            ),
        ]);
        let s = resolve(&u, "parent", &[]).unwrap();
        assert_eq!("greeting=hi", s.entries[0].binding.render());
    }

    #[test]
    fn test_unknown_task_is_fatal() {
        let u = universe(&[("a.task", "inputs { b: missing }\nrun { true }")]);
        let err = resolve(&u, "a", &[]).unwrap_err();
        assert!(err.to_string().contains("Unknown task 'missing'"));
    }
}
