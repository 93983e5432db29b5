use crate::Binding;

/// Stable identity of a node: a hash over the task name, the canonical
/// serialization of its binding, and the fingerprints of its resolved
/// inputs. Two nodes with the same fingerprint are the same unit of work
/// and share a workdir and a job record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shortened form for progress messages.
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Compute the fingerprint of a node. `inputs` pairs each input alias with
/// the fingerprint of the node it resolved to; order of the slice doesn't
/// matter, the serialization sorts by alias.
pub fn fingerprint(
    task_name: &str,
    binding: &Binding,
    inputs: &[(String, Fingerprint)],
) -> Fingerprint {
    let mut hasher = blake3::Hasher::new();
    hasher.update(task_name.as_bytes());
    hasher.update(b"\0");

    // binding iterates in sorted order already.
    for (name, value) in binding.iter() {
        hasher.update(name.as_bytes());
        hasher.update(b"=");
        hasher.update(value.string_form().as_bytes());
        hasher.update(b"\n");
    }
    hasher.update(b"\0");

    let mut inputs: Vec<&(String, Fingerprint)> = inputs.iter().collect();
    inputs.sort_by(|a, b| a.0.cmp(&b.0));
    for (alias, fp) in inputs {
        hasher.update(alias.as_bytes());
        hasher.update(b":");
        hasher.update(fp.as_str().as_bytes());
        hasher.update(b"\n");
    }

    Fingerprint(hasher.finalize().to_hex().to_string())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{bind_params, Task};

    fn binding(text: &str, cli: &[&crate::CliOverride]) -> Binding {
        let task = Task::create("t", syntax::parse_task(text).unwrap()).unwrap();
        bind_params(&task, cli, &[]).unwrap()
    }

    #[test]
    fn test_stable_across_runs() {
        let b = binding("params { a { default \"x\" } }\nrun { true }", &[]);
        let fp1 = fingerprint("t", &b, &[]);
        let fp2 = fingerprint("t", &b, &[]);
        assert_eq!(fp1, fp2);
        assert_eq!(64, fp1.as_str().len());
    }

    #[test]
    fn test_sensitive_to_binding() {
        let text = "params { a { default \"x\" } }\nrun { true }";
        let o = crate::CliOverride::parse("a=y").unwrap();
        let b1 = binding(text, &[]);
        let b2 = binding(text, &[&o]);
        assert_ne!(fingerprint("t", &b1, &[]), fingerprint("t", &b2, &[]));
    }

    #[test]
    fn test_sensitive_to_inputs_but_not_their_order() {
        let b = binding("run { true }", &[]);
        let child = fingerprint("child", &b, &[]);
        let other = fingerprint("other", &b, &[]);

        let fwd = vec![
            (String::from("a"), child.clone()),
            (String::from("b"), other.clone()),
        ];
        let rev = vec![
            (String::from("b"), other.clone()),
            (String::from("a"), child.clone()),
        ];
        assert_eq!(fingerprint("t", &b, &fwd), fingerprint("t", &b, &rev));
        assert_ne!(fingerprint("t", &b, &fwd), fingerprint("t", &b, &[]));
    }
}
