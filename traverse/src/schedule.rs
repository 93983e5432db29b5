use colored::Colorize;

use crate::ScheduleEntry;

/// A topologically-ordered list of nodes to execute. The target is always
/// the final entry; every entry's inputs appear earlier in the list.
pub struct Schedule {
    pub entries: Vec<ScheduleEntry>,
}

impl Schedule {
    /// The entry the user asked for.
    pub fn target(&self) -> &ScheduleEntry {
        self.entries.last().expect("a schedule is never empty")
    }

    /// Find an entry by alias path relative to the target, e.g. `a:b`.
    /// An empty path is the target itself.
    pub fn find_alias(&self, path: &str) -> Option<usize> {
        let mut idx = self.entries.len() - 1;
        if path.is_empty() {
            return Some(idx);
        }
        for segment in path.split(':') {
            let entry = &self.entries[idx];
            idx = entry
                .inputs
                .iter()
                .find(|(alias, _)| alias == segment)
                .map(|(_, i)| *i)?;
        }
        Some(idx)
    }

    /// Indices of `idx` plus every entry that transitively consumes it.
    /// A single forward pass suffices since consumers always come later.
    pub fn with_consumers(&self, idx: usize) -> Vec<usize> {
        let mut marked = vec![false; self.entries.len()];
        marked[idx] = true;
        for (i, entry) in self.entries.iter().enumerate().skip(idx + 1) {
            if entry.inputs.iter().any(|(_, input)| marked[*input]) {
                marked[i] = true;
            }
        }
        marked
            .iter()
            .enumerate()
            .filter(|(_, m)| **m)
            .map(|(i, _)| i)
            .collect()
    }

    /// Print the schedule without running anything (`--show`).
    pub fn print(&self) {
        for (i, entry) in self.entries.iter().enumerate() {
            let alias = if entry.alias_path.is_empty() {
                "(target)"
            } else {
                &entry.alias_path
            };
            println!(
                "{:>3}. {} {} [{}]",
                i + 1,
                entry.task.cyan(),
                alias,
                entry.fingerprint.short()
            );
            if !entry.binding.is_empty() {
                println!("     params: {}", entry.binding.render());
            }
            if !entry.inputs.is_empty() {
                let inputs: Vec<String> = entry
                    .inputs
                    .iter()
                    .map(|(alias, idx)| format!("{}={}", alias, idx + 1))
                    .collect();
                println!("     inputs: {}", inputs.join(" "));
            }
        }
    }
}

#[cfg(test)]
mod test {
    use workflow::{CliOverride, TaskUniverse};

    fn schedule() -> super::Schedule {
        let dir = tempfile::tempdir().unwrap();
        let tasks: &[(&str, &str)] = &[
            ("base.task", "run { true }"),
            ("mid.task", "inputs { b: base }\nrun { true }"),
            ("top.task", "inputs { m: mid }\nrun { true }"),
        ];
        for (rel, text) in tasks {
            std::fs::write(dir.path().join(rel), text).unwrap();
        }
        let u = TaskUniverse::load(dir.path()).unwrap();
        let cli: Vec<CliOverride> = Vec::new();
        crate::resolve(&u, "top", &cli).unwrap()
    }

    #[test]
    fn test_find_alias() {
        let s = schedule();
        assert_eq!(Some(2), s.find_alias(""));
        assert_eq!(Some(1), s.find_alias("m"));
        assert_eq!(Some(0), s.find_alias("m:b"));
        assert_eq!(None, s.find_alias("m:x"));
    }

    #[test]
    fn test_with_consumers() {
        let s = schedule();
        assert_eq!(vec![0, 1, 2], s.with_consumers(0));
        assert_eq!(vec![1, 2], s.with_consumers(1));
        assert_eq!(vec![2], s.with_consumers(2));
    }
}
