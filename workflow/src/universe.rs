use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use util::PathEncodingError;

use crate::Task;

const TASK_EXTENSION: &str = "task";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Duplicate task name '{0}'")]
    DuplicateTask(String),
    #[error("Task directory {0:?} does not exist")]
    NoTaskDir(PathBuf),
}

/// All task definitions found under a root directory. Task names are the
/// file paths relative to the root, minus the `.task` extension, so
/// `tasks/a/b/c.task` loads as `a/b/c`.
pub struct TaskUniverse {
    root: PathBuf,
    tasks: util::HashMap<String, Task>,
}

impl TaskUniverse {
    /// Walk `root` recursively and load every `.task` file found.
    /// Files with other extensions and dangling symlinks are skipped
    /// silently.
    pub fn load(root: &Path) -> Result<Self> {
        if !root.is_dir() {
            return Err(Error::NoTaskDir(root.to_path_buf()).into());
        }
        let root = root.canonicalize()?;
        let mut universe = Self {
            tasks: util::HashMap::default(),
            root: root.clone(),
        };
        universe.load_dir(&root)?;
        log::debug!(
            "loaded {} tasks from {:?}",
            universe.tasks.len(),
            universe.root
        );
        Ok(universe)
    }

    fn load_dir(&mut self, dir: &Path) -> Result<()> {
        for entry in std::fs::read_dir(dir).with_context(|| format!("reading dir {dir:?}"))? {
            let path = entry?.path();
            if path.is_dir() {
                self.load_dir(&path)?;
            } else if path.is_file() {
                if path.extension().is_some_and(|e| e == TASK_EXTENSION) {
                    self.load_file(&path)?;
                }
            }
            // neither file nor dir: a dangling symlink or special file; skip.
        }
        Ok(())
    }

    fn load_file(&mut self, path: &Path) -> Result<()> {
        let name = self.task_name(path)?;
        log::trace!("loading task '{name}' from {path:?}");

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading task file {path:?}"))?;
        let file = syntax::parse_task(&text)
            .with_context(|| format!("while parsing task file {path:?}"))?;
        let task = Task::create(&name, file)
            .with_context(|| format!("while loading task file {path:?}"))?;

        if self.tasks.insert(name.clone(), task).is_some() {
            return Err(Error::DuplicateTask(name).into());
        }
        Ok(())
    }

    fn task_name(&self, path: &Path) -> Result<String> {
        let rel = path
            .strip_prefix(&self.root)
            .expect("task file is under the root by construction")
            .with_extension("");
        let name = rel.to_str().ok_or(PathEncodingError)?;
        Ok(name.to_owned())
    }

    pub fn get(&self, name: &str) -> Option<&Task> {
        self.tasks.get(name)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Every task name, sorted, for `list` output.
    pub fn sorted_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tasks.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fs;

    fn write_task(root: &Path, rel: &str, text: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    #[test]
    fn test_load_and_names() {
        let dir = tempfile::tempdir().unwrap();
        write_task(dir.path(), "example/hello-world.task", "run { echo hi }");
        write_task(dir.path(), "build.task", "run { true }");
        write_task(dir.path(), "notes.txt", "not a task");

        let universe = TaskUniverse::load(dir.path()).unwrap();
        assert_eq!(2, universe.len());
        assert_eq!(vec!["build", "example/hello-world"], universe.sorted_names());
        assert!(universe.get("example/hello-world").is_some());
        assert!(universe.get("notes").is_none());
    }

    #[test]
    fn test_dangling_symlink_ignored() {
        let dir = tempfile::tempdir().unwrap();
        write_task(dir.path(), "ok.task", "run { true }");
        std::os::unix::fs::symlink("does-not-exist", dir.path().join("gone.task")).unwrap();

        let universe = TaskUniverse::load(dir.path()).unwrap();
        assert_eq!(1, universe.len());
    }

    #[test]
    fn test_missing_dir() {
        assert!(TaskUniverse::load(Path::new("/no/such/dir")).is_err());
    }
}
