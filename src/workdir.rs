use std::path::PathBuf;

use anyhow::{Context, Result};
use colored::Colorize;

use traverse::{Schedule, ScheduleEntry};

use crate::fs::Fs;
use crate::jobdb::JobDb;
use crate::ui::Ui;

/// Allocates and cleans the per-node working directories.
///
/// Every schedule entry gets `<root>/<task>/<fingerprint>/`, so identical
/// nodes reuse the same directory across runs. Declared outputs become
/// empty subdirectories, ready for the task's action to fill.
pub struct Workdir<'a> {
    fs: &'a Fs,
}

impl<'a> Workdir<'a> {
    pub fn new(fs: &'a Fs) -> Self {
        Self { fs }
    }

    /// Create the work root and its scratch area.
    pub fn init_root(&self) -> Result<()> {
        self.fs.create_dir(self.fs.tmp_dir()).context("creating scratch dir")?;
        Ok(())
    }

    /// True if the entry's directory survived from an earlier run.
    pub fn intact(&self, entry: &ScheduleEntry) -> bool {
        self.fs
            .exists(self.fs.entry_dir(&entry.task, &entry.fingerprint))
    }

    /// Create the entry's directory and one empty subdirectory per
    /// declared output. Reused directories are left as they are.
    pub fn prepare(&self, entry: &ScheduleEntry) -> Result<PathBuf> {
        let dir = self.fs.entry_dir(&entry.task, &entry.fingerprint);
        self.fs.create_dir(&dir)?;
        for output in &entry.outputs {
            self.fs.create_dir(dir.join(output))?;
        }
        Ok(dir)
    }

    /// Purge one entry's directory and job record.
    pub fn clean_entry(&self, entry: &ScheduleEntry, jobdb: &JobDb) -> Result<()> {
        let dir = self.fs.entry_dir(&entry.task, &entry.fingerprint);
        if self.fs.exists(&dir) {
            eprintln!("{} {dir:?}", "Cleaning".magenta());
            self.fs.delete_dir(&dir)?;
        }
        jobdb.invalidate(&entry.fingerprint)?;
        Ok(())
    }

    /// Purge the aliased nodes and all their transitive consumers.
    pub fn clean_aliases(
        &self,
        schedule: &Schedule,
        aliases: &[String],
        jobdb: &JobDb,
    ) -> Result<()> {
        for alias in aliases {
            let idx = schedule.find_alias(alias).ok_or_else(|| {
                anyhow::anyhow!("Unknown input alias '{alias}' given to --clean")
            })?;
            for i in schedule.with_consumers(idx) {
                self.clean_entry(&schedule.entries[i], jobdb)?;
            }
        }
        Ok(())
    }

    /// Purge everything under the work root.
    pub fn clean_all(&self, ui: &Ui) -> Result<()> {
        eprintln!("{} work root {:?}", "Cleaning".magenta(), self.fs.root());
        if !ui.confirm("delete everything under the work root, job records included")? {
            anyhow::bail!("clean-all aborted");
        }
        for entry in self.fs.read_dir(self.fs.root())? {
            let path = entry?.path();
            if self.fs.is_dir(&path)? {
                self.fs.delete_dir(&path)?;
            } else {
                // jobs.db and any stray files go too.
                self.fs.delete_file(&path)?;
            }
        }
        Ok(())
    }

    /// Existing `(task, fingerprint-dir)` pairs under the work root.
    pub fn enumerate(&self) -> Result<Vec<(String, String)>> {
        let mut found = Vec::new();
        self.walk(&self.fs.root().to_path_buf(), &mut String::new(), &mut found)?;
        found.sort();
        Ok(found)
    }

    fn walk(
        &self,
        dir: &PathBuf,
        task: &mut String,
        found: &mut Vec<(String, String)>,
    ) -> Result<()> {
        for entry in self.fs.read_dir(dir)? {
            let path = entry?.path();
            if !self.fs.is_dir(&path)? {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if task.is_empty() && name == "tmp" {
                continue;
            }
            // fingerprint dirs are 64 hex chars; anything else is a task
            // name component.
            if name.len() == 64 && name.bytes().all(|b| b.is_ascii_hexdigit()) {
                found.push((task.clone(), name.to_owned()));
            } else {
                let len = task.len();
                if !task.is_empty() {
                    task.push('/');
                }
                task.push_str(name);
                self.walk(&path, task, found)?;
                task.truncate(len);
            }
        }
        Ok(())
    }
}
