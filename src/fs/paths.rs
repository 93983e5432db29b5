use std::path::PathBuf;

use workflow::Fingerprint;

use super::Fs;

const TMP_DIR: &str = "tmp";
const JOBDB_FILE: &str = "jobs.db";

/// Builders for the well-known paths in the work root:
/// `<root>/tmp/` for scratch, `<root>/<task>/<fingerprint>/` per node,
/// `<root>/jobs.db` for the job database.
impl Fs {
    pub fn tmp_dir(&self) -> PathBuf {
        self.root().join(TMP_DIR)
    }

    pub fn jobdb_path(&self) -> PathBuf {
        self.root().join(JOBDB_FILE)
    }

    /// Directory for all fingerprints of one task.
    pub fn task_dir(&self, task: &str) -> PathBuf {
        self.root().join(task)
    }

    /// Directory for one schedule entry; identical nodes share it.
    pub fn entry_dir(&self, task: &str, fingerprint: &Fingerprint) -> PathBuf {
        let mut dir = self.task_dir(task);
        dir.push(fingerprint.as_str());
        dir
    }
}
