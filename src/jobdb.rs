use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension};

use workflow::Fingerprint;

/// One completed node, keyed by fingerprint.
#[derive(Debug, PartialEq, Eq)]
pub struct JobRecord {
    pub fingerprint: String,
    pub task: String,
    pub workdir: String,
    pub created_at: i64,
    pub status: String,
}

impl JobRecord {
    pub fn completed(fingerprint: &Fingerprint, task: &str, workdir: &str) -> Self {
        Self {
            fingerprint: fingerprint.as_str().to_owned(),
            task: task.to_owned(),
            workdir: workdir.to_owned(),
            created_at: unix_now(),
            status: String::from("ok"),
        }
    }
}

/// The persistent record of completed nodes, used to reuse results across
/// runs. Opened at schedule start and closed at schedule end; concurrent
/// writers are not supported.
pub struct JobDb {
    conn: Connection,
}

impl JobDb {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("while opening job database {path:?}"))?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS jobs (
                fingerprint TEXT PRIMARY KEY,
                task        TEXT NOT NULL,
                workdir     TEXT NOT NULL,
                created_at  INTEGER NOT NULL,
                status      TEXT NOT NULL
            )",
            (),
        )
        .context("while creating the jobs table")?;
        Ok(Self { conn })
    }

    pub fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<JobRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT fingerprint, task, workdir, created_at, status
                 FROM jobs WHERE fingerprint = ?1",
                [fingerprint.as_str()],
                |row| {
                    Ok(JobRecord {
                        fingerprint: row.get(0)?,
                        task: row.get(1)?,
                        workdir: row.get(2)?,
                        created_at: row.get(3)?,
                        status: row.get(4)?,
                    })
                },
            )
            .optional()
            .context("while querying the job database")?;
        Ok(record)
    }

    /// Record a completed node. Replaces any stale record for the same
    /// fingerprint.
    pub fn insert(&self, record: &JobRecord) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO jobs
                 (fingerprint, task, workdir, created_at, status)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                (
                    &record.fingerprint,
                    &record.task,
                    &record.workdir,
                    record.created_at,
                    &record.status,
                ),
            )
            .context("while inserting a job record")?;
        Ok(())
    }

    pub fn invalidate(&self, fingerprint: &Fingerprint) -> Result<()> {
        self.conn
            .execute("DELETE FROM jobs WHERE fingerprint = ?1", [fingerprint.as_str()])
            .context("while invalidating a job record")?;
        Ok(())
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod test {
    use super::*;
    use workflow::{bind_params, fingerprint, Task};

    fn fp(name: &str) -> Fingerprint {
        let task = Task::create(name, syntax::parse_task("run { true }").unwrap()).unwrap();
        let binding = bind_params(&task, &[], &[]).unwrap();
        fingerprint(name, &binding, &[])
    }

    #[test]
    fn test_lookup_insert_invalidate() {
        let dir = tempfile::tempdir().unwrap();
        let db = JobDb::open(&dir.path().join("jobs.db")).unwrap();

        let fp = fp("a");
        assert_eq!(None, db.lookup(&fp).unwrap());

        let record = JobRecord::completed(&fp, "a", "/work/a/123");
        db.insert(&record).unwrap();
        let found = db.lookup(&fp).unwrap().unwrap();
        assert_eq!(record, found);

        db.invalidate(&fp).unwrap();
        assert_eq!(None, db.lookup(&fp).unwrap());
    }

    #[test]
    fn test_reopen_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.db");
        let fp = fp("b");
        {
            let db = JobDb::open(&path).unwrap();
            db.insert(&JobRecord::completed(&fp, "b", "/work/b/456")).unwrap();
        }
        let db = JobDb::open(&path).unwrap();
        assert!(db.lookup(&fp).unwrap().is_some());
    }
}
