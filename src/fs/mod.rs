use std::path::{Path, PathBuf};
use std::{fs, io};

use anyhow::{Context, Result};

use util::PathEncodingError;

/// Defines fns for creating common paths in the work root
mod paths;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Specified work root \"{0}\" is not a directory")]
    NotDirectory(String),
    #[error("Can't perform IO operation: \"{0}\" is not whitelisted")]
    NotWhitelisted(String),
}

/// All file operations in the crate should go through this struct.
///
/// All destructive operations check that the path in question is a child of
/// the single whitelisted prefix (the work root), otherwise they will not be
/// performed. Task actions run arbitrary code and can break this rule; it is
/// up to the user to make sure their tasks behave.
#[derive(Debug)]
pub struct Fs {
    /// The directory we are allowed to modify
    work_root: PathBuf,
}

impl Fs {
    /// Create a new `Fs` rooted at the given work directory.
    pub fn new(work_root: &Path) -> Self {
        Self {
            work_root: work_root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.work_root
    }

    /// Check whether the work root exists, and create it if not.
    pub fn ensure_root_exists(&mut self, verbose: bool) -> Result<()> {
        if !self.work_root.exists() {
            if verbose {
                eprintln!("Work root {:?} doesn't exist. Creating.", self.work_root);
            }
            fs::create_dir_all(&self.work_root).context("creating work root")?;
        } else if !self.work_root.is_dir() {
            return Err(Error::NotDirectory(
                self.work_root.to_str().ok_or(PathEncodingError)?.to_string(),
            )
            .into());
        }

        self.work_root = self.work_root.canonicalize()?;
        Ok(())
    }

    /// Check if path exists on disk.
    pub fn exists<T: AsRef<Path>>(&self, path: T) -> bool {
        let path = path.as_ref();
        path.exists() || path.is_symlink()
    }

    /// Check if path exists and is a directory.
    pub fn is_dir<T: AsRef<Path>>(&self, path: T) -> Result<bool> {
        let path = path.as_ref();
        if path.is_dir() || (path.is_symlink() && path.canonicalize()?.is_dir()) {
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Create a directory (uses `std::fs::create_dir_all`, so an entire tree
    /// of dirs can be created).
    pub fn create_dir<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        let path = path.as_ref();
        self.check_whitelist(path)?;
        fs::create_dir_all(path).context("creating dir")?;
        Ok(())
    }

    /// Create a file, and return a writable `File` handle.
    pub fn create_file<T: AsRef<Path>>(&self, path: T) -> Result<fs::File> {
        let path = path.as_ref();
        self.check_whitelist(path)?;
        let f = fs::File::create(path).context("creating file")?;
        Ok(f)
    }

    /// Delete a file.
    pub fn delete_file<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        let path = path.as_ref();
        self.check_whitelist(path)?;
        fs::remove_file(path).context("deleting file")?;
        Ok(())
    }

    /// Recursively delete a directory.
    pub fn delete_dir<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        let path = path.as_ref();
        self.check_whitelist(path)?;
        fs::remove_dir_all(path).context("deleting dir")?;
        Ok(())
    }

    /// List entries in a directory.
    pub fn read_dir<T: AsRef<Path>>(&self, path: T) -> Result<fs::ReadDir, io::Error> {
        fs::read_dir(path)
    }

    fn is_whitelisted<T: AsRef<Path>>(&self, path: T) -> bool {
        path.as_ref().starts_with(&self.work_root)
    }

    fn check_whitelist(&self, path: &Path) -> Result<()> {
        if !self.is_whitelisted(path) {
            Err(Error::NotWhitelisted(path.to_str().ok_or(PathEncodingError)?.to_owned()).into())
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_whitelist_guards_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let mut fs = Fs::new(dir.path());
        fs.ensure_root_exists(false).unwrap();

        let inside = fs.root().join("sub");
        fs.create_dir(&inside).unwrap();
        assert!(fs.delete_dir(&inside).is_ok());

        let outside = tempfile::tempdir().unwrap();
        let err = fs.delete_dir(outside.path()).unwrap_err();
        assert!(err.to_string().contains("not whitelisted"));
        assert!(outside.path().exists());
    }
}
