//! On-disk pattern store.
//!
//! Patterns live as `<basename>.lua` files in a single flat directory.
//! Names are untrusted wire input, so everything funnels through
//! [`sanitize`]: a valid name ends in `.lua`, has a non-empty stem and
//! contains no path separators or `..`.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::PatternError;

const EXTENSION: &str = ".lua";

/// Validates a pattern basename, returning it unchanged.
fn sanitize(name: &str) -> Result<&str, PatternError> {
    let invalid = || PatternError::InvalidName(name.to_string());
    let stem = name.strip_suffix(EXTENSION).ok_or_else(invalid)?;
    if stem.is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name.contains("..")
    {
        return Err(invalid());
    }
    Ok(name)
}

/// File-backed pattern storage.
#[derive(Debug, Clone)]
pub struct PatternStore {
    dir: PathBuf,
}

impl PatternStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, PatternError> {
        Ok(self.dir.join(sanitize(name)?))
    }

    /// Lists available `.lua` basenames. A missing directory is an empty
    /// store, not an error.
    pub fn list(&self) -> Result<Vec<String>, PatternError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_file())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name.ends_with(EXTENSION))
            .collect();
        names.sort();
        Ok(names)
    }

    pub fn read(&self, name: &str) -> Result<String, PatternError> {
        Ok(fs::read_to_string(self.path_for(name)?)?)
    }

    /// Saves atomically: write to a temp file in the same directory, then
    /// rename over the target.
    pub fn save(&self, name: &str, code: &str) -> Result<(), PatternError> {
        let path = self.path_for(name)?;
        fs::create_dir_all(&self.dir)?;
        let tmp = self.dir.join(format!(".{name}.tmp"));
        fs::write(&tmp, code)?;
        fs::rename(&tmp, &path)?;
        debug!(pattern = name, "pattern saved");
        Ok(())
    }

    pub fn delete(&self, name: &str) -> Result<(), PatternError> {
        fs::remove_file(self.path_for(name)?)?;
        debug!(pattern = name, "pattern deleted");
        Ok(())
    }
}
