// src/scripts/mod.rs

//! Content interface for mutation scripts.
//!
//! Mutation scripts run after extraction, through an interpreter supplied
//! by the caller. The interpreter never touches the filesystem directly:
//! it goes through a [`ContentView`] restricted to the paths the selected
//! slices declared, and writes are only accepted on paths declared
//! `mutable: true`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::fsutil;

/// How a declared path may be used by mutation scripts.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentFlags {
    pub mutable: bool,
}

/// A root-scoped view over the declared paths of a selection.
pub struct ContentView {
    root: PathBuf,
    entries: BTreeMap<String, ContentFlags>,
    written: BTreeSet<String>,
}

impl ContentView {
    pub fn new(root: PathBuf, entries: BTreeMap<String, ContentFlags>) -> Self {
        Self {
            root,
            entries,
            written: BTreeSet::new(),
        }
    }

    fn real_path(&self, path: &str) -> Result<PathBuf> {
        fsutil::safe_join(&self.root, path)
    }

    /// Read the content of a declared path.
    pub fn read(&self, path: &str) -> Result<String> {
        if !self.entries.contains_key(path) {
            return Err(Error::Mutate(format!("cannot read {}: no content at path", path)));
        }
        let data = fsutil::read_file(&self.real_path(path)?)?;
        String::from_utf8(data)
            .map_err(|_| Error::Mutate(format!("cannot read {}: content is not valid UTF-8", path)))
    }

    /// Overwrite the content of a mutable path.
    pub fn write(&mut self, path: &str, data: &str) -> Result<()> {
        match self.entries.get(path) {
            None => {
                return Err(Error::Mutate(format!("cannot write {}: no content at path", path)));
            }
            Some(flags) if !flags.mutable => {
                return Err(Error::Mutate(format!("cannot write {}: path is not mutable", path)));
            }
            Some(_) => {}
        }
        let real = self.real_path(path)?;
        let mode = std::fs::metadata(&real)?.permissions();
        use std::os::unix::fs::PermissionsExt;
        fsutil::write_file(&real, mode.mode() & 0o7777, data.as_bytes())?;
        self.written.insert(path.to_string());
        Ok(())
    }

    /// List the declared entries directly under a directory, in order.
    /// Directory names keep their trailing slash.
    pub fn list(&self, dir: &str) -> Result<Vec<String>> {
        let prefix = if dir.ends_with('/') {
            dir.to_string()
        } else {
            format!("{}/", dir)
        };
        let mut names = BTreeSet::new();
        for path in self.entries.keys() {
            let Some(rest) = path.strip_prefix(&prefix) else {
                continue;
            };
            if rest.is_empty() {
                continue;
            }
            match rest.find('/') {
                Some(pos) => {
                    names.insert(rest[..pos + 1].to_string());
                }
                None => {
                    names.insert(rest.to_string());
                }
            }
        }
        if names.is_empty() && !self.entries.contains_key(&prefix) {
            return Err(Error::Mutate(format!("cannot list {}: no content at path", dir)));
        }
        Ok(names.into_iter().collect())
    }

    /// Paths written so far, in sorted order.
    pub fn written_paths(&self) -> Vec<String> {
        self.written.iter().cloned().collect()
    }

    /// Forget recorded writes; used between per-slice script runs.
    pub fn reset_written(&mut self) {
        self.written.clear();
    }
}

/// Interpreter for slice mutation scripts, implemented by the caller.
pub trait MutationInterpreter {
    /// Run one script body against the content view. Script failures
    /// surface as [`Error::Mutate`].
    fn run(&self, script: &str, content: &mut ContentView) -> Result<()>;
}
