// src/slicer/report.rs

//! Accumulates metadata about everything the slicer places on disk.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::fsutil;

/// One path produced in the target root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportEntry {
    /// Path relative to the report root, with a trailing `/` for
    /// directories.
    pub path: String,
    /// Permission bits.
    pub mode: u32,
    pub dir: bool,
    pub hash: Option<String>,
    pub size: Option<u64>,
    /// Fully qualified names of the slices owning this path.
    pub slices: BTreeSet<String>,
    pub link: Option<String>,
    pub mutated: bool,
    pub final_hash: Option<String>,
}

/// Per-path record of the content created when slicing packages.
#[derive(Debug)]
pub struct Report {
    /// Filesystem path all reported content is relative to.
    pub root: PathBuf,
    pub entries: HashMap<String, ReportEntry>,
}

impl Report {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            entries: HashMap::new(),
        }
    }

    /// Insert an entry, or merge ownership into an existing identical one.
    /// Diverging attributes for the same path are a logic error upstream
    /// and fail loudly.
    pub fn add(&mut self, slice: &str, fs_entry: &fsutil::Entry) -> Result<()> {
        let rel_path = self.relative_path(&fs_entry.path, fs_entry.dir)?;

        if let Some(entry) = self.entries.get_mut(&rel_path) {
            if fs_entry.mode != entry.mode {
                return Err(Error::Extract(format!(
                    "path {:?} reported twice with diverging mode: 0{:o} != 0{:o}",
                    rel_path, fs_entry.mode, entry.mode
                )));
            } else if fs_entry.link != entry.link {
                return Err(Error::Extract(format!(
                    "path {:?} reported twice with diverging link: {:?} != {:?}",
                    rel_path,
                    fs_entry.link.as_deref().unwrap_or(""),
                    entry.link.as_deref().unwrap_or("")
                )));
            } else if fs_entry.size != entry.size {
                return Err(Error::Extract(format!(
                    "path {:?} reported twice with diverging size: {} != {}",
                    rel_path,
                    fs_entry.size.unwrap_or(0),
                    entry.size.unwrap_or(0)
                )));
            } else if fs_entry.hash != entry.hash {
                return Err(Error::Extract(format!(
                    "path {:?} reported twice with diverging hash: {:?} != {:?}",
                    rel_path,
                    fs_entry.hash.as_deref().unwrap_or(""),
                    entry.hash.as_deref().unwrap_or("")
                )));
            }
            entry.slices.insert(slice.to_string());
        } else {
            self.entries.insert(
                rel_path.clone(),
                ReportEntry {
                    path: rel_path,
                    mode: fs_entry.mode,
                    dir: fs_entry.dir,
                    hash: fs_entry.hash.clone(),
                    size: fs_entry.size,
                    slices: BTreeSet::from([slice.to_string()]),
                    link: fs_entry.link.clone(),
                    mutated: false,
                    final_hash: None,
                },
            );
        }
        Ok(())
    }

    /// Record the final state of a mutated path. Only the final hash,
    /// size and owning slice change: the slice whose script produced the
    /// final content becomes the sole owner. A path mutates at most once.
    pub fn add_mutated(&mut self, slice: &str, fs_entry: &fsutil::Entry) -> Result<()> {
        let rel_path = self.relative_path(&fs_entry.path, fs_entry.dir)?;
        let entry = self.entries.get_mut(&rel_path).ok_or_else(|| {
            Error::Mutate(format!("path {:?} has not been added before", rel_path))
        })?;
        if entry.mutated {
            return Err(Error::Mutate(format!(
                "path {:?} has been mutated once before",
                rel_path
            )));
        }
        entry.mutated = true;
        entry.final_hash = fs_entry.hash.clone();
        entry.size = fs_entry.size;
        entry.slices = BTreeSet::from([slice.to_string()]);
        Ok(())
    }

    /// Drop an entry, for paths declared `until: mutate`.
    pub fn remove(&mut self, rel_path: &str) {
        self.entries.remove(rel_path);
    }

    fn relative_path(&self, path: &Path, is_dir: bool) -> Result<String> {
        let rel = path.strip_prefix(&self.root).map_err(|_| {
            Error::Extract(format!("{:?} outside of root {:?}", path, self.root))
        })?;
        let mut rel_path = format!("/{}", rel.to_string_lossy());
        if is_dir && !rel_path.ends_with('/') {
            rel_path.push('/');
        }
        Ok(rel_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::sha256;

    fn file_entry(root: &Path, rel: &str, mode: u32, data: &[u8]) -> fsutil::Entry {
        fsutil::Entry {
            path: root.join(rel.trim_start_matches('/')),
            mode,
            dir: false,
            hash: Some(sha256(data)),
            size: Some(data.len() as u64),
            link: None,
        }
    }

    fn dir_entry(root: &Path, rel: &str, mode: u32) -> fsutil::Entry {
        fsutil::Entry {
            path: root.join(rel.trim_start_matches('/')),
            mode,
            dir: true,
            hash: None,
            size: None,
            link: None,
        }
    }

    #[test]
    fn test_add_and_merge() {
        let root = Path::new("/base");
        let mut report = Report::new(root);
        let entry = file_entry(root, "/dir/file", 0o644, b"data");

        report.add("pkga_bins", &entry).unwrap();
        report.add("pkgb_bins", &entry).unwrap();

        let recorded = &report.entries["/dir/file"];
        assert_eq!(recorded.mode, 0o644);
        assert_eq!(recorded.size, Some(4));
        assert_eq!(
            recorded.slices.iter().cloned().collect::<Vec<_>>(),
            vec!["pkga_bins", "pkgb_bins"]
        );
    }

    #[test]
    fn test_add_diverging_mode_fails() {
        let root = Path::new("/base");
        let mut report = Report::new(root);
        report.add("pkga_bins", &file_entry(root, "/f", 0o644, b"data")).unwrap();
        let err = report.add("pkgb_bins", &file_entry(root, "/f", 0o755, b"data")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "path \"/f\" reported twice with diverging mode: 0755 != 0644"
        );
    }

    #[test]
    fn test_add_diverging_hash_fails() {
        let root = Path::new("/base");
        let mut report = Report::new(root);
        report.add("pkga_bins", &file_entry(root, "/f", 0o644, b"data")).unwrap();
        let err = report.add("pkgb_bins", &file_entry(root, "/f", 0o644, b"datb")).unwrap_err();
        assert!(err.to_string().contains("diverging hash"));
    }

    #[test]
    fn test_directory_paths_get_trailing_slash() {
        let root = Path::new("/base");
        let mut report = Report::new(root);
        report.add("pkga_bins", &dir_entry(root, "/dir", 0o755)).unwrap();
        assert!(report.entries.contains_key("/dir/"));
    }

    #[test]
    fn test_outside_root_rejected() {
        let mut report = Report::new(Path::new("/base"));
        let entry = fsutil::Entry {
            path: PathBuf::from("/elsewhere/file"),
            mode: 0o644,
            dir: false,
            hash: None,
            size: None,
            link: None,
        };
        let err = report.add("pkga_bins", &entry).unwrap_err();
        assert!(err.to_string().contains("outside of root"));
    }

    #[test]
    fn test_add_mutated() {
        let root = Path::new("/base");
        let mut report = Report::new(root);
        report.add("pkga_bins", &file_entry(root, "/f", 0o644, b"one")).unwrap();
        report.add("pkgb_bins", &file_entry(root, "/f", 0o644, b"one")).unwrap();

        report.add_mutated("pkgb_bins", &file_entry(root, "/f", 0o644, b"rewritten")).unwrap();

        let entry = &report.entries["/f"];
        assert!(entry.mutated);
        assert_eq!(entry.hash.as_deref(), Some(sha256(b"one").as_str()));
        assert_eq!(entry.final_hash.as_deref(), Some(sha256(b"rewritten").as_str()));
        assert_eq!(entry.size, Some(9));
        assert_eq!(
            entry.slices.iter().cloned().collect::<Vec<_>>(),
            vec!["pkgb_bins"]
        );
    }

    #[test]
    fn test_add_mutated_twice_fails() {
        let root = Path::new("/base");
        let mut report = Report::new(root);
        report.add("pkga_bins", &file_entry(root, "/f", 0o644, b"one")).unwrap();
        report.add_mutated("pkga_bins", &file_entry(root, "/f", 0o644, b"two")).unwrap();
        let err = report
            .add_mutated("pkga_bins", &file_entry(root, "/f", 0o644, b"three"))
            .unwrap_err();
        assert_eq!(err.to_string(), "path \"/f\" has been mutated once before");
    }

    #[test]
    fn test_add_mutated_unknown_path_fails() {
        let root = Path::new("/base");
        let mut report = Report::new(root);
        let err = report
            .add_mutated("pkga_bins", &file_entry(root, "/ghost", 0o644, b"x"))
            .unwrap_err();
        assert_eq!(err.to_string(), "path \"/ghost\" has not been added before");
    }
}
