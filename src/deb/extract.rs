// src/deb/extract.rs

//! Streaming extraction of selected entries from a deb's data tar.
//!
//! The extract map is a constant-memory predicate over tar entries: exact
//! source paths resolve through a hash map, wildcard patterns through a
//! small per-package list. Entries stream straight to disk; only sources
//! extracted to more than one target are buffered.

use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use super::tar_source_path;
use crate::error::{Error, Result};
use crate::fsutil;
use crate::pattern;

/// One extraction target for a matched source path.
#[derive(Debug, Clone)]
pub struct ExtractInfo {
    /// Target path for exact sources, or the original wildcard pattern
    /// for glob matches.
    pub path: String,
    /// Mode override; 0 keeps the tar entry's mode.
    pub mode: u32,
}

/// Options for [`extract`].
pub struct ExtractOptions<'a> {
    pub package: String,
    pub target_dir: PathBuf,
    /// Source path or wildcard pattern to extraction targets.
    pub extract: HashMap<String, Vec<ExtractInfo>>,
    /// Observed between entries; extraction stops when set.
    pub cancel: Option<&'a AtomicBool>,
    /// Called for every claimed entry created on disk, with the info that
    /// claimed it. Automatically created ancestor directories are not
    /// reported.
    pub on_create: &'a mut dyn FnMut(&fsutil::Entry, &ExtractInfo) -> Result<()>,
}

/// Extract the claimed entries of a data tar into the target directory.
///
/// Every exact source and every wildcard pattern must be satisfied by at
/// least one tar entry, or extraction fails.
pub fn extract<R: Read>(reader: R, options: &mut ExtractOptions) -> Result<()> {
    let mut globs: Vec<(&String, &Vec<ExtractInfo>)> = Vec::new();
    let mut exact: HashMap<&str, &Vec<ExtractInfo>> = HashMap::new();
    for (source, infos) in &options.extract {
        if pattern::has_wildcard(source) {
            globs.push((source, infos));
        } else {
            exact.insert(source.as_str(), infos);
        }
    }
    globs.sort_by_key(|(pattern, _)| *pattern);

    let mut pending: HashSet<&str> = options.extract.keys().map(String::as_str).collect();

    // Modes of directories seen in the tarball, so ancestors of claimed
    // entries can be created the way the package shipped them.
    let mut dir_modes: HashMap<String, u32> = HashMap::new();
    let mut created_dirs: HashSet<PathBuf> = HashSet::new();

    let mut archive = tar::Archive::new(reader);
    let entries = archive
        .entries()
        .map_err(|e| extract_error(&options.package, &e.to_string()))?;

    for entry in entries {
        if let Some(cancel) = options.cancel {
            if cancel.load(Ordering::Relaxed) {
                return Err(Error::Extract("extraction cancelled".to_string()));
            }
        }
        let mut entry = entry.map_err(|e| extract_error(&options.package, &e.to_string()))?;
        let name = entry
            .path()
            .map_err(|e| extract_error(&options.package, &e.to_string()))?
            .to_string_lossy()
            .into_owned();
        let Some(source) = tar_source_path(&name) else {
            continue;
        };
        let is_dir = source.ends_with('/');

        let header = entry.header();
        let tar_mode = header
            .mode()
            .map_err(|e| extract_error(&options.package, &e.to_string()))?
            & 0o7777;

        let mut matched: Vec<&ExtractInfo> = Vec::new();
        if let Some(infos) = exact.get(source.as_str()) {
            matched.extend(infos.iter());
            pending.remove(source.as_str());
        }
        for (glob, infos) in &globs {
            if pattern::matches(glob, &source) {
                matched.extend(infos.iter());
                pending.remove(glob.as_str());
            }
        }

        if matched.is_empty() {
            if is_dir {
                dir_modes.insert(source, tar_mode);
            }
            continue;
        }

        let entry_type = header.entry_type();
        let link = if entry_type.is_symlink() {
            let target = entry
                .link_name()
                .map_err(|e| extract_error(&options.package, &e.to_string()))?
                .ok_or_else(|| extract_error(&options.package, "symlink without target"))?;
            Some(target.to_string_lossy().into_owned())
        } else {
            None
        };
        if entry_type.is_hard_link() {
            return Err(extract_error(
                &options.package,
                &format!("cannot extract hard link {}", source),
            ));
        }

        // A source extracted to several targets is buffered once.
        let buffered = if link.is_none() && !is_dir && matched.len() > 1 {
            let mut data = Vec::new();
            entry
                .read_to_end(&mut data)
                .map_err(|e| extract_error(&options.package, &e.to_string()))?;
            Some(data)
        } else {
            None
        };

        for info in matched {
            let target_path = if pattern::has_wildcard(&info.path) {
                source.as_str()
            } else {
                info.path.as_str()
            };
            let real_path = fsutil::safe_join(&options.target_dir, target_path)?;
            let mode = if info.mode != 0 { info.mode } else { tar_mode };

            create_ancestors(&options.target_dir, target_path, &dir_modes, &mut created_dirs)?;

            let created = if is_dir {
                created_dirs.insert(real_path.clone());
                fsutil::create_dir(&real_path, mode)?
            } else if let Some(target) = &link {
                fsutil::create_symlink(&real_path, target)?
            } else if let Some(data) = &buffered {
                fsutil::write_file(&real_path, mode, data)?
            } else {
                fsutil::create_file(&real_path, mode, &mut entry)?
            };
            (options.on_create)(&created, info)?;
        }
    }

    if !pending.is_empty() {
        let mut missing: Vec<&str> = pending.into_iter().collect();
        missing.sort_unstable();
        return Err(Error::Extract(format!(
            "cannot extract from package {:?}: no content at {}",
            options.package,
            missing.join(", ")
        )));
    }

    debug!("extracted package {:?}", options.package);
    Ok(())
}

/// Create the missing ancestors of one target path, using the modes the
/// tarball declared for them where known and 0755 otherwise.
fn create_ancestors(
    target_dir: &Path,
    target_path: &str,
    dir_modes: &HashMap<String, u32>,
    created_dirs: &mut HashSet<PathBuf>,
) -> Result<()> {
    let mut prefix = String::new();
    let segments: Vec<&str> = target_path.trim_matches('/').split('/').collect();
    // The last segment is the entry itself.
    for segment in &segments[..segments.len().saturating_sub(1)] {
        if segment.is_empty() {
            continue;
        }
        prefix.push('/');
        prefix.push_str(segment);
        let dir_key = format!("{}/", prefix);
        let real_dir = fsutil::safe_join(target_dir, &dir_key)?;
        if created_dirs.contains(&real_dir) || real_dir.is_dir() {
            continue;
        }
        let mode = dir_modes.get(&dir_key).copied().unwrap_or(fsutil::DEFAULT_DIR_MODE);
        fsutil::create_dir(&real_dir, mode)?;
        created_dirs.insert(real_dir);
    }
    Ok(())
}

fn extract_error(package: &str, detail: &str) -> Error {
    Error::Extract(format!("cannot extract from package {:?}: {}", package, detail))
}
