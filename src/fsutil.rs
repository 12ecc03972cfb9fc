// src/fsutil.rs

//! Filesystem creation primitives for the slicer.
//!
//! Files are written through a temporary name and renamed into place, so a
//! failure never leaves a half-written file at its final path. Modes are
//! applied with an explicit chmod to defeat the process umask. Symlinks
//! are written verbatim and never resolved.

use std::fs;
use std::io::{self, Read};
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};
use crate::hash::DigestWriter;

/// Mode reported for symlinks, which carry no permission bits of their own.
pub const SYMLINK_MODE: u32 = 0o777;

/// Default mode for automatically created ancestor directories.
pub const DEFAULT_DIR_MODE: u32 = 0o755;

/// One created filesystem entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Absolute path of the created entry.
    pub path: PathBuf,
    /// Permission bits.
    pub mode: u32,
    /// True for directories.
    pub dir: bool,
    /// SHA-256 of the content, for regular files.
    pub hash: Option<String>,
    /// Content size in bytes, for regular files.
    pub size: Option<u64>,
    /// Symlink target, written verbatim.
    pub link: Option<String>,
}

/// Join an absolute entry path onto the target root, rejecting any path
/// that would escape it.
pub fn safe_join(root: &Path, path: &str) -> Result<PathBuf> {
    let relative = path.trim_start_matches('/');
    let mut joined = root.to_path_buf();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(c) => joined.push(c),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(Error::Extract(format!(
                    "cannot extract to {:?}: path escapes target root",
                    path
                )));
            }
            Component::Prefix(_) | Component::RootDir => {}
        }
    }
    Ok(joined)
}

/// Create missing ancestor directories of `path` with [`DEFAULT_DIR_MODE`].
///
/// Directories that already exist keep their mode.
pub fn make_parents(path: &Path) -> Result<()> {
    let mut missing = Vec::new();
    let mut cur = path.parent();
    while let Some(dir) = cur {
        if dir.as_os_str().is_empty() || dir.exists() {
            break;
        }
        missing.push(dir.to_path_buf());
        cur = dir.parent();
    }
    for dir in missing.into_iter().rev() {
        fs::create_dir(&dir)?;
        fs::set_permissions(&dir, fs::Permissions::from_mode(DEFAULT_DIR_MODE))?;
    }
    Ok(())
}

/// Create a regular file from a reader, hashing content as it is written.
pub fn create_file<R: Read>(path: &Path, mode: u32, reader: &mut R) -> Result<Entry> {
    make_parents(path)?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".chisel-tmp");
    let tmp = PathBuf::from(tmp);

    let file = fs::File::create(&tmp)?;
    let mut writer = DigestWriter::new(file);
    let copied = io::copy(reader, &mut writer);
    let (file, hash, size) = writer.finish();
    if let Err(e) = copied {
        drop(file);
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    file.sync_all()?;
    drop(file);

    fs::set_permissions(&tmp, fs::Permissions::from_mode(mode))?;
    fs::rename(&tmp, path)?;

    Ok(Entry {
        path: path.to_path_buf(),
        mode,
        dir: false,
        hash: Some(hash),
        size: Some(size),
        link: None,
    })
}

/// Create a directory with the requested mode.
///
/// An existing directory has its permissions reset, so an explicitly
/// declared ancestor wins over an earlier automatic 0755 creation.
pub fn create_dir(path: &Path, mode: u32) -> Result<Entry> {
    make_parents(path)?;
    match fs::create_dir(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists && path.is_dir() => {}
        Err(e) => return Err(e.into()),
    }
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(Entry {
        path: path.to_path_buf(),
        mode,
        dir: true,
        hash: None,
        size: None,
        link: None,
    })
}

/// Create a symlink pointing at `target`, replacing any existing file.
pub fn create_symlink(path: &Path, target: &str) -> Result<Entry> {
    make_parents(path)?;
    match path.symlink_metadata() {
        Ok(meta) if meta.is_dir() => {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("cannot create symlink over directory {:?}", path),
            )));
        }
        Ok(_) => fs::remove_file(path)?,
        Err(_) => {}
    }
    std::os::unix::fs::symlink(target, path)?;
    Ok(Entry {
        path: path.to_path_buf(),
        mode: SYMLINK_MODE,
        dir: false,
        hash: None,
        size: None,
        link: Some(target.to_string()),
    })
}

/// Write a whole byte buffer as a regular file.
pub fn write_file(path: &Path, mode: u32, data: &[u8]) -> Result<Entry> {
    let mut cursor = io::Cursor::new(data);
    create_file(path, mode, &mut cursor)
}

/// Read a file back, for mutation scripts and final-hash computation.
pub fn read_file(path: &Path) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    fs::File::open(path)?.read_to_end(&mut data)?;
    Ok(data)
}
