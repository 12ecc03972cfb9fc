// src/archive/dir.rs

//! Archive implementation over a local directory of `.deb` files.
//!
//! This serves the cache directory that the archive fetcher populates:
//! every `.deb` found is indexed by the `Package` field of its control
//! file. It is also the archive used by tests, which build their debs on
//! the fly.

use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{Archive, Options, PackageInfo};
use crate::deb;
use crate::error::{Error, Result};
use crate::hash;

#[derive(Debug)]
struct IndexedDeb {
    path: PathBuf,
    info: PackageInfo,
}

/// A directory of `.deb` files indexed by package name.
#[derive(Debug)]
pub struct DirArchive {
    options: Options,
    packages: HashMap<String, IndexedDeb>,
}

impl DirArchive {
    /// Index every `.deb` under `dir`. Packages whose architecture does
    /// not match `options.arch` are skipped.
    pub fn open(options: Options, dir: &Path) -> Result<Self> {
        let mut packages = HashMap::new();
        let entries = fs::read_dir(dir)
            .map_err(|e| Error::Archive(format!("cannot open archive directory {:?}: {}", dir, e)))?;
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "deb"))
            .collect();
        paths.sort();

        for path in paths {
            let data = fs::read(&path)?;
            let control = deb::control_content(&data[..])
                .map_err(|e| Error::Archive(format!("cannot index {:?}: {}", path, e)))?;
            let fields = parse_control(&control);
            let (Some(name), Some(version), Some(arch)) = (
                fields.get("Package"),
                fields.get("Version"),
                fields.get("Architecture"),
            ) else {
                return Err(Error::Archive(format!(
                    "cannot index {:?}: control file lacks Package, Version or Architecture",
                    path
                )));
            };
            if arch != "all" && !options.arch.is_empty() && arch != &options.arch {
                debug!("skipping {:?}: architecture {} not selected", path, arch);
                continue;
            }
            let info = PackageInfo {
                name: name.clone(),
                version: version.clone(),
                arch: arch.clone(),
                sha256: hash::sha256(&data),
            };
            packages.insert(name.clone(), IndexedDeb { path, info });
        }

        debug!("indexed {} packages from {:?}", packages.len(), dir);
        Ok(Self { options, packages })
    }

    fn lookup(&self, pkg: &str) -> Result<&IndexedDeb> {
        self.packages
            .get(pkg)
            .ok_or_else(|| Error::Archive(format!("cannot find package {:?} in archive", pkg)))
    }
}

impl Archive for DirArchive {
    fn options(&self) -> &Options {
        &self.options
    }

    fn exists(&self, pkg: &str) -> bool {
        self.packages.contains_key(pkg)
    }

    fn fetch(&self, pkg: &str) -> Result<Box<dyn Read + '_>> {
        let indexed = self.lookup(pkg)?;
        let file = fs::File::open(&indexed.path)
            .map_err(|e| Error::Archive(format!("cannot fetch package {:?}: {}", pkg, e)))?;
        Ok(Box::new(file))
    }

    fn info(&self, pkg: &str) -> Result<PackageInfo> {
        Ok(self.lookup(pkg)?.info.clone())
    }
}

/// Parse the single-line fields of a Debian control section.
///
/// Continuation lines belong to the preceding field and are dropped; the
/// fields the archive needs are never multi-line.
fn parse_control(content: &str) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    for line in content.lines() {
        if line.starts_with([' ', '\t']) {
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            fields.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_control() {
        let content = "Package: base-files\nVersion: 13ubuntu10\nArchitecture: amd64\n\
                       Description: Base system\n continuation line\nInstalled-Size: 394\n";
        let fields = parse_control(content);
        assert_eq!(fields["Package"], "base-files");
        assert_eq!(fields["Version"], "13ubuntu10");
        assert_eq!(fields["Architecture"], "amd64");
        assert_eq!(fields["Installed-Size"], "394");
        assert!(!fields.contains_key("continuation line"));
    }

    #[test]
    fn test_missing_directory() {
        let err = DirArchive::open(Options::default(), Path::new("/nonexistent-pool")).unwrap_err();
        assert!(err.to_string().starts_with("cannot open archive directory"));
    }
}
