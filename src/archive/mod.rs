// src/archive/mod.rs

//! Sources of Debian binary packages.
//!
//! The slicer only needs a narrow surface: the bytes of a package, its
//! identifying metadata, and the archive configuration it came from.
//! Fetching over HTTP, signature verification and cache management live
//! behind this trait.

pub mod dir;

pub use dir::DirArchive;

use std::io::Read;
use std::path::PathBuf;

use crate::error::Result;

/// Configuration an archive was opened with.
#[derive(Debug, Clone, Default)]
pub struct Options {
    pub label: String,
    pub version: String,
    pub arch: String,
    pub suites: Vec<String>,
    pub components: Vec<String>,
    pub cache_dir: PathBuf,
    pub pub_keys: Vec<String>,
    pub priority: i32,
}

/// Identity of one fetched package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageInfo {
    pub name: String,
    pub version: String,
    pub arch: String,
    /// Hex SHA-256 of the package file.
    pub sha256: String,
}

/// A source of `.deb` bytes plus package metadata for one architecture.
pub trait Archive {
    fn options(&self) -> &Options;

    /// Whether the archive carries the named package.
    fn exists(&self, pkg: &str) -> bool;

    /// A reader over the package's bytes.
    fn fetch(&self, pkg: &str) -> Result<Box<dyn Read + '_>>;

    /// The package's identifying metadata.
    fn info(&self, pkg: &str) -> Result<PackageInfo>;
}
