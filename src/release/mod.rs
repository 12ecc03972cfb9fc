// src/release/mod.rs

//! The release model: archives, packages, slices and their path entries.
//!
//! A release is a collection of package slice definitions plus the archive
//! configuration they are fetched from. Releases are read from disk by
//! [`loader`], validated and annotated with conflict ranks by [`conflict`],
//! and turned into an ordered [`Selection`] by [`select`].

pub mod conflict;
pub mod graph;
pub mod loader;
pub mod select;

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};

/// Matches the slice definition file basename, capturing the package name.
static FNAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([a-z0-9][-.a-z0-9+]+)\.yaml$").unwrap());

/// Matches a slice name, without the leading package name.
static SNAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][-a-z0-9]+$").unwrap());

/// Matches a full slice reference in pkg_slice form.
static KNAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([a-z0-9][-.a-z0-9+]+)_([a-z][-a-z0-9]+)$").unwrap());

/// A collection of package slices targeting a particular distribution
/// version, plus per-path package priorities computed during validation.
#[derive(Debug, Default)]
pub struct Release {
    pub path: PathBuf,
    pub packages: HashMap<String, Package>,
    pub archives: HashMap<String, Archive>,
    /// Per conflicting path, the priority rank of each contending package
    /// along its prefer chain. Higher rank wins. Paths without any prefer
    /// declaration do not appear here.
    pub conflict_ranks: HashMap<String, HashMap<String, usize>>,
}

/// The location binary packages are obtained from.
#[derive(Debug, Clone)]
pub struct Archive {
    pub name: String,
    pub version: String,
    pub suites: Vec<String>,
    pub components: Vec<String>,
    pub priority: i32,
    pub pro: Option<String>,
    /// Armored public keys used to verify the archive signature. The
    /// verification itself happens in the archive fetcher.
    pub pub_keys: Vec<String>,
}

/// A named package and the slices defined for it.
#[derive(Debug, Clone)]
pub struct Package {
    pub name: String,
    /// Definition file path relative to the release root, for diagnostics.
    pub path: String,
    /// Pinned archive name; empty means the default archive.
    pub archive: String,
    pub slices: HashMap<String, Slice>,
}

/// One slice of a package: a subset of its paths, the slices it requires,
/// and an optional mutation script.
#[derive(Debug, Clone)]
pub struct Slice {
    pub package: String,
    pub name: String,
    pub essential: Vec<SliceKey>,
    pub contents: HashMap<String, PathInfo>,
    pub scripts: SliceScripts,
}

#[derive(Debug, Clone, Default)]
pub struct SliceScripts {
    pub mutate: Option<String>,
}

impl Slice {
    /// The fully qualified pkg_slice name.
    pub fn full_name(&self) -> String {
        format!("{}_{}", self.package, self.name)
    }
}

impl fmt::Display for Slice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.package, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PathKind {
    /// Extract a file from the package, possibly renaming it.
    #[default]
    Copy,
    /// Extract every package path matching a wildcard pattern.
    Glob,
    /// Write literal text.
    Text,
    /// Create a symlink.
    Symlink,
    /// Create a directory.
    Dir,
    /// Content produced by chisel itself, such as the manifest.
    Generate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PathUntil {
    #[default]
    None,
    /// Drop the path once the mutation pass has completed.
    Mutate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GenerateKind {
    #[default]
    None,
    Manifest,
}

/// Everything declared for one path entry in a slice.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PathInfo {
    pub kind: PathKind,
    /// Literal text for `text`, link target for `symlink`, source path for
    /// `copy` when it differs from the key.
    pub info: Option<String>,
    /// Permission bits; 0 means inherit from the package entry.
    pub mode: u32,
    /// Content may legitimately change during the mutation pass.
    pub mutable: bool,
    pub until: PathUntil,
    /// Restrict this entry to the listed architectures; empty means all.
    pub arch: Vec<String>,
    pub generate: GenerateKind,
    /// When this path conflicts across packages, the next package in the
    /// prefer chain.
    pub prefer: Option<String>,
}

impl PathInfo {
    /// Whether the resulting file or directory entry is the same as some
    /// other declaration of the path. The mutable flag must also match, as
    /// that is a shared agreement that the content is not fixed upfront.
    pub fn same_content(&self, other: &PathInfo) -> bool {
        self.kind == other.kind
            && self.info == other.info
            && self.mode == other.mode
            && self.mutable == other.mutable
            && self.generate == other.generate
            && self.prefer == other.prefer
    }

    /// The package path this entry extracts, for copy and glob kinds.
    pub fn source_path<'a>(&'a self, key: &'a str) -> &'a str {
        match self.info.as_deref() {
            Some(info) if self.kind == PathKind::Copy => info,
            _ => key,
        }
    }
}

/// Reference to a slice as pkg + slice name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SliceKey {
    pub package: String,
    pub slice: String,
}

impl SliceKey {
    pub fn new(package: &str, slice: &str) -> Self {
        Self {
            package: package.to_string(),
            slice: slice.to_string(),
        }
    }

    /// Parse a pkg_slice reference, validating both name grammars.
    pub fn parse(reference: &str) -> Result<Self> {
        let caps = KNAME_RE
            .captures(reference)
            .ok_or_else(|| Error::Selection(format!("invalid slice reference: {:?}", reference)))?;
        Ok(Self::new(&caps[1], &caps[2]))
    }
}

impl fmt::Display for SliceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.package, self.slice)
    }
}

/// Validate a slice definition file basename, returning the package name.
pub(crate) fn package_name_from_filename(name: &str) -> Option<&str> {
    FNAME_RE.captures(name).map(|c| c.get(1).unwrap().as_str())
}

/// Validate a bare slice name.
pub(crate) fn valid_slice_name(name: &str) -> bool {
    SNAME_RE.is_match(name)
}

/// A dependency-closed, topologically ordered list of slices.
#[derive(Debug)]
pub struct Selection<'a> {
    pub release: &'a Release,
    pub slices: Vec<&'a Slice>,
}

impl Selection<'_> {
    /// Whether `pkg` is the package whose bytes materialize `path` among
    /// the selected packages. With no conflict recorded for the path, any
    /// holder provides it; otherwise the selected package with the highest
    /// rank wins and all others only contribute ownership tagging.
    pub fn package_provides_path(&self, pkg: &str, path: &str) -> bool {
        let Some(ranks) = self.release.conflict_ranks.get(path) else {
            return true;
        };
        let Some(pkg_rank) = ranks.get(pkg) else {
            return false;
        };
        for slice in &self.slices {
            if let Some(rank) = ranks.get(&slice.package) {
                if rank > pkg_rank {
                    return false;
                }
            }
        }
        true
    }
}
