// src/manifest.rs

//! Generation of the chisel.db manifest.
//!
//! The manifest is a jsonwall database describing everything the slicer
//! produced: the packages sliced, the slices selected, every path placed
//! in the target root, and which slice owns which path. One database is
//! written at every `generate: manifest` location, and each carries the
//! self-referential rows of every location, so all copies are
//! byte-identical before compression.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::archive::PackageInfo;
use crate::error::{Error, Result};
use crate::fsutil;
use crate::jsonwall::DbWriter;
use crate::slicer::Report;

/// Manifest file name within each generate location.
pub const DB_FILE: &str = "chisel.db";

const DB_SCHEMA: &str = "1.0";
const DB_MODE: u32 = 0o644;

#[derive(Serialize)]
struct PackageRow<'a> {
    kind: &'static str,
    name: &'a str,
    version: &'a str,
    sha256: &'a str,
    arch: &'a str,
}

#[derive(Serialize)]
struct SliceRow<'a> {
    kind: &'static str,
    name: &'a str,
}

#[derive(Serialize)]
struct PathRow<'a> {
    kind: &'static str,
    path: &'a str,
    mode: String,
    slices: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha256: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    final_sha256: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    link: Option<&'a str>,
}

#[derive(Serialize)]
struct ContentRow<'a> {
    kind: &'static str,
    slice: &'a str,
    path: &'a str,
}

/// Everything needed to generate the manifest databases.
pub struct WriteOptions<'a> {
    /// Identity of every sliced package.
    pub packages: &'a [PackageInfo],
    /// Fully qualified names of the selected slices.
    pub slices: &'a [String],
    pub report: &'a Report,
    /// Manifest directory (with trailing slash) to the slices that
    /// declared `generate: manifest` there.
    pub locations: &'a BTreeMap<String, BTreeSet<String>>,
}

/// Write the manifest database at every location, returning the created
/// file paths.
pub fn write_manifests(options: &WriteOptions, root: &Path) -> Result<Vec<PathBuf>> {
    let mut writer = DbWriter::new(DB_SCHEMA);

    for info in options.packages {
        writer.add(&PackageRow {
            kind: "package",
            name: &info.name,
            version: &info.version,
            sha256: &info.sha256,
            arch: &info.arch,
        })?;
    }

    for name in options.slices {
        writer.add(&SliceRow { kind: "slice", name })?;
    }

    for entry in options.report.entries.values() {
        writer.add(&PathRow {
            kind: "path",
            path: &entry.path,
            mode: mode_string(entry.mode),
            slices: entry.slices.iter().map(String::as_str).collect(),
            sha256: entry.hash.as_deref().filter(|h| !h.is_empty()),
            final_sha256: entry.final_hash.as_deref().filter(|h| !h.is_empty()),
            size: entry.size.filter(|size| *size > 0),
            link: entry.link.as_deref().filter(|l| !l.is_empty()),
        })?;
        for slice in &entry.slices {
            writer.add(&ContentRow {
                kind: "content",
                slice,
                path: &entry.path,
            })?;
        }
    }

    // The manifests themselves, present in every copy.
    let mut db_paths = Vec::new();
    for (location, slices) in options.locations {
        let db_path = format!("{}{}", location, DB_FILE);
        writer.add(&PathRow {
            kind: "path",
            path: &db_path,
            mode: mode_string(DB_MODE),
            slices: slices.iter().map(String::as_str).collect(),
            sha256: None,
            final_sha256: None,
            size: None,
            link: None,
        })?;
        for slice in slices {
            writer.add(&ContentRow {
                kind: "content",
                slice,
                path: &db_path,
            })?;
        }
        db_paths.push(db_path);
    }

    let mut rows = Vec::new();
    writer.write_to(&mut rows)?;
    let compressed = zstd::encode_all(&rows[..], zstd::DEFAULT_COMPRESSION_LEVEL)
        .map_err(|e| Error::Io(e))?;

    let mut created = Vec::new();
    for db_path in &db_paths {
        let real_path = fsutil::safe_join(root, db_path)?;
        fsutil::write_file(&real_path, DB_MODE, &compressed)?;
        debug!("wrote manifest at {:?}", real_path);
        created.push(real_path);
    }
    Ok(created)
}

fn mode_string(mode: u32) -> String {
    format!("0{:o}", mode & 0o777)
}
