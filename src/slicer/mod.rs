// src/slicer/mod.rs

//! The slicing engine: drives extraction, synthesis, mutation and the
//! manifest for an ordered selection of slices.
//!
//! Packages are processed in selection order. For each one the slicer
//! builds a constant-memory extract plan from the selected slices, streams
//! the claimed tar entries to disk, then synthesizes the text, symlink and
//! directory entries its slices declare. Mutation scripts run once per
//! slice after every package has landed, `until: mutate` paths are removed
//! and the manifest is written last.

pub mod report;

pub use report::{Report, ReportEntry};

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info};

use crate::archive::Archive;
use crate::deb::{self, ExtractInfo, ExtractOptions};
use crate::error::{Error, Result};
use crate::fsutil;
use crate::hash;
use crate::manifest;
use crate::release::{GenerateKind, PathKind, PathUntil, Selection, Slice};
use crate::scripts::{ContentFlags, ContentView, MutationInterpreter};

const DEFAULT_TEXT_MODE: u32 = 0o644;
const DEFAULT_DIR_MODE: u32 = 0o755;

/// Options for [`run`].
pub struct RunOptions<'a> {
    pub selection: &'a Selection<'a>,
    /// Archive serving each package, keyed by package name.
    pub archives: HashMap<String, &'a dyn Archive>,
    pub target_dir: &'a Path,
    /// Interpreter for slice mutation scripts. Only required when a
    /// selected slice carries one.
    pub interpreter: Option<&'a dyn MutationInterpreter>,
    /// Observed between packages and tar entries.
    pub cancel: Option<&'a AtomicBool>,
}

/// Attributes of one declared path or pattern, folded over every selected
/// slice that declares it.
#[derive(Default)]
struct PathClaims {
    owners: BTreeSet<String>,
    mutable: bool,
    until_mutate: bool,
}

/// Create the target tree for the selection and return the report.
pub fn run(options: &RunOptions) -> Result<Report> {
    let selection = options.selection;
    fs::create_dir_all(options.target_dir)?;
    let mut report = Report::new(options.target_dir);

    // Packages in selection order, with their selected slices.
    let mut package_order: Vec<&str> = Vec::new();
    let mut package_slices: HashMap<&str, Vec<&Slice>> = HashMap::new();
    for slice in &selection.slices {
        let entry = package_slices.entry(&slice.package).or_default();
        if entry.is_empty() {
            package_order.push(&slice.package);
        }
        entry.push(slice);
    }

    let archive_for = |pkg: &str| -> Result<&dyn Archive> {
        options
            .archives
            .get(pkg)
            .copied()
            .ok_or_else(|| Error::Archive(format!("no archive found for package {:?}", pkg)))
    };

    // Fold the declared paths of all selected slices into per-path claims
    // and collect the manifest locations. Non-provider packages keep
    // ownership tags even though they never write bytes.
    let mut claims: HashMap<&str, PathClaims> = HashMap::new();
    let mut manifest_locations: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for slice in &selection.slices {
        let arch = &archive_for(&slice.package)?.options().arch;
        for (path, info) in sorted_contents(slice) {
            if !arch_applies(info, arch) {
                continue;
            }
            if info.generate == GenerateKind::Manifest {
                let location = path.trim_end_matches('*').to_string();
                manifest_locations
                    .entry(location)
                    .or_default()
                    .insert(slice.full_name());
                continue;
            }
            let claim = claims.entry(path).or_default();
            claim.owners.insert(slice.full_name());
            claim.mutable |= info.mutable;
            claim.until_mutate |= info.until == PathUntil::Mutate;
        }
    }

    // Mutable flags and until-removals resolve to concrete target paths
    // as entries are created; globs contribute their matches.
    let mut mutable_paths: BTreeMap<String, bool> = BTreeMap::new();
    let mut until_targets: BTreeSet<String> = BTreeSet::new();
    let mut synthesized: HashSet<&str> = HashSet::new();

    for pkg in &package_order {
        if let Some(cancel) = options.cancel {
            if cancel.load(Ordering::Relaxed) {
                return Err(Error::Extract("extraction cancelled".to_string()));
            }
        }
        let archive = archive_for(pkg)?;
        let slices = &package_slices[pkg];
        debug!("slicing package {:?} with {} slices", pkg, slices.len());

        // The extract plan: source path or pattern to targets, only for
        // paths this package provides.
        let mut extract: HashMap<String, Vec<ExtractInfo>> = HashMap::new();
        let mut planned: HashSet<(&str, &str)> = HashSet::new();
        for slice in slices.iter() {
            let arch = &archive.options().arch;
            for (path, info) in sorted_contents(slice) {
                if !arch_applies(info, arch) {
                    continue;
                }
                let extractable = matches!(info.kind, PathKind::Copy | PathKind::Glob);
                if !extractable || !selection.package_provides_path(pkg, path) {
                    continue;
                }
                let source = info.source_path(path);
                if !planned.insert((source, path)) {
                    continue;
                }
                extract.entry(source.to_string()).or_default().push(ExtractInfo {
                    path: path.to_string(),
                    mode: info.mode,
                });
            }
        }

        let target_dir = options.target_dir.to_path_buf();
        {
            let claims = &claims;
            let report = &mut report;
            let mutable_paths = &mut mutable_paths;
            let until_targets = &mut until_targets;
            let mut on_create = |entry: &fsutil::Entry, info: &ExtractInfo| -> Result<()> {
                let claim = &claims[info.path.as_str()];
                for owner in &claim.owners {
                    report.add(owner, entry)?;
                }
                let rel = relative_target(&target_dir, entry)?;
                if claim.mutable {
                    mutable_paths.insert(rel.clone(), true);
                }
                if claim.until_mutate {
                    until_targets.insert(rel);
                }
                Ok(())
            };
            let mut extract_options = ExtractOptions {
                package: pkg.to_string(),
                target_dir: target_dir.clone(),
                extract,
                cancel: options.cancel,
                on_create: &mut on_create,
            };
            let reader = archive.fetch(pkg)?;
            deb::extract(reader, &mut extract_options)?;
        }

        // Synthesized entries, in sorted key order. Equivalent
        // declarations from other packages were created already.
        for slice in slices.iter() {
            let arch = &archive.options().arch;
            for (path, info) in sorted_contents(slice) {
                if !arch_applies(info, arch) {
                    continue;
                }
                if !matches!(info.kind, PathKind::Text | PathKind::Symlink | PathKind::Dir) {
                    continue;
                }
                if !selection.package_provides_path(pkg, path) || !synthesized.insert(path) {
                    continue;
                }
                let real_path = fsutil::safe_join(options.target_dir, path)?;
                let entry = match info.kind {
                    PathKind::Text => {
                        let data = info.info.as_deref().unwrap_or_default();
                        let mode = if info.mode != 0 { info.mode } else { DEFAULT_TEXT_MODE };
                        fsutil::write_file(&real_path, mode, data.as_bytes())?
                    }
                    PathKind::Symlink => {
                        let target = info.info.as_deref().expect("symlink target is validated on load");
                        fsutil::create_symlink(&real_path, target)?
                    }
                    PathKind::Dir => {
                        let mode = if info.mode != 0 { info.mode } else { DEFAULT_DIR_MODE };
                        fsutil::create_dir(&real_path, mode)?
                    }
                    _ => unreachable!(),
                };
                let claim = &claims[path];
                for owner in &claim.owners {
                    report.add(owner, &entry)?;
                }
                let rel = relative_target(options.target_dir, &entry)?;
                if claim.mutable {
                    mutable_paths.insert(rel.clone(), true);
                }
                if claim.until_mutate {
                    until_targets.insert(rel);
                }
            }
        }
    }

    run_mutation_scripts(options, &mut report, &mutable_paths)?;

    // Deepest paths first, so directories empty out before removal.
    for rel in until_targets.iter().rev() {
        let real_path = fsutil::safe_join(options.target_dir, rel)?;
        if rel.ends_with('/') {
            fs::remove_dir(&real_path)?;
        } else {
            fs::remove_file(&real_path)?;
        }
        report.remove(rel);
    }

    if !manifest_locations.is_empty() {
        let mut packages = Vec::new();
        for pkg in &package_order {
            packages.push(archive_for(pkg)?.info(pkg)?);
        }
        let slices: Vec<String> = selection.slices.iter().map(|s| s.full_name()).collect();
        manifest::write_manifests(
            &manifest::WriteOptions {
                packages: &packages,
                slices: &slices,
                report: &report,
                locations: &manifest_locations,
            },
            options.target_dir,
        )?;
    }

    info!(
        "sliced {} packages into {:?}",
        package_order.len(),
        options.target_dir
    );
    Ok(report)
}

fn run_mutation_scripts(
    options: &RunOptions,
    report: &mut Report,
    mutable_paths: &BTreeMap<String, bool>,
) -> Result<()> {
    let has_scripts = options
        .selection
        .slices
        .iter()
        .any(|s| s.scripts.mutate.is_some());
    if !has_scripts {
        return Ok(());
    }

    let entries: BTreeMap<String, ContentFlags> = report
        .entries
        .keys()
        .map(|path| {
            let mutable = mutable_paths.get(path).copied().unwrap_or(false);
            (path.clone(), ContentFlags { mutable })
        })
        .collect();
    let mut content = ContentView::new(options.target_dir.to_path_buf(), entries);

    // The slice whose script wrote a path last owns the final content.
    let mut final_writer: BTreeMap<String, String> = BTreeMap::new();
    for slice in &options.selection.slices {
        let Some(script) = &slice.scripts.mutate else {
            continue;
        };
        let interpreter = options.interpreter.ok_or_else(|| {
            Error::Mutate(format!("slice {}: no mutation interpreter available", slice))
        })?;
        content.reset_written();
        interpreter
            .run(script, &mut content)
            .map_err(|e| Error::Mutate(format!("slice {}: {}", slice, e)))?;
        for path in content.written_paths() {
            final_writer.insert(path, slice.full_name());
        }
    }

    for (rel, slice) in &final_writer {
        let real_path = fsutil::safe_join(options.target_dir, rel)?;
        let mut file = fs::File::open(&real_path)?;
        let digest = hash::sha256_reader(&mut file)?;
        let size = fs::metadata(&real_path)?.len();
        let entry = fsutil::Entry {
            path: real_path,
            mode: 0,
            dir: false,
            hash: Some(digest),
            size: Some(size),
            link: None,
        };
        report.add_mutated(slice, &entry)?;
    }
    Ok(())
}

/// Slice contents in sorted key order, for deterministic processing.
fn sorted_contents(slice: &Slice) -> Vec<(&str, &crate::release::PathInfo)> {
    let mut contents: Vec<(&str, &crate::release::PathInfo)> = slice
        .contents
        .iter()
        .map(|(path, info)| (path.as_str(), info))
        .collect();
    contents.sort_by_key(|(path, _)| *path);
    contents
}

fn arch_applies(info: &crate::release::PathInfo, arch: &str) -> bool {
    info.arch.is_empty() || info.arch.iter().any(|a| a == arch)
}

/// The report-relative form of a created entry's path.
fn relative_target(target_dir: &Path, entry: &fsutil::Entry) -> Result<String> {
    let rel = entry.path.strip_prefix(target_dir).map_err(|_| {
        Error::Extract(format!("{:?} outside of root {:?}", entry.path, target_dir))
    })?;
    let mut rel_path = format!("/{}", rel.to_string_lossy());
    if entry.dir && !rel_path.ends_with('/') {
        rel_path.push('/');
    }
    Ok(rel_path)
}
