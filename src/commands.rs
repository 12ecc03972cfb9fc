// src/commands.rs
//! Command handlers for the Chisel CLI

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Result};
use tracing::debug;

use chisel::archive::{Archive, DirArchive, Options};
use chisel::release::Package;
use chisel::{read_release, select, slicer, SliceKey};

/// Cut a tree with the selected slices into the root directory.
pub fn cmd_cut(release_dir: &str, root: &str, arch: Option<&str>, slice_refs: &[String]) -> Result<()> {
    let mut keys = Vec::with_capacity(slice_refs.len());
    for reference in slice_refs {
        keys.push(SliceKey::parse(reference)?);
    }

    let release = read_release(Path::new(release_dir))?;
    let selection = select(&release, &keys)?;

    let arch = match arch {
        Some(arch) => arch.to_string(),
        None => host_arch().to_string(),
    };
    let cache_dir = cache_dir();

    // Open every archive that has a local package pool. Fetching from the
    // network populates these directories out of band.
    let mut archives: HashMap<String, DirArchive> = HashMap::new();
    for (name, info) in &release.archives {
        let dir = cache_dir.join(name);
        if !dir.is_dir() {
            debug!("archive {:?} has no local pool at {:?}", name, dir);
            continue;
        }
        let archive = DirArchive::open(
            Options {
                label: name.clone(),
                version: info.version.clone(),
                arch: arch.clone(),
                suites: info.suites.clone(),
                components: info.components.clone(),
                cache_dir: dir.clone(),
                pub_keys: info.pub_keys.clone(),
                priority: info.priority,
            },
            &dir,
        )?;
        archives.insert(name.clone(), archive);
    }

    let mut pkg_archives: HashMap<String, &dyn Archive> = HashMap::new();
    for slice in &selection.slices {
        if pkg_archives.contains_key(&slice.package) {
            continue;
        }
        let pkg = &release.packages[&slice.package];
        let archive = package_archive(pkg, &archives)?;
        pkg_archives.insert(pkg.name.clone(), archive);
    }

    slicer::run(&slicer::RunOptions {
        selection: &selection,
        archives: pkg_archives,
        target_dir: Path::new(root),
        interpreter: None,
        cancel: None,
    })?;

    Ok(())
}

/// Print the paths found in a deb file.
pub fn cmd_contents(deb_path: &str) -> Result<()> {
    let file = File::open(deb_path)?;
    for path in chisel::deb::list(file)? {
        println!("{}", path);
    }
    Ok(())
}

/// Pick the archive serving a package: its pinned archive if set,
/// otherwise the highest-priority archive that carries it.
fn package_archive<'a>(
    pkg: &Package,
    archives: &'a HashMap<String, DirArchive>,
) -> Result<&'a dyn Archive> {
    if !pkg.archive.is_empty() {
        let archive = archives
            .get(&pkg.archive)
            .ok_or_else(|| anyhow!("archive {:?} has no local package pool", pkg.archive))?;
        return Ok(archive);
    }
    let mut candidates: Vec<&DirArchive> = archives.values().filter(|a| a.exists(&pkg.name)).collect();
    candidates.sort_by_key(|a| -a.options().priority);
    match candidates.first() {
        Some(archive) => Ok(*archive),
        None => bail!("cannot find package {:?} in archive", pkg.name),
    }
}

/// Cache directory for downloaded package files.
fn cache_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("CHISEL_CACHE_DIR") {
        return PathBuf::from(dir);
    }
    if let Ok(dir) = std::env::var("XDG_CACHE_HOME") {
        return PathBuf::from(dir).join("chisel");
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".cache").join("chisel")
}

/// The Debian architecture name of the build host.
fn host_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "arm" => "armhf",
        "x86" => "i386",
        "powerpc64" => "ppc64el",
        "riscv64" => "riscv64",
        "s390x" => "s390x",
        other => other,
    }
}
