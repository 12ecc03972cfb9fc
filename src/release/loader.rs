// src/release/loader.rs

//! Reads a release directory into the model.
//!
//! A release directory contains `chisel.yaml` with the archive
//! configuration and a `slices/` subtree with one `<pkg>.yaml` definition
//! file per package. Parsing is strict: unknown keys, malformed names and
//! out-of-domain values are release-syntax errors carrying the offending
//! file path.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::debug;
use walkdir::WalkDir;

use super::{
    conflict, package_name_from_filename, valid_slice_name, Archive, GenerateKind, Package,
    PathInfo, PathKind, PathUntil, Release, Slice, SliceKey, SliceScripts,
};
use crate::deb;
use crate::error::{Error, Result};
use crate::pattern;

/// Read and validate a release from `dir`.
///
/// The returned release has passed conflict validation and carries the
/// path-priority map.
pub fn read_release(dir: &Path) -> Result<Release> {
    debug!("processing release at {:?}", dir);
    let mut release = read_release_dir(dir)?;
    conflict::validate(&mut release)?;
    Ok(release)
}

fn read_release_dir(dir: &Path) -> Result<Release> {
    let config_path = dir.join("chisel.yaml");
    let data = fs::read_to_string(&config_path)
        .map_err(|e| Error::ReleaseSyntax(format!("cannot read release definition: {}", e)))?;
    let mut release = parse_release_config(dir, &data)?;

    let slices_dir = dir.join("slices");
    if !slices_dir.is_dir() {
        return Err(Error::ReleaseSyntax("cannot read slices/ directory".to_string()));
    }
    for entry in WalkDir::new(&slices_dir).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::ReleaseSyntax(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy();
        if !file_name.ends_with(".yaml") {
            continue;
        }
        let pkg_name = package_name_from_filename(&file_name).ok_or_else(|| {
            Error::ReleaseSyntax(format!("invalid slice definition filename: {:?}", file_name))
        })?;

        let rel_path = entry
            .path()
            .strip_prefix(dir)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .into_owned();
        if let Some(old) = release.packages.get(pkg_name) {
            return Err(Error::ReleaseSyntax(format!(
                "package {:?} slices defined more than once: {} and {}",
                pkg_name, old.path, rel_path
            )));
        }
        let data = fs::read_to_string(entry.path())
            .map_err(|e| Error::ReleaseSyntax(format!("cannot read slice definition file: {}", e)))?;
        let pkg = parse_package(pkg_name, &rel_path, &data)?;
        release.packages.insert(pkg.name.clone(), pkg);
    }

    debug!("loaded {} packages, {} archives", release.packages.len(), release.archives.len());
    Ok(release)
}

// =============================================================================
// chisel.yaml
// =============================================================================

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct YamlRelease {
    format: String,
    #[serde(default)]
    archives: HashMap<String, YamlArchive>,
    #[serde(rename = "public-keys", default)]
    public_keys: HashMap<String, YamlPubKey>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct YamlArchive {
    #[serde(deserialize_with = "scalar_string")]
    version: String,
    #[serde(default)]
    suites: Vec<String>,
    #[serde(default)]
    components: Vec<String>,
    priority: i32,
    #[serde(default)]
    pro: Option<String>,
    #[serde(rename = "public-keys", default)]
    public_keys: Vec<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct YamlPubKey {
    #[allow(dead_code)]
    id: String,
    armor: String,
}

fn parse_release_config(dir: &Path, data: &str) -> Result<Release> {
    let yaml: YamlRelease = serde_yaml::from_str(data)
        .map_err(|e| Error::ReleaseSyntax(format!("chisel.yaml: {}", e)))?;
    if yaml.format != "v1" {
        return Err(Error::ReleaseSyntax(format!(
            "chisel.yaml: unknown format {:?}",
            yaml.format
        )));
    }
    if yaml.archives.is_empty() {
        return Err(Error::ReleaseSyntax("chisel.yaml: no archives defined".to_string()));
    }

    let mut archives = HashMap::new();
    for (name, archive) in yaml.archives {
        let mut pub_keys = Vec::new();
        for key_name in &archive.public_keys {
            let key = yaml.public_keys.get(key_name).ok_or_else(|| {
                Error::ReleaseSyntax(format!(
                    "chisel.yaml: archive {:?} refers to undefined public key {:?}",
                    name, key_name
                ))
            })?;
            pub_keys.push(key.armor.clone());
        }
        archives.insert(
            name.clone(),
            Archive {
                name,
                version: archive.version,
                suites: archive.suites,
                components: archive.components,
                priority: archive.priority,
                pro: archive.pro,
                pub_keys,
            },
        );
    }

    Ok(Release {
        path: dir.to_path_buf(),
        archives,
        ..Default::default()
    })
}

// =============================================================================
// slices/<pkg>.yaml
// =============================================================================

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct YamlPackage {
    package: String,
    #[serde(default)]
    archive: Option<String>,
    #[serde(default)]
    essential: Vec<String>,
    #[serde(default)]
    slices: HashMap<String, YamlSlice>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct YamlSlice {
    #[serde(default)]
    essential: Vec<String>,
    #[serde(default)]
    contents: HashMap<String, Option<YamlPath>>,
    #[serde(default)]
    mutate: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct YamlPath {
    #[serde(default)]
    copy: Option<String>,
    #[serde(default)]
    make: Option<bool>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    symlink: Option<String>,
    #[serde(default)]
    mode: Option<YamlMode>,
    #[serde(default)]
    mutable: Option<bool>,
    #[serde(default)]
    until: Option<String>,
    #[serde(default)]
    arch: Option<YamlArch>,
    #[serde(default)]
    generate: Option<String>,
    #[serde(default)]
    prefer: Option<String>,
}

/// A mode is written either as a YAML 1.2 integer (`0o755`) or as a
/// string of octal digits (`"0755"`).
#[derive(Deserialize)]
#[serde(untagged)]
enum YamlMode {
    Number(u32),
    Text(String),
}

/// One architecture or a list of them.
#[derive(Deserialize)]
#[serde(untagged)]
enum YamlArch {
    One(String),
    Many(Vec<String>),
}

fn scalar_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_yaml::Value::deserialize(deserializer)?;
    match value {
        serde_yaml::Value::String(s) => Ok(s),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        _ => Err(serde::de::Error::custom("expected a string or number")),
    }
}

fn parse_package(pkg_name: &str, rel_path: &str, data: &str) -> Result<Package> {
    let yaml: YamlPackage = serde_yaml::from_str(data)
        .map_err(|e| Error::ReleaseSyntax(format!("{}: {}", rel_path, e)))?;
    if yaml.package != pkg_name {
        return Err(Error::ReleaseSyntax(format!(
            "{}: filename and 'package' field ({:?}) disagree",
            rel_path, yaml.package
        )));
    }

    let pkg_essential = parse_essential(&yaml.essential, rel_path, pkg_name)?;

    let mut slices = HashMap::new();
    for (slice_name, yaml_slice) in yaml.slices {
        if !valid_slice_name(&slice_name) {
            return Err(Error::ReleaseSyntax(format!(
                "{}: invalid slice name {:?}",
                rel_path, slice_name
            )));
        }
        let full_name = format!("{}_{}", pkg_name, slice_name);

        let mut essential = pkg_essential.clone();
        for key in parse_essential(&yaml_slice.essential, rel_path, pkg_name)? {
            if essential.contains(&key) {
                return Err(Error::ReleaseSyntax(format!(
                    "{}: slice {} has duplicate essential {}",
                    rel_path, full_name, key
                )));
            }
            essential.push(key);
        }

        let mut contents = HashMap::new();
        for (path, yaml_path) in yaml_slice.contents {
            let info = parse_path_info(&full_name, &path, yaml_path.as_ref())?;
            contents.insert(path, info);
        }

        slices.insert(
            slice_name.clone(),
            Slice {
                package: pkg_name.to_string(),
                name: slice_name,
                essential,
                contents,
                scripts: SliceScripts {
                    mutate: yaml_slice.mutate,
                },
            },
        );
    }

    Ok(Package {
        name: pkg_name.to_string(),
        path: rel_path.to_string(),
        archive: yaml.archive.unwrap_or_default(),
        slices,
    })
}

fn parse_essential(refs: &[String], rel_path: &str, pkg_name: &str) -> Result<Vec<SliceKey>> {
    let mut keys = Vec::new();
    for reference in refs {
        let key = SliceKey::parse(reference).map_err(|_| {
            Error::ReleaseSyntax(format!(
                "{}: package {:?} has invalid essential slice reference: {:?}",
                rel_path, pkg_name, reference
            ))
        })?;
        if keys.contains(&key) {
            return Err(Error::ReleaseSyntax(format!(
                "{}: package {:?} has duplicate essential {}",
                rel_path, pkg_name, key
            )));
        }
        keys.push(key);
    }
    Ok(keys)
}

fn parse_path_info(slice: &str, path: &str, yaml: Option<&YamlPath>) -> Result<PathInfo> {
    if !path.starts_with('/') {
        return Err(Error::ReleaseSyntax(format!(
            "slice {} has invalid content path: {}",
            slice, path
        )));
    }

    let default = YamlPath::default();
    let yaml = yaml.unwrap_or(&default);

    let mut kinds = Vec::new();
    if yaml.copy.is_some() {
        kinds.push(PathKind::Copy);
    }
    if yaml.text.is_some() {
        kinds.push(PathKind::Text);
    }
    if yaml.symlink.is_some() {
        kinds.push(PathKind::Symlink);
    }
    if yaml.make == Some(true) {
        kinds.push(PathKind::Dir);
    }
    if yaml.generate.is_some() {
        kinds.push(PathKind::Generate);
    }
    if kinds.len() > 1 {
        return Err(Error::ReleaseSyntax(format!(
            "slice {} path {} defines multiple path kinds",
            slice, path
        )));
    }
    let mut kind = kinds.pop().unwrap_or(PathKind::Copy);

    let mut info = None;
    let mut generate = GenerateKind::None;
    match kind {
        PathKind::Copy => {
            // A copy source equal to the key is the implicit default.
            info = yaml.copy.clone().filter(|src| src != path);
            if let Some(src) = &info {
                if !src.starts_with('/') || pattern::has_wildcard(src) {
                    return Err(Error::ReleaseSyntax(format!(
                        "slice {} path {} has invalid copy source: {:?}",
                        slice, path, src
                    )));
                }
            }
        }
        PathKind::Text => info = yaml.text.clone(),
        PathKind::Symlink => info = yaml.symlink.clone(),
        PathKind::Dir => {
            if !path.ends_with('/') {
                return Err(Error::ReleaseSyntax(format!(
                    "slice {} path {} must end in / for 'make' to be valid",
                    slice, path
                )));
            }
        }
        PathKind::Generate => {
            generate = match yaml.generate.as_deref() {
                Some("manifest") => GenerateKind::Manifest,
                Some(other) => {
                    return Err(Error::ReleaseSyntax(format!(
                        "slice {} has invalid 'generate' for path {}: {:?}",
                        slice, path, other
                    )));
                }
                None => unreachable!(),
            };
            let only_generate = yaml.copy.is_none()
                && yaml.text.is_none()
                && yaml.symlink.is_none()
                && yaml.make.is_none()
                && yaml.mode.is_none()
                && yaml.mutable.is_none()
                && yaml.until.is_none()
                && yaml.arch.is_none()
                && yaml.prefer.is_none();
            if !only_generate {
                return Err(Error::ReleaseSyntax(format!(
                    "slice {} path {} has invalid generate options",
                    slice, path
                )));
            }
        }
        PathKind::Glob => unreachable!(),
    }

    if pattern::has_wildcard(path) {
        match kind {
            PathKind::Copy if info.is_none() => kind = PathKind::Glob,
            PathKind::Generate => {}
            _ => {
                return Err(Error::ReleaseSyntax(format!(
                    "slice {} path {} has invalid wildcard options",
                    slice, path
                )));
            }
        }
        if !pattern::double_star_in_tail(path) {
            return Err(Error::ReleaseSyntax(format!(
                "slice {} path {} may only use '**' in the last path segment",
                slice, path
            )));
        }
    } else if kind == PathKind::Generate {
        return Err(Error::ReleaseSyntax(format!(
            "slice {} path {} must be a wildcard to use 'generate'",
            slice, path
        )));
    }

    let mode = match &yaml.mode {
        None => 0,
        Some(m) => parse_mode(slice, path, m)?,
    };

    let until = match yaml.until.as_deref() {
        None => PathUntil::None,
        Some("mutate") => PathUntil::Mutate,
        Some(other) => {
            return Err(Error::ReleaseSyntax(format!(
                "slice {} has invalid 'until' for path {}: {:?}",
                slice, path, other
            )));
        }
    };

    let arch = match &yaml.arch {
        None => Vec::new(),
        Some(YamlArch::One(a)) => vec![a.clone()],
        Some(YamlArch::Many(list)) => list.clone(),
    };
    for a in &arch {
        if !deb::valid_arch(a) {
            return Err(Error::ReleaseSyntax(format!(
                "slice {} has invalid 'arch' for path {}: {:?}",
                slice, path, a
            )));
        }
    }

    if let Some(prefer) = &yaml.prefer {
        if package_name_from_filename(&format!("{}.yaml", prefer)).is_none() {
            return Err(Error::ReleaseSyntax(format!(
                "slice {} has invalid 'prefer' for path {}: {:?}",
                slice, path, prefer
            )));
        }
    }

    Ok(PathInfo {
        kind,
        info,
        mode,
        mutable: yaml.mutable.unwrap_or(false),
        until,
        arch,
        generate,
        prefer: yaml.prefer.clone(),
    })
}

fn parse_mode(slice: &str, path: &str, mode: &YamlMode) -> Result<u32> {
    let value = match mode {
        YamlMode::Number(n) => *n,
        YamlMode::Text(s) => u32::from_str_radix(s, 8).map_err(|_| {
            Error::ReleaseSyntax(format!(
                "slice {} path {} has invalid mode {:?}",
                slice, path, s
            ))
        })?,
    };
    if value > 0o7777 {
        return Err(Error::ReleaseSyntax(format!(
            "slice {} path {} has invalid mode 0{:o}",
            slice, path, value
        )));
    }
    Ok(value)
}
