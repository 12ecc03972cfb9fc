// src/release/conflict.rs

//! Release validation: path conflicts and prefer-chain resolution.
//!
//! Conflict validation runs without downloading packages, so content
//! extracted from different packages to the same location cannot be
//! assumed equal. Within one package the content is guaranteed to be the
//! same, so equal declarations never conflict. Across packages a path is
//! only acceptable when every declaration is an equivalent synthesized
//! entry, or when the declarations form a linear `prefer` chain that picks
//! one package to provide the bytes.
//!
//! The prefer relations for one path form a directed graph with the
//! contending packages as vertices. The valid shape is a linear chain,
//! optionally fanned into by a set of equivalent in-degree-zero heads that
//! all name the same target:
//!
//! ```text
//!   A
//!    \
//!     v
//! B -> P -> Q -> ... -> Z
//!     ^
//!    /
//!   C
//! ```
//!
//! Heads receive rank 0 and the chain is ranked incrementally from 1; a
//! single-head graph is ranked 1..n from the head. Any cycle, fork,
//! disconnection or non-equivalent head is a conflict error, reported with
//! the lexicographically smallest offending pair.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use super::select::order;
use super::{Package, PathKind, Release, Slice, SliceKey};
use crate::error::{Error, Result};
use crate::pattern;

/// Validate the release and populate its path-priority map.
pub(crate) fn validate(release: &mut Release) -> Result<()> {
    let ranks = check(release)?;
    release.conflict_ranks = ranks;
    Ok(())
}

struct PathState<'a> {
    /// Representative declaring slice per package, smallest slice name.
    reps: BTreeMap<&'a str, &'a Slice>,
    /// Ranks when the path sits on a prefer chain.
    ranks: Option<HashMap<String, usize>>,
}

impl<'a> PathState<'a> {
    fn info(&self, pkg: &str, path: &str) -> &'a super::PathInfo {
        &self.reps[pkg].contents[path]
    }

    fn is_linear(&self) -> bool {
        self.ranks.is_some()
    }
}

fn check(release: &Release) -> Result<HashMap<String, HashMap<String, usize>>> {
    // Group declaring slices per path, in deterministic order.
    let mut path_slices: BTreeMap<&str, Vec<&Slice>> = BTreeMap::new();
    let mut keys: Vec<SliceKey> = Vec::new();

    let mut pkg_names: Vec<&String> = release.packages.keys().collect();
    pkg_names.sort();
    for pkg_name in &pkg_names {
        let pkg = &release.packages[*pkg_name];
        let mut slice_names: Vec<&String> = pkg.slices.keys().collect();
        slice_names.sort();
        for slice_name in slice_names {
            let slice = &pkg.slices[slice_name];
            keys.push(SliceKey::new(&slice.package, &slice.name));
            for path in slice.contents.keys() {
                path_slices.entry(path).or_default().push(slice);
            }
        }
    }

    let mut states: BTreeMap<&str, PathState> = BTreeMap::new();
    let mut ranks: HashMap<String, HashMap<String, usize>> = HashMap::new();
    for (path, slices) in &path_slices {
        let state = resolve_path(path, slices, &release.packages)?;
        if let Some(path_ranks) = &state.ranks {
            ranks.insert(path.to_string(), path_ranks.clone());
        }
        states.insert(path, state);
    }
    debug!("resolved {} paths, {} on prefer chains", states.len(), ranks.len());

    check_globs(&states)?;

    // Check for essential cycles and dangling essentials across the whole
    // release, not only what a particular selection reaches.
    order(&release.packages, &keys)?;

    check_archives(release)?;

    Ok(ranks)
}

/// Resolve the conflict state of a single path.
fn resolve_path<'a>(
    path: &str,
    declaring: &[&'a Slice],
    packages: &HashMap<String, Package>,
) -> Result<PathState<'a>> {
    // Within one package every declaration must be content-equivalent.
    // The first slice seen per package is the representative; the input is
    // sorted, so that is the lexicographically smallest one.
    let mut reps: BTreeMap<&str, &Slice> = BTreeMap::new();
    for slice in declaring {
        match reps.get(slice.package.as_str()) {
            None => {
                reps.insert(&slice.package, slice);
            }
            Some(rep) => {
                if !rep.contents[path].same_content(&slice.contents[path]) {
                    return Err(conflict_error(rep, slice, path));
                }
            }
        }
    }

    let info = |pkg: &str| &reps[pkg].contents[path];

    // Edges of the prefer graph. A prefer must name a defined package
    // that also declares the path.
    let mut edges: BTreeMap<&str, &str> = BTreeMap::new();
    for (pkg, slice) in &reps {
        if let Some(prefer) = info(pkg).prefer.as_deref() {
            if !packages.contains_key(prefer) {
                return Err(Error::ReleaseSemantic(format!(
                    "slice {} has invalid 'prefer' for path {}: {:?}",
                    slice, path, prefer
                )));
            }
            if !reps.contains_key(prefer) {
                return Err(Error::ReleaseSemantic(format!(
                    "slice {} path {} prefers {:?}: package {} does not have path {}",
                    slice, path, prefer, prefer, path
                )));
            }
            edges.insert(pkg, prefer);
        }
    }

    if edges.is_empty() {
        // No prefer relations: every contender must produce the same
        // entry. Copy and glob content coming from different packages is
        // never known to be equal.
        let contenders: Vec<&&Slice> = reps.values().collect();
        for other in &contenders[1..] {
            let first_info = &contenders[0].contents[path];
            let other_info = &other.contents[path];
            let equivalent = first_info.same_content(other_info)
                && !matches!(first_info.kind, PathKind::Copy | PathKind::Glob);
            if !equivalent {
                return Err(conflict_error(contenders[0], other, path));
            }
        }
        return Ok(PathState { reps, ranks: None });
    }

    check_cycles(path, &reps, &edges)?;

    // The graph is acyclic: split it into heads and the chain.
    let mut in_degree: BTreeMap<&str, usize> = reps.keys().map(|p| (*p, 0)).collect();
    for target in edges.values() {
        *in_degree.get_mut(target).unwrap() += 1;
    }

    let tails: Vec<&str> = reps
        .keys()
        .filter(|pkg| !edges.contains_key(*pkg))
        .copied()
        .collect();
    if tails.len() > 1 {
        let (a, b) = ordered_pair(reps[tails[0]], reps[tails[1]]);
        return Err(Error::ReleaseSemantic(format!(
            "slices {} and {} have no 'prefer' relationship for path {}",
            a, b, path
        )));
    }

    let heads: Vec<&str> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(p, _)| *p)
        .collect();

    let mut ranks: HashMap<String, usize> = HashMap::new();
    let start = if heads.len() > 1 {
        // Multiple heads must all point at the same chain and be
        // equivalent synthesized entries, since any of them may be the
        // one providing the path when the others are not selected.
        let target = edges[heads[0]];
        for head in &heads[1..] {
            if edges[head] != target {
                let (a, b) = ordered_pair(reps[heads[0]], reps[head]);
                return Err(Error::ReleaseSemantic(format!(
                    "slices {} and {} have a non-linear 'prefer' relationship for path {}",
                    a, b, path
                )));
            }
        }
        for head in &heads[1..] {
            let first = info(heads[0]);
            let other = info(head);
            let equivalent = first.same_content(other)
                && !matches!(first.kind, PathKind::Copy | PathKind::Glob);
            if !equivalent {
                return Err(conflict_error(reps[heads[0]], reps[head], path));
            }
        }
        for head in &heads {
            ranks.insert(head.to_string(), 0);
        }
        target
    } else {
        heads[0]
    };

    let mut cur = start;
    let mut rank = 1;
    loop {
        ranks.insert(cur.to_string(), rank);
        match edges.get(cur) {
            Some(next) => {
                cur = next;
                rank += 1;
            }
            None => break,
        }
    }
    debug_assert_eq!(ranks.len(), reps.len());

    Ok(PathState {
        reps,
        ranks: Some(ranks),
    })
}

/// Reject cycles, including self-loops, following the prefer edges.
fn check_cycles(
    path: &str,
    reps: &BTreeMap<&str, &Slice>,
    edges: &BTreeMap<&str, &str>,
) -> Result<()> {
    let mut done: BTreeMap<&str, bool> = BTreeMap::new();
    for start in reps.keys() {
        if done.contains_key(start) {
            continue;
        }
        let mut trail: Vec<&str> = Vec::new();
        let mut cur = *start;
        loop {
            if let Some(pos) = trail.iter().position(|p| *p == cur) {
                let mut cycle: Vec<&str> = trail[pos..].to_vec();
                let min = cycle.iter().enumerate().min_by_key(|(_, p)| **p).unwrap().0;
                cycle.rotate_left(min);
                return Err(Error::ReleaseSemantic(format!(
                    "slice {} path {} has a 'prefer' cycle: {}",
                    reps[cycle[0]],
                    path,
                    cycle.join(", ")
                )));
            }
            if done.contains_key(cur) {
                break;
            }
            trail.push(cur);
            match edges.get(cur) {
                Some(next) => cur = next,
                None => break,
            }
        }
        for visited in trail {
            done.insert(visited, true);
        }
    }
    Ok(())
}

/// Check glob and generate patterns against every other distinct path.
fn check_globs(states: &BTreeMap<&str, PathState>) -> Result<()> {
    for (glob_path, glob_state) in states {
        let Some(old) = glob_state
            .reps
            .iter()
            .find(|(pkg, _)| {
                matches!(
                    glob_state.info(pkg, glob_path).kind,
                    PathKind::Glob | PathKind::Generate
                )
            })
            .map(|(_, rep)| *rep)
        else {
            continue;
        };
        let old_info = &old.contents[*glob_path];

        for (new_path, new_state) in states {
            if new_path == glob_path {
                // Identical patterns were reconciled by the per-path
                // resolution already.
                continue;
            }
            let mut new = *new_state.reps.values().next().unwrap();
            let new_info = &new.contents[*new_path];

            if matches!(new_info.kind, PathKind::Glob | PathKind::Copy)
                && new.package == old.package
                && !new_state.is_linear()
            {
                // Same-package extraction overlapping a same-package glob
                // is guaranteed consistent, unless the path is part of a
                // prefer chain and other packages contend for it.
                continue;
            }
            if pattern::overlap(new_path, glob_path).is_none() {
                continue;
            }
            if old_info.kind == PathKind::Glob
                && new_info.kind == PathKind::Copy
                && new.package == old.package
                && new_state.is_linear()
            {
                // The overlapping copy comes from the same package but is
                // the head of a prefer chain; report the next package in
                // the chain instead.
                if let Some(next) = new_state.info(&new.package, new_path).prefer.as_deref() {
                    new = new_state.reps[next];
                }
            }

            let (mut a, mut b) = (old, new);
            let (mut a_path, mut b_path) = (*glob_path, *new_path);
            if (a.package.as_str(), a.name.as_str(), a_path)
                > (b.package.as_str(), b.name.as_str(), b_path)
            {
                std::mem::swap(&mut a, &mut b);
                std::mem::swap(&mut a_path, &mut b_path);
            }
            return Err(Error::ReleaseSemantic(format!(
                "slices {} and {} conflict on {} and {}",
                a, b, a_path, b_path
            )));
        }
    }
    Ok(())
}

/// Check archive priorities are unique and package archive references
/// are defined.
fn check_archives(release: &Release) -> Result<()> {
    let mut priorities: BTreeMap<i32, &str> = BTreeMap::new();
    let mut archive_names: Vec<&String> = release.archives.keys().collect();
    archive_names.sort();
    for name in archive_names {
        let archive = &release.archives[name];
        if let Some(old) = priorities.get(&archive.priority) {
            let (a, b) = if *old < archive.name.as_str() {
                (*old, archive.name.as_str())
            } else {
                (archive.name.as_str(), *old)
            };
            return Err(Error::ReleaseSemantic(format!(
                "chisel.yaml: archives {:?} and {:?} have the same priority value of {}",
                a, b, archive.priority
            )));
        }
        priorities.insert(archive.priority, &archive.name);
    }

    let mut pkg_names: Vec<&String> = release.packages.keys().collect();
    pkg_names.sort();
    for name in pkg_names {
        let pkg = &release.packages[name];
        if pkg.archive.is_empty() {
            continue;
        }
        if !release.archives.contains_key(&pkg.archive) {
            return Err(Error::ReleaseSemantic(format!(
                "{}: package refers to undefined archive {:?}",
                pkg.path, pkg.archive
            )));
        }
    }
    Ok(())
}

fn conflict_error(a: &Slice, b: &Slice, path: &str) -> Error {
    let (a, b) = ordered_pair(a, b);
    Error::ReleaseSemantic(format!("slices {} and {} conflict on {}", a, b, path))
}

fn ordered_pair<'a>(a: &'a Slice, b: &'a Slice) -> (&'a Slice, &'a Slice) {
    if (a.package.as_str(), a.name.as_str()) > (b.package.as_str(), b.name.as_str()) {
        (b, a)
    } else {
        (a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::release::{Archive, GenerateKind, PathInfo, SliceScripts};

    fn slice(package: &str, name: &str, contents: &[(&str, PathInfo)]) -> Slice {
        Slice {
            package: package.to_string(),
            name: name.to_string(),
            essential: Vec::new(),
            contents: contents
                .iter()
                .map(|(p, i)| (p.to_string(), i.clone()))
                .collect(),
            scripts: SliceScripts::default(),
        }
    }

    fn release_with(slices: Vec<Slice>) -> Release {
        let mut packages: HashMap<String, Package> = HashMap::new();
        for s in slices {
            let pkg = packages.entry(s.package.clone()).or_insert_with(|| Package {
                name: s.package.clone(),
                path: format!("slices/{}.yaml", s.package),
                archive: String::new(),
                slices: HashMap::new(),
            });
            pkg.slices.insert(s.name.clone(), s);
        }
        Release {
            packages,
            ..Default::default()
        }
    }

    fn copy() -> PathInfo {
        PathInfo::default()
    }

    fn copy_prefer(pkg: &str) -> PathInfo {
        PathInfo {
            prefer: Some(pkg.to_string()),
            ..Default::default()
        }
    }

    fn text(data: &str) -> PathInfo {
        PathInfo {
            kind: PathKind::Text,
            info: Some(data.to_string()),
            ..Default::default()
        }
    }

    fn manifest_glob() -> PathInfo {
        PathInfo {
            kind: PathKind::Generate,
            generate: GenerateKind::Manifest,
            ..Default::default()
        }
    }

    #[test]
    fn test_same_package_divergence() {
        let mut release = release_with(vec![
            slice("mypkg", "one", &[("/etc/cfg", text("a"))]),
            slice("mypkg", "two", &[("/etc/cfg", text("b"))]),
        ]);
        let err = validate(&mut release).unwrap_err();
        assert_eq!(
            err.to_string(),
            "slices mypkg_one and mypkg_two conflict on /etc/cfg"
        );
    }

    #[test]
    fn test_same_package_equal_declarations() {
        let mut release = release_with(vec![
            slice("mypkg", "one", &[("/etc/cfg", text("a"))]),
            slice("mypkg", "two", &[("/etc/cfg", text("a"))]),
        ]);
        validate(&mut release).unwrap();
        assert!(release.conflict_ranks.is_empty());
    }

    #[test]
    fn test_cross_package_equivalent_text() {
        let mut release = release_with(vec![
            slice("pkga", "one", &[("/etc/cfg", text("same"))]),
            slice("pkgb", "one", &[("/etc/cfg", text("same"))]),
        ]);
        validate(&mut release).unwrap();
        assert!(release.conflict_ranks.is_empty());
    }

    #[test]
    fn test_cross_package_copy_conflicts() {
        let mut release = release_with(vec![
            slice("pkga", "one", &[("/usr/bin/tool", copy())]),
            slice("pkgb", "one", &[("/usr/bin/tool", copy())]),
        ]);
        let err = validate(&mut release).unwrap_err();
        assert_eq!(
            err.to_string(),
            "slices pkga_one and pkgb_one conflict on /usr/bin/tool"
        );
    }

    #[test]
    fn test_prefer_chain_ranks() {
        let mut release = release_with(vec![
            slice("pkga", "one", &[("/etc/cfg", copy_prefer("pkgb"))]),
            slice("pkgb", "one", &[("/etc/cfg", copy_prefer("pkgc"))]),
            slice("pkgc", "one", &[("/etc/cfg", copy())]),
        ]);
        validate(&mut release).unwrap();
        let ranks = &release.conflict_ranks["/etc/cfg"];
        assert_eq!(ranks["pkga"], 1);
        assert_eq!(ranks["pkgb"], 2);
        assert_eq!(ranks["pkgc"], 3);
    }

    #[test]
    fn test_equivalent_heads_rank_zero() {
        let head = PathInfo {
            kind: PathKind::Text,
            info: Some("same".to_string()),
            prefer: Some("pkgp".to_string()),
            ..Default::default()
        };
        let mut release = release_with(vec![
            slice("pkga", "one", &[("/etc/cfg", head.clone())]),
            slice("pkgb", "one", &[("/etc/cfg", head.clone())]),
            slice("pkgp", "one", &[("/etc/cfg", copy())]),
        ]);
        validate(&mut release).unwrap();
        let ranks = &release.conflict_ranks["/etc/cfg"];
        assert_eq!(ranks["pkga"], 0);
        assert_eq!(ranks["pkgb"], 0);
        assert_eq!(ranks["pkgp"], 1);
    }

    #[test]
    fn test_copy_heads_never_equivalent() {
        let mut release = release_with(vec![
            slice("pkga", "one", &[("/etc/cfg", copy_prefer("pkgp"))]),
            slice("pkgb", "one", &[("/etc/cfg", copy_prefer("pkgp"))]),
            slice("pkgc", "one", &[("/etc/cfg", copy())]),
            slice("pkgp", "one", &[("/etc/cfg", copy_prefer("pkgc"))]),
        ]);
        let err = validate(&mut release).unwrap_err();
        assert_eq!(
            err.to_string(),
            "slices pkga_one and pkgb_one conflict on /etc/cfg"
        );
    }

    #[test]
    fn test_prefer_self_loop() {
        let mut release = release_with(vec![slice(
            "mypkg",
            "one",
            &[("/etc/cfg", copy_prefer("mypkg"))],
        )]);
        let err = validate(&mut release).unwrap_err();
        assert_eq!(
            err.to_string(),
            "slice mypkg_one path /etc/cfg has a 'prefer' cycle: mypkg"
        );
    }

    #[test]
    fn test_prefer_cycle() {
        let mut release = release_with(vec![
            slice("pkga", "one", &[("/etc/cfg", copy_prefer("pkgb"))]),
            slice("pkgb", "one", &[("/etc/cfg", copy_prefer("pkga"))]),
        ]);
        let err = validate(&mut release).unwrap_err();
        assert_eq!(
            err.to_string(),
            "slice pkga_one path /etc/cfg has a 'prefer' cycle: pkga, pkgb"
        );
    }

    #[test]
    fn test_prefer_y_fork() {
        // pkga -> pkgb -> pkgd and pkgc -> pkgd join at different points.
        let mut release = release_with(vec![
            slice("pkga", "one", &[("/etc/cfg", copy_prefer("pkgb"))]),
            slice("pkgb", "one", &[("/etc/cfg", copy_prefer("pkgd"))]),
            slice("pkgc", "one", &[("/etc/cfg", copy_prefer("pkgd"))]),
            slice("pkgd", "one", &[("/etc/cfg", copy())]),
        ]);
        let err = validate(&mut release).unwrap_err();
        assert_eq!(
            err.to_string(),
            "slices pkga_one and pkgc_one have a non-linear 'prefer' relationship for path /etc/cfg"
        );
    }

    #[test]
    fn test_prefer_disconnected() {
        let mut release = release_with(vec![
            slice("pkga", "one", &[("/etc/cfg", copy_prefer("pkgb"))]),
            slice("pkgb", "one", &[("/etc/cfg", copy())]),
            slice("pkgc", "one", &[("/etc/cfg", copy())]),
        ]);
        let err = validate(&mut release).unwrap_err();
        assert_eq!(
            err.to_string(),
            "slices pkgb_one and pkgc_one have no 'prefer' relationship for path /etc/cfg"
        );
    }

    #[test]
    fn test_prefer_undefined_package() {
        let mut release = release_with(vec![slice(
            "mypkg",
            "one",
            &[("/etc/cfg", copy_prefer("ghost"))],
        )]);
        let err = validate(&mut release).unwrap_err();
        assert_eq!(
            err.to_string(),
            "slice mypkg_one has invalid 'prefer' for path /etc/cfg: \"ghost\""
        );
    }

    #[test]
    fn test_prefer_target_without_path() {
        let mut release = release_with(vec![
            slice("mypkg", "one", &[("/etc/cfg", copy_prefer("other"))]),
            slice("other", "one", &[("/etc/unrelated", copy())]),
        ]);
        let err = validate(&mut release).unwrap_err();
        assert_eq!(
            err.to_string(),
            "slice mypkg_one path /etc/cfg prefers \"other\": package other does not have path /etc/cfg"
        );
    }

    #[test]
    fn test_glob_vs_concrete_across_packages() {
        let mut release = release_with(vec![
            slice("a-pkg", "files", &[("/dir/file", copy())]),
            slice("b-pkg", "manifest", &[("/dir/**", manifest_glob())]),
        ]);
        let err = validate(&mut release).unwrap_err();
        assert_eq!(
            err.to_string(),
            "slices a-pkg_files and b-pkg_manifest conflict on /dir/file and /dir/**"
        );
    }

    #[test]
    fn test_same_package_glob_and_concrete() {
        let mut release = release_with(vec![
            slice("mypkg", "files", &[("/dir/file", copy())]),
            slice("mypkg", "manifest", &[("/dir/**", manifest_glob())]),
        ]);
        validate(&mut release).unwrap();
    }

    #[test]
    fn test_glob_vs_glob_across_packages() {
        let glob = PathInfo {
            kind: PathKind::Glob,
            ..Default::default()
        };
        let mut release = release_with(vec![
            slice("pkga", "libs", &[("/lib/**", glob.clone())]),
            slice(
                "pkgb",
                "libs",
                &[(
                    "/lib/x86/*.so",
                    PathInfo {
                        kind: PathKind::Glob,
                        ..Default::default()
                    },
                )],
            ),
        ]);
        let err = validate(&mut release).unwrap_err();
        assert_eq!(
            err.to_string(),
            "slices pkga_libs and pkgb_libs conflict on /lib/** and /lib/x86/*.so"
        );
    }

    #[test]
    fn test_archive_priority_duplicate() {
        let mut release = release_with(vec![slice("mypkg", "one", &[])]);
        for (name, priority) in [("main", 10), ("extra", 10)] {
            release.archives.insert(
                name.to_string(),
                Archive {
                    name: name.to_string(),
                    version: "24.04".to_string(),
                    suites: vec![],
                    components: vec![],
                    priority,
                    pro: None,
                    pub_keys: vec![],
                },
            );
        }
        let err = validate(&mut release).unwrap_err();
        assert_eq!(
            err.to_string(),
            "chisel.yaml: archives \"extra\" and \"main\" have the same priority value of 10"
        );
    }

    #[test]
    fn test_undefined_archive_reference() {
        let mut release = release_with(vec![slice("mypkg", "one", &[])]);
        release.packages.get_mut("mypkg").unwrap().archive = "ghost".to_string();
        let err = validate(&mut release).unwrap_err();
        assert_eq!(
            err.to_string(),
            "slices/mypkg.yaml: package refers to undefined archive \"ghost\""
        );
    }
}
