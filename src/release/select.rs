// src/release/select.rs

//! Slice selection: dependency closure and ordering.
//!
//! Selecting slices expands the requested set with every essential slice,
//! transitively, then orders the result so that essentials always precede
//! the slices that require them.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use super::graph::tarjan_sort;
use super::{GenerateKind, Package, PathKind, Release, Selection, SliceKey};
use crate::error::{Error, Result};

/// Expand `keys` with essentials and return the closed set in
/// dependencies-first order.
pub(crate) fn order(
    packages: &HashMap<String, Package>,
    keys: &[SliceKey],
) -> Result<Vec<SliceKey>> {
    // Check the explicit request first to improve error messages.
    for key in keys {
        match packages.get(&key.package) {
            None => {
                return Err(Error::Selection(format!(
                    "slices of package {:?} not found",
                    key.package
                )));
            }
            Some(pkg) => {
                if !pkg.slices.contains_key(&key.slice) {
                    return Err(Error::Selection(format!("slice {} not found", key)));
                }
            }
        }
    }

    // Collect all relevant package slices.
    let mut successors: HashMap<String, Vec<String>> = HashMap::new();
    let mut pending: Vec<SliceKey> = keys.to_vec();
    let mut seen: HashSet<SliceKey> = HashSet::new();

    let mut i = 0;
    while i < pending.len() {
        let key = pending[i].clone();
        i += 1;
        if !seen.insert(key.clone()) {
            continue;
        }
        let slice = &packages[&key.package].slices[&key.slice];
        let fqslice = slice.full_name();
        let mut requires = successors.remove(&fqslice).unwrap_or_default();
        for req in &slice.essential {
            let fqreq = req.to_string();
            let defined = packages
                .get(&req.package)
                .is_some_and(|p| p.slices.contains_key(&req.slice));
            if !defined {
                return Err(Error::Selection(format!(
                    "{} requires {}, but slice is missing",
                    fqslice, fqreq
                )));
            }
            if fqreq == fqslice {
                return Err(Error::ReleaseSemantic(format!(
                    "essential loop detected: {}",
                    fqslice
                )));
            }
            requires.push(fqreq);
        }
        successors.insert(fqslice, requires);
        pending.extend(slice.essential.iter().cloned());
    }

    // Sort them up.
    let mut ordered = Vec::new();
    for names in tarjan_sort(&successors) {
        if names.len() > 1 {
            return Err(Error::ReleaseSemantic(format!(
                "essential loop detected: {}",
                names.join(", ")
            )));
        }
        let name = &names[0];
        let (package, slice) = name
            .split_once('_')
            .expect("slice names are validated on load");
        ordered.push(SliceKey::new(package, slice));
    }

    Ok(ordered)
}

/// Build a [`Selection`] for the requested slice keys.
pub fn select<'a>(release: &'a Release, keys: &[SliceKey]) -> Result<Selection<'a>> {
    debug!("selecting {} requested slices", keys.len());

    let sorted = order(&release.packages, keys)?;
    let slices = sorted
        .iter()
        .map(|key| &release.packages[&key.package].slices[&key.slice])
        .collect::<Vec<_>>();

    for slice in &slices {
        for (path, info) in &slice.contents {
            if info.kind == PathKind::Generate && info.generate == GenerateKind::None {
                return Err(Error::Selection(format!(
                    "slice {} has invalid 'generate' for path {}",
                    slice, path
                )));
            }
        }
    }

    debug!("selection closed over {} slices", slices.len());
    Ok(Selection { release, slices })
}
