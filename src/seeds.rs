//! Seed specifications, selection parsing, and the dependency resolver.

use anyhow::{bail, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// A named, cacheable set of files injected into a sandbox home.
#[derive(Debug, Clone)]
pub struct SeedSpec {
    pub source: SeedSource,
    /// Paths, relative to `source`, extracted into the archive in order.
    pub include: Vec<String>,
    /// Seeds that must be materialized before this one.
    pub depends: Vec<String>,
    /// Idempotent refresh script; seeds without one are never updated.
    pub updater: Option<PathBuf>,
}

/// Where a seed's files come from.
#[derive(Debug, Clone)]
pub enum SeedSource {
    /// A fixed host directory.
    Directory(PathBuf),
    /// The seed's own materialized home directory (`<home_root>/seed-<key>`).
    Materialized,
}

pub type Registry = BTreeMap<String, SeedSpec>;

/// Compute an update order where every seed follows its dependencies.
///
/// Layered elimination: each round moves every seed whose dependencies are
/// already ordered; a round that moves nothing means a cycle or a reference
/// to an unknown seed key.
pub fn resolve_order(registry: &Registry) -> Result<Vec<String>> {
    let mut ordered = Vec::with_capacity(registry.len());
    let mut done: BTreeSet<&str> = BTreeSet::new();
    let mut todo: Vec<&String> = registry.keys().collect();
    while !todo.is_empty() {
        let round = todo.len();
        let mut later = Vec::new();
        for key in todo.drain(..) {
            let spec = &registry[key];
            if spec.depends.iter().all(|dep| done.contains(dep.as_str())) {
                done.insert(key.as_str());
                ordered.push(key.clone());
            } else {
                later.push(key);
            }
        }
        if later.len() == round {
            bail!(
                "seed dependencies are unsatisfiable for: {}",
                later
                    .iter()
                    .map(|key| key.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
        todo = later;
    }
    Ok(ordered)
}

/// Which seeds an operation asked for, before registry validation.
#[derive(Debug, Clone)]
pub enum SeedSelection {
    None,
    Default,
    All,
    Subset(Vec<String>),
}

/// Parse the `--seeds` value. Key validation happens at resolution time so
/// the error can list the registry's keys.
pub fn parse_selection(raw: &str) -> Result<SeedSelection, String> {
    Ok(match raw {
        "" | "none" => SeedSelection::None,
        "default" => SeedSelection::Default,
        "all" => SeedSelection::All,
        _ => SeedSelection::Subset(raw.split(',').map(str::to_string).collect()),
    })
}

impl SeedSelection {
    /// Resolve to concrete registry keys, rejecting unknown ones.
    pub fn resolve(&self, registry: &Registry) -> Result<Vec<String>> {
        match self {
            SeedSelection::None => Ok(Vec::new()),
            SeedSelection::Default | SeedSelection::All => {
                Ok(registry.keys().cloned().collect())
            }
            SeedSelection::Subset(keys) => {
                for key in keys {
                    if !registry.contains_key(key) {
                        let options = registry
                            .keys()
                            .map(|k| format!("'{k}'"))
                            .collect::<Vec<_>>()
                            .join(", ");
                        bail!(
                            "invalid seed '{key}' (use 'none', 'default', or 'all', \
                             or a comma-separated list from {options})"
                        );
                    }
                }
                Ok(keys.clone())
            }
        }
    }
}
