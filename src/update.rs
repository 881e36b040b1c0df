//! Seed refresh driver: staleness decisions plus the batched update pass.

use crate::config::Paths;
use crate::launcher::{self, IsolationRunner};
use crate::seeds::{resolve_order, Registry};
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Minimum interval before a seed is re-updated even if its updater changed.
pub const UPDATE_COOLDOWN_SECS: u64 = 60 * 60 * 12;

pub fn now_secs() -> Result<u64> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock is before the epoch")?;
    Ok(now.as_secs())
}

/// Whether a seed's updater should run.
///
/// Skip only when the updater has not changed since the last successful
/// update and that update is inside the cool-down window.
pub fn refresh_due(updater_mtime: u64, marker_mtime: u64, now: u64) -> bool {
    !(updater_mtime < marker_mtime && now.saturating_sub(marker_mtime) < UPDATE_COOLDOWN_SECS)
}

/// Bring every seed in the registry up to date, dependencies first.
pub fn update_seeds(
    paths: &Paths,
    registry: &Registry,
    runner: &dyn IsolationRunner,
) -> Result<()> {
    let now = now_secs()?;
    for key in resolve_order(registry)? {
        update_seed(paths, registry, runner, &key, now)
            .with_context(|| format!("update seed '{key}'"))?;
    }
    Ok(())
}

fn update_seed(
    paths: &Paths,
    registry: &Registry,
    runner: &dyn IsolationRunner,
    key: &str,
    now: u64,
) -> Result<()> {
    let spec = &registry[key];
    let Some(updater) = &spec.updater else {
        return Ok(());
    };
    let name = format!("seed-{key}");
    let work_dir = paths.work_dir(&name);
    if !work_dir.exists() {
        fs::create_dir_all(&work_dir)
            .with_context(|| format!("create {}", work_dir.display()))?;
    }
    let marker_mtime = mtime_secs(&paths.home_dir(&name).join(".UPDATED")).unwrap_or(0);
    let updater_mtime = fs::metadata(updater)
        .and_then(|meta| meta.modified())
        .with_context(|| format!("stat updater {}", updater.display()))?
        .duration_since(UNIX_EPOCH)
        .context("updater mtime is before the epoch")?
        .as_secs();
    if !refresh_due(updater_mtime, marker_mtime, now) {
        return Ok(());
    }
    println!("updating {key} seed");
    // Bootstrap a minimal home from the seed's own dependencies, then let the
    // updater leave its artifacts and touch .UPDATED itself.
    launcher::launch(
        paths,
        registry,
        runner,
        &name,
        &spec.depends,
        Some(&paths.bootstrap_script()),
        None,
    )?;
    launcher::launch(paths, registry, runner, &name, &[], Some(updater), None)?;
    Ok(())
}

fn mtime_secs(path: &Path) -> Option<u64> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    let since_epoch = modified.duration_since(UNIX_EPOCH).ok()?;
    Some(since_epoch.as_secs())
}
