//! Environment lifecycle: create, reset, purge, enter, exec, tmp.

use crate::config::Paths;
use crate::launcher::{self, IsolationRunner};
use crate::seeds::Registry;
use crate::update;
use anyhow::{bail, Context, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::process::Command;

/// Directory presence for an environment, computed once per operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvState {
    Absent,
    WorkOnly,
    HomeOnly,
    Full,
}

impl EnvState {
    pub fn has_work(self) -> bool {
        matches!(self, EnvState::WorkOnly | EnvState::Full)
    }
}

pub fn env_state(paths: &Paths, name: &str) -> EnvState {
    match (
        paths.work_dir(name).exists(),
        paths.home_dir(name).exists(),
    ) {
        (false, false) => EnvState::Absent,
        (true, false) => EnvState::WorkOnly,
        (false, true) => EnvState::HomeOnly,
        (true, true) => EnvState::Full,
    }
}

pub fn new_environment(
    paths: &Paths,
    registry: &Registry,
    runner: &dyn IsolationRunner,
    name: &str,
    seeds: &[String],
) -> Result<()> {
    if env_state(paths, name) != EnvState::Absent {
        bail!("environment '{name}' exists (did you mean 'boxes reset'?)");
    }
    update::update_seeds(paths, registry, runner)?;
    let work_dir = paths.work_dir(name);
    fs::create_dir_all(&work_dir).with_context(|| format!("create {}", work_dir.display()))?;
    launcher::launch(
        paths,
        registry,
        runner,
        name,
        seeds,
        Some(&paths.bootstrap_script()),
        None,
    )
}

pub fn reset_environment(
    paths: &Paths,
    registry: &Registry,
    runner: &dyn IsolationRunner,
    name: &str,
    seeds: &[String],
    clean: bool,
) -> Result<()> {
    if name.starts_with("seed-") {
        bail!(
            "resetting a seed environment is unlikely to work as expected \
             (did you mean 'boxes purge'?)"
        );
    }
    if !env_state(paths, name).has_work() {
        bail!("environment '{name}' does not exist (did you mean 'boxes new'?)");
    }
    let host_home = paths.home_dir(name);
    if host_home.exists() {
        remove_tree_forced(&host_home)?;
    }
    if clean {
        return Ok(());
    }
    update::update_seeds(paths, registry, runner)?;
    launcher::launch(
        paths,
        registry,
        runner,
        name,
        seeds,
        Some(&paths.bootstrap_script()),
        None,
    )
}

pub fn purge_environment(paths: &Paths, name: &str) -> Result<()> {
    let host_work = paths.work_dir(name);
    let host_home = paths.home_dir(name);
    if !host_work.exists() && !host_home.exists() {
        tracing::warn!("environment '{name}' does not exist (nothing to purge)");
        return Ok(());
    }
    if host_work.exists() {
        remove_tree_forced(&host_work)?;
    }
    if host_home.exists() {
        remove_tree_forced(&host_home)?;
    }
    Ok(())
}

pub fn enter_environment(
    paths: &Paths,
    registry: &Registry,
    runner: &dyn IsolationRunner,
    name: &str,
) -> Result<()> {
    if !env_state(paths, name).has_work() {
        bail!("environment '{name}' does not exist");
    }
    launcher::launch(paths, registry, runner, name, &[], None, None)
}

pub fn exec_environment(
    paths: &Paths,
    registry: &Registry,
    runner: &dyn IsolationRunner,
    name: &str,
    command: &str,
    args: &[String],
) -> Result<()> {
    if !env_state(paths, name).has_work() {
        bail!("environment '{name}' does not exist");
    }
    let mut vector = Vec::with_capacity(args.len() + 1);
    vector.push(command.to_string());
    vector.extend(args.iter().cloned());
    launcher::launch(paths, registry, runner, name, &[], None, Some(&vector))
}

/// Create and enter a fresh `tmp-<candidate>` environment under the first
/// candidate whose name is not already taken by a work or home directory.
pub fn tmp_environment(
    paths: &Paths,
    registry: &Registry,
    runner: &dyn IsolationRunner,
    seeds: &[String],
    candidates: impl IntoIterator<Item = String>,
) -> Result<()> {
    for candidate in candidates {
        let name = format!("tmp-{candidate}");
        if env_state(paths, &name) != EnvState::Absent {
            continue;
        }
        update::update_seeds(paths, registry, runner)?;
        let work_dir = paths.work_dir(&name);
        fs::create_dir_all(&work_dir)
            .with_context(|| format!("create {}", work_dir.display()))?;
        launcher::launch(
            paths,
            registry,
            runner,
            &name,
            seeds,
            Some(&paths.bootstrap_script()),
            None,
        )?;
        return launcher::launch(paths, registry, runner, &name, &[], None, None);
    }
    bail!("environment name space exhausted");
}

/// Delete a tree, forcing owner permissions when a read-only subtree (a Go
/// package cache, say) blocks the first attempt.
fn remove_tree_forced(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::PermissionDenied => {
            let status = Command::new("chmod")
                .args(["-R", "u+rwX"])
                .arg(path)
                .status()
                .context("spawn chmod")?;
            if !status.success() {
                bail!("chmod -R u+rwX {} exited with {status}", path.display());
            }
            fs::remove_dir_all(path).with_context(|| format!("remove {}", path.display()))
        }
        Err(err) => Err(err).with_context(|| format!("remove {}", path.display())),
    }
}
