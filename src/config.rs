//! Resolved filesystem layout and the built-in seed registry.
//!
//! `Paths` is constructed once in `main` and passed explicitly to every
//! component; nothing below this module reads ambient process state to find
//! the roots.

use crate::seeds::{Registry, SeedSource, SeedSpec};
use anyhow::{anyhow, Context, Result};
use std::env;
use std::path::PathBuf;

/// Where everything lives on the host.
///
/// Two independent root trees: `work_root` holds one persistent project
/// directory per environment, `home_root` holds one reconstructible sandbox
/// home per environment (seed materializations included, under `seed-<key>`
/// names).
#[derive(Debug, Clone)]
pub struct Paths {
    pub work_root: PathBuf,
    pub home_root: PathBuf,
    /// Directory holding the bootstrap/update scripts and the seccomp filter.
    pub assets_dir: PathBuf,
    pub cache_dir: PathBuf,
    /// The real user home path; the sandbox home is bound at this same path
    /// inside the sandbox.
    pub real_home: PathBuf,
    pub hostname: String,
}

impl Paths {
    pub fn discover() -> Result<Self> {
        let cache_dir = dirs::cache_dir().ok_or_else(|| anyhow!("cannot determine cache directory"))?;
        let real_home = dirs::home_dir().ok_or_else(|| anyhow!("cannot determine home directory"))?;
        let assets_dir = match env::var_os("BOXES_ASSETS") {
            Some(dir) => PathBuf::from(dir),
            None => {
                let exe = env::current_exe().context("resolve current executable")?;
                exe.parent()
                    .ok_or_else(|| anyhow!("executable path has no parent"))?
                    .to_path_buf()
            }
        };
        let work_root = match env::var_os("BOXES_WORK_ROOT") {
            Some(dir) => PathBuf::from(dir),
            None => assets_dir.join("work"),
        };
        let home_root = match env::var_os("BOXES_HOME_ROOT") {
            Some(dir) => PathBuf::from(dir),
            None => cache_dir.join("boxes").join("home"),
        };
        Ok(Self {
            work_root,
            home_root,
            assets_dir,
            cache_dir,
            real_home,
            hostname: hostname(),
        })
    }

    pub fn work_dir(&self, name: &str) -> PathBuf {
        self.work_root.join(name)
    }

    pub fn home_dir(&self, name: &str) -> PathBuf {
        self.home_root.join(name)
    }

    /// The init script that bootstraps a fresh home from the seed archive.
    pub fn bootstrap_script(&self) -> PathBuf {
        self.assets_dir.join("dev-init.sh")
    }

    /// Compiled seccomp program applied to every sandbox.
    pub fn seccomp_filter(&self) -> PathBuf {
        self.assets_dir.join("podman.bpf")
    }
}

fn hostname() -> String {
    let mut buf = [0u8; 256];
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast::<libc::c_char>(), buf.len()) };
    if rc == 0 {
        let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        if let Ok(name) = std::str::from_utf8(&buf[..len]) {
            if !name.is_empty() {
                return name.to_string();
            }
        }
    }
    "localhost".to_string()
}

/// The static seed graph. Built once at startup; never mutated.
pub fn default_registry(paths: &Paths) -> Registry {
    let mut registry = Registry::new();
    registry.insert(
        "configs".to_string(),
        SeedSpec {
            source: SeedSource::Directory(paths.real_home.clone()),
            include: strings(&[
                ".bashrc",
                ".gdbinit",
                ".gitconfig",
                ".gitignore",
                ".ipython",
                ".npmrc",
                ".profile",
                ".sqliterc",
                ".vimrc",
                ".zshenv",
                ".zshrc",
                "configs",
            ]),
            depends: Vec::new(),
            updater: None,
        },
    );
    registry.insert(
        "firefox".to_string(),
        SeedSpec {
            source: SeedSource::Materialized,
            include: strings(&[
                ".dev-init/firefox.sh",
                ".mozilla/firefox",
                "bin/firefox",
                "opt/firefox",
            ]),
            depends: Vec::new(),
            updater: Some(paths.assets_dir.join("firefox-update.sh")),
        },
    );
    registry.insert(
        "go".to_string(),
        SeedSpec {
            source: SeedSource::Materialized,
            include: strings(&["go"]),
            depends: Vec::new(),
            updater: Some(paths.assets_dir.join("go-update.sh")),
        },
    );
    registry.insert(
        "mold".to_string(),
        SeedSpec {
            source: SeedSource::Materialized,
            include: strings(&[".cargo/config.toml", "bin/mold"]),
            depends: Vec::new(),
            updater: Some(paths.assets_dir.join("mold-update.sh")),
        },
    );
    registry.insert(
        "node".to_string(),
        SeedSpec {
            source: SeedSource::Materialized,
            include: strings(&[".cache/node-versions.json", ".npm", "opt/node"]),
            depends: strings(&["configs"]),
            updater: Some(paths.assets_dir.join("node-update.sh")),
        },
    );
    registry.insert(
        "python".to_string(),
        SeedSpec {
            source: SeedSource::Materialized,
            include: strings(&[".pylama.ini", "opt/python"]),
            depends: Vec::new(),
            updater: Some(paths.assets_dir.join("python-update.sh")),
        },
    );
    registry.insert(
        "rust".to_string(),
        SeedSpec {
            source: SeedSource::Materialized,
            include: strings(&[
                ".cargo",
                ".local/share/bash-completion/completions",
                ".rustup",
                ".zfunc",
            ]),
            depends: strings(&["mold"]),
            updater: Some(paths.assets_dir.join("rust-update.sh")),
        },
    );
    registry.insert(
        "vscodium".to_string(),
        SeedSpec {
            source: SeedSource::Materialized,
            include: strings(&[
                ".dev-init/vscodium.sh",
                ".vscode-oss",
                "bin/codium",
                "opt/vscodium",
            ]),
            depends: Vec::new(),
            updater: Some(paths.assets_dir.join("vscodium-update.sh")),
        },
    );
    registry
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| (*value).to_string()).collect()
}

#[cfg(test)]
pub(crate) fn test_paths(root: &std::path::Path) -> Paths {
    Paths {
        work_root: root.join("work"),
        home_root: root.join("home"),
        assets_dir: root.join("assets"),
        cache_dir: root.join("cache"),
        real_home: root.join("realhome"),
        hostname: "testhost".to_string(),
    }
}
