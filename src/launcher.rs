//! Sandbox invocation: bind-mount spec construction, seed-archive piping,
//! and the isolation runner.
//!
//! The launcher drives at most two children per launch: a `tar` producer
//! streaming the seed archive and the isolated process consuming it through
//! a passed file descriptor. Isolation itself is delegated to `bwrap`; the
//! `IsolationRunner` trait keeps spec construction testable without creating
//! namespaces.

use crate::config::Paths;
use crate::seeds::{Registry, SeedSource};
use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::ffi::OsString;
use std::fs::{self, File};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

/// One launch's worth of isolation directives. Never persisted.
pub struct SandboxInvocation {
    /// Arguments to the isolation tool, program name excluded.
    pub args: Vec<OsString>,
    /// The complete child environment; nothing else leaks through.
    pub env: Vec<(String, String)>,
    /// Descriptors the child must inherit (archive pipe read end, seccomp
    /// filter). The runner closes the parent copies right after spawning so
    /// an unread archive pipe delivers SIGPIPE to the producer.
    pub pass_fds: Vec<OwnedFd>,
}

pub trait IsolationRunner {
    fn run(&self, invocation: SandboxInvocation) -> Result<ExitStatus>;
}

/// Production runner backed by bubblewrap.
pub struct BwrapRunner {
    bwrap: PathBuf,
}

impl BwrapRunner {
    pub fn locate() -> Result<Self> {
        let bwrap = which::which("bwrap").context("bwrap not found in PATH")?;
        Ok(Self { bwrap })
    }
}

impl IsolationRunner for BwrapRunner {
    fn run(&self, invocation: SandboxInvocation) -> Result<ExitStatus> {
        let mut cmd = Command::new(&self.bwrap);
        for arg in &invocation.args {
            cmd.arg(arg);
        }
        cmd.env_clear();
        for (key, value) in &invocation.env {
            cmd.env(key, value);
        }
        let raw_fds: Vec<RawFd> = invocation
            .pass_fds
            .iter()
            .map(|fd| fd.as_raw_fd())
            .collect();
        unsafe {
            cmd.pre_exec(move || {
                // Passed descriptors must survive exec.
                for &fd in &raw_fds {
                    if libc::fcntl(fd, libc::F_SETFD, 0) == -1 {
                        return Err(std::io::Error::last_os_error());
                    }
                }
                Ok(())
            });
        }
        let mut child = cmd.spawn().context("spawn bwrap")?;
        drop(invocation.pass_fds);
        let status = child.wait().context("wait for bwrap")?;
        Ok(status)
    }
}

/// Run one isolated process for `name` and block until it exits.
///
/// `seeds` are archived in caller order and exposed at /dev/shm/seed.tar;
/// `init` is staged at /dev/shm/init.sh and takes precedence over `command`;
/// with neither, the shell runs interactively.
pub fn launch(
    paths: &Paths,
    registry: &Registry,
    runner: &dyn IsolationRunner,
    name: &str,
    seeds: &[String],
    init: Option<&Path>,
    command: Option<&[String]>,
) -> Result<()> {
    let host_home = paths.home_dir(name);
    fs::create_dir_all(&host_home)
        .with_context(|| format!("create {}", host_home.display()))?;

    let shell = env::var("SHELL").context("SHELL is not set")?;

    let mut archiver = None;
    let mut archive_fd = None;
    if !seeds.is_empty() {
        let tar = which::which("tar").context("tar not found in PATH")?;
        let tar_args = archive_args(paths, registry, seeds)?;
        let mut child = Command::new(tar)
            .arg("-c")
            .args(tar_args)
            .stdout(Stdio::piped())
            .spawn()
            .context("spawn tar")?;
        archive_fd = child.stdout.take().map(OwnedFd::from);
        archiver = Some(child);
    }

    let filter_path = paths.seccomp_filter();
    let filter = File::open(&filter_path)
        .with_context(|| format!("open seccomp filter {}", filter_path.display()))?;
    let filter_fd = OwnedFd::from(filter);

    let args = bwrap_args(
        paths,
        name,
        &shell,
        init,
        archive_fd.as_ref().map(AsRawFd::as_raw_fd),
        filter_fd.as_raw_fd(),
        command,
    );
    let env = sandbox_env(paths, name, &shell);
    let mut pass_fds = Vec::new();
    if let Some(fd) = archive_fd {
        pass_fds.push(fd);
    }
    pass_fds.push(filter_fd);

    let status = runner.run(SandboxInvocation {
        args,
        env,
        pass_fds,
    })?;
    if !status.success() {
        bail!("bwrap exited with {status} in environment '{name}'");
    }

    if let Some(mut child) = archiver {
        // SIGPIPE when nothing consumed the archive is the normal case here,
        // so the status is only logged.
        let tar_status = child.wait().context("wait for tar")?;
        if !tar_status.success() {
            tracing::debug!("archiver exited with {tar_status}");
        }
    }
    Ok(())
}

/// Arguments for the `tar -c` producer: one `--directory` switch per seed,
/// in caller order, each followed by that seed's include paths.
fn archive_args(paths: &Paths, registry: &Registry, seeds: &[String]) -> Result<Vec<OsString>> {
    let mut args = Vec::new();
    for key in seeds {
        let spec = registry
            .get(key)
            .ok_or_else(|| anyhow!("unknown seed '{key}'"))?;
        args.push("--directory".into());
        match &spec.source {
            SeedSource::Directory(dir) => args.push(dir.as_os_str().into()),
            SeedSource::Materialized => {
                args.push(paths.home_dir(&format!("seed-{key}")).into_os_string());
            }
        }
        for include in &spec.include {
            args.push(include.into());
        }
    }
    Ok(args)
}

fn bwrap_args(
    paths: &Paths,
    name: &str,
    shell: &str,
    init: Option<&Path>,
    archive_fd: Option<RawFd>,
    filter_fd: RawFd,
    command: Option<&[String]>,
) -> Vec<OsString> {
    let home = &paths.real_home;
    let host_home = paths.home_dir(name);
    let host_work = paths.work_dir(name);
    let sandbox_work = home.join(name);

    let mut args: Vec<OsString> = Vec::new();
    push_str(&mut args, &["--die-with-parent"]);
    push_str(
        &mut args,
        &["--unshare-cgroup", "--unshare-ipc", "--unshare-pid", "--unshare-uts"],
    );
    push_str(&mut args, &["--hostname"]);
    args.push(format!("{name}.{}", paths.hostname).into());
    push_str(&mut args, &["--symlink", "/usr/bin", "/bin"]);
    push_str(&mut args, &["--dev", "/dev"]);
    if let Some(init) = init {
        push_str(&mut args, &["--ro-bind-try"]);
        args.push(init.as_os_str().into());
        push_str(&mut args, &["/dev/shm/init.sh"]);
    }
    if let Some(fd) = archive_fd {
        push_str(&mut args, &["--file"]);
        args.push(fd.to_string().into());
        push_str(&mut args, &["/dev/shm/seed.tar"]);
    }
    ro_bind_try(&mut args, "/etc");
    push_str(&mut args, &["--bind"]);
    args.push(host_home.into_os_string());
    args.push(home.as_os_str().into());
    for dir in [".dev-init", "bin", "opt", "tmp"] {
        push_str(&mut args, &["--dir"]);
        args.push(home.join(dir).into_os_string());
    }
    push_str(&mut args, &["--bind"]);
    args.push(host_work.into_os_string());
    args.push(sandbox_work.as_os_str().into());
    push_str(&mut args, &["--symlink", "/usr/lib", "/lib"]);
    push_str(&mut args, &["--symlink", "/usr/lib64", "/lib64"]);
    ro_bind_try(&mut args, "/opt");
    push_str(&mut args, &["--proc", "/proc"]);
    push_str(&mut args, &["--symlink", "/usr/sbin", "/sbin"]);
    push_str(&mut args, &["--tmpfs", "/tmp"]);
    ro_bind_try(&mut args, "/usr");
    ro_bind_try(&mut args, "/var/lib/apt/lists/");
    ro_bind_try(&mut args, "/var/lib/dpkg/");
    push_str(&mut args, &["--seccomp"]);
    args.push(filter_fd.to_string().into());
    push_str(&mut args, &["--chdir"]);
    args.push(sandbox_work.into_os_string());
    push_str(&mut args, &["--"]);

    if init.is_some() {
        args.push(shell.into());
        push_str(&mut args, &["-c", "/dev/shm/init.sh"]);
    } else if let Some(command) = command {
        args.push(shell.into());
        push_str(&mut args, &["-c"]);
        args.push(shell_words::join(command).into());
    } else {
        args.push(shell.into());
    }
    args
}

/// The child's complete environment. `DISPLAY` and `TERM` are forwarded only
/// when the host shell has them.
fn sandbox_env(paths: &Paths, name: &str, shell: &str) -> Vec<(String, String)> {
    let home = paths.real_home.display();
    let mut vars = Vec::new();
    if let Ok(display) = env::var("DISPLAY") {
        vars.push(("DISPLAY".to_string(), display));
    }
    vars.push(("HOME".to_string(), home.to_string()));
    vars.push(("PATH".to_string(), format!("{home}/bin:/bin:/sbin")));
    vars.push(("SANDBOX".to_string(), name.to_string()));
    vars.push(("SHELL".to_string(), shell.to_string()));
    if let Ok(term) = env::var("TERM") {
        vars.push(("TERM".to_string(), term));
    }
    vars.push(("TMPDIR".to_string(), format!("{home}/tmp")));
    vars
}

fn push_str(args: &mut Vec<OsString>, values: &[&str]) {
    for value in values {
        args.push((*value).into());
    }
}

fn ro_bind_try(args: &mut Vec<OsString>, path: &str) {
    push_str(args, &["--ro-bind-try", path, path]);
}


#[cfg(test)]
mod tests {
    use super::test_support::FakeRunner;
    use super::*;
    use crate::config::test_paths;
    use crate::seeds::SeedSpec;
    use tempfile::TempDir;

    fn registry_ab(dir_a: &Path) -> Registry {
        let mut registry = Registry::new();
        registry.insert(
            "a".to_string(),
            SeedSpec {
                source: SeedSource::Directory(dir_a.to_path_buf()),
                include: vec![".foo".to_string()],
                depends: Vec::new(),
                updater: None,
            },
        );
        registry.insert(
            "b".to_string(),
            SeedSpec {
                source: SeedSource::Materialized,
                include: vec![".bar".to_string(), "opt/b".to_string()],
                depends: vec!["a".to_string()],
                updater: None,
            },
        );
        registry
    }

    #[test]
    fn archive_args_follow_seed_order() {
        let paths = test_paths(Path::new("/t"));
        let registry = registry_ab(Path::new("/d_a"));
        let args = archive_args(
            &paths,
            &registry,
            &["a".to_string(), "b".to_string()],
        )
        .unwrap();
        let expected: Vec<OsString> = vec![
            "--directory".into(),
            "/d_a".into(),
            ".foo".into(),
            "--directory".into(),
            paths.home_dir("seed-b").into_os_string(),
            ".bar".into(),
            "opt/b".into(),
        ];
        assert_eq!(args, expected);
    }

    #[test]
    fn archive_args_reject_unknown_seed() {
        let paths = test_paths(Path::new("/t"));
        let registry = registry_ab(Path::new("/d_a"));
        let err = archive_args(&paths, &registry, &["ghost".to_string()]).unwrap_err();
        assert!(err.to_string().contains("unknown seed 'ghost'"));
    }

    #[test]
    fn archive_fd_is_exposed_only_when_seeded() {
        let paths = test_paths(Path::new("/t"));
        let with_fd = bwrap_args(&paths, "env", "/bin/sh", None, Some(7), 3, None);
        assert!(with_fd.contains(&OsString::from("--file")));
        assert!(with_fd.contains(&OsString::from("7")));
        assert!(with_fd.contains(&OsString::from("/dev/shm/seed.tar")));

        let without = bwrap_args(&paths, "env", "/bin/sh", None, None, 3, None);
        assert!(!without.contains(&OsString::from("--file")));
        assert!(!without.contains(&OsString::from("/dev/shm/seed.tar")));
    }

    #[test]
    fn init_takes_precedence_over_command() {
        let paths = test_paths(Path::new("/t"));
        let command = vec!["echo".to_string(), "a b".to_string()];
        let args = bwrap_args(
            &paths,
            "env",
            "/bin/sh",
            Some(Path::new("/assets/dev-init.sh")),
            None,
            3,
            Some(&command),
        );
        let tail: Vec<&OsString> = args.iter().rev().take(3).collect();
        assert_eq!(tail[0], &OsString::from("/dev/shm/init.sh"));
        assert_eq!(tail[1], &OsString::from("-c"));
        assert_eq!(tail[2], &OsString::from("/bin/sh"));
        assert!(args.contains(&OsString::from("--ro-bind-try")));
    }

    #[test]
    fn command_vector_is_shell_joined() {
        let paths = test_paths(Path::new("/t"));
        let command = vec!["echo".to_string(), "a b".to_string()];
        let args = bwrap_args(&paths, "env", "/bin/sh", None, None, 3, Some(&command));
        assert_eq!(args.last().unwrap(), &OsString::from("echo 'a b'"));
    }

    #[test]
    fn no_init_no_command_runs_bare_shell() {
        let paths = test_paths(Path::new("/t"));
        let args = bwrap_args(&paths, "env", "/bin/zsh", None, None, 3, None);
        assert_eq!(args.last().unwrap(), &OsString::from("/bin/zsh"));
        let sep = args.iter().position(|a| a == "--").unwrap();
        assert_eq!(sep, args.len() - 2);
    }

    #[test]
    fn sandbox_identity_and_env_are_explicit() {
        let paths = test_paths(Path::new("/t"));
        let args = bwrap_args(&paths, "proj", "/bin/sh", None, None, 3, None);
        assert!(args.contains(&OsString::from("proj.testhost")));
        assert!(args.contains(&OsString::from("--seccomp")));
        assert!(args.contains(&paths.real_home.join("proj").into_os_string()));

        let env = sandbox_env(&paths, "proj", "/bin/sh");
        let get = |key: &str| {
            env.iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        };
        assert_eq!(get("SANDBOX").unwrap(), "proj");
        assert_eq!(get("SHELL").unwrap(), "/bin/sh");
        let home = paths.real_home.display();
        assert_eq!(get("PATH").unwrap(), format!("{home}/bin:/bin:/sbin"));
        assert_eq!(get("TMPDIR").unwrap(), format!("{home}/tmp"));
    }

    #[test]
    fn launch_passes_archive_and_filter_fds() {
        if which::which("tar").is_err() {
            return;
        }
        let root = TempDir::new().unwrap();
        let paths = test_paths(root.path());
        std::fs::create_dir_all(&paths.assets_dir).unwrap();
        std::fs::write(paths.seccomp_filter(), b"bpf").unwrap();
        let seed_dir = root.path().join("seed-src");
        std::fs::create_dir_all(&seed_dir).unwrap();
        std::fs::write(seed_dir.join(".foo"), b"x").unwrap();
        let registry = registry_ab(&seed_dir);

        let runner = FakeRunner::new();
        std::env::set_var("SHELL", "/bin/sh");
        launch(
            &paths,
            &registry,
            &runner,
            "env",
            &["a".to_string()],
            None,
            None,
        )
        .unwrap();
        let calls = runner.calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].pass_fd_count, 2);
        assert!(calls[0].args.contains(&OsString::from("--file")));
        assert!(paths.home_dir("env").is_dir());
    }

    #[test]
    fn launch_without_seeds_passes_only_the_filter_fd() {
        let root = TempDir::new().unwrap();
        let paths = test_paths(root.path());
        std::fs::create_dir_all(&paths.assets_dir).unwrap();
        std::fs::write(paths.seccomp_filter(), b"bpf").unwrap();
        let registry = Registry::new();

        let runner = FakeRunner::new();
        std::env::set_var("SHELL", "/bin/sh");
        launch(&paths, &registry, &runner, "env", &[], None, None).unwrap();
        let calls = runner.calls.borrow();
        assert_eq!(calls[0].pass_fd_count, 1);
        assert!(!calls[0].args.contains(&OsString::from("--file")));
    }

    #[test]
    fn launch_propagates_sandbox_failure() {
        let root = TempDir::new().unwrap();
        let paths = test_paths(root.path());
        std::fs::create_dir_all(&paths.assets_dir).unwrap();
        std::fs::write(paths.seccomp_filter(), b"bpf").unwrap();
        let runner = FakeRunner::failing(3);
        std::env::set_var("SHELL", "/bin/sh");
        let err = launch(&paths, &Registry::new(), &runner, "env", &[], None, None)
            .unwrap_err()
            .to_string();
        assert!(err.contains("bwrap"), "{err}");
    }
}
