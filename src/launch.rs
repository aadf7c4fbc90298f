use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};

use anyhow::Context;
use serde::Serialize;
use tracing::info;

use crate::config::HostEnv;
use crate::error::ExitError;
use crate::host::HostIdentity;

/// Worker arguments plus environment additions.
///
/// Built from the host profile, finalized right before handoff, and never
/// changed afterwards. The overlay only adds variables the parent
/// environment lacks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LaunchPlan {
    args: Vec<String>,
    env: Vec<(String, String)>,
}

impl LaunchPlan {
    pub const fn new(args: Vec<String>) -> Self {
        Self {
            args,
            env: Vec::new(),
        }
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn env_overlay(&self) -> &[(String, String)] {
        &self.env
    }

    /// Add `key=value` unless the parent already has a non-empty `key`.
    #[must_use]
    pub fn with_default_env(mut self, parent: &HostEnv, key: &str, value: &str) -> Self {
        if !parent.is_set(key) && !self.env.iter().any(|(k, _)| k == key) {
            self.env.push((key.to_string(), value.to_string()));
        }
        self
    }

    /// A root shell on a fresh image may have no `USER`/`HOME`; the buildlet
    /// needs both.
    #[must_use]
    pub fn with_root_defaults(
        self,
        identity: &HostIdentity,
        parent: &HostEnv,
        is_root: bool,
    ) -> Self {
        if !(identity.is_unix() && is_root) {
            return self;
        }
        self.with_default_env(parent, "USER", "root")
            .with_default_env(parent, "HOME", "/root")
    }
}

/// Exclusive access to the serial console used for logging.
///
/// Only one process can hold the port on some platforms, so it is released
/// right before the worker starts and taken back if the worker fails.
pub trait ConsoleHandoff {
    fn acquire(&self);
    fn release(&self);
}

/// For hosts that don't log to a serial console.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoConsole;

impl ConsoleHandoff for NoConsole {
    fn acquire(&self) {}
    fn release(&self) {}
}

/// Spawn a program, relaying its stdio, and wait for it to exit.
pub trait WorkerRunner {
    fn run(&self, program: &Path, plan: &LaunchPlan) -> std::io::Result<ExitStatus>;
}

/// Runs the worker with inherited stdout/stderr and the parent's
/// environment plus the plan's overlay.
#[derive(Debug, Default, Clone, Copy)]
pub struct InheritStdio;

impl WorkerRunner for InheritStdio {
    fn run(&self, program: &Path, plan: &LaunchPlan) -> std::io::Result<ExitStatus> {
        Command::new(program)
            .args(plan.args())
            .envs(plan.env_overlay().iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
    }
}

/// Mark `path` executable. A no-op where there's no permission bit.
#[cfg(unix)]
pub fn make_executable(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .with_context(|| format!("chmod 0755 {}", path.display()))
}

#[cfg(not(unix))]
pub fn make_executable(_path: &Path) -> anyhow::Result<()> {
    Ok(())
}

/// Whether the effective user has administrative privileges.
#[cfg(unix)]
pub fn running_as_root() -> bool {
    nix::unistd::geteuid().is_root()
}

#[cfg(not(unix))]
pub fn running_as_root() -> bool {
    false
}

/// Hand control to the worker and wait for it.
///
/// Returns only when the worker exits cleanly; spawn failures and non-zero
/// exits come back as [`ExitError`]s with the console reacquired.
pub fn launch(
    program: &Path,
    plan: &LaunchPlan,
    runner: &dyn WorkerRunner,
    console: &dyn ConsoleHandoff,
) -> anyhow::Result<()> {
    make_executable(program).map_err(|e| ExitError::Launch {
        program: program.display().to_string(),
        message: format!("{e:#}"),
    })?;

    info!(
        program = %program.display(),
        args = ?plan.args(),
        env = ?plan.env_overlay(),
        "starting buildlet"
    );
    console.release();
    let result = runner.run(program, plan);
    match result {
        Ok(status) if status.success() => Ok(()),
        Ok(status) => {
            console.acquire();
            Err(ExitError::WorkerFailed {
                status: status.to_string(),
            }
            .into())
        }
        Err(e) => {
            console.acquire();
            Err(ExitError::Launch {
                program: program.display().to_string(),
                message: e.to_string(),
            }
            .into())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    #[derive(Default)]
    struct RecordingConsole {
        events: RefCell<Vec<&'static str>>,
    }

    impl ConsoleHandoff for RecordingConsole {
        fn acquire(&self) {
            self.events.borrow_mut().push("acquire");
        }
        fn release(&self) {
            self.events.borrow_mut().push("release");
        }
    }

    struct FakeRunner {
        outcome: fn() -> std::io::Result<ExitStatus>,
        seen: RefCell<Vec<String>>,
    }

    impl WorkerRunner for FakeRunner {
        fn run(&self, _program: &Path, plan: &LaunchPlan) -> std::io::Result<ExitStatus> {
            self.seen.borrow_mut().extend(plan.args().iter().cloned());
            (self.outcome)()
        }
    }

    #[cfg(unix)]
    fn exit_status(code: i32) -> ExitStatus {
        use std::os::unix::process::ExitStatusExt;
        ExitStatus::from_raw(code << 8)
    }

    fn binary(dir: &Path) -> std::path::PathBuf {
        let p = dir.join("buildlet.exe");
        std::fs::write(&p, b"#!/bin/sh\nexit 0\n").unwrap();
        p
    }

    #[test]
    fn root_defaults_fill_only_missing_vars() {
        let identity = HostIdentity::new("linux", "s390x", None);
        let parent = HostEnv::from_pairs([("HOME", "/home/gopher")]);
        let plan = LaunchPlan::new(vec![]).with_root_defaults(&identity, &parent, true);
        assert_eq!(plan.env_overlay(), [("USER".to_string(), "root".to_string())]);
    }

    #[test]
    fn root_defaults_skip_non_root_and_windows() {
        let parent = HostEnv::default();
        let linux = HostIdentity::new("linux", "amd64", None);
        let windows = HostIdentity::new("windows", "amd64", None);
        let non_root = LaunchPlan::default().with_root_defaults(&linux, &parent, false);
        assert!(non_root.env_overlay().is_empty());
        let windows_root = LaunchPlan::default().with_root_defaults(&windows, &parent, true);
        assert!(windows_root.env_overlay().is_empty());
    }

    #[test]
    #[cfg(unix)]
    fn releases_console_then_runs_worker() {
        let dir = tempfile::tempdir().unwrap();
        let console = RecordingConsole::default();
        let runner = FakeRunner {
            outcome: || Ok(exit_status(0)),
            seen: RefCell::default(),
        };
        let plan = LaunchPlan::new(vec!["--halt=false".into()]);
        launch(&binary(dir.path()), &plan, &runner, &console).unwrap();
        assert_eq!(*console.events.borrow(), ["release"]);
        assert_eq!(*runner.seen.borrow(), ["--halt=false"]);
    }

    #[test]
    #[cfg(unix)]
    fn reacquires_console_when_worker_fails() {
        let dir = tempfile::tempdir().unwrap();
        let console = RecordingConsole::default();
        let runner = FakeRunner {
            outcome: || Ok(exit_status(2)),
            seen: RefCell::default(),
        };
        let err =
            launch(&binary(dir.path()), &LaunchPlan::default(), &runner, &console).unwrap_err();
        assert_eq!(*console.events.borrow(), ["release", "acquire"]);
        assert!(matches!(
            err.downcast_ref::<ExitError>(),
            Some(ExitError::WorkerFailed { .. })
        ));
    }

    #[test]
    fn reacquires_console_when_spawn_fails() {
        let dir = tempfile::tempdir().unwrap();
        let console = RecordingConsole::default();
        let runner = FakeRunner {
            outcome: || Err(std::io::Error::other("exec format error")),
            seen: RefCell::default(),
        };
        let err =
            launch(&binary(dir.path()), &LaunchPlan::default(), &runner, &console).unwrap_err();
        assert_eq!(*console.events.borrow(), ["release", "acquire"]);
        assert!(err.to_string().contains("exec format error"));
    }

    #[test]
    #[cfg(unix)]
    fn missing_binary_fails_before_releasing_console() {
        let dir = tempfile::tempdir().unwrap();
        let console = RecordingConsole::default();
        let absent = dir.path().join("absent");
        let err = launch(&absent, &LaunchPlan::default(), &InheritStdio, &console).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ExitError>(),
            Some(ExitError::Launch { .. })
        ));
        assert!(console.events.borrow().is_empty());
    }

    #[test]
    #[cfg(unix)]
    fn runs_real_worker_and_propagates_failure() {
        let dir = tempfile::tempdir().unwrap();
        let worker = dir.path().join("buildlet.exe");
        let script = concat!(
            "#!/bin/sh\n",
            "[ \"$1\" = \"--halt=false\" ] && [ \"$USER\" = \"root\" ] && exit 0\n",
            "exit 9\n",
        );
        std::fs::write(&worker, script).unwrap();
        let parent = HostEnv::from_pairs([("HOME", "/root")]);

        let ok_plan = LaunchPlan::new(vec!["--halt=false".into()])
            .with_default_env(&parent, "USER", "root");
        launch(&worker, &ok_plan, &InheritStdio, &NoConsole).unwrap();

        let bad_plan = LaunchPlan::new(vec!["--halt=true".into()]);
        let err = launch(&worker, &bad_plan, &InheritStdio, &NoConsole).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ExitError>(),
            Some(ExitError::WorkerFailed { .. })
        ));
    }
}
