use tracing::info;

use crate::config::{BootstrapConfig, HostEnv};
use crate::error::ExitError;
use crate::fetch::{FetchTarget, Fetcher, HttpTransport, Transport};
use crate::host::HostIdentity;
use crate::launch::{self, ConsoleHandoff, InheritStdio, WorkerRunner};
use crate::network::{HttpProbe, NetworkGate, Probe};
use crate::resolver::{self, CloudMetadata, GceMetadata};

/// The outside world the bootstrap sequence talks to.
pub struct Collaborators<'a> {
    pub probe: &'a mut dyn Probe,
    pub metadata: &'a dyn CloudMetadata,
    pub transport: &'a dyn Transport,
    pub runner: &'a dyn WorkerRunner,
    pub console: &'a dyn ConsoleHandoff,
    pub is_root: bool,
}

/// Run the bootstrap sequence against the real network and process table.
pub fn run(
    config: &BootstrapConfig,
    identity: &HostIdentity,
    env: &HostEnv,
    console: &dyn ConsoleHandoff,
) -> anyhow::Result<()> {
    let mut probe = HttpProbe::new(&config.probe_url);
    let metadata = GceMetadata::new(env);
    let transport = HttpTransport::new();
    run_with(
        config,
        identity,
        env,
        Collaborators {
            probe: &mut probe,
            metadata: &metadata,
            transport: &transport,
            runner: &InheritStdio,
            console,
            is_root: launch::running_as_root(),
        },
    )
}

/// Identity check, network gate, host prep, download, handoff.
///
/// Returns `Ok(())` only after the buildlet exits cleanly.
pub fn run_with(
    config: &BootstrapConfig,
    identity: &HostIdentity,
    env: &HostEnv,
    deps: Collaborators<'_>,
) -> anyhow::Result<()> {
    info!(host = %identity, "bootstrap binary running");
    let resolution = resolver::resolve(identity, env)?;
    info!(profile = %resolution.profile.label(), "resolved host profile");

    let gate = NetworkGate::new(config.network_deadline(&identity.os));
    if !gate.await_network(deps.probe) {
        return Err(ExitError::NetworkUnreachable {
            waited: gate.deadline,
        }
        .into());
    }

    if let Some(prep) = resolution.prep() {
        prep.run(identity)?;
    }

    let target = FetchTarget {
        url: resolver::binary_url(resolution.binary(), env, deps.metadata)?,
        dest: config.target.clone(),
    };
    Fetcher::new(deps.transport, config.retry_delay).download(&target)?;

    let plan = resolution
        .plan
        .with_root_defaults(identity, env, deps.is_root);
    launch::launch(&target.dest, &plan, deps.runner, deps.console)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::path::{Path, PathBuf};
    use std::process::ExitStatus;
    use std::time::Duration;

    use super::*;
    use crate::config::ENV_BINARY_URL;
    use crate::launch::{LaunchPlan, NoConsole};
    use crate::resolver::StaticMetadata;

    #[derive(Default)]
    struct RecordingTransport {
        urls: RefCell<Vec<String>>,
    }

    impl Transport for RecordingTransport {
        fn fetch_to(&self, url: &str, dest: &Path) -> anyhow::Result<()> {
            self.urls.borrow_mut().push(url.to_string());
            std::fs::write(dest, b"#!/bin/sh\n")?;
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingRunner {
        launched: RefCell<Option<(PathBuf, LaunchPlan)>>,
    }

    impl WorkerRunner for RecordingRunner {
        fn run(&self, program: &Path, plan: &LaunchPlan) -> std::io::Result<ExitStatus> {
            *self.launched.borrow_mut() = Some((program.to_path_buf(), plan.clone()));
            success()
        }
    }

    #[cfg(unix)]
    fn success() -> std::io::Result<ExitStatus> {
        use std::os::unix::process::ExitStatusExt;
        Ok(ExitStatus::from_raw(0))
    }

    #[cfg(windows)]
    fn success() -> std::io::Result<ExitStatus> {
        use std::os::windows::process::ExitStatusExt;
        Ok(ExitStatus::from_raw(0))
    }

    fn config(dir: &Path) -> BootstrapConfig {
        BootstrapConfig {
            target: dir.join("buildlet.exe"),
            network_wait: Some(Duration::from_millis(50)),
            retry_delay: Duration::from_millis(1),
            ..Default::default()
        }
    }

    #[test]
    fn s390x_downloads_and_launches_with_legacy_flags() {
        let dir = tempfile::tempdir().unwrap();
        let transport = RecordingTransport::default();
        let runner = RecordingRunner::default();
        let identity = HostIdentity::new("linux", "s390x", None);

        run_with(
            &config(dir.path()),
            &identity,
            &HostEnv::default(),
            Collaborators {
                probe: &mut || true,
                metadata: &StaticMetadata::off_cloud(),
                transport: &transport,
                runner: &runner,
                console: &NoConsole,
                is_root: true,
            },
        )
        .unwrap();

        assert_eq!(
            *transport.urls.borrow(),
            ["https://storage.googleapis.com/go-builder-data/buildlet.linux-s390x"]
        );
        let (program, plan) = runner.launched.borrow_mut().take().unwrap();
        assert_eq!(program, dir.path().join("buildlet.exe"));
        assert_eq!(
            plan.args(),
            [
                "--workdir=/data/golang/workdir",
                "--halt=false",
                "--reverse=linux-s390x-ibm",
                "--coordinator=farmer.golang.org:443",
            ]
        );
        assert!(plan.env_overlay().contains(&("HOME".into(), "/root".into())));
    }

    #[test]
    fn unknown_identity_fails_before_probing() {
        let dir = tempfile::tempdir().unwrap();
        let mut probed = false;
        let err = run_with(
            &config(dir.path()),
            &HostIdentity::new("linux", "arm", Some("raspberry")),
            &HostEnv::default(),
            Collaborators {
                probe: &mut || {
                    probed = true;
                    true
                },
                metadata: &StaticMetadata::off_cloud(),
                transport: &RecordingTransport::default(),
                runner: &RecordingRunner::default(),
                console: &NoConsole,
                is_root: false,
            },
        )
        .unwrap_err();
        assert!(matches!(err.downcast_ref::<ExitError>(), Some(ExitError::Config(_))));
        assert!(!probed);
    }

    #[test]
    fn network_down_is_fatal_before_download() {
        let dir = tempfile::tempdir().unwrap();
        let transport = RecordingTransport::default();
        let err = run_with(
            &config(dir.path()),
            &HostIdentity::new("linux", "s390x", None),
            &HostEnv::default(),
            Collaborators {
                probe: &mut || false,
                metadata: &StaticMetadata::off_cloud(),
                transport: &transport,
                runner: &RecordingRunner::default(),
                console: &NoConsole,
                is_root: false,
            },
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ExitError>(),
            Some(ExitError::NetworkUnreachable { .. })
        ));
        assert!(transport.urls.borrow().is_empty());
    }

    #[test]
    fn cloud_host_off_cloud_uses_override_url() {
        let dir = tempfile::tempdir().unwrap();
        let transport = RecordingTransport::default();
        let env = HostEnv::from_pairs([(ENV_BINARY_URL, "http://10.1.2.3/buildlet.linux-amd64")]);
        run_with(
            &config(dir.path()),
            &HostIdentity::new("linux", "amd64", None),
            &env,
            Collaborators {
                probe: &mut || true,
                metadata: &StaticMetadata::off_cloud(),
                transport: &transport,
                runner: &RecordingRunner::default(),
                console: &NoConsole,
                is_root: false,
            },
        )
        .unwrap();
        assert_eq!(*transport.urls.borrow(), ["http://10.1.2.3/buildlet.linux-amd64"]);
    }
}
