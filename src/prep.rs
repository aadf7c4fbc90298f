//! One-time host preparation for hosts that need packages and a bootstrap
//! toolchain before the buildlet can do anything useful.

use std::path::Path;
use std::time::{Duration, SystemTime};

use serde::Serialize;
use tracing::info;

use crate::archive;
use crate::config::BUILDER_DATA_BASE_URL;
use crate::error::ExitError;
use crate::host::HostIdentity;
use crate::subprocess::Tool;

const APT_TIMEOUT: Duration = Duration::from_secs(15 * 60);
const CURL_TIMEOUT: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostPrep {
    /// The Oregon State ppc64/ppc64le machines: Debian with a toolchain
    /// and a cached bootstrap Go tree.
    OregonStatePpc,
}

impl HostPrep {
    pub const fn packages(self) -> &'static [&'static str] {
        match self {
            Self::OregonStatePpc => &["gcc", "strace", "libc6-dev", "gdb"],
        }
    }

    pub fn bootstrap_dir(self) -> &'static Path {
        match self {
            Self::OregonStatePpc => Path::new("/usr/local/go-bootstrap"),
        }
    }

    pub fn bootstrap_cache(self) -> &'static Path {
        match self {
            Self::OregonStatePpc => Path::new("/usr/local/go-bootstrap.tar.gz"),
        }
    }

    /// Install packages, then refresh the bootstrap toolchain. Safe to run
    /// on every boot; every failing step is fatal.
    pub fn run(self, identity: &HostIdentity) -> anyhow::Result<()> {
        info!(prep = ?self, host = %identity, "preparing host");
        apt_get_install(self.packages())?;
        init_bootstrap_dir(
            self.bootstrap_dir(),
            self.bootstrap_cache(),
            &bootstrap_url(&identity.os, &identity.arch),
        )
    }
}

pub fn bootstrap_url(os: &str, arch: &str) -> String {
    format!("{BUILDER_DATA_BASE_URL}gobootstrap-{os}-{arch}.tar.gz")
}

fn step_failed(step: &str, err: &anyhow::Error) -> anyhow::Error {
    ExitError::HostPrep {
        step: step.to_string(),
        message: format!("{err:#}"),
    }
    .into()
}

fn apt_get_install(pkgs: &[&str]) -> anyhow::Result<()> {
    let tool = Tool::new("apt-get")
        .args(&["--yes", "install"])
        .args(pkgs)
        .timeout(APT_TIMEOUT);
    info!(cmd = %tool.display(), "installing packages");
    tool.run_ok()
        .map_err(|e| step_failed("apt-get install", &e))?;
    Ok(())
}

fn init_bootstrap_dir(dest: &Path, cache: &Path, url: &str) -> anyhow::Result<()> {
    std::fs::create_dir_all(dest)
        .map_err(|e| step_failed("create bootstrap dir", &anyhow::Error::from(e)))?;

    let before = modified(cache);
    let cache_arg = cache.display().to_string();
    // -z makes curl send If-Modified-Since from the cache's mtime and -R
    // stamps the file with the server's Last-Modified, so an unchanged
    // archive is not transferred again.
    Tool::new("/usr/bin/curl")
        .args(&["-sSf", "-R", "-o", &cache_arg, "-z", &cache_arg, url])
        .timeout(CURL_TIMEOUT)
        .run_ok()
        .map_err(|e| step_failed(&format!("fetch {url}"), &e))?;
    let after = modified(cache);

    if !needs_unpack(before, after, is_empty_dir(dest)) {
        info!(cache = %cache.display(), "bootstrap toolchain is current");
        return Ok(());
    }

    let n = archive::untar_file(cache, dest)
        .map_err(|e| step_failed("unpack bootstrap toolchain", &e))?;
    info!(entries = n, dest = %dest.display(), "unpacked bootstrap toolchain");
    Ok(())
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn is_empty_dir(dir: &Path) -> bool {
    std::fs::read_dir(dir).map_or(true, |mut entries| entries.next().is_none())
}

/// The cache is unpacked when curl replaced it, or when a previous unpack
/// never happened.
fn needs_unpack(before: Option<SystemTime>, after: Option<SystemTime>, dest_empty: bool) -> bool {
    dest_empty || before.is_none() || before != after
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_url_names_os_and_arch() {
        assert_eq!(
            bootstrap_url("linux", "ppc64le"),
            "https://storage.googleapis.com/go-builder-data/gobootstrap-linux-ppc64le.tar.gz"
        );
    }

    #[test]
    fn unchanged_cache_with_populated_dir_is_skipped() {
        let t = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        assert!(!needs_unpack(Some(t), Some(t), false));
    }

    #[test]
    fn refreshed_cache_is_unpacked() {
        let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        let t1 = t0 + Duration::from_secs(60);
        assert!(needs_unpack(Some(t0), Some(t1), false));
        assert!(needs_unpack(None, Some(t1), false));
    }

    #[test]
    fn empty_dest_is_always_unpacked() {
        let t = SystemTime::UNIX_EPOCH;
        assert!(needs_unpack(Some(t), Some(t), true));
    }

    #[test]
    fn empty_dir_detection() {
        let dir = tempfile::tempdir().unwrap();
        assert!(is_empty_dir(dir.path()));
        std::fs::write(dir.path().join("VERSION"), "x").unwrap();
        assert!(!is_empty_dir(dir.path()));
        assert!(is_empty_dir(&dir.path().join("missing")));
    }

    #[test]
    fn ppc_packages() {
        assert_eq!(
            HostPrep::OregonStatePpc.packages(),
            &["gcc", "strace", "libc6-dev", "gdb"]
        );
    }
}
