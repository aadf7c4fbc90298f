use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Bucket holding buildlet binaries and bootstrap toolchains.
pub const BUILDER_DATA_BASE_URL: &str = "https://storage.googleapis.com/go-builder-data/";

/// Coordinator every reverse buildlet dials.
pub const COORDINATOR_ADDR: &str = "farmer.golang.org:443";

/// Connectivity probe target. A 404 from it still means the network is up.
pub const NETCHECK_URL: &str = "http://farmer.golang.org/netcheck";

/// Instance attribute holding the buildlet URL on cloud-hosted VMs.
pub const BUILDLET_URL_ATTR: &str = "buildlet-binary-url";

pub const ENV_BUILDER: &str = "GO_BUILDER_ENV";
pub const ENV_HOSTNAME: &str = "HOSTNAME";
pub const ENV_BINARY_URL: &str = "META_BUILDLET_BINARY_URL";
pub const ENV_IN_KUBERNETES: &str = "IN_KUBERNETES";
pub const ENV_METADATA_HOST: &str = "GCE_METADATA_HOST";

/// Named ".exe" for Windows; the name works fine everywhere else too.
pub const DEFAULT_TARGET: &str = "./buildlet.exe";

pub const DEFAULT_NETWORK_WAIT: Duration = Duration::from_secs(30);
/// Windows images are empirically slower to bring networking up.
pub const SLOW_NETWORK_WAIT: Duration = Duration::from_secs(5 * 60);
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
pub const PROBE_INTERVAL: Duration = Duration::from_secs(1);
pub const PROBE_LOG_INTERVAL: Duration = Duration::from_secs(5);

pub const DOWNLOAD_ATTEMPTS: u32 = 3;
pub const DOWNLOAD_RETRY_DELAY: Duration = Duration::from_secs(2);

/// How long a fatal message stays on screen on hosts without a persistent
/// terminal before the process exits.
pub const WINDOWS_FATAL_GRACE: Duration = Duration::from_secs(60);

/// Read-only snapshot of the process environment.
///
/// Captured once at startup; every component reads variables from here so
/// that resolution is a pure function of its inputs.
#[derive(Debug, Clone, Default)]
pub struct HostEnv {
    vars: BTreeMap<String, String>,
}

impl HostEnv {
    pub fn from_process() -> Self {
        Self::from_pairs(std::env::vars_os().filter_map(|(k, v)| {
            Some((k.into_string().ok()?, v.into_string().ok()?))
        }))
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Value of `key`, treating an empty value as unset.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Value of `key`, or the empty string.
    pub fn get_or_empty(&self, key: &str) -> &str {
        self.get(key).unwrap_or("")
    }

    pub fn is_set(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

/// Everything the bootstrap sequence needs besides the host environment.
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    /// Where the buildlet is downloaded to.
    pub target: PathBuf,
    /// Network deadline; `None` picks the per-OS default.
    pub network_wait: Option<Duration>,
    pub probe_url: String,
    pub retry_delay: Duration,
    /// Fatal grace delay; `None` picks the per-OS default.
    pub fatal_grace: Option<Duration>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            target: PathBuf::from(DEFAULT_TARGET),
            network_wait: None,
            probe_url: NETCHECK_URL.to_string(),
            retry_delay: DOWNLOAD_RETRY_DELAY,
            fatal_grace: None,
        }
    }
}

impl BootstrapConfig {
    /// Network deadline for `os`. A zero override means "use the default".
    pub fn network_deadline(&self, os: &str) -> Duration {
        match self.network_wait {
            Some(wait) if !wait.is_zero() => wait,
            _ if os == "windows" => SLOW_NETWORK_WAIT,
            _ => DEFAULT_NETWORK_WAIT,
        }
    }

    pub fn fatal_grace(&self, os: &str) -> Duration {
        self.fatal_grace.unwrap_or(if os == "windows" {
            WINDOWS_FATAL_GRACE
        } else {
            Duration::ZERO
        })
    }
}
