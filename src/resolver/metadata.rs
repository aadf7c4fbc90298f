use std::time::Duration;

use anyhow::Context;
use tracing::debug;

use crate::config::{ENV_METADATA_HOST, HostEnv};

const DEFAULT_METADATA_IP: &str = "169.254.169.254";
const METADATA_HOSTNAME: &str = "metadata.google.internal";
const FLAVOR_HEADER: &str = "Metadata-Flavor";
const FLAVOR: &str = "Google";

/// Read access to the cloud provider's instance metadata.
pub trait CloudMetadata {
    /// Whether this process runs on the expected cloud provider.
    fn on_cloud(&self) -> bool;

    /// Value of a custom instance attribute.
    fn instance_attribute(&self, name: &str) -> anyhow::Result<String>;
}

/// GCE metadata server client.
pub struct GceMetadata {
    host_override: Option<String>,
    probe_url: String,
    agent: ureq::Agent,
}

impl GceMetadata {
    pub fn new(env: &HostEnv) -> Self {
        Self::with_endpoints(
            env.get(ENV_METADATA_HOST).map(str::to_string),
            format!("http://{DEFAULT_METADATA_IP}"),
        )
    }

    fn with_endpoints(host_override: Option<String>, probe_url: String) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(5)))
            .http_status_as_error(false)
            .build()
            .into();
        Self {
            host_override,
            probe_url,
            agent,
        }
    }

    fn host(&self) -> &str {
        self.host_override.as_deref().unwrap_or(METADATA_HOSTNAME)
    }

    fn get(&self, url: &str) -> anyhow::Result<(u16, bool, String)> {
        let resp = self
            .agent
            .get(url)
            .header(FLAVOR_HEADER, FLAVOR)
            .call()
            .with_context(|| format!("GET {url}"))?;
        let status = resp.status().as_u16();
        let flavored = resp
            .headers()
            .get(FLAVOR_HEADER)
            .and_then(|v| v.to_str().ok())
            == Some(FLAVOR);
        let body = resp
            .into_body()
            .read_to_string()
            .with_context(|| format!("reading {url}"))?;
        Ok((status, flavored, body))
    }
}

impl CloudMetadata for GceMetadata {
    fn on_cloud(&self) -> bool {
        if self.host_override.is_some() {
            return true;
        }
        match self.get(&self.probe_url) {
            Ok((_, flavored, _)) => flavored,
            Err(e) => {
                debug!("metadata probe failed: {e:#}");
                false
            }
        }
    }

    fn instance_attribute(&self, name: &str) -> anyhow::Result<String> {
        let url = format!(
            "http://{}/computeMetadata/v1/instance/attributes/{name}",
            self.host()
        );
        let (status, _, body) = self.get(&url)?;
        match status {
            200 => Ok(body.trim().to_string()),
            404 => anyhow::bail!("metadata attribute {name:?} not defined"),
            code => anyhow::bail!("metadata server returned status {code} for {url}"),
        }
    }
}

/// Fixed answers, for hosts known to be off-cloud and for tests.
#[derive(Debug, Default, Clone)]
pub struct StaticMetadata {
    pub on_cloud: bool,
    pub attributes: Vec<(String, String)>,
}

impl StaticMetadata {
    pub const fn off_cloud() -> Self {
        Self {
            on_cloud: false,
            attributes: Vec::new(),
        }
    }

    pub fn on_cloud_with(attributes: &[(&str, &str)]) -> Self {
        Self {
            on_cloud: true,
            attributes: attributes
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        }
    }
}

impl CloudMetadata for StaticMetadata {
    fn on_cloud(&self) -> bool {
        self.on_cloud
    }

    fn instance_attribute(&self, name: &str) -> anyhow::Result<String> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
            .with_context(|| format!("metadata attribute {name:?} not defined"))
    }
}
