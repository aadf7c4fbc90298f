//! Host identity → which buildlet to fetch and how to launch it.

pub mod metadata;
pub mod profiles;

use tracing::info;

use crate::config::{
    BUILDER_DATA_BASE_URL, BUILDLET_URL_ATTR, ENV_BINARY_URL, ENV_IN_KUBERNETES, HostEnv,
};
use crate::error::ExitError;
use crate::host::HostIdentity;
use crate::launch::LaunchPlan;
use crate::prep::HostPrep;

pub use metadata::{CloudMetadata, GceMetadata, StaticMetadata};
pub use profiles::{BinarySource, HostProfile, Registration, TagMatch, allowed_tags, profiles};

/// The profile chosen for a host plus the worker arguments it implies.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub profile: &'static HostProfile,
    pub plan: LaunchPlan,
}

impl Resolution {
    pub const fn binary(&self) -> BinarySource {
        self.profile.binary
    }

    pub const fn prep(&self) -> Option<HostPrep> {
        self.profile.prep
    }
}

/// Pick the single profile matching `identity`.
///
/// Pairs shared by several kinds of hardware demand an exact tag from their
/// allow-list; unknown pairs and unknown tags are configuration errors.
pub fn select_profile(identity: &HostIdentity) -> Result<&'static HostProfile, ExitError> {
    let rows: Vec<_> = profiles::profiles_for(&identity.os, &identity.arch).collect();
    if rows.is_empty() {
        return Err(ExitError::config(format!(
            "unsupported host {}: no profile for this os/arch",
            identity.os_arch()
        )));
    }

    let tag = identity.builder_env.as_deref();
    rows.iter()
        .copied()
        .find(|p| match p.tag {
            TagMatch::Any => true,
            TagMatch::Exactly(want) => tag == Some(want),
        })
        .ok_or_else(|| {
            ExitError::config(format!(
                "unknown/unspecified $GO_BUILDER_ENV value {:?} for {} (want one of {:?})",
                tag.unwrap_or_default(),
                identity.os_arch(),
                allowed_tags(&identity.os, &identity.arch),
            ))
        })
}

/// Resolve the profile and the worker argument fragment for `identity`.
pub fn resolve(identity: &HostIdentity, env: &HostEnv) -> Result<Resolution, ExitError> {
    let profile = select_profile(identity)?;
    let plan = LaunchPlan::new(profile.launch_args(identity.builder_env.as_deref(), env));
    Ok(Resolution { profile, plan })
}

/// Concrete download URL for `source`.
///
/// Off-cloud hosts, and on-cloud hosts flagged as running under Kubernetes,
/// must name the binary explicitly via `META_BUILDLET_BINARY_URL`.
pub fn binary_url(
    source: BinarySource,
    env: &HostEnv,
    metadata: &dyn CloudMetadata,
) -> anyhow::Result<String> {
    match source {
        BinarySource::Fixed(file) => Ok(format!("{BUILDER_DATA_BASE_URL}{file}")),
        BinarySource::Cloud => {
            let in_kubernetes = env.get(ENV_IN_KUBERNETES) == Some("1");
            if in_kubernetes || !metadata.on_cloud() {
                return env.get(ENV_BINARY_URL).map(str::to_string).ok_or_else(|| {
                    ExitError::config(format!(
                        "not on GCE (or in Kubernetes), and no {ENV_BINARY_URL} specified"
                    ))
                    .into()
                });
            }
            let url = metadata.instance_attribute(BUILDLET_URL_ATTR).map_err(|e| {
                ExitError::config(format!(
                    "failed to look up {BUILDLET_URL_ATTR:?} attribute value: {e:#}"
                ))
            })?;
            info!(%url, "buildlet URL from instance metadata");
            Ok(url)
        }
    }
}
