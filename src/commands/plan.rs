//! `--dry-run`: show what a host would fetch and run, without touching the
//! network. Operators diff this output across fleet changes.

use serde::Serialize;

use crate::config::HostEnv;
use crate::host::HostIdentity;
use crate::launch::LaunchPlan;
use crate::prep::HostPrep;
use crate::resolver::{self, BinarySource, StaticMetadata};

#[derive(Debug, Serialize)]
pub struct PlanReport {
    pub host: HostIdentity,
    pub profile: String,
    pub binary: BinarySource,
    /// Known without asking the metadata service; `None` for cloud hosts
    /// that have no override set.
    pub url: Option<String>,
    pub prep: Option<HostPrep>,
    pub launch: LaunchPlan,
}

pub fn build(identity: &HostIdentity, env: &HostEnv) -> anyhow::Result<PlanReport> {
    let resolution = resolver::resolve(identity, env)?;
    let url = resolver::binary_url(resolution.binary(), env, &StaticMetadata::off_cloud()).ok();
    Ok(PlanReport {
        host: identity.clone(),
        profile: resolution.profile.label(),
        binary: resolution.binary(),
        url,
        prep: resolution.prep(),
        launch: resolution.plan,
    })
}

pub fn run(identity: &HostIdentity, env: &HostEnv) -> anyhow::Result<()> {
    let report = build(identity, env)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
