use std::fmt;

use serde::Serialize;

use crate::config::{ENV_BUILDER, HostEnv};

/// Who this host claims to be. Established once at startup and only ever
/// read afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostIdentity {
    pub os: String,
    pub arch: String,
    pub builder_env: Option<String>,
}

impl HostIdentity {
    pub fn new(os: &str, arch: &str, builder_env: Option<&str>) -> Self {
        Self {
            os: os.to_string(),
            arch: arch.to_string(),
            builder_env: builder_env.filter(|v| !v.is_empty()).map(str::to_string),
        }
    }

    /// Identity of the running host, with the builder tag read from `env`.
    pub fn current(env: &HostEnv) -> Self {
        Self::new(current_os(), current_arch(), env.get(ENV_BUILDER))
    }

    /// `os/arch`, the form used in logs and error messages.
    pub fn os_arch(&self) -> String {
        format!("{}/{}", self.os, self.arch)
    }

    pub fn is_unix(&self) -> bool {
        !matches!(self.os.as_str(), "windows" | "plan9")
    }
}

impl fmt::Display for HostIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.builder_env {
            Some(env) => write!(f, "{} ({env})", self.os_arch()),
            None => f.write_str(&self.os_arch()),
        }
    }
}

/// Operating system name in the fleet's naming scheme.
pub fn current_os() -> &'static str {
    fleet_os(std::env::consts::OS)
}

/// Architecture name in the fleet's naming scheme.
pub fn current_arch() -> &'static str {
    fleet_arch(std::env::consts::ARCH, cfg!(target_endian = "little"))
}

fn fleet_os(rust_os: &'static str) -> &'static str {
    match rust_os {
        "macos" => "darwin",
        other => other,
    }
}

fn fleet_arch(rust_arch: &'static str, little_endian: bool) -> &'static str {
    match rust_arch {
        "x86_64" => "amd64",
        "x86" => "386",
        "aarch64" => "arm64",
        "powerpc64" if little_endian => "ppc64le",
        "powerpc64" => "ppc64",
        "mips" if little_endian => "mipsle",
        "mips64" if little_endian => "mips64le",
        "loongarch64" => "loong64",
        other => other,
    }
}
