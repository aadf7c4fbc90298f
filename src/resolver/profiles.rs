//! Static table of every host shape the fleet knows how to boot.
//!
//! Rows are keyed by `os/arch` plus, for pairs shared by several kinds of
//! hardware, the exact `GO_BUILDER_ENV` tag. A pair either has a single
//! tag-agnostic row or only tagged rows; never both.

use serde::Serialize;

use crate::config::{COORDINATOR_ADDR, ENV_HOSTNAME, HostEnv};
use crate::prep::HostPrep;

/// Which `GO_BUILDER_ENV` values a row accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TagMatch {
    /// The tag is ignored for this pair.
    Any,
    Exactly(&'static str),
}

/// Where the buildlet binary comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "kind", content = "file")]
pub enum BinarySource {
    /// A fixed object under the builder-data bucket.
    Fixed(&'static str),
    /// The explicit override variable, or the cloud metadata service.
    Cloud,
}

/// Name the buildlet registers under with the legacy `--reverse` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuilderName {
    Fixed(&'static str),
    /// The host's own builder tag.
    Tag,
}

/// How the buildlet announces itself to the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// Cloud VMs are dialed by the coordinator; no reverse flags.
    None,
    /// Deprecated `--reverse=<builder>` form, still required by older hosts.
    Legacy {
        builder: BuilderName,
        workdir: Option<&'static str>,
        report_hostname: bool,
    },
    /// `--reverse-type=<tag>` form.
    Typed { workdir: &'static str },
}

#[derive(Debug, Clone, Copy)]
pub struct HostProfile {
    pub os: &'static str,
    pub arch: &'static str,
    pub tag: TagMatch,
    pub binary: BinarySource,
    pub registration: Registration,
    pub prep: Option<HostPrep>,
}

impl HostProfile {
    const fn cloud(os: &'static str, arch: &'static str) -> Self {
        Self {
            os,
            arch,
            tag: TagMatch::Any,
            binary: BinarySource::Cloud,
            registration: Registration::None,
            prep: None,
        }
    }

    const fn legacy(
        os: &'static str,
        arch: &'static str,
        file: &'static str,
        builder: &'static str,
    ) -> Self {
        Self {
            os,
            arch,
            tag: TagMatch::Any,
            binary: BinarySource::Fixed(file),
            registration: Registration::Legacy {
                builder: BuilderName::Fixed(builder),
                workdir: None,
                report_hostname: false,
            },
            prep: None,
        }
    }

    const fn with_prep(mut self, prep: HostPrep) -> Self {
        self.prep = Some(prep);
        self
    }

    /// Short label for logs: `os/arch` or `os/arch[tag]`.
    pub fn label(&self) -> String {
        match self.tag {
            TagMatch::Any => format!("{}/{}", self.os, self.arch),
            TagMatch::Exactly(tag) => format!("{}/{}[{tag}]", self.os, self.arch),
        }
    }

    /// Worker arguments for this profile, in the order the buildlet expects.
    pub fn launch_args(&self, tag: Option<&str>, env: &HostEnv) -> Vec<String> {
        let coordinator = format!("--coordinator={COORDINATOR_ADDR}");
        match self.registration {
            Registration::None => Vec::new(),
            Registration::Legacy {
                builder,
                workdir,
                report_hostname,
            } => {
                let builder = match builder {
                    BuilderName::Fixed(name) => name,
                    BuilderName::Tag => tag.unwrap_or_default(),
                };
                let mut args = Vec::new();
                if let Some(dir) = workdir {
                    args.push(format!("--workdir={dir}"));
                }
                args.push("--halt=false".to_string());
                args.push(format!("--reverse={builder}"));
                args.push(coordinator);
                if report_hostname {
                    args.push(format!("--hostname={}", env.get_or_empty(ENV_HOSTNAME)));
                }
                args
            }
            // An empty hostname makes the buildlet fall back to the
            // container name.
            Registration::Typed { workdir } => vec![
                format!("--reverse-type={}", tag.unwrap_or_default()),
                format!("--workdir={workdir}"),
                format!("--hostname={}", env.get_or_empty(ENV_HOSTNAME)),
                "--halt=false".to_string(),
                "--reboot=false".to_string(),
                coordinator,
            ],
        }
    }
}

const TYPED_ARM64: Registration = Registration::Typed { workdir: "/workdir" };

static PROFILES: &[HostProfile] = &[
    HostProfile {
        os: "linux",
        arch: "arm",
        tag: TagMatch::Exactly("linux-arm-arm5spacemonkey"),
        binary: BinarySource::Fixed("buildlet.linux-arm-arm5"),
        registration: Registration::Legacy {
            builder: BuilderName::Tag,
            workdir: None,
            report_hostname: false,
        },
        prep: None,
    },
    HostProfile {
        os: "linux",
        arch: "arm",
        tag: TagMatch::Exactly("host-linux-arm-scaleway"),
        binary: BinarySource::Cloud,
        registration: Registration::Legacy {
            builder: BuilderName::Tag,
            workdir: None,
            report_hostname: true,
        },
        prep: None,
    },
    HostProfile {
        os: "linux",
        arch: "arm64",
        tag: TagMatch::Exactly("host-linux-arm64-packet"),
        binary: BinarySource::Fixed("buildlet.linux-arm64"),
        registration: TYPED_ARM64,
        prep: None,
    },
    HostProfile {
        os: "linux",
        arch: "arm64",
        tag: TagMatch::Exactly("host-linux-arm64-linaro"),
        binary: BinarySource::Fixed("buildlet.linux-arm64"),
        registration: TYPED_ARM64,
        prep: None,
    },
    HostProfile {
        os: "linux",
        arch: "s390x",
        tag: TagMatch::Any,
        binary: BinarySource::Fixed("buildlet.linux-s390x"),
        registration: Registration::Legacy {
            builder: BuilderName::Fixed("linux-s390x-ibm"),
            workdir: Some("/data/golang/workdir"),
            report_hostname: false,
        },
        prep: None,
    },
    HostProfile::legacy("linux", "ppc64", "buildlet.linux-ppc64", "linux-ppc64-buildlet")
        .with_prep(HostPrep::OregonStatePpc),
    HostProfile::legacy(
        "linux",
        "ppc64le",
        "buildlet.linux-ppc64le",
        "linux-ppc64le-buildlet",
    )
    .with_prep(HostPrep::OregonStatePpc),
    HostProfile::legacy(
        "solaris",
        "amd64",
        "buildlet.solaris-amd64",
        "solaris-amd64-smartosbuildlet",
    ),
    HostProfile::cloud("linux", "amd64"),
    HostProfile::cloud("linux", "386"),
    HostProfile::cloud("linux", "riscv64"),
    HostProfile::cloud("linux", "mips64le"),
    HostProfile::cloud("linux", "loong64"),
    HostProfile::cloud("windows", "amd64"),
    HostProfile::cloud("windows", "386"),
    HostProfile::cloud("windows", "arm64"),
    HostProfile::cloud("darwin", "amd64"),
    HostProfile::cloud("darwin", "arm64"),
    HostProfile::cloud("freebsd", "amd64"),
    HostProfile::cloud("freebsd", "386"),
    HostProfile::cloud("freebsd", "arm64"),
    HostProfile::cloud("openbsd", "amd64"),
    HostProfile::cloud("openbsd", "386"),
    HostProfile::cloud("openbsd", "arm64"),
    HostProfile::cloud("netbsd", "amd64"),
    HostProfile::cloud("netbsd", "386"),
    HostProfile::cloud("plan9", "386"),
    HostProfile::cloud("illumos", "amd64"),
];

/// Every known profile, in table order.
pub fn profiles() -> &'static [HostProfile] {
    PROFILES
}

/// Rows for one `os/arch` pair.
pub fn profiles_for<'a>(
    os: &'a str,
    arch: &'a str,
) -> impl Iterator<Item = &'static HostProfile> + 'a {
    PROFILES.iter().filter(move |p| p.os == os && p.arch == arch)
}

/// Tags accepted for a pair, empty if the pair ignores tags.
pub fn allowed_tags(os: &str, arch: &str) -> Vec<&'static str> {
    profiles_for(os, arch)
        .filter_map(|p| match p.tag {
            TagMatch::Exactly(tag) => Some(tag),
            TagMatch::Any => None,
        })
        .collect()
}
