use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

use crate::config::DOWNLOAD_ATTEMPTS;
use crate::error::ExitError;

/// Where the buildlet comes from and where it lands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTarget {
    pub dest: PathBuf,
    pub url: String,
}

/// Copies the bytes behind a URL to a local file, once.
pub trait Transport {
    fn fetch_to(&self, url: &str, dest: &Path) -> anyhow::Result<()>;
}

/// Plain HTTP(S) transport. The body is streamed to `<dest>.tmp` and renamed
/// into place so a failed transfer never leaves a truncated binary behind.
pub struct HttpTransport {
    agent: ureq::Agent,
}

impl HttpTransport {
    pub fn new() -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_connect(Some(Duration::from_secs(30)))
            .timeout_global(Some(Duration::from_secs(10 * 60)))
            .build()
            .into();
        Self { agent }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for HttpTransport {
    fn fetch_to(&self, url: &str, dest: &Path) -> anyhow::Result<()> {
        let resp = self
            .agent
            .get(url)
            .call()
            .with_context(|| format!("GET {url}"))?;

        let tmp = tmp_path(dest);
        let mut out = File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
        let copied = std::io::copy(&mut resp.into_body().into_reader(), &mut out)
            .and_then(|_| out.flush())
            .and_then(|()| out.sync_all());
        drop(out);
        if let Err(e) = copied {
            let _ = std::fs::remove_file(&tmp);
            return Err(anyhow::Error::new(e).context(format!("writing {}", tmp.display())));
        }
        std::fs::rename(&tmp, dest).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            anyhow::Error::new(e)
                .context(format!("renaming {} to {}", tmp.display(), dest.display()))
        })
    }
}

fn tmp_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Bounded-retry download of a [`FetchTarget`].
pub struct Fetcher<'a> {
    transport: &'a dyn Transport,
    max_attempts: u32,
    retry_delay: Duration,
}

impl<'a> Fetcher<'a> {
    pub const fn new(transport: &'a dyn Transport, retry_delay: Duration) -> Self {
        Self {
            transport,
            max_attempts: DOWNLOAD_ATTEMPTS,
            retry_delay,
        }
    }

    /// Download `target`, returning the size of the written file.
    ///
    /// The network is expected to be up already; retries only absorb
    /// transient failures. If every attempt fails, the last error is
    /// returned wrapped in [`ExitError::Download`].
    pub fn download(&self, target: &FetchTarget) -> anyhow::Result<u64> {
        info!(url = %target.url, dest = %target.dest.display(), "downloading");
        let mut last_err = None;
        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                std::thread::sleep(self.retry_delay);
            }
            match self.transport.fetch_to(&target.url, &target.dest) {
                Ok(()) => {
                    let size = std::fs::metadata(&target.dest)
                        .with_context(|| format!("stat {}", target.dest.display()))
                        .context(ExitError::Download {
                            url: target.url.clone(),
                            attempts: attempt,
                        })?
                        .len();
                    info!(dest = %target.dest.display(), bytes = size, "downloaded");
                    return Ok(size);
                }
                Err(e) => {
                    warn!(
                        "try {attempt}/{} download failure: {e:#}",
                        self.max_attempts
                    );
                    last_err = Some(e);
                }
            }
        }
        let err = last_err.unwrap_or_else(|| anyhow::anyhow!("no download attempts made"));
        Err(err.context(ExitError::Download {
            url: target.url.clone(),
            attempts: self.max_attempts,
        }))
    }
}
