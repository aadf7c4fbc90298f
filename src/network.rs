//! Block until outbound connectivity is confirmed or a deadline passes.
//!
//! This lets stage0 be started from rc.local-style hooks that may race with
//! the network coming up.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::{PROBE_INTERVAL, PROBE_LOG_INTERVAL, PROBE_TIMEOUT};

/// A single connectivity check.
pub trait Probe {
    /// True if the network looks usable right now.
    fn is_up(&mut self) -> bool;
}

impl<F: FnMut() -> bool> Probe for F {
    fn is_up(&mut self) -> bool {
        self()
    }
}

/// HTTP GET against a well-known endpoint. Any response at all, including
/// 404, means the network is up; only transport failures mean down.
pub struct HttpProbe {
    url: String,
    agent: ureq::Agent,
}

impl HttpProbe {
    pub fn new(url: &str) -> Self {
        // No idle pooling: a kept-open socket must not hide a degraded network.
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(PROBE_TIMEOUT))
            .http_status_as_error(false)
            .max_idle_connections(0)
            .max_idle_connections_per_host(0)
            .build()
            .into();
        Self {
            url: url.to_string(),
            agent,
        }
    }
}

impl Probe for HttpProbe {
    fn is_up(&mut self) -> bool {
        match self.agent.get(&self.url).call() {
            Ok(resp) => {
                debug!(status = resp.status().as_u16(), url = %self.url, "probe answered");
                true
            }
            Err(e) => {
                debug!(url = %self.url, "probe failed: {e}");
                false
            }
        }
    }
}

/// Polling schedule for [`await_network`].
#[derive(Debug, Clone, Copy)]
pub struct NetworkGate {
    pub deadline: Duration,
    pub poll_interval: Duration,
    pub log_interval: Duration,
}

impl NetworkGate {
    pub const fn new(deadline: Duration) -> Self {
        Self {
            deadline,
            poll_interval: PROBE_INTERVAL,
            log_interval: PROBE_LOG_INTERVAL,
        }
    }

    /// Reports whether `probe` succeeded before the deadline.
    pub fn await_network(&self, probe: &mut dyn Probe) -> bool {
        let deadline = Instant::now() + self.deadline;
        let mut last_log: Option<Instant> = None;
        info!("waiting for network.");
        while Instant::now() < deadline {
            let t0 = Instant::now();
            if probe.is_up() {
                info!("network is up.");
                return true;
            }
            let took = round_tenths(t0.elapsed());
            let now = Instant::now();
            if last_log.is_none_or(|t| now.duration_since(t) >= self.log_interval) {
                info!(
                    "network still down; probe failure took {}",
                    humantime::format_duration(took)
                );
                last_log = Some(now);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            std::thread::sleep(self.poll_interval.min(remaining));
        }
        warn!("gave up waiting for network");
        false
    }
}

fn round_tenths(d: Duration) -> Duration {
    Duration::from_millis(u64::try_from(d.as_millis() / 100 * 100).unwrap_or(u64::MAX))
}
