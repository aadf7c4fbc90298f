use std::process::ExitCode;
use std::time::Duration;

use tracing::{error, info};

use crate::error::exit_code_for;

/// The one way stage0 gives up.
///
/// Logs the full error chain, waits out the grace delay on hosts where the
/// message would otherwise vanish with the console window, and hands back
/// the exit code for `main` to return.
#[derive(Debug, Clone, Copy)]
pub struct FatalReporter {
    grace: Duration,
}

impl FatalReporter {
    pub const fn new(grace: Duration) -> Self {
        Self { grace }
    }

    pub fn report(&self, err: &anyhow::Error) -> ExitCode {
        error!("{err:#}");
        if !self.grace.is_zero() {
            info!(
                "(sleeping for {} before failing)",
                humantime::format_duration(self.grace)
            );
            std::thread::sleep(self.grace);
        }
        ExitCode::from(exit_code_for(err))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    #[test]
    fn no_grace_returns_immediately() {
        let start = Instant::now();
        let _ = FatalReporter::new(Duration::ZERO).report(&anyhow::anyhow!("boom"));
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn waits_out_the_grace_delay() {
        let start = Instant::now();
        let _ = FatalReporter::new(Duration::from_millis(100)).report(&anyhow::anyhow!("boom"));
        assert!(start.elapsed() >= Duration::from_millis(100));
    }
}
