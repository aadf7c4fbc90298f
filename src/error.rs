use std::time::Duration;

/// Errors that cause stage0 to exit with a specific code.
///
/// Every variant is terminal: nothing above the stage that produced it
/// retries. Transient download failures are retried inside the fetcher and
/// only surface here once the attempt budget is spent.
#[derive(Debug, thiserror::Error)]
pub enum ExitError {
    #[error("config error: {0}")]
    Config(String),

    #[error("network didn't become reachable within {}", humantime::format_duration(*waited))]
    NetworkUnreachable { waited: Duration },

    #[error("downloading {url} failed after {attempts} attempt(s)")]
    Download { url: String, attempts: u32 },

    #[error("host preparation step {step:?} failed: {message}")]
    HostPrep { step: String, message: String },

    #[error("launching {program}: {message}")]
    Launch { program: String, message: String },

    #[error("error running buildlet: {status}")]
    WorkerFailed { status: String },

    #[error("untarring {file:?} to {dest:?}: {message}")]
    Extract {
        file: String,
        dest: String,
        message: String,
    },

    #[error("{tool} failed (exit {code}): {message}")]
    ToolFailed {
        tool: String,
        code: i32,
        message: String,
    },

    #[error("tool not found: {tool}")]
    ToolNotFound { tool: String },
}

impl ExitError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub const fn code(&self) -> u8 {
        match self {
            Self::Config(_) => 2,
            Self::NetworkUnreachable { .. } => 3,
            Self::Download { .. } => 4,
            Self::HostPrep { .. } | Self::ToolFailed { .. } | Self::ToolNotFound { .. } => 5,
            Self::Launch { .. } | Self::WorkerFailed { .. } => 6,
            Self::Extract { .. } => 7,
        }
    }
}

/// Exit code for an arbitrary error: the first `ExitError` found in the
/// chain decides, anything else is a generic failure.
pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<ExitError>()
        .or_else(|| err.chain().find_map(|cause| cause.downcast_ref::<ExitError>()))
        .map_or(1, ExitError::code)
}
