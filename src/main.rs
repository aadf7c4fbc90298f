use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;

use stage0::commands;
use stage0::config::{BootstrapConfig, DEFAULT_TARGET, HostEnv};
use stage0::fatal::FatalReporter;
use stage0::host::{self, HostIdentity};
use stage0::telemetry::{self, SerialConsole};

#[derive(Debug, Parser)]
#[command(
    name = "stage0",
    version,
    about = "Wait for the network, fetch the buildlet, and run it"
)]
struct Cli {
    /// How long to wait for the network (e.g. 45s, 2m); 0 picks the platform default
    #[arg(long, value_parser = humantime::parse_duration)]
    network_wait: Option<Duration>,

    /// If set, untar this tar.gz to --untar-dest-dir and exit
    #[arg(long)]
    untar_file: Option<PathBuf>,

    /// Destination directory for --untar-file
    #[arg(long, requires = "untar_file")]
    untar_dest_dir: Option<PathBuf>,

    /// Print the resolved host profile and launch plan as JSON, then exit
    #[arg(long, conflicts_with = "untar_file")]
    dry_run: bool,

    /// Resolve as if running on this OS (dry run only)
    #[arg(long, requires = "dry_run")]
    host_os: Option<String>,

    /// Resolve as if running on this architecture (dry run only)
    #[arg(long, requires = "dry_run")]
    host_arch: Option<String>,

    /// Where to write the downloaded buildlet
    #[arg(long, default_value = DEFAULT_TARGET)]
    target: PathBuf,

    /// Mirror logs to this serial device and hand it to the buildlet
    #[arg(long)]
    serial_console: Option<PathBuf>,

    /// How long to keep a fatal message on screen before exiting
    #[arg(long, value_parser = humantime::parse_duration)]
    fatal_grace: Option<Duration>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[derive(Debug, Clone, Copy)]
enum Mode<'a> {
    Untar(&'a Path),
    DryRun,
    Bootstrap,
}

impl Mode<'_> {
    const fn name(self) -> &'static str {
        match self {
            Self::Untar(_) => "untar",
            Self::DryRun => "dry-run",
            Self::Bootstrap => "bootstrap",
        }
    }
}

impl Cli {
    fn mode(&self) -> Mode<'_> {
        if let Some(file) = self.untar_file.as_deref() {
            Mode::Untar(file)
        } else if self.dry_run {
            Mode::DryRun
        } else {
            Mode::Bootstrap
        }
    }

    fn bootstrap_config(&self) -> BootstrapConfig {
        BootstrapConfig {
            target: self.target.clone(),
            network_wait: self.network_wait,
            fatal_grace: self.fatal_grace,
            ..Default::default()
        }
    }

    fn identity(&self, env: &HostEnv) -> HostIdentity {
        let current = HostIdentity::current(env);
        HostIdentity::new(
            self.host_os.as_deref().unwrap_or(host::current_os()),
            self.host_arch.as_deref().unwrap_or(host::current_arch()),
            current.builder_env.as_deref(),
        )
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let console = cli
        .serial_console
        .as_deref()
        .map_or_else(SerialConsole::disabled, SerialConsole::open);
    telemetry::init(&console, cli.log_json);

    let env = HostEnv::from_process();
    let identity = cli.identity(&env);
    let config = cli.bootstrap_config();
    let mode = cli.mode();

    let _span = tracing::info_span!("stage0", mode = mode.name()).entered();

    let result = match mode {
        Mode::Untar(file) => commands::untar::run(file, cli.untar_dest_dir.as_deref()),
        Mode::DryRun => commands::plan::run(&identity, &env),
        Mode::Bootstrap => commands::bootstrap::run(&config, &identity, &env, &console),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        // Real platform, not the --host-os a dry run simulates.
        Err(e) => FatalReporter::new(config.fatal_grace(host::current_os())).report(&e),
    }
}
