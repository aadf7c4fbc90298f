//! Log output setup.
//!
//! Logs always go to stderr. When a serial console is configured they are
//! mirrored to it too, until the port is released for the buildlet.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;

use crate::launch::ConsoleHandoff;

#[derive(Debug, Default)]
struct SerialPort {
    path: Option<PathBuf>,
    file: Option<File>,
}

/// Shared handle on the serial console. Cloned into the log subscriber and
/// handed to the launcher, which releases it before the worker starts.
#[derive(Debug, Clone, Default)]
pub struct SerialConsole {
    port: Arc<Mutex<SerialPort>>,
}

impl SerialConsole {
    /// Logs go to stderr only.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Mirror logs to the device at `path`. If it can't be opened now, logs
    /// stay on stderr and the open is retried on the next `acquire`.
    pub fn open(path: &Path) -> Self {
        let console = Self {
            port: Arc::new(Mutex::new(SerialPort {
                path: Some(path.to_path_buf()),
                file: None,
            })),
        };
        console.acquire();
        console
    }

    pub fn is_held(&self) -> bool {
        self.lock().file.is_some()
    }

    fn lock(&self) -> MutexGuard<'_, SerialPort> {
        self.port
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl ConsoleHandoff for SerialConsole {
    fn acquire(&self) {
        let mut port = self.lock();
        if port.file.is_some() {
            return;
        }
        let Some(path) = port.path.clone() else {
            return;
        };
        match OpenOptions::new().append(true).open(&path) {
            Ok(file) => port.file = Some(file),
            // The subscriber writes through this same lock, so report
            // straight to stderr.
            Err(e) => eprintln!("stage0: opening serial console {}: {e}", path.display()),
        }
    }

    fn release(&self) {
        self.lock().file = None;
    }
}

/// Per-event writer handed out by [`SerialConsole`].
pub struct ConsoleWriter {
    port: Arc<Mutex<SerialPort>>,
}

impl Write for ConsoleWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        let mut port = self
            .port
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(file) = port.file.as_mut() {
            // A wedged serial port must not take stderr logging down with it.
            let _ = file.write_all(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

impl<'a> MakeWriter<'a> for SerialConsole {
    type Writer = ConsoleWriter;

    fn make_writer(&'a self) -> Self::Writer {
        ConsoleWriter {
            port: Arc::clone(&self.port),
        }
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the default `info`.
pub fn init(console: &SerialConsole, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(console.clone());
    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(e) = result {
        eprintln!("stage0: logging already initialized: {e}");
    }
}
