use std::path::Path;

use tracing::info;

use crate::archive;
use crate::error::ExitError;

/// Image-preparation helper: unpack `file` into `dest_dir` and return.
pub fn run(file: &Path, dest_dir: Option<&Path>) -> anyhow::Result<()> {
    let Some(dest_dir) = dest_dir.filter(|d| !d.as_os_str().is_empty()) else {
        return Err(ExitError::config("--untar-dest-dir must not be empty").into());
    };
    info!(
        "running in untar mode, untarring {} to {}",
        file.display(),
        dest_dir.display()
    );
    let entries = archive::untar_file(file, dest_dir)?;
    info!(entries, "done untarring; exiting");
    Ok(())
}
