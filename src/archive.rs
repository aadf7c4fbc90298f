//! Tar extraction for image preparation and bootstrap toolchains.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use anyhow::Context;
use flate2::read::GzDecoder;
use tracing::debug;

use crate::error::ExitError;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Extract the tar (optionally gzip-compressed) at `archive` into `dest`.
///
/// `dest` must already exist and be a directory; it is checked before the
/// archive is opened. Returns the number of entries written.
pub fn untar_file(archive: &Path, dest: &Path) -> anyhow::Result<usize> {
    let extract_err = |message: String| ExitError::Extract {
        file: archive.display().to_string(),
        dest: dest.display().to_string(),
        message,
    };

    if dest.as_os_str().is_empty() {
        return Err(extract_err("destination directory must not be empty".into()).into());
    }
    match std::fs::metadata(dest) {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => return Err(extract_err("destination is not a directory".into()).into()),
        Err(e) => return Err(extract_err(e.to_string()).into()),
    }

    let file = File::open(archive).map_err(|e| extract_err(e.to_string()))?;
    untar(file, dest).map_err(|e| extract_err(format!("{e:#}")).into())
}

/// Extract a tar stream into `dest`, sniffing gzip compression.
pub fn untar<R: Read>(reader: R, dest: &Path) -> anyhow::Result<usize> {
    let mut reader = BufReader::new(reader);
    let gzipped = reader
        .fill_buf()
        .context("reading archive header")?
        .starts_with(&GZIP_MAGIC);
    if gzipped {
        unpack_entries(tar::Archive::new(GzDecoder::new(reader)), dest)
    } else {
        unpack_entries(tar::Archive::new(reader), dest)
    }
}

fn unpack_entries<R: Read>(mut archive: tar::Archive<R>, dest: &Path) -> anyhow::Result<usize> {
    archive.set_preserve_permissions(true);
    archive.set_preserve_mtime(true);

    let mut count = 0;
    for entry in archive.entries().context("reading tar entries")? {
        let mut entry = entry.context("reading tar entry")?;
        let path = entry.path().context("decoding entry path")?.into_owned();
        let written = entry
            .unpack_in(dest)
            .with_context(|| format!("unpacking {}", path.display()))?;
        if !written {
            anyhow::bail!("entry {} escapes the destination directory", path.display());
        }
        debug!(path = %path.display(), "extracted");
        count += 1;
    }
    Ok(count)
}
