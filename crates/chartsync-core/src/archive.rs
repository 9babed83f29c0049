//! Packaged chart archives
//!
//! Charts are distributed as `.tgz` archives. The standard layout puts every
//! file under a single top-level directory named after the chart
//! (`nginx/Chart.yaml`, `nginx/templates/...`); archives with the chart files
//! at the root are accepted too.

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use tar::{Archive, Builder, Header};
use walkdir::WalkDir;

use crate::chart::LoadedChart;
use crate::error::{CoreError, Result};

/// Compute the digest of raw archive bytes, as `sha256:<hex>`
#[must_use]
pub fn compute_digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// Extract gzip-compressed tar bytes into `dest`
///
/// Entries that would land outside `dest` are refused by `tar` itself.
/// Any decoding failure is reported as [`CoreError::Archive`].
pub fn extract_archive_bytes(data: &[u8], dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest)?;

    let decoder = GzDecoder::new(data);
    let mut archive = Archive::new(decoder);
    archive.set_preserve_permissions(false);

    archive.unpack(dest).map_err(|e| CoreError::Archive {
        message: format!("failed to unpack chart archive: {}", e),
    })
}

/// Locate the chart root inside an extracted archive or checkout
///
/// Returns `dir` when it holds a `Chart.yaml`, otherwise its only
/// subdirectory when that one does.
pub fn find_chart_root(dir: &Path) -> Result<PathBuf> {
    if LoadedChart::is_chart_dir(dir) {
        return Ok(dir.to_path_buf());
    }

    let mut subdirs = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            subdirs.push(entry.path());
        }
    }

    match subdirs.as_slice() {
        [single] if LoadedChart::is_chart_dir(single) => Ok(single.clone()),
        _ => Err(CoreError::InvalidChart {
            message: format!("no Chart.yaml found in {}", dir.display()),
        }),
    }
}

/// Package a chart directory into `.tgz` bytes under a top-level `prefix`
///
/// Entries are written in path order with a zero mtime so identical trees
/// produce identical bytes.
pub fn create_archive_bytes(chart_dir: &Path, prefix: &str) -> Result<Vec<u8>> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = Builder::new(encoder);

    for entry in WalkDir::new(chart_dir).sort_by_file_name() {
        let entry = entry.map_err(|e| CoreError::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let rel = entry
            .path()
            .strip_prefix(chart_dir)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        let archive_path = if prefix.is_empty() {
            rel
        } else {
            format!("{}/{}", prefix.trim_end_matches('/'), rel)
        };

        let content = std::fs::read(entry.path())?;
        add_bytes_to_archive(&mut builder, &archive_path, &content)?;
    }

    let encoder = builder.into_inner()?;
    Ok(encoder.finish()?)
}

fn add_bytes_to_archive<W: Write>(
    builder: &mut Builder<W>,
    archive_path: &str,
    content: &[u8],
) -> Result<()> {
    let mut header = Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(0);
    header.set_cksum();

    builder.append_data(&mut header, archive_path, content)?;
    Ok(())
}
