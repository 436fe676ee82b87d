use crate::utils::path::{is_within, resolve_lexically};
use std::fs::{self, File};
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use zip::ZipArchive;
use zip::result::ZipResult;

/// Where archive entries land and the root they must not escape. Both absolute.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub uploads_dir: PathBuf,
    pub extraction_root: PathBuf,
}

#[derive(Debug, Default)]
pub struct ExtractReport {
    /// Resolved target of every entry, in archive order
    pub entries: Vec<PathBuf>,
    pub extracted: usize,
    pub skipped: usize,
}

/// Writes an uploaded archive to a uniquely named file in `temp_dir`.
/// The file is removed when the returned handle is dropped.
pub fn stage_archive(temp_dir: &Path, filename: &str, data: &[u8]) -> io::Result<NamedTempFile> {
    fs::create_dir_all(temp_dir)?;
    let base = Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload.zip");

    let mut staged = tempfile::Builder::new()
        .prefix("complaint-")
        .suffix(&format!("-{}", base))
        .tempfile_in(temp_dir)?;
    staged.write_all(data)?;
    staged.flush()?;
    Ok(staged)
}

/// Extracts every entry of the zip at `archive_path` below `uploads_dir`.
/// Entries resolving outside `extraction_root` are discarded.
pub fn extract_zip(archive_path: &Path, options: &ExtractOptions) -> ZipResult<ExtractReport> {
    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(BufReader::new(file))?;
    let mut report = ExtractReport::default();

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let name = entry.name().to_string();
        // entry names are always relative to the uploads dir
        let relative = name.trim_start_matches(['/', '\\']);
        let target = resolve_lexically(&options.uploads_dir, Path::new(relative));
        report.entries.push(target.clone());

        if !is_within(&target, &options.extraction_root) {
            warn!("Discarding archive entry outside extraction root: {}", name);
            io::copy(&mut entry, &mut io::sink())?;
            report.skipped += 1;
            continue;
        }

        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        io::copy(&mut entry, &mut out)?;
        debug!("Extracted {} -> {}", name, target.display());
        report.extracted += 1;
    }

    Ok(report)
}
