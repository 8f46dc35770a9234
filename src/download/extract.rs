//! Unpacking of zip-packaged export files

use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::TransferError;
use crate::util::{sync_dir, write_atomic, Fingerprint};

/// Name of the extracted document for an upstream file name
pub fn extracted_name(file_name: &str) -> String {
    file_name.strip_suffix(".zip").unwrap_or(file_name).to_string()
}

/// Make the document (JSON or CSV) inside `archive` available under `out_dir`.
///
/// Plain (non-zip) files are returned in place. The archive is unpacked
/// only when it differs from the one the current output came from; the
/// first file entry is streamed to a temp file and renamed into place.
pub fn extract_document(archive: &Path, out_dir: &Path) -> Result<PathBuf, TransferError> {
    let file_name = archive
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| TransferError::Archive(format!("invalid archive path {}", archive.display())))?;
    if !file_name.ends_with(".zip") {
        return Ok(archive.to_path_buf());
    }

    let out_path = out_dir.join(extracted_name(file_name));
    let marker_path = out_dir.join(format!("{}.source", extracted_name(file_name)));
    let source = Fingerprint::of(archive)?.to_string();

    if out_path.exists() {
        match fs::read_to_string(&marker_path) {
            Ok(previous) if previous == source => {
                debug!("{} already extracted", file_name);
                return Ok(out_path);
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }

    fs::create_dir_all(out_dir)?;
    let mut zip = zip::ZipArchive::new(File::open(archive)?)?;
    let index = (0..zip.len())
        .find(|&i| zip.by_index(i).map(|entry| !entry.is_dir()).unwrap_or(false))
        .ok_or_else(|| TransferError::Archive(format!("{} contains no files", file_name)))?;

    let mut entry = zip.by_index(index)?;
    info!("Extracting {} from {}", entry.name(), file_name);

    let temp_path = out_dir.join(format!("{}.tmp", extracted_name(file_name)));
    let mut writer = BufWriter::new(File::create(&temp_path)?);
    let bytes = io::copy(&mut entry, &mut writer)?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    fs::rename(&temp_path, &out_path)?;
    sync_dir(out_dir)?;
    write_atomic(&marker_path, source.as_bytes())?;

    debug!("Extracted {} bytes to {}", bytes, out_path.display());
    Ok(out_path)
}

/// Pack `contents` as a single-entry archive
#[cfg(test)]
pub(crate) fn write_single_entry_zip(path: &Path, entry_name: &str, contents: &[u8]) -> Result<(), TransferError> {
    use std::io::Write;

    let mut zip = zip::ZipWriter::new(File::create(path)?);
    zip.start_file(entry_name, zip::write::SimpleFileOptions::default())?;
    zip.write_all(contents)?;
    zip.finish()?;
    Ok(())
}
