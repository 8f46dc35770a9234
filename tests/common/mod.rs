//! Fixture helpers shared by the integration tests

use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Pack `contents` as a single-entry archive, the way upstream ships exports
pub fn write_single_entry_zip(path: &Path, entry_name: &str, contents: &[u8]) -> zip::result::ZipResult<()> {
    let mut zip = zip::ZipWriter::new(File::create(path)?);
    zip.start_file(entry_name, zip::write::SimpleFileOptions::default())?;
    zip.write_all(contents)?;
    zip.finish()?;
    Ok(())
}
