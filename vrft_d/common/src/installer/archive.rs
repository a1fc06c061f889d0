use std::fs::{self, File};
use std::io::BufReader;
use std::path::Path;

use crate::{InstallError, MANIFEST_FILE_NAME};

pub(crate) fn extract_archive(archive_path: &Path, destination: &Path) -> Result<(), InstallError> {
    let file = File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(BufReader::new(file))?;
    archive.extract(destination)?;
    Ok(())
}

/// Recursively copies `source` into `destination`, overwriting files. The
/// manifest at the root of `source` is never copied: the installer writes
/// the merged one itself.
pub(crate) fn copy_tree(source: &Path, destination: &Path) -> Result<(), InstallError> {
    copy_dir(source, destination, true)
}

fn copy_dir(source: &Path, destination: &Path, root: bool) -> Result<(), InstallError> {
    fs::create_dir_all(destination)?;

    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let path = entry.path();
        let target = destination.join(entry.file_name());

        if entry.file_type()?.is_dir() {
            copy_dir(&path, &target, false)?;
            continue;
        }

        if root && is_manifest(&entry.file_name()) {
            continue;
        }

        fs::copy(&path, &target)?;
    }

    Ok(())
}

fn is_manifest(name: &std::ffi::OsStr) -> bool {
    name.to_str()
        .is_some_and(|n| n.eq_ignore_ascii_case(MANIFEST_FILE_NAME))
}
