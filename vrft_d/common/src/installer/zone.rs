//! Windows tags files fetched from the internet with a `Zone.Identifier`
//! stream, which stops them from loading until the user unblocks them.

use std::path::Path;

/// Strips the download mark from every library under `dir`. Failures are
/// logged and otherwise ignored.
#[cfg(windows)]
pub(crate) fn unblock_libraries(dir: &Path) {
    use super::entry_point::is_library;
    use log::error;

    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let Ok(entries) = std::fs::read_dir(&current) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else if is_library(&path) && !remove_zone_identifier(&path) {
                error!(
                    "Couldn't remove the 'downloaded file' mark from {:?}. Please unblock the file manually",
                    path
                );
            }
        }
    }
}

#[cfg(not(windows))]
pub(crate) fn unblock_libraries(_dir: &Path) {}

/// Returns `false` when a mark exists and could not be removed.
#[cfg(windows)]
fn remove_zone_identifier(path: &Path) -> bool {
    use log::debug;
    use windows::core::HSTRING;
    use windows::Win32::Storage::FileSystem::{
        DeleteFileW, GetFileAttributesW, INVALID_FILE_ATTRIBUTES,
    };

    let zone = HSTRING::from(format!("{}:Zone.Identifier", path.display()));

    unsafe {
        if GetFileAttributesW(&zone) == INVALID_FILE_ATTRIBUTES {
            return true;
        }

        match DeleteFileW(&zone) {
            Ok(()) => {
                debug!("Removed the downloaded file identifier from {:?}", path);
                true
            }
            Err(_) => false,
        }
    }
}
