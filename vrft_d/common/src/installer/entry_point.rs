use log::{debug, error};
use std::fs;
use std::io;
use std::path::Path;

use crate::ModuleMetadata;

/// File extensions treated as loadable module libraries.
pub const LIBRARY_EXTENSIONS: &[&str] = &["dll", "so", "dylib"];

pub fn is_library(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            LIBRARY_EXTENSIONS
                .iter()
                .any(|lib| ext.eq_ignore_ascii_case(lib))
        })
}

/// Last path segment of a URL, without query string or fragment.
pub fn url_file_name(url: &str) -> Option<&str> {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    let name = url[..end].rsplit(['/', '\\']).next()?;
    (!name.is_empty()).then_some(name)
}

/// True for a bare file name that stays inside the directory it is joined
/// onto.
pub fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', ':', '\0'])
}

pub fn url_is_library(url: &str) -> bool {
    url_file_name(url).is_some_and(|name| is_library(Path::new(name)))
}

/// Picks the entry-point library in `module_dir` for a package that did not
/// name one.
///
/// A single library wins outright. With several, the one whose file stem is
/// closest (edit distance) to the stem of the download URL is used; ties go
/// to the first in file-name order.
pub fn find_module_library(module_dir: &Path, metadata: &ModuleMetadata) -> io::Result<Option<String>> {
    let mut libraries: Vec<String> = fs::read_dir(module_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_library(path))
        .filter_map(|path| path.file_name().and_then(|n| n.to_str()).map(str::to_owned))
        .collect();
    libraries.sort();

    match libraries.len() {
        0 => {
            error!(
                "Module {} has no library file name specified and no libraries were found in {:?}",
                metadata.module_id, module_dir
            );
            return Ok(None);
        }
        1 => return Ok(libraries.pop()),
        _ => {}
    }

    let target = metadata
        .download_url
        .as_deref()
        .and_then(url_file_name)
        .and_then(|name| Path::new(name).file_stem())
        .and_then(|stem| stem.to_str())
        .unwrap_or_default();

    let closest = libraries
        .into_iter()
        .map(|name| {
            let stem = Path::new(&name)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_owned();
            let distance = levenshtein_distance(target, &stem);
            (name, distance)
        })
        .min_by_key(|(_, distance)| *distance);

    if let Some((name, distance)) = &closest {
        debug!(
            "Module {} didn't specify a target library and contained several. Using {} as its distance of {} was closest to {:?}",
            metadata.module_id, name, distance, target
        );
    }

    Ok(closest.map(|(name, _)| name))
}

pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != *cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_classic_cases() {
        assert_eq!(levenshtein_distance("", ""), 0);
        assert_eq!(levenshtein_distance("foo", ""), 3);
        assert_eq!(levenshtein_distance("", "foo"), 3);
        assert_eq!(levenshtein_distance("kitten", "sitting"), 3);
        assert_eq!(levenshtein_distance("flaw", "lawn"), 2);
        assert_eq!(levenshtein_distance("foo", "foobar"), 3);
    }

    #[test]
    fn url_file_name_strips_query() {
        assert_eq!(
            url_file_name("https://host/releases/MyModule.zip?token=1#x"),
            Some("MyModule.zip")
        );
        assert_eq!(url_file_name("https://host/releases/"), None);
        assert!(url_is_library("https://host/a/Tracker.DLL"));
        assert!(!url_is_library("https://host/a/Tracker.zip"));
    }

    #[test]
    fn plain_file_names_only() {
        assert!(is_plain_file_name("Tracker.dll"));
        assert!(!is_plain_file_name(""));
        assert!(!is_plain_file_name(".."));
        assert!(!is_plain_file_name("../x.dll"));
        assert!(!is_plain_file_name("sub\\x.dll"));
    }
}
