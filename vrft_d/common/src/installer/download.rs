use log::debug;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::entry_point::url_file_name;
use crate::InstallError;

/// Fetches a module package to a local file.
pub trait ModuleDownloader: Send + Sync {
    fn download(&self, url: &str, destination: &Path) -> Result<(), InstallError>;
}

pub struct HttpDownloader {
    agent: ureq::Agent,
}

impl HttpDownloader {
    pub fn new() -> Self {
        Self {
            agent: ureq::AgentBuilder::new()
                .timeout_connect(Duration::from_secs(15))
                .timeout_read(Duration::from_secs(120))
                .build(),
        }
    }
}

impl Default for HttpDownloader {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleDownloader for HttpDownloader {
    fn download(&self, url: &str, destination: &Path) -> Result<(), InstallError> {
        let response = self.agent.get(url).call().map_err(|e| InstallError::Download {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let mut reader = response.into_reader();
        let mut file = File::create(destination)?;
        if let Err(e) = io::copy(&mut reader, &mut file) {
            drop(file);
            let _ = fs::remove_file(destination);
            return Err(InstallError::Download {
                url: url.to_string(),
                reason: e.to_string(),
            });
        }

        debug!("Downloaded {} to {:?}", url, destination);
        Ok(())
    }
}

/// Serves downloads from the local file system: `file://` URLs are copied
/// as-is, anything else is looked up by file name under `root`.
pub struct LocalDownloader {
    root: PathBuf,
}

impl LocalDownloader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, url: &str) -> Option<PathBuf> {
        if let Some(path) = url.strip_prefix("file://") {
            return Some(PathBuf::from(path));
        }
        url_file_name(url).map(|name| self.root.join(name))
    }
}

impl ModuleDownloader for LocalDownloader {
    fn download(&self, url: &str, destination: &Path) -> Result<(), InstallError> {
        let source = self.resolve(url).ok_or_else(|| InstallError::Download {
            url: url.to_string(),
            reason: "URL has no file name".to_string(),
        })?;

        fs::copy(&source, destination).map_err(|e| InstallError::Download {
            url: url.to_string(),
            reason: format!("{:?}: {}", source, e),
        })?;
        Ok(())
    }
}
