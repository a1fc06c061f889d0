//! Turns module packages (a local zip, or a catalog entry pointing at a zip or
//! a bare library) into module directories inside the module store.

mod archive;
mod download;
mod entry_point;
mod zone;

pub use download::{HttpDownloader, LocalDownloader, ModuleDownloader};
pub use entry_point::{
    find_module_library, is_library, is_plain_file_name, levenshtein_distance, url_file_name,
    url_is_library, LIBRARY_EXTENSIONS,
};

use log::{debug, error, info, warn};
use std::fs;
use std::path::{Path, PathBuf};

use crate::metadata::{
    is_valid_module_id, load_manifest, read_json, save_manifest, InstallState,
    InstallableModuleMetadata, ModuleMetadata, MANIFEST_FILE_NAME,
};
use crate::InstallError;
use archive::{copy_tree, extract_archive};

pub struct ModuleInstaller {
    modules_dir: PathBuf,
    downloader: Box<dyn ModuleDownloader>,
}

impl ModuleInstaller {
    pub fn new(modules_dir: impl Into<PathBuf>) -> Result<Self, InstallError> {
        Self::with_downloader(modules_dir, HttpDownloader::new())
    }

    pub fn with_downloader(
        modules_dir: impl Into<PathBuf>,
        downloader: impl ModuleDownloader + 'static,
    ) -> Result<Self, InstallError> {
        let modules_dir = modules_dir.into();
        if !modules_dir.exists() {
            fs::create_dir_all(&modules_dir)?;
        }
        Ok(Self {
            modules_dir,
            downloader: Box::new(downloader),
        })
    }

    pub fn modules_dir(&self) -> &Path {
        &self.modules_dir
    }

    pub fn module_directory(&self, module_id: &str) -> PathBuf {
        self.modules_dir.join(module_id)
    }

    /// Installs a zip archive from disk and returns the path of its
    /// entry-point library.
    pub fn install_local_module(&self, archive_path: &Path) -> Result<PathBuf, InstallError> {
        let archive_name = archive_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| archive_path.display().to_string());

        let stored_archive = self.modules_dir.join(&archive_name);
        let copied = !same_file(archive_path, &stored_archive);
        if copied {
            fs::copy(archive_path, &stored_archive)?;
        }

        let temp_dir = tempfile::Builder::new()
            .prefix(&format!("vrft-{}-", file_stem(&archive_name)))
            .tempdir()?;
        let extracted = extract_archive(&stored_archive, temp_dir.path());
        if copied {
            if let Err(e) = fs::remove_file(&stored_archive) {
                warn!("Failed to remove copied archive {:?}: {}", stored_archive, e);
            }
        }
        extracted?;

        let manifest_path = temp_dir.path().join(MANIFEST_FILE_NAME);
        if !manifest_path.exists() {
            error!("Module {} does not contain a module.json file", archive_name);
            return Err(InstallError::MissingManifest {
                archive: archive_name,
            });
        }

        let metadata = match read_json::<ModuleMetadata>(&manifest_path) {
            Ok(metadata) if is_valid_module_id(&metadata.module_id) => metadata,
            Ok(metadata) => {
                error!("Module {} has an unusable ModuleId {:?}", archive_name, metadata.module_id);
                return Err(InstallError::InvalidManifest {
                    archive: archive_name,
                    reason: format!("unusable ModuleId {:?}", metadata.module_id),
                });
            }
            Err(e) => {
                error!("Module {} contains an invalid module.json file: {}", archive_name, e);
                return Err(InstallError::InvalidManifest {
                    archive: archive_name,
                    reason: e.to_string(),
                });
            }
        };

        check_library_name(&metadata)?;
        let module_dir = self.module_directory(&metadata.module_id);
        self.install_staged(temp_dir.path(), metadata, true, &module_dir)
    }

    /// Installs a module from its catalog entry and returns the path of its
    /// entry-point library.
    pub fn install_remote_module(&self, metadata: &ModuleMetadata) -> Result<PathBuf, InstallError> {
        if !is_valid_module_id(&metadata.module_id) {
            return Err(InstallError::InvalidModuleId {
                module_id: metadata.module_id.clone(),
            });
        }
        check_library_name(metadata)?;

        let result = self.fetch_remote(metadata);
        match &result {
            Ok(path) => info!("Installed module {} to {:?}", metadata.module_id, path),
            Err(e) => error!(
                "Failed to install module {} (ID: {}): {}",
                metadata.display_name(),
                metadata.module_id,
                e
            ),
        }
        result
    }

    fn fetch_remote(&self, metadata: &ModuleMetadata) -> Result<PathBuf, InstallError> {
        let url = metadata
            .download_url
            .clone()
            .ok_or_else(|| InstallError::MissingDownloadUrl {
                module_id: metadata.module_id.clone(),
            })?;

        debug!("Provisioning temp download dir for {}", metadata.display_name());
        let temp_dir = tempfile::Builder::new().prefix("vrft-download-").tempdir()?;
        let staging = temp_dir.path().join("extracted");
        fs::create_dir_all(&staging)?;

        let mut metadata = metadata.clone();
        if url_is_library(&url) {
            let dll_file_name = match metadata.dll_file_name.clone() {
                Some(name) => name,
                None => url_file_name(&url)
                    .filter(|name| is_plain_file_name(name))
                    .map(str::to_owned)
                    .ok_or_else(|| InstallError::Download {
                        url: url.clone(),
                        reason: "URL does not end in a file name".to_string(),
                    })?,
            };
            let dll_path = staging.join(&dll_file_name);
            self.downloader.download(&url, &dll_path)?;
            debug!("Downloaded module {} to {:?}", metadata.module_id, dll_path);
            metadata.dll_file_name = Some(dll_file_name);
        } else {
            let archive_path = temp_dir.path().join("module.zip");
            info!("Downloading {} to temp dir {:?}", metadata.display_name(), temp_dir.path());
            self.downloader.download(&url, &archive_path)?;

            info!("Extracting zip to {:?}", staging);
            extract_archive(&archive_path, &staging)?;
        }

        let module_dir = self.module_directory(&metadata.module_id);
        self.install_staged(&staging, metadata, false, &module_dir)
    }

    /// Moves a fully staged package into `module_dir`. The entry point is
    /// resolved inside `staging` first, so a package that can't be loaded
    /// never touches an installed module. A previous installation is moved
    /// aside and restored if anything after that fails.
    fn install_staged(
        &self,
        staging: &Path,
        mut metadata: ModuleMetadata,
        local: bool,
        module_dir: &Path,
    ) -> Result<PathBuf, InstallError> {
        if metadata.dll_file_name.is_none() {
            metadata.dll_file_name = find_module_library(staging, &metadata)?;
        }
        let Some(dll_file_name) = metadata.dll_file_name.clone() else {
            error!(
                "Module {} has no library file name specified and no libraries were found in the package",
                metadata.module_id
            );
            return Err(InstallError::UnresolvedEntryPoint {
                module_id: metadata.module_id,
            });
        };

        let backup = if module_dir.exists() {
            let holder = tempfile::Builder::new()
                .prefix(".vrft-backup-")
                .tempdir_in(&self.modules_dir)?;
            let previous = holder.path().join(&metadata.module_id);
            fs::rename(module_dir, &previous)?;
            debug!("Moved previous installation of {} to {:?}", metadata.module_id, previous);
            Some((holder, previous))
        } else {
            None
        };

        let previous = backup.as_ref().map(|(_, previous)| previous.as_path());
        let result = self.populate(staging, previous, metadata, local, module_dir);
        if let Err(e) = &result {
            warn!("Rolling back {:?}: {}", module_dir, e);
            remove_module_dir(module_dir);
            if let Some(previous) = previous {
                if let Err(e) = fs::rename(previous, module_dir) {
                    error!("Failed to restore previous installation from {:?}: {}", previous, e);
                }
            }
        }
        result.map(|()| module_dir.join(dll_file_name))
    }

    fn populate(
        &self,
        staging: &Path,
        previous: Option<&Path>,
        metadata: ModuleMetadata,
        local: bool,
        module_dir: &Path,
    ) -> Result<(), InstallError> {
        fs::create_dir_all(module_dir)?;
        if let Some(previous) = previous {
            let old_manifest = previous.join(MANIFEST_FILE_NAME);
            if old_manifest.exists() {
                fs::copy(&old_manifest, module_dir.join(MANIFEST_FILE_NAME))?;
            }
        }

        info!("Moving files for {} to {:?}", metadata.display_name(), module_dir);
        copy_tree(staging, module_dir)?;
        if !local {
            zone::unblock_libraries(module_dir);
        }

        self.merge_and_save_metadata(metadata, local, module_dir)?;
        Ok(())
    }

    /// Writes the manifest for a freshly materialized module. If the module
    /// directory already had one, the new metadata is merged over it so that
    /// what the host or user set (order, instantiatable, pending deletion)
    /// survives the update.
    fn merge_and_save_metadata(
        &self,
        metadata: ModuleMetadata,
        local: bool,
        module_dir: &Path,
    ) -> Result<InstallableModuleMetadata, InstallError> {
        let manifest_path = module_dir.join(MANIFEST_FILE_NAME);

        let existing = if manifest_path.exists() {
            match load_manifest(&manifest_path) {
                Ok(existing) => Some(existing),
                Err(e) => {
                    warn!(
                        "Existing manifest for {} is unreadable, replacing it: {}",
                        metadata.module_id, e
                    );
                    None
                }
            }
        } else {
            None
        };

        let merged = match existing {
            Some(mut existing) => {
                existing.metadata.merge_from(&metadata);
                if matches!(
                    existing.installation_state,
                    InstallState::NotInstalled | InstallState::Outdated
                ) {
                    existing.installation_state = InstallState::Installed;
                }
                existing
            }
            None => InstallableModuleMetadata {
                installation_state: InstallState::Installed,
                local,
                ..InstallableModuleMetadata::from(metadata)
            },
        };

        save_manifest(&manifest_path, &merged)?;
        Ok(merged)
    }

    /// Flags a module to be deleted on the next start. Nothing is removed
    /// now because the module may still be loaded.
    pub fn mark_module_for_deletion(
        &self,
        module: &mut InstallableModuleMetadata,
    ) -> Result<(), InstallError> {
        if !is_valid_module_id(module.module_id()) {
            return Err(InstallError::InvalidModuleId {
                module_id: module.module_id().to_string(),
            });
        }
        module.installation_state = InstallState::AwaitingRestart;
        module.instantiatable = false;

        let manifest_path = self
            .module_directory(module.module_id())
            .join(MANIFEST_FILE_NAME);
        match save_manifest(&manifest_path, module) {
            Ok(()) => {
                info!("Marked module {} for deletion", module.module_id());
                Ok(())
            }
            Err(e) => {
                warn!(
                    "Attempted to mark module {} for deletion, but it couldn't be saved: {}",
                    module.module_id(),
                    e
                );
                Err(e)
            }
        }
    }

    pub fn uninstall_module(&self, metadata: &ModuleMetadata) -> Result<(), InstallError> {
        if !is_valid_module_id(&metadata.module_id) {
            return Err(InstallError::InvalidModuleId {
                module_id: metadata.module_id.clone(),
            });
        }
        debug!("Uninstalling module {}", metadata.module_id);
        let module_dir = self.module_directory(&metadata.module_id);
        if !module_dir.exists() {
            debug!(
                "Module {} could not be found where it was expected in {:?}",
                metadata.module_id, module_dir
            );
            return Ok(());
        }

        match fs::remove_dir_all(&module_dir) {
            Ok(()) => {
                info!("Uninstalled module {} from {:?}", metadata.module_id, module_dir);
                Ok(())
            }
            Err(e) => {
                error!(
                    "Failed to uninstall module {} from {:?}: {}",
                    metadata.module_id, module_dir, e
                );
                Err(e.into())
            }
        }
    }
}

/// A declared library name must stay inside the module directory.
fn check_library_name(metadata: &ModuleMetadata) -> Result<(), InstallError> {
    match metadata.dll_file_name.as_deref() {
        Some(name) if !is_plain_file_name(name) => Err(InstallError::InvalidFileName {
            module_id: metadata.module_id.clone(),
            file_name: name.to_string(),
        }),
        _ => Ok(()),
    }
}

fn remove_module_dir(module_dir: &Path) {
    if module_dir.exists() {
        if let Err(e) = fs::remove_dir_all(module_dir) {
            warn!("Failed to clean up {:?}: {}", module_dir, e);
        }
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn file_stem(name: &str) -> &str {
    Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("module")
}
