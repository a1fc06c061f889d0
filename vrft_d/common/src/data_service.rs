use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::fs;
use std::path::{Path, PathBuf};

use crate::installer::is_library;
use crate::metadata::{
    is_valid_module_id, load_manifest, save_manifest, InstallState, InstallableModuleMetadata, ModuleMetadata,
    MANIFEST_FILE_NAME,
};

/// Source of truth for which modules are installed locally.
pub trait ModuleDataService: Send + Sync {
    /// Installed modules in load order.
    fn installed_modules(&self) -> Vec<InstallableModuleMetadata>;

    /// Loose libraries dropped straight into the module store without a
    /// package around them.
    fn legacy_modules(&self) -> Vec<InstallableModuleMetadata> {
        Vec::new()
    }

    fn save_installed_modules(&self, modules: &[InstallableModuleMetadata]) -> Result<()>;
}

/// Reads and writes manifests directly in the module store.
pub struct LocalModuleDataService {
    modules_dir: PathBuf,
}

impl LocalModuleDataService {
    pub fn new(modules_dir: impl Into<PathBuf>) -> Self {
        Self {
            modules_dir: modules_dir.into(),
        }
    }

    pub fn modules_dir(&self) -> &Path {
        &self.modules_dir
    }

    /// Deletes modules that were marked for deletion during a previous run.
    /// Call before anything is loaded. Only the directory the manifest was
    /// read from is removed, whatever id it claims.
    pub fn purge_pending_deletions(&self) -> usize {
        let mut removed = 0;
        for (dir, module) in self.read_manifests() {
            if module.installation_state != InstallState::AwaitingRestart {
                continue;
            }
            match fs::remove_dir_all(&dir) {
                Ok(()) => {
                    info!("Deleted module {} marked for deletion from {:?}", module.module_id(), dir);
                    removed += 1;
                }
                Err(e) => warn!("Failed to delete module directory {:?}: {}", dir, e),
            }
        }
        removed
    }

    /// Every readable manifest in the store, paired with the directory it
    /// was found in.
    fn read_manifests(&self) -> Vec<(PathBuf, InstallableModuleMetadata)> {
        let entries = match fs::read_dir(&self.modules_dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Module store {:?} is not readable: {}", self.modules_dir, e);
                return Vec::new();
            }
        };

        let mut modules = Vec::new();
        for entry in entries.flatten() {
            let dir = entry.path();
            let manifest_path = dir.join(MANIFEST_FILE_NAME);
            if !dir.is_dir() || !manifest_path.exists() {
                continue;
            }

            match load_manifest(&manifest_path) {
                Ok(mut module) => {
                    module.assembly_load_path = module
                        .metadata
                        .dll_file_name
                        .as_ref()
                        .map(|dll| dir.join(dll));
                    modules.push((dir, module));
                }
                Err(e) => warn!("Skipping {:?}: invalid manifest: {}", manifest_path, e),
            }
        }
        modules
    }
}

impl ModuleDataService for LocalModuleDataService {
    fn installed_modules(&self) -> Vec<InstallableModuleMetadata> {
        let mut modules: Vec<_> = self
            .read_manifests()
            .into_iter()
            .map(|(_, module)| module)
            .filter(|m| m.installation_state != InstallState::AwaitingRestart)
            .collect();
        // Stable, so equal orders keep directory order.
        modules.sort_by_key(|m| m.order);
        modules
    }

    fn legacy_modules(&self) -> Vec<InstallableModuleMetadata> {
        let Ok(entries) = fs::read_dir(&self.modules_dir) else {
            return Vec::new();
        };

        let mut modules: Vec<_> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && is_library(path))
            .filter_map(|path| {
                let file_name = path.file_name()?.to_str()?.to_string();
                let stem = path.file_stem()?.to_str()?.to_string();
                let mut metadata = ModuleMetadata::new(stem.clone());
                metadata.module_name = Some(stem);
                metadata.dll_file_name = Some(file_name);
                Some(InstallableModuleMetadata {
                    installation_state: InstallState::Installed,
                    local: true,
                    assembly_load_path: Some(path),
                    ..InstallableModuleMetadata::from(metadata)
                })
            })
            .collect();
        modules.sort_by(|a, b| a.module_id().cmp(b.module_id()));
        modules
    }

    fn save_installed_modules(&self, modules: &[InstallableModuleMetadata]) -> Result<()> {
        for module in modules {
            if !is_valid_module_id(module.module_id()) {
                warn!("Not saving module with unusable id {:?}", module.module_id());
                continue;
            }
            let dir = self.modules_dir.join(module.module_id());
            if !dir.is_dir() {
                warn!("Not saving {}: module directory {:?} is missing", module.module_id(), dir);
                continue;
            }
            save_manifest(&dir.join(MANIFEST_FILE_NAME), module)
                .with_context(|| format!("Failed to save manifest for {}", module.module_id()))?;
        }
        Ok(())
    }
}
