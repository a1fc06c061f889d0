use api::{TrackingModule, API_VERSION_SYMBOL, CREATE_MODULE_SYMBOL};
use libloading::Library;
use log::{debug, error, info, warn};
use std::panic;
use std::path::{Path, PathBuf};

use crate::LoadError;

type ApiVersionFn = unsafe extern "C" fn() -> u32;
#[allow(improper_ctypes_definitions)]
type CreateModuleFn = unsafe extern "C" fn() -> *mut dyn TrackingModule;

/// A module library that stays mapped for as long as this value lives.
///
/// Anything created by the library (the module itself, its vtable) must be
/// dropped before this.
pub struct ModuleLibrary {
    path: PathBuf,
    _library: Library,
}

impl ModuleLibrary {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ModuleLibrary {
    fn drop(&mut self) {
        debug!("Unloading {:?}", self.path);
    }
}

/// A module instance and the library its code lives in. Field order keeps
/// the module dropping first.
pub struct LoadedModule {
    pub module: Box<dyn TrackingModule>,
    pub library: ModuleLibrary,
}

#[derive(Debug, Clone, Copy)]
pub struct ModuleLoader {
    min_api_version: u32,
}

impl ModuleLoader {
    pub fn new(min_api_version: u32) -> Self {
        Self { min_api_version }
    }

    pub fn min_api_version(&self) -> u32 {
        self.min_api_version
    }

    /// Loads the library at `path` and instantiates its module. Failures are
    /// logged and yield `None`.
    pub fn load(&self, path: &Path) -> Option<LoadedModule> {
        info!("Loading module: {:?}", path);
        match self.try_load(path) {
            Ok(loaded) => {
                info!("✓ Loaded module from {:?}", path);
                Some(loaded)
            }
            Err(e @ LoadError::IncompatibleApi { .. }) => {
                warn!("Module {:?} is incompatible and was not loaded: {}", path, e);
                None
            }
            Err(e) => {
                error!("✗ Failed to load module {:?}: {}", path, e);
                None
            }
        }
    }

    pub fn try_load(&self, path: &Path) -> Result<LoadedModule, LoadError> {
        // SAFETY: loading a library runs its initializers; module libraries
        // are trusted by the act of installing them.
        let library = unsafe { Library::new(path) }.map_err(|source| LoadError::Library {
            path: path.to_path_buf(),
            source,
        })?;

        // A library that does not say which contract it targets predates
        // versioning entirely.
        // SAFETY: the symbol type matches what `api::export_module!` emits.
        let found = match unsafe { library.get::<ApiVersionFn>(API_VERSION_SYMBOL) } {
            Ok(version) => unsafe { version() },
            Err(_) => 0,
        };
        check_api_version(found, self.min_api_version)?;

        // SAFETY: as above.
        let create = unsafe { library.get::<CreateModuleFn>(CREATE_MODULE_SYMBOL) }
            .map_err(|_| LoadError::MissingSymbol("create_module"))?;
        let create = *create;

        let raw = panic::catch_unwind(|| unsafe { create() }).map_err(|_| LoadError::Panicked)?;
        if raw.is_null() {
            return Err(LoadError::NullModule);
        }
        // SAFETY: produced by Box::into_raw in `export_module!`.
        let module = unsafe { Box::from_raw(raw) };

        Ok(LoadedModule {
            module,
            library: ModuleLibrary {
                path: path.to_path_buf(),
                _library: library,
            },
        })
    }
}

/// Rejects modules built against a contract older than `required`.
pub fn check_api_version(found: u32, required: u32) -> Result<(), LoadError> {
    if found < required {
        return Err(LoadError::IncompatibleApi { found, required });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn older_api_is_rejected() {
        assert!(matches!(
            check_api_version(3, 5),
            Err(LoadError::IncompatibleApi { found: 3, required: 5 })
        ));
        assert!(check_api_version(5, 5).is_ok());
        assert!(check_api_version(6, 5).is_ok());
    }

    #[test]
    fn missing_library_is_none() {
        let loader = ModuleLoader::new(api::API_VERSION);
        assert!(loader.load(Path::new("/nonexistent/module.so")).is_none());
    }

    #[test]
    fn non_library_file_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.so");
        std::fs::write(&path, b"not a library").unwrap();

        let loader = ModuleLoader::new(api::API_VERSION);
        assert!(matches!(loader.try_load(&path), Err(LoadError::Library { .. })));
    }
}
