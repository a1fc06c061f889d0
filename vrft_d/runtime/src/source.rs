use api::TrackingModule;
use common::ModuleDataService;
use log::{debug, error, info, warn};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::loader::{ModuleLibrary, ModuleLoader};

/// A freshly instantiated module, not yet initialized.
pub struct DiscoveredModule {
    pub name: String,
    pub module: Box<dyn TrackingModule>,
    /// `None` for modules compiled into the host.
    pub library: Option<ModuleLibrary>,
}

impl DiscoveredModule {
    pub fn new(name: impl Into<String>, module: Box<dyn TrackingModule>) -> Self {
        Self {
            name: name.into(),
            module,
            library: None,
        }
    }
}

/// Produces the modules to try, in order.
pub trait ModuleSource: Send + Sync {
    fn discover(&self) -> Vec<DiscoveredModule>;
}

type ModuleFactory = Box<dyn Fn() -> Box<dyn TrackingModule> + Send + Sync>;

/// Modules known at compile time, each behind a factory.
#[derive(Default)]
pub struct ModuleRegistry {
    factories: Vec<(String, ModuleFactory)>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn TrackingModule> + Send + Sync + 'static,
    {
        self.factories.push((name.into(), Box::new(factory)));
        self
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl ModuleSource for ModuleRegistry {
    fn discover(&self) -> Vec<DiscoveredModule> {
        self.factories
            .iter()
            .filter_map(|(name, factory)| {
                match panic::catch_unwind(AssertUnwindSafe(|| factory())) {
                    Ok(module) => Some(DiscoveredModule::new(name.clone(), module)),
                    Err(_) => {
                        error!("Failed to instantiate module {}", name);
                        None
                    }
                }
            })
            .collect()
    }
}

/// Installed and legacy modules from the module store, loaded from disk.
pub struct InstalledModuleSource {
    data_service: Arc<dyn ModuleDataService>,
    loader: ModuleLoader,
}

impl InstalledModuleSource {
    pub fn new(data_service: Arc<dyn ModuleDataService>, loader: ModuleLoader) -> Self {
        Self {
            data_service,
            loader,
        }
    }
}

impl ModuleSource for InstalledModuleSource {
    fn discover(&self) -> Vec<DiscoveredModule> {
        let installed = self.data_service.installed_modules();
        let legacy = self.data_service.legacy_modules();
        info!(
            "Found {} installed and {} legacy modules",
            installed.len(),
            legacy.len()
        );

        installed
            .into_iter()
            .chain(legacy)
            .filter(|m| {
                if !m.instantiatable {
                    debug!("Skipping {}: not instantiatable", m.module_id());
                }
                m.instantiatable
            })
            .filter_map(|m| {
                let Some(path) = m.assembly_load_path.as_deref() else {
                    warn!("Skipping {}: no library to load", m.module_id());
                    return None;
                };
                let loaded = self.loader.load(path)?;
                Some(DiscoveredModule {
                    name: m.metadata.display_name().to_string(),
                    module: loaded.module,
                    library: Some(loaded.library),
                })
            })
            .collect()
    }
}
