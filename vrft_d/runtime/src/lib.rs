//! Loads tracking modules, negotiates which of them drive eye and expression
//! output, and runs each accepted module on its own thread.

mod dispatcher;
mod loader;
mod logger;
mod manager;
mod module_thread;
mod source;
mod status;

pub use dispatcher::{Dispatcher, InlineDispatcher};
pub use loader::{check_api_version, LoadedModule, ModuleLibrary, ModuleLoader};
pub use logger::module_log_callback;
pub use manager::UnifiedLibManager;
pub use module_thread::CancellationToken;
pub use source::{DiscoveredModule, InstalledModuleSource, ModuleRegistry, ModuleSource};
pub use status::{CapabilitySlot, LoadedModuleInfo, LoadedModules, TrackingStatus};

use std::path::PathBuf;

/// Errors specific to loading a module library.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Failed to load library {path:?}: {source}")]
    Library {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },
    #[error("Module targets API version {found}, but at least {required} is required")]
    IncompatibleApi { found: u32, required: u32 },
    #[error("Symbol not found: {0}")]
    MissingSymbol(&'static str),
    #[error("Module factory returned no module")]
    NullModule,
    #[error("Module factory panicked")]
    Panicked,
}
