pub use api::{
    Capabilities, ModuleState, SharedTrackingData, TrackingModule, UnifiedExpressions,
    UnifiedTrackingData,
};

mod config;
pub mod data_service;
mod error;
pub mod installer;
mod metadata;

pub use config::{load_config, HostConfig};
pub use data_service::{LocalModuleDataService, ModuleDataService};
pub use error::InstallError;
pub use installer::{HttpDownloader, LocalDownloader, ModuleDownloader, ModuleInstaller};
pub use metadata::{
    is_valid_module_id, load_manifest, read_json, save_manifest, InstallState, InstallableModuleMetadata,
    ModuleMetadata, MANIFEST_FILE_NAME,
};
