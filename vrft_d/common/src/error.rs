/// Errors raised while installing, updating or removing a module package.
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Manifest JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to download {url}: {reason}")]
    Download { url: String, reason: String },

    #[error("{module_id:?} is not a usable module id")]
    InvalidModuleId { module_id: String },

    #[error("Module {module_id} names {file_name:?} as its library, which is not a plain file name")]
    InvalidFileName { module_id: String, file_name: String },

    #[error("Module {module_id} has no download URL")]
    MissingDownloadUrl { module_id: String },

    #[error("{archive} does not contain a module.json file")]
    MissingManifest { archive: String },

    #[error("{archive} contains an invalid module.json file: {reason}")]
    InvalidManifest { archive: String, reason: String },

    #[error("Module {module_id} has no library file name specified and none could be resolved")]
    UnresolvedEntryPoint { module_id: String },
}
