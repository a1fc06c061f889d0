use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use crate::InstallError;

/// File name of the manifest stored in every module directory.
pub const MANIFEST_FILE_NAME: &str = "module.json";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstallState {
    #[default]
    NotInstalled,
    Installed,
    Outdated,
    AwaitingRestart,
}

/// Identity and display information shipped with a module package or served
/// by a remote catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ModuleMetadata {
    pub module_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dll_file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_page_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
}

impl ModuleMetadata {
    pub fn new(module_id: impl Into<String>) -> Self {
        Self {
            module_id: module_id.into(),
            ..Self::default()
        }
    }

    pub fn display_name(&self) -> &str {
        self.module_name.as_deref().unwrap_or(&self.module_id)
    }

    /// Copies every field that is set on `source` over this one. Fields left
    /// empty on `source` keep their current value.
    pub fn merge_from(&mut self, source: &ModuleMetadata) {
        if !source.module_id.is_empty() {
            self.module_id = source.module_id.clone();
        }
        merge_field(&mut self.module_name, &source.module_name);
        merge_field(&mut self.module_description, &source.module_description);
        merge_field(&mut self.author_name, &source.author_name);
        merge_field(&mut self.version, &source.version);
        merge_field(&mut self.download_url, &source.download_url);
        merge_field(&mut self.dll_file_name, &source.dll_file_name);
        merge_field(&mut self.module_page_url, &source.module_page_url);
        merge_field(&mut self.last_updated, &source.last_updated);
    }
}

fn merge_field(target: &mut Option<String>, source: &Option<String>) {
    if let Some(value) = source {
        *target = Some(value.clone());
    }
}

/// Ids become directory names inside the module store.
pub fn is_valid_module_id(id: &str) -> bool {
    let id = id.trim();
    !id.is_empty()
        && id != "."
        && id != ".."
        && !id.contains(['/', '\\', ':'])
}

fn default_instantiatable() -> bool {
    true
}

/// A module as known to the local store: the package metadata plus the
/// state the host and the user attach to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InstallableModuleMetadata {
    #[serde(flatten)]
    pub metadata: ModuleMetadata,
    #[serde(default)]
    pub installation_state: InstallState,
    /// Cleared once the module is marked for deletion.
    #[serde(default = "default_instantiatable")]
    pub instantiatable: bool,
    #[serde(default)]
    pub order: i32,
    /// Where the entry-point library lives. Filled in on discovery, never
    /// persisted.
    #[serde(skip)]
    pub assembly_load_path: Option<PathBuf>,
    #[serde(default)]
    pub local: bool,
}

impl Default for InstallableModuleMetadata {
    fn default() -> Self {
        Self::from(ModuleMetadata::default())
    }
}

impl From<ModuleMetadata> for InstallableModuleMetadata {
    fn from(metadata: ModuleMetadata) -> Self {
        Self {
            metadata,
            installation_state: InstallState::NotInstalled,
            instantiatable: default_instantiatable(),
            order: 0,
            assembly_load_path: None,
            local: false,
        }
    }
}

impl InstallableModuleMetadata {
    pub fn module_id(&self) -> &str {
        &self.metadata.module_id
    }

    pub fn is_installed(&self) -> bool {
        self.installation_state == InstallState::Installed
    }
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, InstallError> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

pub fn load_manifest(path: &Path) -> Result<InstallableModuleMetadata, InstallError> {
    read_json(path)
}

pub fn save_manifest(path: &Path, manifest: &InstallableModuleMetadata) -> Result<(), InstallError> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), manifest)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_overwrites_only_set_fields() {
        let mut existing = ModuleMetadata {
            module_id: "abc".into(),
            module_name: Some("Old".into()),
            author_name: Some("Someone".into()),
            download_url: Some("https://old.example/mod.zip".into()),
            ..ModuleMetadata::default()
        };
        let fresh = ModuleMetadata {
            module_id: "abc".into(),
            module_name: Some("New".into()),
            download_url: Some("https://new.example/mod.zip".into()),
            ..ModuleMetadata::default()
        };

        existing.merge_from(&fresh);

        assert_eq!(existing.module_name.as_deref(), Some("New"));
        assert_eq!(existing.download_url.as_deref(), Some("https://new.example/mod.zip"));
        assert_eq!(existing.author_name.as_deref(), Some("Someone"));
    }

    #[test]
    fn manifest_uses_pascal_case_and_skips_load_path() {
        let mut module = InstallableModuleMetadata::from(ModuleMetadata::new("abc"));
        module.assembly_load_path = Some(PathBuf::from("somewhere/abc.dll"));
        module.order = 3;

        let json = serde_json::to_value(&module).unwrap();
        assert_eq!(json["ModuleId"], "abc");
        assert_eq!(json["Order"], 3);
        assert_eq!(json["Instantiatable"], true);
        assert!(json.get("AssemblyLoadPath").is_none());
    }

    #[test]
    fn bare_package_manifest_reads_as_installable() {
        let module: InstallableModuleMetadata =
            serde_json::from_str(r#"{ "ModuleId": "abc", "ModuleName": "Abc" }"#).unwrap();
        assert!(module.instantiatable);
        assert_eq!(module.order, 0);
        assert_eq!(module.installation_state, InstallState::NotInstalled);
        assert_eq!(module.metadata.display_name(), "Abc");
    }

    #[test]
    fn module_ids_cannot_escape_the_store() {
        assert!(is_valid_module_id("5f1c2d3e-aaaa-bbbb-cccc-000000000000"));
        assert!(!is_valid_module_id(""));
        assert!(!is_valid_module_id(".."));
        assert!(!is_valid_module_id("../evil"));
        assert!(!is_valid_module_id("a\\b"));
    }
}
