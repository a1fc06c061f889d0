use anyhow::{bail, Context, Result};
use common::{
    is_valid_module_id, load_manifest, read_json, LocalModuleDataService, ModuleDataService, ModuleInstaller,
    ModuleMetadata, MANIFEST_FILE_NAME,
};
use log::info;
use std::path::{Path, PathBuf};

/// What the binary was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Run,
    Install(PathBuf),
    InstallRemote(PathBuf),
    MarkForDeletion(String),
    Uninstall(String),
    List,
}

impl Command {
    /// Parses the arguments after the program name.
    pub fn parse(args: &[String]) -> Result<Self> {
        let mut args = args.iter();
        let Some(flag) = args.next() else {
            return Ok(Self::Run);
        };

        let mut value = |what: &str| {
            args.next()
                .cloned()
                .with_context(|| format!("{} expects {}", flag, what))
        };

        let command = match flag.as_str() {
            "--install" => Self::Install(value("an archive path")?.into()),
            "--install-remote" => Self::InstallRemote(value("a descriptor path")?.into()),
            "--mark-for-deletion" => Self::MarkForDeletion(value("a module id")?),
            "--uninstall" => Self::Uninstall(value("a module id")?),
            "--list" => Self::List,
            other => bail!("Unknown argument: {}", other),
        };
        Ok(command)
    }
}

pub fn install(modules_dir: &Path, archive: &Path) -> Result<()> {
    let installer = ModuleInstaller::new(modules_dir)?;
    let library = installer
        .install_local_module(archive)
        .with_context(|| format!("Failed to install {:?}", archive))?;
    info!("Installed {:?}", library);
    Ok(())
}

pub fn install_remote(modules_dir: &Path, descriptor: &Path) -> Result<()> {
    let metadata: ModuleMetadata = read_json(descriptor)
        .with_context(|| format!("Failed to read module descriptor {:?}", descriptor))?;
    let installer = ModuleInstaller::new(modules_dir)?;
    let library = installer.install_remote_module(&metadata)?;
    info!("Installed {} at {:?}", metadata.display_name(), library);
    Ok(())
}

fn check_module_id(module_id: &str) -> Result<()> {
    if !is_valid_module_id(module_id) {
        bail!("Invalid module id: {:?}", module_id);
    }
    Ok(())
}

pub fn mark_for_deletion(modules_dir: &Path, module_id: &str) -> Result<()> {
    check_module_id(module_id)?;
    let installer = ModuleInstaller::new(modules_dir)?;
    let manifest_path = installer.module_directory(module_id).join(MANIFEST_FILE_NAME);
    let mut module = load_manifest(&manifest_path)
        .with_context(|| format!("Module {} is not installed", module_id))?;
    installer.mark_module_for_deletion(&mut module)?;
    Ok(())
}

pub fn uninstall(modules_dir: &Path, module_id: &str) -> Result<()> {
    check_module_id(module_id)?;
    let installer = ModuleInstaller::new(modules_dir)?;
    installer.uninstall_module(&ModuleMetadata::new(module_id))?;
    Ok(())
}

pub fn list(modules_dir: &Path) {
    let service = LocalModuleDataService::new(modules_dir);
    let installed = service.installed_modules();
    let legacy = service.legacy_modules();

    if installed.is_empty() && legacy.is_empty() {
        info!("No modules installed in {:?}", modules_dir);
        return;
    }
    for module in installed.iter().chain(&legacy) {
        info!(
            "{} ({}) version {} order {}{}{}",
            module.metadata.display_name(),
            module.module_id(),
            module.metadata.version.as_deref().unwrap_or("unknown"),
            module.order,
            if module.local { ", local" } else { "" },
            if module.instantiatable { "" } else { ", disabled" },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{save_manifest, InstallState, InstallableModuleMetadata};

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn no_arguments_runs_the_host() {
        assert_eq!(Command::parse(&[]).unwrap(), Command::Run);
    }

    #[test]
    fn parses_each_command() {
        assert_eq!(
            Command::parse(&args(&["--install", "pkg.zip"])).unwrap(),
            Command::Install("pkg.zip".into())
        );
        assert_eq!(
            Command::parse(&args(&["--uninstall", "lip"])).unwrap(),
            Command::Uninstall("lip".into())
        );
        assert_eq!(Command::parse(&args(&["--list"])).unwrap(), Command::List);
    }

    #[test]
    fn missing_value_and_unknown_flag_are_errors() {
        assert!(Command::parse(&args(&["--mark-for-deletion"])).is_err());
        assert!(Command::parse(&args(&["--frobnicate"])).is_err());
    }

    #[test]
    fn mark_for_deletion_persists_pending_state() {
        let store = tempfile::tempdir().unwrap();
        let dir = store.path().join("lip");
        std::fs::create_dir_all(&dir).unwrap();
        let module = InstallableModuleMetadata {
            installation_state: InstallState::Installed,
            ..InstallableModuleMetadata::from(ModuleMetadata::new("lip"))
        };
        save_manifest(&dir.join(MANIFEST_FILE_NAME), &module).unwrap();

        mark_for_deletion(store.path(), "lip").unwrap();

        let saved = load_manifest(&dir.join(MANIFEST_FILE_NAME)).unwrap();
        assert_eq!(saved.installation_state, InstallState::AwaitingRestart);
        assert!(!saved.instantiatable);
    }

    #[test]
    fn marking_unknown_module_fails() {
        let store = tempfile::tempdir().unwrap();
        assert!(mark_for_deletion(store.path(), "ghost").is_err());
        assert!(uninstall(store.path(), "../escape").is_err());
    }
}
