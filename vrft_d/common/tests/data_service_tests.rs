use common::{
    save_manifest, InstallState, InstallableModuleMetadata, LocalModuleDataService,
    ModuleDataService, ModuleMetadata, MANIFEST_FILE_NAME,
};
use std::fs;
use std::path::Path;

fn install(store: &Path, id: &str, order: i32, state: InstallState) {
    install_in(store, id, id, order, state);
}

/// Installs a module whose manifest id need not match its folder name.
fn install_in(store: &Path, folder: &str, id: &str, order: i32, state: InstallState) {
    let dir = store.join(folder);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(format!("{}.dll", id)), "bin").unwrap();

    let mut metadata = ModuleMetadata::new(id);
    metadata.dll_file_name = Some(format!("{}.dll", id));
    let module = InstallableModuleMetadata {
        installation_state: state,
        order,
        ..InstallableModuleMetadata::from(metadata)
    };
    save_manifest(&dir.join(MANIFEST_FILE_NAME), &module).unwrap();
}

#[test]
fn installed_modules_are_ordered_and_resolved() {
    let store = tempfile::tempdir().unwrap();
    install(store.path(), "late", 5, InstallState::Installed);
    install(store.path(), "early", -1, InstallState::Installed);
    install(store.path(), "middle", 2, InstallState::Installed);

    let service = LocalModuleDataService::new(store.path());
    let modules = service.installed_modules();

    let ids: Vec<&str> = modules.iter().map(|m| m.module_id()).collect();
    assert_eq!(ids, vec!["early", "middle", "late"]);
    assert_eq!(
        modules[0].assembly_load_path.as_deref(),
        Some(store.path().join("early").join("early.dll").as_path())
    );
}

#[test]
fn purge_removes_only_modules_awaiting_restart() {
    let store = tempfile::tempdir().unwrap();
    install(store.path(), "keep", 0, InstallState::Installed);
    install(store.path(), "drop", 0, InstallState::AwaitingRestart);

    let service = LocalModuleDataService::new(store.path());
    assert_eq!(service.purge_pending_deletions(), 1);

    assert!(store.path().join("keep").exists());
    assert!(!store.path().join("drop").exists());
    assert_eq!(service.installed_modules().len(), 1);
}

#[test]
fn purge_deletes_the_folder_the_manifest_came_from() {
    let store = tempfile::tempdir().unwrap();
    install(store.path(), "healthy", 0, InstallState::Installed);
    install_in(store.path(), "stale", "healthy", 0, InstallState::AwaitingRestart);

    let service = LocalModuleDataService::new(store.path());
    assert_eq!(service.purge_pending_deletions(), 1);

    assert!(!store.path().join("stale").exists());
    assert!(store.path().join("healthy").join("healthy.dll").exists());
    let ids: Vec<String> = service
        .installed_modules()
        .iter()
        .map(|m| m.module_id().to_string())
        .collect();
    assert_eq!(ids, vec!["healthy".to_string()]);
}

#[test]
fn purge_of_manifest_with_blank_id_keeps_the_store() {
    let store = tempfile::tempdir().unwrap();
    install(store.path(), "other", 0, InstallState::Installed);
    install_in(store.path(), "blank", "", 0, InstallState::AwaitingRestart);

    let service = LocalModuleDataService::new(store.path());
    assert_eq!(service.purge_pending_deletions(), 1);

    assert!(store.path().exists());
    assert!(!store.path().join("blank").exists());
    assert!(store.path().join("other").exists());
}

#[test]
fn modules_awaiting_restart_are_not_listed() {
    let store = tempfile::tempdir().unwrap();
    install(store.path(), "pending", 0, InstallState::AwaitingRestart);

    let service = LocalModuleDataService::new(store.path());
    assert!(service.installed_modules().is_empty());
}

#[test]
fn loose_libraries_are_legacy_modules() {
    let store = tempfile::tempdir().unwrap();
    fs::write(store.path().join("LooseTracker.dll"), "bin").unwrap();
    fs::write(store.path().join("notes.txt"), "x").unwrap();
    install(store.path(), "packaged", 0, InstallState::Installed);

    let service = LocalModuleDataService::new(store.path());
    let legacy = service.legacy_modules();

    assert_eq!(legacy.len(), 1);
    assert_eq!(legacy[0].module_id(), "LooseTracker");
    assert!(legacy[0].local);
    assert_eq!(
        legacy[0].assembly_load_path.as_deref(),
        Some(store.path().join("LooseTracker.dll").as_path())
    );
}

#[test]
fn save_round_trips_user_changes() {
    let store = tempfile::tempdir().unwrap();
    install(store.path(), "tweak", 0, InstallState::Installed);

    let service = LocalModuleDataService::new(store.path());
    let mut modules = service.installed_modules();
    modules[0].order = 9;
    service.save_installed_modules(&modules).unwrap();

    assert_eq!(service.installed_modules()[0].order, 9);
}

#[test]
fn broken_manifest_is_skipped() {
    let store = tempfile::tempdir().unwrap();
    install(store.path(), "good", 0, InstallState::Installed);
    let bad = store.path().join("bad");
    fs::create_dir_all(&bad).unwrap();
    fs::write(bad.join(MANIFEST_FILE_NAME), "{").unwrap();

    let service = LocalModuleDataService::new(store.path());
    let ids: Vec<String> = service
        .installed_modules()
        .iter()
        .map(|m| m.module_id().to_string())
        .collect();
    assert_eq!(ids, vec!["good".to_string()]);
}
