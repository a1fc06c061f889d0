mod commands;

use anyhow::Result;
use common::{load_config, HostConfig, LocalModuleDataService, ModuleState};
use log::{debug, error, info, trace, warn};
use runtime::{InlineDispatcher, InstalledModuleSource, ModuleLoader, UnifiedLibManager};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use commands::Command;

fn main() -> Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        unsafe {
            std::env::set_var("RUST_LOG", "info");
        }
    }
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = Command::parse(&args)?;

    let config_path = Path::new("config.json");
    let config = load_config(config_path).unwrap_or_else(|e| {
        error!("Failed to load config: {:#}. Using defaults.", e);
        HostConfig::default()
    });
    debug!("Loaded Config: {:?}", config);

    let modules_dir = config.modules_dir.as_path();
    match command {
        Command::Run => run(&config),
        Command::Install(archive) => commands::install(modules_dir, &archive),
        Command::InstallRemote(descriptor) => commands::install_remote(modules_dir, &descriptor),
        Command::MarkForDeletion(id) => commands::mark_for_deletion(modules_dir, &id),
        Command::Uninstall(id) => commands::uninstall(modules_dir, &id),
        Command::List => {
            commands::list(modules_dir);
            Ok(())
        }
    }
}

fn run(config: &HostConfig) -> Result<()> {
    info!("Starting...");
    debug!("Debug logging is active");
    trace!("Trace logging is active");

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    ctrlc::set_handler(move || {
        info!("Received Ctrl-C, shutting down...");
        r.store(false, Ordering::SeqCst);
    })
    .expect("Error setting Ctrl-C handler");

    if !config.modules_dir.exists() {
        warn!("{:?} directory not found. Creating it.", config.modules_dir);
        fs::create_dir_all(&config.modules_dir)?;
    }

    let data_service = Arc::new(LocalModuleDataService::new(&config.modules_dir));
    let purged = data_service.purge_pending_deletions();
    if purged > 0 {
        info!("Removed {} module(s) pending deletion", purged);
    }

    let source = InstalledModuleSource::new(data_service, ModuleLoader::new(config.min_api_version));
    let manager = UnifiedLibManager::new(source, Arc::new(InlineDispatcher), config.teardown_timeout());

    info!("Initializing Modules...");
    manager.initialize();
    manager.wait_for_initialization();

    let loaded = manager.loaded_modules();
    let modules = loaded.modules();
    if modules.is_empty() {
        warn!("No modules loaded!");
    } else {
        info!("Loaded {} module(s) successfully", modules.len());
    }

    let status = manager.status();
    let tracking = manager.tracking_data();
    let status_interval = Duration::from_secs(config.status_log_interval_secs.max(1));
    let frame_duration = config.frame_duration().unwrap_or(Duration::from_millis(5));

    info!("Entering Main Loop...");
    let mut frame_count: u64 = 0;
    let mut last_log = Instant::now();

    while running.load(Ordering::SeqCst) {
        let frame_start = Instant::now();
        let data = tracking.snapshot();
        frame_count += 1;

        if last_log.elapsed() >= status_interval {
            let fps = frame_count as f32 / last_log.elapsed().as_secs_f32();
            info!(
                "Eye: {} | Expression: {} | {} module(s) | approx {:.1} FPS",
                describe(status.eye_status(), status.eye().claimant()),
                describe(status.expression_status(), status.expression().claimant()),
                loaded.modules().len(),
                fps
            );
            trace!(
                "Gaze L {:?} R {:?}, openness L {:.2} R {:.2}",
                data.eye.left.gaze,
                data.eye.right.gaze,
                data.eye.left.openness,
                data.eye.right.openness
            );
            frame_count = 0;
            last_log = Instant::now();
        }

        let elapsed = frame_start.elapsed();
        if elapsed < frame_duration {
            thread::sleep(frame_duration - elapsed);
        }
    }

    info!("Shutting down...");
    manager.teardown_all_and_reset();
    Ok(())
}

fn describe(state: ModuleState, claimant: Option<String>) -> String {
    match (state, claimant) {
        (ModuleState::Uninitialized, _) => "none".to_string(),
        (state, Some(name)) => format!("{:?} via {}", state, name),
        (state, None) => format!("{:?}", state),
    }
}
