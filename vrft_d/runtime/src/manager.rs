use api::{
    ActivityReporter, Capabilities, ModuleContext, ModuleLogger, ModuleState, SharedTrackingData,
    TrackingModule,
};
use log::{debug, error, info, warn};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::dispatcher::Dispatcher;
use crate::loader::ModuleLibrary;
use crate::logger::module_log_callback;
use crate::module_thread::ModuleRuntimeInfo;
use crate::source::{DiscoveredModule, ModuleSource};
use crate::status::{LoadedModuleInfo, LoadedModules, TrackingStatus};

const INITIALIZING_PLACEHOLDER: &str = "Initializing Modules...";
const NO_MODULES_PLACEHOLDER: &str = "No Modules Loaded";

/// Supervises every loaded tracking module.
///
/// Owns the global eye/expression status, the observable module collection
/// and one update thread per accepted module.
pub struct UnifiedLibManager {
    shared: Arc<Supervisor>,
    init_worker: Mutex<Option<JoinHandle<()>>>,
}

struct Supervisor {
    source: Box<dyn ModuleSource>,
    dispatcher: Arc<dyn Dispatcher>,
    loaded_modules: LoadedModules,
    status: Arc<TrackingStatus>,
    tracking: SharedTrackingData,
    module_threads: Mutex<Vec<ModuleRuntimeInfo>>,
    join_timeout: Duration,
    next_id: AtomicU64,
}

impl UnifiedLibManager {
    pub fn new(
        source: impl ModuleSource + 'static,
        dispatcher: Arc<dyn Dispatcher>,
        join_timeout: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(Supervisor {
                source: Box::new(source),
                dispatcher,
                loaded_modules: LoadedModules::default(),
                status: Arc::new(TrackingStatus::default()),
                tracking: SharedTrackingData::new(),
                module_threads: Mutex::new(Vec::new()),
                join_timeout,
                next_id: AtomicU64::new(1),
            }),
            init_worker: Mutex::new(None),
        }
    }

    pub fn loaded_modules(&self) -> LoadedModules {
        self.shared.loaded_modules.clone()
    }

    pub fn status(&self) -> Arc<TrackingStatus> {
        Arc::clone(&self.shared.status)
    }

    /// Tracking state the modules write into.
    pub fn tracking_data(&self) -> SharedTrackingData {
        self.shared.tracking.clone()
    }

    pub fn running_module_count(&self) -> usize {
        self.shared.threads().len()
    }

    /// Tears down whatever is running and loads everything again on a
    /// worker thread. Returns immediately.
    pub fn initialize(&self) {
        let mut worker = self.init_worker.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = worker.take() {
            let _ = previous.join();
        }

        // Visible as soon as this returns, before the worker is scheduled.
        self.shared.publish_placeholder(INITIALIZING_PLACEHOLDER);

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("module-init".to_string())
            .spawn(move || {
                shared.teardown_all(Some(INITIALIZING_PLACEHOLDER));
                shared.init_requested_runtimes();
            });

        match spawned {
            Ok(handle) => *worker = Some(handle),
            Err(e) => error!("Failed to start module initialization: {}", e),
        }
    }

    /// Blocks until the pass started by [`initialize`](Self::initialize)
    /// is done.
    pub fn wait_for_initialization(&self) {
        let handle = self
            .init_worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("Module initialization thread panicked");
            }
        }
    }

    /// Stops every module, clears the collection and resets both capability
    /// slots.
    pub fn teardown_all_and_reset(&self) {
        self.wait_for_initialization();
        self.shared.teardown_all(None);
    }
}

impl Drop for UnifiedLibManager {
    fn drop(&mut self) {
        self.wait_for_initialization();
        if !self.shared.threads().is_empty() {
            self.shared.teardown_all(None);
        }
    }
}

impl Supervisor {
    fn threads(&self) -> std::sync::MutexGuard<'_, Vec<ModuleRuntimeInfo>> {
        self.module_threads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn dispatch(&self, f: impl FnOnce(&mut Vec<LoadedModuleInfo>) + Send + 'static) {
        let loaded = self.loaded_modules.clone();
        self.dispatcher.run(Box::new(move || loaded.with_mut(f)));
    }

    fn publish_placeholder(&self, name: &'static str) {
        self.dispatch(move |modules| {
            modules.clear();
            modules.push(LoadedModuleInfo::placeholder(name));
        });
    }

    fn init_requested_runtimes(&self) {
        info!("Initializing runtimes...");
        for discovered in self.source.discover() {
            self.attempt_module_initialize(discovered);
        }

        let running: Vec<String> = self.threads().iter().map(|m| m.name.clone()).collect();
        if running.is_empty() {
            warn!("No modules loaded.");
            self.publish_placeholder(NO_MODULES_PLACEHOLDER);
            return;
        }

        self.dispatch(|modules| modules.retain(|m| !m.placeholder));
        for name in running {
            info!("Tracking initialized via {}", name);
        }
    }

    fn attempt_module_initialize(&self, discovered: DiscoveredModule) {
        let DiscoveredModule {
            name,
            mut module,
            library,
        } = discovered;
        let supported = match panic::catch_unwind(AssertUnwindSafe(|| module.supported())) {
            Ok(supported) => supported,
            Err(_) => {
                error!("{} panicked while reporting its capabilities. Skipping.", name);
                return discard(module, library);
            }
        };
        if supported.is_empty() {
            debug!("{} supports neither eye nor expression tracking. Skipping.", name);
            return discard(module, library);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let context = ModuleContext {
            logger: ModuleLogger::new(module_log_callback, format!("vrft_d::plugins::{}", name)),
            tracking: self.tracking.clone(),
            activity: self.activity_reporter(id),
        };
        let eye_available = self.status.eye().is_available();
        let expression_available = self.status.expression().is_available();

        info!(
            "Initializing {} (eye available: {}, expression available: {})",
            name, eye_available, expression_available
        );
        let won = panic::catch_unwind(AssertUnwindSafe(|| {
            module.initialize(context, eye_available, expression_available)
        }));
        let won: Capabilities = match won {
            Ok(Ok(won)) => won,
            Ok(Err(e)) => {
                error!("Exception initializing {}. Skipping. {:#}", name, e);
                return discard(module, library);
            }
            Err(_) => {
                error!("{} panicked during initialization. Skipping.", name);
                return discard(module, library);
            }
        };
        if won.is_empty() {
            debug!("{} did not initialize any tracking. Skipping.", name);
            return discard(module, library);
        }

        self.status.claim(won, &name);

        let info = LoadedModuleInfo {
            id,
            name: name.clone(),
            active: true,
            status: ModuleState::Active,
            using_eye: won.eye,
            using_expression: won.expression,
            placeholder: false,
        };
        self.dispatch(move |modules| {
            if !modules.iter().any(|m| !m.placeholder && m.id == id) {
                modules.push(info);
            }
        });

        match ModuleRuntimeInfo::start(id, name, module, library) {
            Ok(runtime) => self.threads().push(runtime),
            Err(e) => {
                error!("Failed to start module thread: {}", e);
                self.dispatch(move |modules| modules.retain(|m| m.placeholder || m.id != id));
            }
        }
    }

    /// Bridges a module's activity reports into its collection entry.
    fn activity_reporter(&self, id: u64) -> ActivityReporter {
        let loaded = self.loaded_modules.clone();
        let dispatcher = Arc::clone(&self.dispatcher);
        ActivityReporter::new(move |active| {
            let loaded = loaded.clone();
            dispatcher.run(Box::new(move || {
                loaded.with_mut(|modules| {
                    if let Some(entry) = modules.iter_mut().find(|m| !m.placeholder && m.id == id) {
                        entry.status = if active {
                            ModuleState::Active
                        } else {
                            ModuleState::Idle
                        };
                    }
                })
            }));
        })
    }

    /// Stops every module and resets both slots. The collection is cleared
    /// and, if given, the placeholder put in its place in the same update.
    fn teardown_all(&self, then_show: Option<&'static str>) {
        let runtimes = std::mem::take(&mut *self.threads());
        if !runtimes.is_empty() {
            info!("Tearing down {} modules...", runtimes.len());
        }

        for runtime in runtimes {
            let name = runtime.name.clone();
            info!("Tearing down {}", name);
            if runtime.shutdown(self.join_timeout) {
                debug!("{} torn down", name);
            }
        }

        self.dispatch(move |modules| {
            modules.clear();
            modules.extend(then_show.map(LoadedModuleInfo::placeholder));
        });
        self.status.reset();
    }
}

/// Drops a rejected module before the library its code lives in.
fn discard(module: Box<dyn TrackingModule>, library: Option<ModuleLibrary>) {
    drop(module);
    drop(library);
}
