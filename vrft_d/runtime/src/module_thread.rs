use api::TrackingModule;
use log::{debug, error, warn};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::loader::ModuleLibrary;

/// Cooperative stop flag shared between the supervisor and one module thread.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

pub(crate) type SharedModule = Arc<Mutex<Box<dyn TrackingModule>>>;

/// Who owns the final teardown of a module. Whichever side gets here
/// second does it.
enum Handoff {
    Running,
    Finished,
    /// The supervisor stopped waiting. The module thread tears the module
    /// down and unloads this library once `update` returns.
    Abandoned(Option<ModuleLibrary>),
}

/// Bookkeeping for one running module.
pub(crate) struct ModuleRuntimeInfo {
    pub id: u64,
    pub name: String,
    module: SharedModule,
    cancellation: CancellationToken,
    thread: JoinHandle<()>,
    finished: Receiver<()>,
    handoff: Arc<Mutex<Handoff>>,
    library: Option<ModuleLibrary>,
}

impl ModuleRuntimeInfo {
    /// Spawns the update thread for an initialized module.
    pub fn start(
        id: u64,
        name: String,
        module: Box<dyn TrackingModule>,
        library: Option<ModuleLibrary>,
    ) -> std::io::Result<Self> {
        let module: SharedModule = Arc::new(Mutex::new(module));
        let cancellation = CancellationToken::new();
        let (done_tx, finished) = mpsc::channel();
        let handoff = Arc::new(Mutex::new(Handoff::Running));

        let spawned = thread::Builder::new()
            .name(format!("module-{}", name.replace('\0', "")))
            .spawn({
                let name = name.clone();
                let module = Arc::clone(&module);
                let token = cancellation.clone();
                let handoff = Arc::clone(&handoff);
                move || {
                    run_update_loop(&name, &module, &token);
                    let state = std::mem::replace(
                        &mut *handoff.lock().unwrap_or_else(PoisonError::into_inner),
                        Handoff::Finished,
                    );
                    if let Handoff::Abandoned(library) = state {
                        warn!("Module: {} finally left update. Tearing it down late.", name);
                        teardown(&name, &module);
                        drop(module);
                        drop(library);
                    }
                    let _ = done_tx.send(());
                }
            });

        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                drop(module);
                drop(library);
                return Err(e);
            }
        };

        Ok(Self {
            id,
            name,
            module,
            cancellation,
            thread,
            finished,
            handoff,
            library,
        })
    }

    /// Stops the thread and tears the module down.
    ///
    /// Waits up to `timeout` for the update loop to notice cancellation, then
    /// unparks the thread and waits once more. A module still inside `update`
    /// after that is handed over to its own thread, which runs the teardown
    /// and unloads the library when `update` returns. Returns whether the
    /// module stopped within the timeout.
    pub fn shutdown(self, timeout: Duration) -> bool {
        let Self {
            name,
            module,
            cancellation,
            thread,
            finished,
            handoff,
            library,
            ..
        } = self;

        cancellation.cancel();
        let mut stopped = wait_for(&finished, timeout);
        if !stopped {
            warn!("Module: {} failed to shut down. Interrupting its thread.", name);
            thread.thread().unpark();
            stopped = wait_for(&finished, timeout);
        }

        if !stopped {
            let mut state = handoff.lock().unwrap_or_else(PoisonError::into_inner);
            if matches!(*state, Handoff::Running) {
                // The thread keeps the last handle to the module, so nothing
                // from the library runs here.
                drop(module);
                *state = Handoff::Abandoned(library);
                error!(
                    "Module: {} is stuck in update. Its thread will tear it down when update returns.",
                    name
                );
                return false;
            }
        }

        let _ = thread.join();
        teardown(&name, &module);
        drop(module);
        drop(library);
        true
    }
}

fn wait_for(finished: &Receiver<()>, timeout: Duration) -> bool {
    match finished.recv_timeout(timeout) {
        Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
        Err(RecvTimeoutError::Timeout) => false,
    }
}

fn teardown(name: &str, module: &SharedModule) {
    let mut guard = module.lock().unwrap_or_else(PoisonError::into_inner);
    if panic::catch_unwind(AssertUnwindSafe(|| guard.teardown())).is_err() {
        error!("Module: {} panicked during teardown", name);
    }
}

fn run_update_loop(name: &str, module: &SharedModule, token: &CancellationToken) {
    debug!("Starting thread for {}", name);
    let mut failures: u64 = 0;

    while !token.is_cancelled() {
        let mut guard = module.lock().unwrap_or_else(PoisonError::into_inner);
        if token.is_cancelled() {
            break;
        }
        let result = panic::catch_unwind(AssertUnwindSafe(|| guard.update()));
        drop(guard);

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                failures += 1;
                // Rate limit: a broken device would otherwise flood the log.
                if failures == 1 || failures % 1000 == 0 {
                    warn!("{} update failed ({} times): {:#}", name, failures, e);
                }
            }
            Err(_) => {
                error!("{} panicked during update. Stopping its thread.", name);
                break;
            }
        }
    }

    debug!("Thread for {} ended", name);
}
