mod data;
mod expressions;

pub use data::{
    SharedTrackingData, UnifiedExpressionShape, UnifiedEyeData, UnifiedHeadData,
    UnifiedSingleEyeData, UnifiedTrackingData,
};
pub use expressions::UnifiedExpressions;

use anyhow::Result;
use std::ffi::{c_char, CString};
use std::sync::Arc;

/// Version of this contract. Bumped whenever the trait or the exported
/// symbols change shape.
pub const API_VERSION: u32 = 5;

/// Symbol every module library exports to report the contract version it
/// was built against.
pub const API_VERSION_SYMBOL: &[u8] = b"vrft_module_api_version\0";

/// Symbol every module library exports to construct its module.
pub const CREATE_MODULE_SYMBOL: &[u8] = b"create_module\0";

/// Status of a capability slot, or of a single loaded module.
#[repr(u8)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ModuleState {
    #[default]
    Uninitialized = 0,
    Idle = 1,
    Active = 2,
}

impl ModuleState {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Idle,
            2 => Self::Active,
            _ => Self::Uninitialized,
        }
    }
}

/// Which outputs a module can provide (from `supported`) or has won
/// (from `initialize`). The two flags are independent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub eye: bool,
    pub expression: bool,
}

impl Capabilities {
    pub const NONE: Self = Self::new(false, false);
    pub const EYE: Self = Self::new(true, false);
    pub const EXPRESSION: Self = Self::new(false, true);
    pub const BOTH: Self = Self::new(true, true);

    pub const fn new(eye: bool, expression: bool) -> Self {
        Self { eye, expression }
    }

    pub fn is_empty(&self) -> bool {
        !self.eye && !self.expression
    }
}

/// log level for module logging
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

/// logger callback for modules
pub type LogCallback = extern "C" fn(level: LogLevel, target: *const c_char, message: *const c_char);

/// Logger handed to modules.
///
/// Modules are separate dynamic libraries with their own copy of the `log`
/// statics, so they log through a host-provided callback instead.
#[derive(Clone)]
pub struct ModuleLogger {
    callback: LogCallback,
    module_name: String,
}

impl ModuleLogger {
    pub fn new(callback: LogCallback, module_name: String) -> Self {
        Self {
            callback,
            module_name,
        }
    }

    pub fn name(&self) -> &str {
        &self.module_name
    }

    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    pub fn trace(&self, message: &str) {
        self.log(LogLevel::Trace, message);
    }

    fn log(&self, level: LogLevel, message: &str) {
        let target = to_c_string(&self.module_name);
        let msg = to_c_string(message);
        (self.callback)(level, target.as_ptr(), msg.as_ptr());
    }
}

fn to_c_string(s: &str) -> CString {
    CString::new(s.replace('\0', "")).unwrap_or_default()
}

/// Lets a module report whether it is currently producing data after
/// initialization. The host mirrors this into the module's visible status.
#[derive(Clone)]
pub struct ActivityReporter {
    callback: Arc<dyn Fn(bool) + Send + Sync>,
}

impl ActivityReporter {
    pub fn new(callback: impl Fn(bool) + Send + Sync + 'static) -> Self {
        Self {
            callback: Arc::new(callback),
        }
    }

    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    pub fn set_active(&self, active: bool) {
        (self.callback)(active);
    }
}

/// Everything the host hands a module when it is initialized.
#[derive(Clone)]
pub struct ModuleContext {
    pub logger: ModuleLogger,
    pub tracking: SharedTrackingData,
    pub activity: ActivityReporter,
}

/// Contract every tracking module implements.
///
/// Lifecycle: `supported` is queried first and a module reporting no
/// capability is never initialized. `initialize` is told which capability
/// slots are still free, but another module may already be running on the
/// same slot. After a successful `initialize` the host calls `update` in a
/// tight loop on a thread dedicated to this module until it is torn down,
/// then calls `teardown` exactly once.
///
/// The host applies no delay between `update` calls. A module that polls a
/// device must pace itself (sleep or block on its data source) inside
/// `update`, otherwise it spins a core.
pub trait TrackingModule: Send {
    fn supported(&self) -> Capabilities;

    /// Returns the capabilities this module will actually provide. Returning
    /// [`Capabilities::NONE`] or an error both mean the module is skipped.
    fn initialize(
        &mut self,
        context: ModuleContext,
        eye_available: bool,
        expression_available: bool,
    ) -> Result<Capabilities>;

    fn update(&mut self) -> Result<()>;

    /// Must release everything the module holds before returning; the
    /// library may be unloaded right after.
    fn teardown(&mut self);
}

/// Exports the symbols the host looks for in a module library.
///
/// ```ignore
/// api::export_module!(MyModule::new());
/// ```
#[macro_export]
macro_rules! export_module {
    ($ctor:expr) => {
        #[no_mangle]
        pub extern "C" fn vrft_module_api_version() -> u32 {
            $crate::API_VERSION
        }

        #[no_mangle]
        #[allow(improper_ctypes_definitions)]
        pub extern "C" fn create_module() -> *mut dyn $crate::TrackingModule {
            let module: Box<dyn $crate::TrackingModule> = Box::new($ctor);
            Box::into_raw(module)
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_state_round_trips_through_u8() {
        for state in [ModuleState::Uninitialized, ModuleState::Idle, ModuleState::Active] {
            assert_eq!(ModuleState::from_u8(state as u8), state);
        }
        assert_eq!(ModuleState::from_u8(200), ModuleState::Uninitialized);
    }

    #[test]
    fn capabilities_empty_only_when_both_false() {
        assert!(Capabilities::NONE.is_empty());
        assert!(!Capabilities::EYE.is_empty());
        assert!(!Capabilities::EXPRESSION.is_empty());
    }

    #[test]
    fn interior_nul_does_not_panic() {
        assert_eq!(to_c_string("a\0b").as_bytes(), b"ab");
    }
}
