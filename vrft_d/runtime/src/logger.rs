use api::LogLevel;
use log::{debug, error, info, trace, warn};
use std::ffi::{c_char, CStr};

/// Host side of [`api::ModuleLogger`]: forwards module log lines into the
/// `log` facade under the module's target.
pub extern "C" fn module_log_callback(level: LogLevel, target: *const c_char, message: *const c_char) {
    if target.is_null() || message.is_null() {
        return;
    }

    // SAFETY: ModuleLogger always passes NUL-terminated strings that outlive
    // this call.
    let (target_str, message_str) = unsafe {
        (
            CStr::from_ptr(target).to_string_lossy(),
            CStr::from_ptr(message).to_string_lossy(),
        )
    };
    let target_str: &str = &target_str;

    match level {
        LogLevel::Error => error!(target: target_str, "{}", message_str),
        LogLevel::Warn => warn!(target: target_str, "{}", message_str),
        LogLevel::Info => info!(target: target_str, "{}", message_str),
        LogLevel::Debug => debug!(target: target_str, "{}", message_str),
        LogLevel::Trace => trace!(target: target_str, "{}", message_str),
    }
}
