mod logging;

pub use logging::{
    crash_log_path, init_logging, install_panic_hook, log_debug,
    log_file_path, log_panic, log_wire, logging_requested, WireDirection,
};
