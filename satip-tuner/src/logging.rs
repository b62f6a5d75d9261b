//! Logging helpers for the tuner client.
//!
//! The crate logs through the `log` facade. Hosts that do not install their
//! own logger can call [`init_logger`] to get an `env_logger` backend with
//! local timestamps.

use std::io::Write;

use once_cell::sync::OnceCell;

static LOGGER: OnceCell<bool> = OnceCell::new();

/// Install an `env_logger` backend once. Returns false if another logger
/// was already installed.
pub fn init_logger() -> bool {
    *LOGGER.get_or_init(|| {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .format(|buf, record| {
                let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
                writeln!(
                    buf,
                    "[{}] [{:<5}] {}: {}",
                    timestamp,
                    record.level(),
                    record.target(),
                    record.args()
                )
            })
            .try_init()
            .is_ok()
    })
}

/// Log a panic through the `log` facade.
pub fn log_panic(info: &std::panic::PanicInfo) {
    log::error!("[PANIC] {}", info);
    if let Some(location) = info.location() {
        log::error!(
            "[PANIC] at {}:{}:{}",
            location.file(),
            location.line(),
            location.column()
        );
    }
}

/// Log with a `[device N]` suffix identifying the tuner instance.
#[macro_export]
macro_rules! device_log {
    ($level:ident, $id:expr, $($arg:tt)*) => {
        log::$level!("{} [device {}]", format_args!($($arg)*), $id)
    };
}
