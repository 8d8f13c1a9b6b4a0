//! Logging initialization

/// Initialize the logging system
///
/// Uses env_logger with default filter level of `info`.
/// Override with RUST_LOG environment variable, e.g.
/// `RUST_LOG=geostream::protocol=debug` to trace every decoded record.
///
/// # Example
/// ```
/// geostream::core::logging::init();
/// log::info!("Loader started");
/// ```
pub fn init() {
    // try_init so tests and embedders that already installed a logger don't panic
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info")
    ).try_init();
}
