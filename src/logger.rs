// pgarchive/src/logger.rs

/// Builder with the default filter, overridable via RUST_LOG. The variable
/// is read when the builder is created.
pub fn builder() -> env_logger::Builder {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
}

/// Initialize the logger.
pub fn init() {
    builder().init();
}
