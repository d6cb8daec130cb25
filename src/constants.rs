/// Environment variable overriding the config file location
pub const CONFIG_ENV: &str = "PULLSYNC_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "pullsync.toml";

// Settings defaults
pub const DEFAULT_DATABASE: &str = "data/pullsync.db";
pub const DEFAULT_LOG_DIR: &str = "logs";
pub const DEFAULT_CONTENT_ROOT: &str = "data/files";
pub const DEFAULT_MAX_DEBUG: usize = 100;
pub const DEFAULT_LEASE_SECONDS: i64 = 3600;

/// Log file name prefix inside the log directory
pub const LOG_FILE_NAME: &str = "pullsync.log";
