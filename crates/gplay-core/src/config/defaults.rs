//! Default configuration values

use std::path::PathBuf;

/// Default configuration file name (TOML)
pub const DEFAULT_CONFIG_TOML: &str = "gplay.toml";

/// Default configuration file name (YAML)
pub const DEFAULT_CONFIG_YAML: &str = "gplay.yaml";

/// Track used when neither the command line nor the config names one
pub const DEFAULT_TRACK: &str = "internal";

/// Edits are discarded after a day
pub const DEFAULT_EDIT_MAX_AGE_SECS: u64 = 24 * 60 * 60;

/// Locks untouched for half an hour are reclaimed
pub const DEFAULT_LOCK_STALE_SECS: u64 = 30 * 60;

/// Environment variable holding the service account key path
pub const SERVICE_ACCOUNT_ENV: &str = "GOOGLE_PLAY_SERVICE_ACCOUNT";

/// Get list of config file names to search for
pub fn config_file_names() -> Vec<&'static str> {
    vec![
        DEFAULT_CONFIG_TOML,
        DEFAULT_CONFIG_YAML,
        ".gplay.toml",
        ".gplay.yaml",
    ]
}

/// Platform default for the local edit store.
///
/// Prefers the user data directory and falls back to `~/.gplay/state`.
pub fn default_state_dir() -> Option<PathBuf> {
    dirs::data_local_dir()
        .map(|d| d.join("gplay"))
        .or_else(|| dirs::home_dir().map(|h| h.join(".gplay").join("state")))
}

/// Default configuration template
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# gplay configuration

# package_name = "com.example.app"
# service_account_key = "play-service-account.json"
default_track = "internal"

[edits]
max_age_secs = 86400
lock_stale_secs = 1800
lock_wait_ms = 0
"#;
