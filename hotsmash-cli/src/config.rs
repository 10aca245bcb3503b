/// Config file loading and creation for the hotsmash CLI.
///
/// Config lives at ~/.config/hotsmash/config.toml.
/// All fields are optional; CLI args override config values.
use hotsmash_core::{QueueConfig, RateLimitPolicy};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::bail;

#[derive(Deserialize, Default)]
pub struct HotsmashConfig {
    pub endpoint: Option<String>,
    pub state_dir: Option<PathBuf>,
    pub k_factor: Option<f64>,
    #[serde(default)]
    pub rate_limit: RateLimitPolicy,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub admins: Vec<String>,
    /// Vote as this account instead of the device fingerprint.
    pub voter_id: Option<String>,
}

const DEFAULT_CONFIG_TEMPLATE: &str = "\
# hotsmash configuration
# All values here can be overridden by CLI flags.

# Base URL of the hotsmash backend
# endpoint = \"http://localhost:8080/api\"

# API token: use HOTSMASH_API_KEY env var or --api-key flag (not stored in config)

# Where the vote history, fingerprint and outbox are kept
# state_dir = \"~/.local/state/hotsmash\"

# Elo K-factor: the most a single vote can move a rating
# k_factor = 32.0

# Vote as a signed-in account instead of this device's fingerprint
# voter_id = \"uid-123\"

# Accounts with privileged access
# admins = [\"uid-123\"]

[rate_limit]
# cooldown_ms = 2000
# max_per_hour = 60
# max_per_day = 200

[queue]
# capacity = 100
# max_retries = 3
# sync_interval_ms = 30000
# remote_timeout_ms = 3000
";

fn home_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| bail("HOME environment variable not set"));
    PathBuf::from(home)
}

/// Returns the default config path: ~/.config/hotsmash/config.toml
pub fn config_path() -> PathBuf {
    home_dir().join(".config").join("hotsmash").join("config.toml")
}

/// Returns the default state directory: ~/.local/state/hotsmash
pub fn default_state_dir() -> PathBuf {
    home_dir().join(".local").join("state").join("hotsmash")
}

/// Expand a leading `~/` against $HOME.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => home_dir().join(rest),
        Err(_) => path.to_path_buf(),
    }
}

/// Load config from a file path. Returns default (all None) if file doesn't exist.
pub fn load_config(path: &Path) -> HotsmashConfig {
    match std::fs::read_to_string(path) {
        Ok(content) => parse_config(&content)
            .unwrap_or_else(|e| bail(format!("Failed to parse config at {}: {e}", path.display()))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => HotsmashConfig::default(),
        Err(e) => bail(format!("Failed to read config at {}: {e}", path.display())),
    }
}

fn parse_config(content: &str) -> Result<HotsmashConfig, toml::de::Error> {
    toml::from_str(content)
}

/// Create the default config file. Errors if it already exists.
pub fn create_default_config() -> PathBuf {
    let path = config_path();

    if path.exists() {
        bail(format!("Config file already exists at {}", path.display()));
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .unwrap_or_else(|e| bail(format!("Failed to create directory {}: {e}", parent.display())));
    }

    std::fs::write(&path, DEFAULT_CONFIG_TEMPLATE)
        .unwrap_or_else(|e| bail(format!("Failed to write config to {}: {e}", path.display())));

    path
}
