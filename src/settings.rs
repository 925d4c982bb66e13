use std::env;
use std::path::PathBuf;

const DEFAULT_CONFIG_PATH: &str = "redirect-config.json";
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:80";

/// Process settings read from the environment at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Pool config file (`REDIRECT_CONFIG`)
    pub config_path: PathBuf,
    /// TCP listen address (`REDIRECT_LISTEN`)
    pub listen_addr: String,
    /// Load-test verification token (`REDIRECT_PROBE_TOKEN`), endpoint disabled when unset
    pub probe_token: Option<String>,
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            config_path: non_empty("REDIRECT_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH)),
            listen_addr: non_empty("REDIRECT_LISTEN")
                .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string()),
            probe_token: non_empty("REDIRECT_PROBE_TOKEN").map(|t| t.trim().to_string()),
        }
    }
}
