use configparser::ini::Ini;
use log::{info, warn};
use std::fs;
use std::path::Path;
use std::time::Duration;

// Leaderboard endpoint
pub const DEFAULT_ENDPOINT: &str = "";
pub const CONFIG_PATH: &str = "save/leaderboard.ini";
const CONFIG_SECTION: &str = "Leaderboard";

// Network
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const MAX_RETRIES: u32 = 3;
pub const BASE_BACKOFF: Duration = Duration::from_secs(1);
pub const CALLBACK_PREFIX: &str = "rankingCallback_";
pub const MAX_BACKOFF_DOUBLINGS: u32 = 16;

// Largest values accepted from the config file
const RETRIES_LIMIT: u64 = 10;
const REQUEST_TIMEOUT_LIMIT_MS: u64 = 5 * 60 * 1000;
const BASE_BACKOFF_LIMIT_MS: u64 = 60 * 1000;

// Ranking rules
pub const QUALIFYING_PLACES: usize = 5;
pub const MAX_NAME_LEN: usize = 10;
pub const CACHE_TIMEOUT: Duration = Duration::from_secs(60);

// Display
pub const DATE_DISPLAY_FORMAT: &str = "%Y/%-m/%-d";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderboardConfig {
    pub endpoint: String,
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub qualifying_places: usize,
    pub cache_timeout: Duration,
}

impl Default for LeaderboardConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            request_timeout: REQUEST_TIMEOUT,
            max_retries: MAX_RETRIES,
            base_backoff: BASE_BACKOFF,
            qualifying_places: QUALIFYING_PLACES,
            cache_timeout: CACHE_TIMEOUT,
        }
    }
}

impl LeaderboardConfig {
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

/// `base * 2^(retry-1)`, i.e. 1s, 2s, 4s for the default base. Stops doubling
/// after [`MAX_BACKOFF_DOUBLINGS`].
pub fn backoff_for(base: Duration, retry: u32) -> Duration {
    let shift = retry.saturating_sub(1).min(MAX_BACKOFF_DOUBLINGS);
    base.saturating_mul(1u32 << shift)
}

fn write_default_file(path: &Path) -> Result<(), std::io::Error> {
    info!("Leaderboard config not found, creating defaults in '{}'.", path.display());
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let defaults = LeaderboardConfig::default();
    let mut conf = Ini::new();
    conf.set(CONFIG_SECTION, "Endpoint", Some(defaults.endpoint));
    conf.set(
        CONFIG_SECTION,
        "RequestTimeoutMs",
        Some(defaults.request_timeout.as_millis().to_string()),
    );
    conf.set(CONFIG_SECTION, "MaxRetries", Some(defaults.max_retries.to_string()));
    conf.set(
        CONFIG_SECTION,
        "BaseBackoffMs",
        Some(defaults.base_backoff.as_millis().to_string()),
    );
    conf.set(CONFIG_SECTION, "QualifyingPlaces", Some(defaults.qualifying_places.to_string()));
    conf.set(
        CONFIG_SECTION,
        "CacheTimeoutMs",
        Some(defaults.cache_timeout.as_millis().to_string()),
    );
    conf.write(path)
}

/// Loads the leaderboard config, creating a default file if none exists.
/// Anything unreadable falls back to the built-in default.
pub fn load(path: &Path) -> LeaderboardConfig {
    if !path.exists() {
        if let Err(e) = write_default_file(path) {
            warn!("Failed to create default leaderboard config: {}", e);
            return LeaderboardConfig::default();
        }
    }

    let mut conf = Ini::new();
    if let Err(e) = conf.load(path) {
        warn!("Failed to load '{}' ({}), using default leaderboard config.", path.display(), e);
        return LeaderboardConfig::default();
    }
    from_ini(&conf)
}

pub fn from_ini(conf: &Ini) -> LeaderboardConfig {
    let defaults = LeaderboardConfig::default();

    LeaderboardConfig {
        endpoint: conf
            .get(CONFIG_SECTION, "Endpoint")
            .map(|s| s.trim().to_string())
            .unwrap_or(defaults.endpoint),
        request_timeout: read_bounded(conf, "RequestTimeoutMs", 1, REQUEST_TIMEOUT_LIMIT_MS)
            .map_or(defaults.request_timeout, Duration::from_millis),
        max_retries: read_bounded(conf, "MaxRetries", 0, RETRIES_LIMIT)
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(defaults.max_retries),
        base_backoff: read_bounded(conf, "BaseBackoffMs", 0, BASE_BACKOFF_LIMIT_MS)
            .map_or(defaults.base_backoff, Duration::from_millis),
        qualifying_places: read_bounded(conf, "QualifyingPlaces", 1, u64::from(u32::MAX))
            .and_then(|v| usize::try_from(v).ok())
            .unwrap_or(defaults.qualifying_places),
        cache_timeout: read_uint(conf, "CacheTimeoutMs").map_or(defaults.cache_timeout, Duration::from_millis),
    }
}

fn read_uint(conf: &Ini, key: &str) -> Option<u64> {
    match conf.getuint(CONFIG_SECTION, key) {
        Ok(v) => v,
        Err(e) => {
            warn!("Ignoring leaderboard setting '{}': {}", key, e);
            None
        }
    }
}

fn read_bounded(conf: &Ini, key: &str, min: u64, max: u64) -> Option<u64> {
    let value = read_uint(conf, key)?;
    if (min..=max).contains(&value) {
        Some(value)
    } else {
        warn!(
            "Ignoring leaderboard setting '{}': {} is outside {}..={}",
            key, value, min, max
        );
        None
    }
}
