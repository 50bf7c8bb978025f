use std::env::var;
use std::sync::Arc;
use std::time::Duration;
use tera::Tera;
use tracing::info;

use crate::backoff::RateLimitCoordinator;
use crate::engine::Engine;
use crate::error::AppError;
use crate::fetcher::HttpPageFetcher;
use crate::join::{CommandLauncher, HostLauncher, JoinDispatcher};
use crate::store::FileStore;

/// Application configuration from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to bind the dashboard to.
    /// Env: BIND_ADDRESS (default: 127.0.0.1:8202)
    pub bind_address: String,
    /// Place whose private servers are listed.
    /// Env: PLACE_ID (default: 0)
    pub place_id: u64,
    /// Listing endpoint. Env: LISTING_URL (default derived from PLACE_ID)
    pub listing_url: String,
    /// Cookie sent upstream so that private listings are visible.
    /// Env: UPSTREAM_COOKIE (optional)
    pub upstream_cookie: Option<String>,
    /// Env: STORE_PATH (default: data/vipscan.json)
    pub store_path: String,
    /// Fixed wait after an HTTP 429.
    /// Env: RATE_LIMIT_DELAY_MS (default: 5000)
    pub rate_limit_delay: Duration,
    /// Env: REQUEST_TIMEOUT_SECS (default: 15)
    pub request_timeout: Duration,
    /// Env: DEEPLINK_SCHEME (default: roblox)
    pub deeplink_scheme: String,
    /// Program started with `placeId accessCode` for host joins.
    /// Env: HOST_LAUNCH_COMMAND (optional)
    pub host_launch_command: Option<String>,
    /// Cron expression for the background totals refresh.
    /// Env: TOTALS_REFRESH_CRON (default: every ten minutes)
    pub totals_refresh_cron: String,
}

impl Config {
    /// Creates Config from environment variables with defaults.
    pub fn from_env() -> Self {
        let place_id = env_or_default("PLACE_ID", 0);
        Self {
            bind_address: env_or_default_string("BIND_ADDRESS", "127.0.0.1:8202"),
            place_id,
            listing_url: var("LISTING_URL").unwrap_or_else(|_| default_listing_url(place_id)),
            upstream_cookie: var("UPSTREAM_COOKIE").ok().filter(|c| !c.is_empty()),
            store_path: env_or_default_string("STORE_PATH", "data/vipscan.json"),
            rate_limit_delay: Duration::from_millis(env_or_default("RATE_LIMIT_DELAY_MS", 5000)),
            request_timeout: Duration::from_secs(env_or_default("REQUEST_TIMEOUT_SECS", 15)),
            deeplink_scheme: env_or_default_string("DEEPLINK_SCHEME", "roblox"),
            host_launch_command: var("HOST_LAUNCH_COMMAND").ok().filter(|c| !c.is_empty()),
            totals_refresh_cron: env_or_default_string("TOTALS_REFRESH_CRON", "0 */10 * * * *"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8202".to_string(),
            place_id: 0,
            listing_url: default_listing_url(0),
            upstream_cookie: None,
            store_path: "data/vipscan.json".to_string(),
            rate_limit_delay: Duration::from_millis(5000),
            request_timeout: Duration::from_secs(15),
            deeplink_scheme: "roblox".to_string(),
            host_launch_command: None,
            totals_refresh_cron: "0 */10 * * * *".to_string(),
        }
    }
}

fn default_listing_url(place_id: u64) -> String {
    format!("https://games.roblox.com/v1/games/{place_id}/private-servers")
}

/// Parse environment variable or return default value
fn env_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    var(key)
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(default)
}

fn env_or_default_string(key: &str, default: &str) -> String {
    var(key).unwrap_or_else(|_| default.to_string())
}

pub type LiveEngine = Engine<HttpPageFetcher, FileStore>;

/// Parses every dashboard template matching `pattern`.
pub fn load_templates(pattern: &str) -> Result<Tera, AppError> {
    let tera = Tera::new(pattern)?;
    info!(
        pattern,
        templates = tera.get_template_names().count(),
        "templates loaded"
    );
    Ok(tera)
}

/// Shared application state passed to all request handlers.
pub struct AppState {
    /// Template engine for rendering the dashboard.
    pub tera: Tera,
    pub engine: Arc<LiveEngine>,
}

impl AppState {
    pub fn new(tera: Tera, engine: LiveEngine) -> Self {
        Self {
            tera,
            engine: Arc::new(engine),
        }
    }

    /// Wires the HTTP fetcher, on-disk store and join dispatcher from `config`.
    pub fn from_config(config: &Config, tera: Tera) -> Result<Self, AppError> {
        let fetcher = HttpPageFetcher::new(
            &config.listing_url,
            config.upstream_cookie.as_deref(),
            config.request_timeout,
        )?;
        let store = FileStore::open(&config.store_path)?;
        let host = config
            .host_launch_command
            .as_ref()
            .map(|program| Arc::new(CommandLauncher::new(program.clone())) as Arc<dyn HostLauncher>);
        let join = JoinDispatcher::new(config.place_id, config.deeplink_scheme.clone(), host);
        let engine = Engine::new(
            Arc::new(fetcher),
            Arc::new(store),
            Arc::new(RateLimitCoordinator::new(config.rate_limit_delay)),
            join,
        );
        Ok(Self::new(tera, engine))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.bind_address, "127.0.0.1:8202");
        assert_eq!(
            config.listing_url,
            "https://games.roblox.com/v1/games/0/private-servers"
        );
        assert_eq!(config.rate_limit_delay, Duration::from_secs(5));
        assert_eq!(config.request_timeout, Duration::from_secs(15));
        assert!(config.upstream_cookie.is_none());
        assert!(config.host_launch_command.is_none());
    }

    #[test]
    fn test_state_from_default_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            store_path: dir.path().join("store.json").display().to_string(),
            ..Config::default()
        };
        let state = AppState::from_config(&config, Tera::default()).unwrap();
        assert_eq!(state.engine.settings(), crate::models::Settings::default());
    }

    #[test]
    fn test_load_templates() {
        let tera = load_templates("templates/**/*.html").unwrap();
        assert!(tera.get_template_names().any(|name| name == "popup.html"));
    }

    #[test]
    fn test_broken_template_is_a_template_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.html"), "{% if %}").unwrap();
        let pattern = format!("{}/*.html", dir.path().display());

        let result = load_templates(&pattern);

        assert!(matches!(result, Err(AppError::Template(_))));
    }
}
