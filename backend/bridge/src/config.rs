use std::{env, fmt::Display, fs::read_to_string, path::PathBuf, str::FromStr, time::Duration};

use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct Config {
    pub primary_url: String,
    pub legacy_url: String,
    pub login_url: String,
    pub logout_url: String,
    /// Page the authority should send the visitor back to after logging in.
    pub return_url: Option<String>,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    pub check_on_load: bool,
    pub cache_path: PathBuf,
    pub redis_url: Option<String>,
    pub session_ttl: Duration,
    pub session_namespace: String,
    pub session_cookie: Option<String>,
    pub selectors: Selectors,
}

/// Markup mapping per surface kind. Pages override these instead of the
/// bridge hard-coding element names.
#[derive(Debug, Clone, PartialEq)]
pub struct Selectors {
    pub login: Vec<String>,
    pub logout: Vec<String>,
    pub profile: Vec<String>,
    pub name: Vec<String>,
    pub avatar: Vec<String>,
}

impl Default for Selectors {
    fn default() -> Self {
        Self {
            login: strings(&["#loginBtn", ".login-btn", "[data-auth=login]"]),
            logout: strings(&["#logoutBtn", ".logout-btn", "[data-auth=logout]"]),
            profile: strings(&["#userProfile", ".user-profile", "[data-auth=profile]"]),
            name: strings(&[".user-name", "[data-auth=name]"]),
            avatar: strings(&[".user-avatar", "[data-auth=avatar]"]),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            primary_url: "http://127.0.0.1:8080/api/auth/session".to_string(),
            legacy_url: "http://127.0.0.1:8080/api/session/check".to_string(),
            login_url: "http://127.0.0.1:8080/login".to_string(),
            logout_url: "http://127.0.0.1:8080/api/auth/logout".to_string(),
            return_url: None,
            poll_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(5),
            check_on_load: true,
            cache_path: PathBuf::from(".bridge/session.json"),
            redis_url: None,
            session_ttl: Duration::from_secs(30 * 60),
            session_namespace: "bridge".to_string(),
            session_cookie: None,
            selectors: Selectors::default(),
        }
    }
}

impl Config {
    /// Environment on top of defaults. Bad values are logged and ignored.
    pub fn load() -> Self {
        let defaults = Self::default();

        Self {
            primary_url: try_load("BRIDGE_PRIMARY_URL", defaults.primary_url),
            legacy_url: try_load("BRIDGE_LEGACY_URL", defaults.legacy_url),
            login_url: try_load("BRIDGE_LOGIN_URL", defaults.login_url),
            logout_url: try_load("BRIDGE_LOGOUT_URL", defaults.logout_url),
            return_url: var("BRIDGE_RETURN_URL").ok(),
            poll_interval: millis("BRIDGE_POLL_MS", defaults.poll_interval),
            request_timeout: millis("BRIDGE_TIMEOUT_MS", defaults.request_timeout),
            check_on_load: try_load("BRIDGE_CHECK_ON_LOAD", defaults.check_on_load),
            cache_path: var("BRIDGE_CACHE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_path),
            redis_url: var("REDIS_URL").ok(),
            session_ttl: Duration::from_secs(try_load(
                "BRIDGE_SESSION_TTL_SECS",
                defaults.session_ttl.as_secs(),
            )),
            session_namespace: try_load("BRIDGE_SESSION_NAMESPACE", defaults.session_namespace),
            session_cookie: read_secret("BRIDGE_SESSION_COOKIE"),
            selectors: Selectors {
                login: list("BRIDGE_SELECTORS_LOGIN", defaults.selectors.login),
                logout: list("BRIDGE_SELECTORS_LOGOUT", defaults.selectors.logout),
                profile: list("BRIDGE_SELECTORS_PROFILE", defaults.selectors.profile),
                name: list("BRIDGE_SELECTORS_NAME", defaults.selectors.name),
                avatar: list("BRIDGE_SELECTORS_AVATAR", defaults.selectors.avatar),
            },
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn var(key: &str) -> Result<String, ()> {
    env::var(key).map_err(|_| {
        debug!("Environment variable {key} not found");
    })
}

fn try_load<T>(key: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    let Ok(raw) = var(key) else {
        info!("{key} not set, using default: {default}");
        return default;
    };

    raw.trim().parse().unwrap_or_else(|e| {
        warn!("Invalid {key} value: {e}, using default: {default}");
        default
    })
}

fn millis(key: &str, default: Duration) -> Duration {
    let ms: u64 = try_load(key, default.as_millis() as u64);

    if ms == 0 {
        warn!("{key} must be positive, using default");
        return default;
    }

    Duration::from_millis(ms)
}

fn list(key: &str, default: Vec<String>) -> Vec<String> {
    let Ok(raw) = var(key) else {
        return default;
    };

    let items = parse_list(&raw);
    if items.is_empty() {
        warn!("{key} is empty, using defaults");
        return default;
    }

    items
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Env var first, then `/run/secrets/<name>`. Absent is fine.
fn read_secret(secret_name: &str) -> Option<String> {
    if let Ok(value) = var(secret_name) {
        return Some(value.trim().to_string());
    }

    let path = format!("/run/secrets/{secret_name}");

    read_to_string(&path)
        .map(|s| s.trim().to_string())
        .map_err(|e| {
            debug!("No {secret_name} secret: {e}");
        })
        .ok()
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list() {
        assert_eq!(parse_list("#a, .b ,,[c=d]"), vec!["#a", ".b", "[c=d]"]);
        assert!(parse_list(" , ").is_empty());
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();

        assert!(config.check_on_load);
        assert_eq!(config.poll_interval, Duration::from_secs(30));
        assert!(config.redis_url.is_none());
        assert!(config.selectors.login.contains(&"#loginBtn".to_string()));
    }

    #[test]
    fn test_try_load_missing_key() {
        assert_eq!(try_load("BRIDGE_TEST_SURELY_UNSET", 7u32), 7);
        assert_eq!(
            millis("BRIDGE_TEST_SURELY_UNSET_MS", Duration::from_millis(250)),
            Duration::from_millis(250)
        );
    }
}
