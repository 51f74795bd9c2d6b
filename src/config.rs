//! Runtime configuration read from the environment.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use log::LevelFilter;
use thiserror::Error;

use crate::cache::{CredentialError, Credentials, WorkspacePaths, configure_ssh_access};

pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600;
pub const DEFAULT_MAX_CACHE_ENTRIES: usize = 32;
pub const DEFAULT_RATE_LIMIT_CAPACITY: u32 = 100;
pub const DEFAULT_RATE_LIMIT_REFILL_PER_SEC: f64 = 10.0;
pub const DEFAULT_HTTP_PORT: u16 = 8000;

/// Errors returned while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A variable is set to a value that cannot be used.
    #[error("invalid {var}={value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
    /// `GIT_SSH_KEY_PATH` does not name a usable key file.
    #[error("GIT_SSH_KEY_PATH: {0}")]
    SshKey(#[from] CredentialError),
}

/// Settings for the optional LLM message source.
#[derive(Debug, Clone, PartialEq)]
pub struct AiConfig {
    pub enabled: bool,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
    pub api_key: Option<String>,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            timeout: Duration::from_secs(30),
            api_key: None,
        }
    }
}

/// Bearer tokens and per-token request budget.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthConfig {
    /// Accepted tokens. Authentication is off when empty.
    pub tokens: Vec<String>,
    pub rate_limit_capacity: u32,
    pub rate_limit_refill_per_sec: f64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            tokens: Vec::new(),
            rate_limit_capacity: DEFAULT_RATE_LIMIT_CAPACITY,
            rate_limit_refill_per_sec: DEFAULT_RATE_LIMIT_REFILL_PER_SEC,
        }
    }
}

/// Complete runtime configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub workspace_dir: PathBuf,
    pub cache_ttl: Duration,
    pub max_cache_entries: usize,
    pub ssh_key_path: Option<PathBuf>,
    pub git_username: Option<String>,
    pub git_token: Option<String>,
    pub default_repo_path: PathBuf,
    pub max_bullet_points: usize,
    pub max_summary_lines: usize,
    pub changelog_file: String,
    pub log_level: LevelFilter,
    pub worker_threads: usize,
    /// Listen address of `gitpilot http`.
    pub http_addr: SocketAddr,
    pub ai: AiConfig,
    pub auth: AuthConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace_dir: WorkspacePaths::default().root().to_path_buf(),
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            max_cache_entries: DEFAULT_MAX_CACHE_ENTRIES,
            ssh_key_path: None,
            git_username: None,
            git_token: None,
            default_repo_path: PathBuf::from("."),
            max_bullet_points: 5,
            max_summary_lines: 2,
            changelog_file: "CHANGELOG.md".to_string(),
            log_level: LevelFilter::Info,
            worker_threads: 4,
            http_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_HTTP_PORT),
            ai: AiConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

fn parse<T: FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn at_least_one(var: &'static str, value: &str) -> Result<usize, ConfigError> {
    let n: usize = parse(var, value)?;
    if n < 1 {
        return Err(ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: "must be at least 1".to_string(),
        });
    }
    Ok(n)
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: "expected true or false".to_string(),
        }),
    }
}

fn parse_level(value: &str) -> Result<LevelFilter, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "warning" => Ok(LevelFilter::Warn),
        "critical" => Ok(LevelFilter::Error),
        other => parse("LOG_LEVEL", other),
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration from `lookup`, treating empty values as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(dir) = get("WORKSPACE_DIR") {
            config.workspace_dir = PathBuf::from(dir);
        }
        if let Some(v) = get("CACHE_TTL_SECONDS") {
            config.cache_ttl = Duration::from_secs(parse("CACHE_TTL_SECONDS", &v)?);
        }
        if let Some(v) = get("MAX_CACHE_ENTRIES") {
            config.max_cache_entries = at_least_one("MAX_CACHE_ENTRIES", &v)?;
        }
        if let Some(path) = get("GIT_SSH_KEY_PATH") {
            let path = PathBuf::from(path);
            configure_ssh_access(&path)?;
            config.ssh_key_path = Some(path);
        }
        config.git_username = get("GIT_USERNAME");
        config.git_token = get("GIT_TOKEN");
        if let Some(path) = get("DEFAULT_REPO_PATH") {
            config.default_repo_path = PathBuf::from(path);
        }
        if let Some(v) = get("MAX_BULLET_POINTS") {
            config.max_bullet_points = at_least_one("MAX_BULLET_POINTS", &v)?;
        }
        if let Some(v) = get("MAX_SUMMARY_LINES") {
            config.max_summary_lines = at_least_one("MAX_SUMMARY_LINES", &v)?;
        }
        if let Some(name) = get("CHANGELOG_FILE") {
            config.changelog_file = name;
        }
        if let Some(v) = get("LOG_LEVEL") {
            config.log_level = parse_level(&v)?;
        }
        if let Some(v) = get("WORKER_THREADS") {
            config.worker_threads = at_least_one("WORKER_THREADS", &v)?;
        }
        if let Some(v) = get("HTTP_HOST") {
            config.http_addr.set_ip(parse("HTTP_HOST", &v)?);
        }
        if let Some(v) = get("HTTP_PORT") {
            config.http_addr.set_port(parse("HTTP_PORT", &v)?);
        }

        if let Some(v) = get("AI_ENABLED") {
            config.ai.enabled = parse_bool("AI_ENABLED", &v)?;
        }
        if let Some(url) = get("AI_BASE_URL") {
            config.ai.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(model) = get("AI_MODEL") {
            config.ai.model = model;
        }
        if let Some(v) = get("AI_TIMEOUT_SECONDS") {
            config.ai.timeout = Duration::from_secs(parse("AI_TIMEOUT_SECONDS", &v)?);
        }
        config.ai.api_key = get("OPENAI_API_KEY");

        if let Some(tokens) = get("AUTH_TOKENS") {
            config.auth.tokens = tokens
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = get("RATE_LIMIT_CAPACITY") {
            config.auth.rate_limit_capacity = parse("RATE_LIMIT_CAPACITY", &v)?;
        }
        if let Some(v) = get("RATE_LIMIT_REFILL_PER_SEC") {
            let rate: f64 = parse("RATE_LIMIT_REFILL_PER_SEC", &v)?;
            if !rate.is_finite() || rate < 0.0 {
                return Err(ConfigError::Invalid {
                    var: "RATE_LIMIT_REFILL_PER_SEC",
                    value: v,
                    reason: "must be a non-negative number".to_string(),
                });
            }
            config.auth.rate_limit_refill_per_sec = rate;
        }

        Ok(config)
    }

    /// Credentials to use when a request carries none.
    ///
    /// An SSH key wins over username + token, which wins over a bare token.
    pub fn default_credentials(&self) -> Option<Credentials> {
        if let Some(key) = &self.ssh_key_path {
            return Some(Credentials::Ssh {
                ssh_key: key.clone(),
            });
        }
        match (&self.git_username, &self.git_token) {
            (Some(username), Some(token)) => Some(Credentials::Https {
                username: username.clone(),
                password: token.clone(),
            }),
            (None, Some(token)) => Some(Credentials::Token {
                token: token.clone(),
            }),
            _ => None,
        }
    }

    pub fn workspace_paths(&self) -> WorkspacePaths {
        WorkspacePaths::new(&self.workspace_dir)
    }
}
