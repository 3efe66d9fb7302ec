use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::http::request::{DEFAULT_USER_AGENT, Request, RequestBuilder};

/// Service settings, read from a YAML file named by `COURIER_CONFIG` and
/// then overridden by individual environment variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Worker threads of a service-owned runtime
    pub worker_threads: usize,
    /// How often finished connections are swept from the service table
    pub dispose_interval_ms: u64,
    /// How long dropping a service-owned runtime waits for in-flight work
    pub shutdown_grace_ms: u64,
    pub request: RequestDefaults,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_threads: 1,
            dispose_interval_ms: 1000,
            shutdown_grace_ms: 1000,
            request: RequestDefaults::default(),
        }
    }
}

/// Defaults applied to requests created through a service.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RequestDefaults {
    pub timeout_secs: u64,
    pub store_timeout_secs: u64,
    pub follow_redirects: bool,
    pub max_redirects: usize,
    pub gzip: bool,
    pub keep_alive: bool,
    pub cache_redirects: bool,
    pub throw_on_error: bool,
    pub user_agent: String,
    pub verify_peer: bool,
}

impl Default for RequestDefaults {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            store_timeout_secs: 60,
            follow_redirects: true,
            max_redirects: 10,
            gzip: true,
            keep_alive: true,
            cache_redirects: true,
            throw_on_error: false,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            verify_peer: false,
        }
    }
}

impl RequestDefaults {
    pub fn builder(&self) -> RequestBuilder {
        RequestBuilder::new()
            .timeout(Duration::from_secs(self.timeout_secs))
            .store_timeout(Duration::from_secs(self.store_timeout_secs))
            .follow_redirects(self.follow_redirects)
            .max_redirects(self.max_redirects)
            .gzip(self.gzip)
            .keep_alive(self.keep_alive)
            .cache_redirects(self.cache_redirects)
            .throw_on_error(self.throw_on_error)
            .verify_peer(self.verify_peer)
            .header("User-Agent", self.user_agent.as_str())
    }

    pub fn to_request(&self) -> Request {
        self.builder().build()
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let mut cfg = match std::env::var("COURIER_CONFIG") {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        cfg.apply_env()?;
        Ok(cfg)
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("in {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> anyhow::Result<Self> {
        serde_yaml::from_str(text).context("invalid config")
    }

    fn apply_env(&mut self) -> anyhow::Result<()> {
        if let Some(timeout) = env_parse("COURIER_TIMEOUT_SECS")? {
            self.request.timeout_secs = timeout;
        }
        if let Some(threads) = env_parse("COURIER_WORKER_THREADS")? {
            self.worker_threads = threads;
        }
        if let Ok(agent) = std::env::var("COURIER_USER_AGENT") {
            self.request.user_agent = agent;
        }
        Ok(())
    }

    pub fn dispose_interval(&self) -> Duration {
        Duration::from_millis(self.dispose_interval_ms.max(1))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

fn env_parse<T>(name: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("invalid {name}={value:?}")),
        Err(_) => Ok(None),
    }
}
