//! Configuration types and loading
//!
//! Config precedence: CLI `--config` > `CONFIG_PATH` env var > default path.
//! Every section is optional and falls back to defaults. Pooled API keys come
//! from the environment first (`GEMINI_API_KEY`, then `GEMINI_API_KEY_<n>` in
//! ascending `n`) and from `[pool] keys` literals last.

use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Root configuration
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub gemini: GeminiConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    /// Upstream request timeout per attempt
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Upstream LLM settings
#[derive(Debug, Deserialize)]
pub struct GeminiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Attempts per review/optimize call, including the first
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

/// Credential pool sources
#[derive(Deserialize)]
pub struct PoolConfig {
    /// Environment variable prefix for pooled keys
    #[serde(default = "default_env_prefix")]
    pub env_prefix: String,
    /// Literal keys appended after the environment keys
    #[serde(default)]
    pub keys: Vec<String>,
}

/// Local state settings
#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    /// File holding the last user-entered API key
    #[serde(default = "default_key_file")]
    pub key_file: PathBuf,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_timeout() -> u64 {
    60
}

fn default_max_connections() -> usize {
    64
}

fn default_base_url() -> String {
    transport::gemini::DEFAULT_BASE_URL.to_string()
}

fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_max_retries() -> u32 {
    key_pool::DEFAULT_MAX_RETRIES
}

fn default_env_prefix() -> String {
    "GEMINI_API_KEY".to_string()
}

fn default_key_file() -> PathBuf {
    PathBuf::from("user-key.json")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            timeout_secs: default_timeout(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            max_retries: default_max_retries(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            env_prefix: default_env_prefix(),
            keys: Vec::new(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            key_file: default_key_file(),
        }
    }
}

// Literal keys are secrets; only their count is printed.
impl fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConfig")
            .field("env_prefix", &self.env_prefix)
            .field("keys", &format_args!("[{} redacted]", self.keys.len()))
            .finish()
    }
}

impl Config {
    /// Load configuration from a TOML file and validate it.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the file if it exists, otherwise use defaults.
    pub fn load_or_default(path: &Path) -> common::Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    fn validate(&self) -> common::Result<()> {
        if !self.gemini.base_url.starts_with("http://")
            && !self.gemini.base_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "base_url must start with http:// or https://, got: {}",
                self.gemini.base_url
            )));
        }

        if self.gemini.model.trim().is_empty() {
            return Err(common::Error::Config("model must not be empty".into()));
        }

        if self.gemini.max_retries == 0 {
            return Err(common::Error::Config(
                "max_retries must be greater than 0".into(),
            ));
        }

        if self.server.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if self.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        if self.pool.env_prefix.trim().is_empty() {
            return Err(common::Error::Config("env_prefix must not be empty".into()));
        }

        Ok(())
    }

    /// Assemble the pooled keys from the process environment and config literals.
    pub fn pool_keys(&self) -> Vec<String> {
        assemble_pool_keys(&self.pool.env_prefix, std::env::vars(), &self.pool.keys)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("code-review.toml")
    }
}

/// Build the ordered pool: `{prefix}` first, then `{prefix}_<n>` by ascending
/// `n`, then literals. Values are trimmed and blank entries dropped.
pub fn assemble_pool_keys(
    prefix: &str,
    vars: impl IntoIterator<Item = (String, String)>,
    literals: &[String],
) -> Vec<String> {
    let mut primary = None;
    let mut numbered: Vec<(u32, String)> = Vec::new();
    let numbered_prefix = format!("{prefix}_");

    for (name, value) in vars {
        if name == prefix {
            primary = Some(value);
        } else if let Some(n) = name
            .strip_prefix(&numbered_prefix)
            .and_then(|suffix| suffix.parse::<u32>().ok())
        {
            numbered.push((n, value));
        }
    }
    numbered.sort_by_key(|(n, _)| *n);

    primary
        .into_iter()
        .chain(numbered.into_iter().map(|(_, v)| v))
        .chain(literals.iter().cloned())
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Mutex to serialize tests that mutate environment variables, preventing
    /// data races when tests run in parallel.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// SAFETY: Callers must hold ENV_MUTEX to prevent concurrent env mutation.
    unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn write_config(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("code-review.toml");
        std::fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn empty_file_uses_defaults() {
        let (_dir, path) = write_config("");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.server.listen_addr, default_listen_addr());
        assert_eq!(config.server.timeout_secs, 60);
        assert_eq!(config.server.max_connections, 64);
        assert_eq!(
            config.gemini.base_url,
            "https://generativelanguage.googleapis.com"
        );
        assert_eq!(config.gemini.model, "gemini-2.5-flash");
        assert_eq!(config.gemini.max_retries, 3);
        assert_eq!(config.pool.env_prefix, "GEMINI_API_KEY");
        assert!(config.pool.keys.is_empty());
        assert_eq!(config.storage.key_file, PathBuf::from("user-key.json"));
    }

    #[test]
    fn full_file_overrides_defaults() {
        let (_dir, path) = write_config(
            r#"
[server]
listen_addr = "0.0.0.0:9000"
timeout_secs = 30
max_connections = 8

[gemini]
base_url = "http://127.0.0.1:9999"
model = "gemini-2.0-flash"
max_retries = 5

[pool]
env_prefix = "REVIEW_KEY"
keys = ["lit-1", "lit-2"]

[storage]
key_file = "/var/lib/code-review/key.json"
"#,
        );
        let config = Config::load(&path).unwrap();
        assert_eq!(config.server.listen_addr.port(), 9000);
        assert_eq!(config.server.timeout_secs, 30);
        assert_eq!(config.server.max_connections, 8);
        assert_eq!(config.gemini.base_url, "http://127.0.0.1:9999");
        assert_eq!(config.gemini.model, "gemini-2.0-flash");
        assert_eq!(config.gemini.max_retries, 5);
        assert_eq!(config.pool.env_prefix, "REVIEW_KEY");
        assert_eq!(config.pool.keys, vec!["lit-1", "lit-2"]);
        assert_eq!(
            config.storage.key_file,
            PathBuf::from("/var/lib/code-review/key.json")
        );
    }

    #[test]
    fn missing_file_is_error_for_load() {
        assert!(Config::load(Path::new("/nonexistent/code-review.toml")).is_err());
    }

    #[test]
    fn missing_file_gives_defaults_for_load_or_default() {
        let config = Config::load_or_default(Path::new("/nonexistent/code-review.toml")).unwrap();
        assert_eq!(config.gemini.max_retries, 3);
    }

    #[test]
    fn invalid_toml_rejected() {
        let (_dir, path) = write_config("not valid {{{{ toml");
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn base_url_without_scheme_rejected() {
        let (_dir, path) = write_config("[gemini]\nbase_url = \"generativelanguage.googleapis.com\"\n");
        let err = Config::load(&path).unwrap_err().to_string();
        assert!(err.contains("base_url must start with http"), "got: {err}");
    }

    #[test]
    fn zero_values_rejected() {
        for body in [
            "[gemini]\nmax_retries = 0\n",
            "[server]\ntimeout_secs = 0\n",
            "[server]\nmax_connections = 0\n",
            "[gemini]\nmodel = \"  \"\n",
            "[pool]\nenv_prefix = \"\"\n",
        ] {
            let (_dir, path) = write_config(body);
            assert!(Config::load(&path).is_err(), "should reject: {body}");
        }
    }

    #[test]
    fn pool_debug_redacts_literal_keys() {
        let (_dir, path) = write_config("[pool]\nkeys = [\"AIzaSyLiteral\"]\n");
        let config = Config::load(&path).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("AIzaSyLiteral"), "got: {debug}");
        assert!(debug.contains("1 redacted"));
    }

    #[test]
    fn assemble_orders_primary_numbered_literals() {
        let keys = assemble_pool_keys(
            "GEMINI_API_KEY",
            vars(&[
                ("GEMINI_API_KEY_10", "k10"),
                ("GEMINI_API_KEY_2", "k2"),
                ("PATH", "/usr/bin"),
                ("GEMINI_API_KEY", "primary"),
                ("GEMINI_API_KEY_1", "k1"),
            ]),
            &["lit".to_string()],
        );
        assert_eq!(keys, vec!["primary", "k1", "k2", "k10", "lit"]);
    }

    #[test]
    fn assemble_drops_blank_and_non_numeric_entries() {
        let keys = assemble_pool_keys(
            "GEMINI_API_KEY",
            vars(&[
                ("GEMINI_API_KEY", "   "),
                ("GEMINI_API_KEY_1", ""),
                ("GEMINI_API_KEY_BACKUP", "not-numbered"),
                ("GEMINI_API_KEY_3", " k3 "),
            ]),
            &["".to_string(), "lit".to_string()],
        );
        assert_eq!(keys, vec!["k3", "lit"]);
    }

    #[test]
    fn assemble_empty_is_valid() {
        assert!(assemble_pool_keys("GEMINI_API_KEY", Vec::new(), &[]).is_empty());
    }

    #[test]
    fn pool_keys_reads_process_environment() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut config = Config::default();
        config.pool.env_prefix = "CODE_REVIEW_TEST_KEY".into();
        config.pool.keys = vec!["lit".into()];

        unsafe {
            set_env("CODE_REVIEW_TEST_KEY", "env-primary");
            set_env("CODE_REVIEW_TEST_KEY_1", "env-1");
        }
        let keys = config.pool_keys();
        unsafe {
            remove_env("CODE_REVIEW_TEST_KEY");
            remove_env("CODE_REVIEW_TEST_KEY_1");
        }

        assert_eq!(keys, vec!["env-primary", "env-1", "lit"]);
    }

    #[test]
    fn resolve_path_cli_overrides_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("CONFIG_PATH", "/env/should-lose.toml") };
        let path = Config::resolve_path(Some("/cli/wins.toml"));
        unsafe { remove_env("CONFIG_PATH") };
        assert_eq!(path, PathBuf::from("/cli/wins.toml"));
    }

    #[test]
    fn resolve_path_env_var() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("CONFIG_PATH", "/env/path.toml") };
        let path = Config::resolve_path(None);
        unsafe { remove_env("CONFIG_PATH") };
        assert_eq!(path, PathBuf::from("/env/path.toml"));
    }

    #[test]
    fn resolve_path_default() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("CONFIG_PATH") };
        assert_eq!(Config::resolve_path(None), PathBuf::from("code-review.toml"));
    }
}
