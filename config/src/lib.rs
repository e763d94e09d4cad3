//! ShieldVault Configuration
//!
//! Shared configuration crate for the ShieldVault service and tooling.
//!
//! Handles loading configuration from:
//! 1. SV_CONFIG env var (explicit path)
//! 2. ./config.toml (current directory)
//! 3. ~/.shieldvault/config.toml (user home)
//!
//! Environment variables take precedence over TOML config.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::OnceLock;
use std::{env, fs};

/// Global config instance for convenience access
pub static GLOBAL_CONFIG: OnceLock<VaultConfig> = OnceLock::new();

const CONFIG_FILE_NAME: &str = "config.toml";
const CONFIG_DIR_NAME: &str = ".shieldvault";

// ============================================================================
// Default Constants
// ============================================================================

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8787;

const DEFAULT_SESSION_TTL_SECS: u64 = 3_600;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;

const DEFAULT_PROGRAM_ID: &str = "BRU5ubQjz7DjF6wWzs16SmEzPgfHTe6u8iYNpoMuAVPL";
const DEFAULT_POOL_ID: &str = "11111111111111111111111111111112";
/// 0.01 USDC at 6 decimals.
const DEFAULT_MIN_DEPOSIT: u64 = 10_000;
/// 1M USDC at 6 decimals.
const DEFAULT_MAX_DEPOSIT: u64 = 1_000_000_000_000;
const DEFAULT_VALUE_TOLERANCE_BPS: u64 = 100;
const DEFAULT_MAX_FEED_STALENESS_SECS: u64 = 900;

const DEFAULT_MIN_INTERVAL_SECS: u32 = 86_400;
const DEFAULT_MAX_INTERVAL_SECS: u32 = 31_536_000;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;
const DEFAULT_MAX_CONSECUTIVE_SKIPS: u8 = 3;
const DEFAULT_JOB_FUNDING_LAMPORTS: u64 = 10_000_000;
/// 90 days.
const DEFAULT_GRANT_TTL_SECS: u64 = 7_776_000;

const DEFAULT_MAX_RETRIES: u32 = 5;
const DEFAULT_RETRY_BASE_MS: u64 = 200;
const DEFAULT_CONFIRM_TIMEOUT_MS: u64 = 30_000;

// ============================================================================
// Config Structs
// ============================================================================

/// Root configuration structure (matches TOML layout)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VaultConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub transfers: TransferConfig,
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub features: FeatureFlags,
}

/// HTTP API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.into(),
            port: DEFAULT_PORT,
        }
    }
}

impl ApiConfig {
    /// `host:port` suitable for binding a listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_host() -> String {
    DEFAULT_HOST.into()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}

/// Session custody configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Lifetime of cached key material after sign-in
    #[serde(default = "default_session_ttl")]
    pub ttl_secs: u64,
    /// How often expired sessions are swept
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_SESSION_TTL_SECS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
        }
    }
}

fn default_session_ttl() -> u64 {
    DEFAULT_SESSION_TTL_SECS
}
fn default_sweep_interval() -> u64 {
    DEFAULT_SWEEP_INTERVAL_SECS
}

/// Shield pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Base58 ledger program id used for account derivation
    #[serde(default = "default_program_id")]
    pub program_id: String,
    /// Base58 pool id the commitments are bound to
    #[serde(default = "default_pool_id")]
    pub pool_id: String,
    #[serde(default = "default_min_deposit")]
    pub min_deposit: u64,
    #[serde(default = "default_max_deposit")]
    pub max_deposit: u64,
    /// Maximum pool-value drift between quote and submission, in basis points
    #[serde(default = "default_value_tolerance_bps")]
    pub value_tolerance_bps: u64,
    /// Oldest last-known pool value that reads may fall back to
    #[serde(default = "default_max_feed_staleness")]
    pub max_feed_staleness_secs: u64,
    /// Optional HTTP endpoint serving `{ apy_bps, pool_value }`
    #[serde(default)]
    pub yield_feed_url: Option<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            program_id: DEFAULT_PROGRAM_ID.into(),
            pool_id: DEFAULT_POOL_ID.into(),
            min_deposit: DEFAULT_MIN_DEPOSIT,
            max_deposit: DEFAULT_MAX_DEPOSIT,
            value_tolerance_bps: DEFAULT_VALUE_TOLERANCE_BPS,
            max_feed_staleness_secs: DEFAULT_MAX_FEED_STALENESS_SECS,
            yield_feed_url: None,
        }
    }
}

fn default_program_id() -> String {
    DEFAULT_PROGRAM_ID.into()
}
fn default_pool_id() -> String {
    DEFAULT_POOL_ID.into()
}
fn default_min_deposit() -> u64 {
    DEFAULT_MIN_DEPOSIT
}
fn default_max_deposit() -> u64 {
    DEFAULT_MAX_DEPOSIT
}
fn default_value_tolerance_bps() -> u64 {
    DEFAULT_VALUE_TOLERANCE_BPS
}
fn default_max_feed_staleness() -> u64 {
    DEFAULT_MAX_FEED_STALENESS_SECS
}

/// Scheduled transfer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    #[serde(default = "default_min_interval")]
    pub min_interval_secs: u32,
    #[serde(default = "default_max_interval")]
    pub max_interval_secs: u32,
    /// Manual poller tick
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_max_skips")]
    pub max_consecutive_skips: u8,
    /// Run the automated job queue next to the manual poller
    #[serde(default)]
    pub automation_enabled: bool,
    #[serde(default = "default_job_funding")]
    pub job_funding_lamports: u64,
    /// How long a transfer keeps running after its owner last signed in
    #[serde(default = "default_grant_ttl")]
    pub grant_ttl_secs: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            min_interval_secs: DEFAULT_MIN_INTERVAL_SECS,
            max_interval_secs: DEFAULT_MAX_INTERVAL_SECS,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            max_consecutive_skips: DEFAULT_MAX_CONSECUTIVE_SKIPS,
            automation_enabled: false,
            job_funding_lamports: DEFAULT_JOB_FUNDING_LAMPORTS,
            grant_ttl_secs: DEFAULT_GRANT_TTL_SECS,
        }
    }
}

fn default_min_interval() -> u32 {
    DEFAULT_MIN_INTERVAL_SECS
}
fn default_max_interval() -> u32 {
    DEFAULT_MAX_INTERVAL_SECS
}
fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}
fn default_max_skips() -> u8 {
    DEFAULT_MAX_CONSECUTIVE_SKIPS
}
fn default_job_funding() -> u64 {
    DEFAULT_JOB_FUNDING_LAMPORTS
}
fn default_grant_ttl() -> u64 {
    DEFAULT_GRANT_TTL_SECS
}

/// Ledger submission configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_confirm_timeout")]
    pub confirm_timeout_ms: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_ms: DEFAULT_RETRY_BASE_MS,
            confirm_timeout_ms: DEFAULT_CONFIRM_TIMEOUT_MS,
        }
    }
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}
fn default_retry_base_ms() -> u64 {
    DEFAULT_RETRY_BASE_MS
}
fn default_confirm_timeout() -> u64 {
    DEFAULT_CONFIRM_TIMEOUT_MS
}

/// Local transfer cache configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    /// RocksDB directory; the cache stays in memory when unset
    #[serde(default)]
    pub path: Option<String>,
}

/// Feature flags
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureFlags {
    /// Serve against an in-process ledger seeded with an empty pool
    #[serde(default)]
    pub dev_mode: bool,
}

// ============================================================================
// Environment Variable Helpers
// ============================================================================

/// Set field from env var if present
fn env_string(key: &str, field: &mut String) {
    if let Ok(v) = env::var(key) {
        *field = v;
    }
}

/// Set Option<String> from env var if present
fn env_option_string(key: &str, field: &mut Option<String>) {
    if let Ok(v) = env::var(key) {
        *field = Some(v);
    }
}

/// Set field from env var if present and parseable
fn env_parse<T: std::str::FromStr>(key: &str, field: &mut T) {
    if let Ok(v) = env::var(key) {
        if let Ok(parsed) = v.parse() {
            *field = parsed;
        }
    }
}

/// Check if env var is set to a truthy value ("1" or "true")
fn env_bool(key: &str) -> Option<bool> {
    env::var(key)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

// ============================================================================
// Implementation
// ============================================================================

impl VaultConfig {
    /// Load configuration from config file with env var overrides
    pub fn load() -> Result<Self> {
        let mut config = match Self::find_config_file() {
            Some(path) => {
                log::info!("Loading config from: {}", path.display());
                let contents = fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))?;
                toml::from_str(&contents)
                    .with_context(|| format!("Failed to parse config file: {}", path.display()))?
            }
            None => {
                log::info!("No config file found, using defaults and environment variables");
                Self::default()
            }
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific file path
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.apply_env_overrides();
        Ok(config)
    }

    /// Find the config file path
    fn find_config_file() -> Option<PathBuf> {
        // 1. Check SV_CONFIG env var
        if let Ok(path) = env::var("SV_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        // 2. Check ./config.toml (current directory)
        let local_path = PathBuf::from(CONFIG_FILE_NAME);
        if local_path.exists() {
            return Some(local_path);
        }

        // 3. Check ~/.shieldvault/config.toml
        dirs::home_dir()
            .map(|h| h.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
            .filter(|p| p.exists())
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // API
        env_string("SV_API_HOST", &mut self.api.host);
        env_parse("SV_API_PORT", &mut self.api.port);

        // Session
        env_parse("SV_SESSION_TTL_SECS", &mut self.session.ttl_secs);
        env_parse("SV_SESSION_SWEEP_SECS", &mut self.session.sweep_interval_secs);

        // Pool
        env_string("SV_PROGRAM_ID", &mut self.pool.program_id);
        env_string("SV_POOL_ID", &mut self.pool.pool_id);
        env_parse("SV_MIN_DEPOSIT", &mut self.pool.min_deposit);
        env_parse("SV_MAX_DEPOSIT", &mut self.pool.max_deposit);
        env_parse("SV_VALUE_TOLERANCE_BPS", &mut self.pool.value_tolerance_bps);
        env_option_string("SV_YIELD_FEED_URL", &mut self.pool.yield_feed_url);

        // Transfers
        env_parse("SV_POLL_INTERVAL_SECS", &mut self.transfers.poll_interval_secs);
        env_parse("SV_GRANT_TTL_SECS", &mut self.transfers.grant_ttl_secs);
        if let Some(v) = env_bool("SV_AUTOMATION_ENABLED") {
            self.transfers.automation_enabled = v;
        }

        // RPC
        env_parse("SV_MAX_RETRIES", &mut self.rpc.max_retries);
        env_parse("SV_RETRY_BASE_MS", &mut self.rpc.retry_base_ms);
        env_parse("SV_CONFIRM_TIMEOUT_MS", &mut self.rpc.confirm_timeout_ms);

        // Cache
        env_option_string("SV_CACHE_PATH", &mut self.cache.path);

        // Features
        if let Some(v) = env_bool("DEV_MODE") {
            self.features.dev_mode = v;
        }
    }

    /// Get the default config file path
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Generate a sample config file
    pub fn generate_sample() -> String {
        let mut sample = Self::default();
        sample.features.dev_mode = true;
        sample.cache.path = Some("./shieldvault-cache".into());
        toml::to_string_pretty(&sample).unwrap_or_default()
    }

    /// Get the global config instance, initializing it if necessary.
    ///
    /// Falls back to defaults if loading fails.
    pub fn global() -> &'static VaultConfig {
        GLOBAL_CONFIG.get_or_init(|| {
            Self::load().unwrap_or_else(|e| {
                log::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            })
        })
    }

    /// Try to get the global config instance.
    ///
    /// Returns `None` if config hasn't been initialized yet.
    pub fn try_global() -> Option<&'static VaultConfig> {
        GLOBAL_CONFIG.get()
    }

    /// Initialize the global config with a specific instance.
    ///
    /// Returns `Err(config)` if already initialized.
    pub fn set_global(config: VaultConfig) -> Result<(), VaultConfig> {
        GLOBAL_CONFIG.set(config)
    }
}

/// Shorthand for `VaultConfig::global()`.
#[inline]
pub fn global_config() -> &'static VaultConfig {
    VaultConfig::global()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = VaultConfig::default();
        assert_eq!(config.api.host, DEFAULT_HOST);
        assert_eq!(config.session.ttl_secs, 3_600);
        assert_eq!(config.pool.min_deposit, 10_000);
        assert_eq!(config.pool.max_deposit, 1_000_000_000_000);
        assert_eq!(config.pool.value_tolerance_bps, 100);
        assert_eq!(config.transfers.min_interval_secs, 86_400);
        assert_eq!(config.transfers.max_consecutive_skips, 3);
        assert!(config.transfers.grant_ttl_secs > u64::from(config.transfers.min_interval_secs));
        assert!(!config.features.dev_mode);
        assert!(config.cache.path.is_none());
    }

    #[test]
    fn test_generate_sample() {
        let sample = VaultConfig::generate_sample();
        assert!(sample.contains("[api]"));
        assert!(sample.contains("[session]"));
        assert!(sample.contains("[pool]"));
        assert!(sample.contains("[transfers]"));
        assert!(sample.contains("[features]"));
    }

    #[test]
    fn test_parse_sample() {
        let sample = VaultConfig::generate_sample();
        let parsed: VaultConfig = toml::from_str(&sample).unwrap();
        assert_eq!(parsed.api.port, DEFAULT_PORT);
        assert!(parsed.features.dev_mode);
        assert_eq!(parsed.cache.path.as_deref(), Some("./shieldvault-cache"));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let parsed: VaultConfig = toml::from_str(
            r#"
            [session]
            ttl_secs = 60

            [transfers]
            automation_enabled = true
            "#,
        )
        .unwrap();
        assert_eq!(parsed.session.ttl_secs, 60);
        assert_eq!(parsed.session.sweep_interval_secs, DEFAULT_SWEEP_INTERVAL_SECS);
        assert!(parsed.transfers.automation_enabled);
        assert_eq!(parsed.transfers.poll_interval_secs, DEFAULT_POLL_INTERVAL_SECS);
        assert_eq!(parsed.rpc.max_retries, DEFAULT_MAX_RETRIES);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[api]\nport = 9999\n[pool]\nmin_deposit = 42").unwrap();

        let config = VaultConfig::load_from(file.path()).unwrap();
        assert_eq!(config.pool.min_deposit, 42);
        assert_eq!(config.pool.max_deposit, DEFAULT_MAX_DEPOSIT);
    }

    #[test]
    fn test_bind_addr() {
        let api = ApiConfig {
            host: "0.0.0.0".into(),
            port: 1234,
        };
        assert_eq!(api.bind_addr(), "0.0.0.0:1234");
    }
}
