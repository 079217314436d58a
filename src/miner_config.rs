use crate::error::{MinerError, MinerResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

/// Fraction of unmatched tokens above which a line is its own template.
pub const DEFAULT_UNMATCHED_RATIO: f64 = 0.4;

/// Tokens beyond this position are dropped by the tokenizer.
pub const DEFAULT_MAX_TOKENS: usize = 50;

pub const DEFAULT_STORAGE_KEY: &str = "template-miner:tree";
pub const DEFAULT_CACHE_CAPACITY: usize = 20;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 60 * 60;
pub const DEFAULT_SAVE_INTERVAL_MS: u64 = 5 * 60 * 1000;
pub const DEFAULT_STORE_TTL_SECS: u64 = 12 * 60 * 60;

/// One tokenizer rewrite: every match of `pattern` becomes `label`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRule {
    pub pattern: String,
    pub label: String,
}

impl TokenRule {
    pub fn new(pattern: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            label: label.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MinerConfig {
    /// Applied in declaration order, each on the output of the previous one.
    pub rules: Vec<TokenRule>,
    pub storage_key: String,
    pub unmatched_ratio: f64,
    pub max_tokens: usize,
    pub cache_capacity: usize,
    pub cache_ttl_secs: u64,
    pub save_interval_ms: u64,
    pub store_ttl_secs: u64,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            unmatched_ratio: DEFAULT_UNMATCHED_RATIO,
            max_tokens: DEFAULT_MAX_TOKENS,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            save_interval_ms: DEFAULT_SAVE_INTERVAL_MS,
            store_ttl_secs: DEFAULT_STORE_TTL_SECS,
        }
    }
}

impl MinerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON config file. Missing fields fall back to defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> MinerResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: MinerConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Build from `MINER_CONFIG_PATH` (optional JSON file) and
    /// `MINER_STORAGE_KEY` (optional override).
    pub fn from_env() -> MinerResult<Self> {
        let mut config = match env::var("MINER_CONFIG_PATH") {
            Ok(path) => Self::from_json_file(path)?,
            Err(_) => Self::default(),
        };

        if let Ok(key) = env::var("MINER_STORAGE_KEY") {
            config.storage_key = key;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_rule(mut self, pattern: impl Into<String>, label: impl Into<String>) -> Self {
        self.rules.push(TokenRule::new(pattern, label));
        self
    }

    pub fn with_storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = key.into();
        self
    }

    pub fn with_unmatched_ratio(mut self, ratio: f64) -> Self {
        self.unmatched_ratio = ratio;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_cache(mut self, capacity: usize, ttl: Duration) -> Self {
        self.cache_capacity = capacity.max(1);
        self.cache_ttl_secs = ttl.as_secs();
        self
    }

    pub fn with_save_interval(mut self, interval: Duration) -> Self {
        self.save_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_store_ttl(mut self, ttl: Duration) -> Self {
        self.store_ttl_secs = ttl.as_secs();
        self
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Never zero; `tokio::time::interval` panics on a zero period.
    pub fn save_interval(&self) -> Duration {
        Duration::from_millis(self.save_interval_ms.max(1))
    }

    pub fn store_ttl(&self) -> Duration {
        Duration::from_secs(self.store_ttl_secs)
    }

    pub fn validate(&self) -> MinerResult<()> {
        if !(0.0..=1.0).contains(&self.unmatched_ratio) {
            return Err(MinerError::config(format!(
                "unmatched_ratio must be within [0, 1], got {}",
                self.unmatched_ratio
            )));
        }
        if self.max_tokens == 0 {
            return Err(MinerError::config("max_tokens must be at least 1"));
        }
        if self.cache_capacity == 0 {
            return Err(MinerError::config("cache_capacity must be at least 1"));
        }
        Ok(())
    }

    pub fn log_config(&self) {
        tracing::info!("📋 Miner configuration:");
        tracing::info!("   Storage key: {}", self.storage_key);
        tracing::info!("   Tokenizer rules: {}", self.rules.len());
        for rule in &self.rules {
            tracing::info!("     {} -> {}", rule.pattern, rule.label);
        }
        tracing::info!("   Unmatched ratio: {}", self.unmatched_ratio);
        tracing::info!("   Max tokens: {}", self.max_tokens);
        tracing::info!(
            "   Snapshot cache: {} entries, {}s TTL",
            self.cache_capacity,
            self.cache_ttl_secs
        );
        tracing::info!(
            "   Persistence: every {}ms, {}s store TTL",
            self.save_interval_ms,
            self.store_ttl_secs
        );
    }
}
