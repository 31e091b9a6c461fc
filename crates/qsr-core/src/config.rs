use serde::{Deserialize, Serialize};

/// Top-level daemon configuration (loaded from qsrd.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QsrConfig {
    pub server: ServerConfig,
    pub relay: RelayConfig,
    pub transfer: TransferConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP listen address for the relay HTTP API
    pub listen: String,
    /// Log level (default: info)
    pub log_level: String,
    /// Log format: "json" or "text"
    pub log_format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Cleanup sweep interval in seconds
    pub cleanup_interval_secs: u64,
    /// Default pickup-code lifetime in hours
    pub default_ttl_hours: u64,
    /// Default download limit per code (999 = unlimited)
    pub default_usage_limit: u32,
    /// Server-side secret mixed into dedup fingerprints so a leaked
    /// registry cannot be matched against known plaintext hashes
    pub dedup_pepper: String,
    /// Attempts at generating an unused lookup segment before giving up
    pub lookup_generation_attempts: u32,
}

/// Client-side transfer tuning. Lives in the shared config so the daemon
/// can advertise matching values to embedded clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Plaintext chunk size in bytes
    pub chunk_size: usize,
    /// Chunk indices requested per batched download call
    pub download_batch_size: usize,
    /// In-flight chunk uploads (bounded window, not unbounded fan-out)
    pub upload_concurrency: usize,
    /// Per-chunk upload retry attempts before the transfer fails
    pub chunk_retry_attempts: u32,
    /// Polling attempts while waiting for the sender's wrapped key
    pub key_retry_attempts: u32,
    /// Interval between wrapped-key polls, in milliseconds
    pub key_retry_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8040".into(),
            log_level: "info".into(),
            log_format: "text".into(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            cleanup_interval_secs: 60,
            default_ttl_hours: 24,
            default_usage_limit: 3,
            dedup_pepper: String::new(),
            lookup_generation_attempts: 100,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: 64 * 1024,
            download_batch_size: 25,
            upload_concurrency: 4,
            chunk_retry_attempts: 3,
            key_retry_attempts: 10,
            key_retry_interval_ms: 2000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
[server]
listen = "0.0.0.0:9040"
log_level = "debug"
log_format = "json"

[relay]
cleanup_interval_secs = 30
default_ttl_hours = 1
default_usage_limit = 1
dedup_pepper = "s3cret"

[transfer]
chunk_size = 32768
download_batch_size = 10
key_retry_attempts = 5
"#;
        let config: QsrConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.server.listen, "0.0.0.0:9040");
        assert_eq!(config.server.log_format, "json");
        assert_eq!(config.relay.cleanup_interval_secs, 30);
        assert_eq!(config.relay.default_ttl_hours, 1);
        assert_eq!(config.relay.default_usage_limit, 1);
        assert_eq!(config.relay.dedup_pepper, "s3cret");
        assert_eq!(config.transfer.chunk_size, 32768);
        assert_eq!(config.transfer.download_batch_size, 10);
        assert_eq!(config.transfer.key_retry_attempts, 5);
        // untouched defaults
        assert_eq!(config.transfer.upload_concurrency, 4);
    }

    #[test]
    fn parse_defaults() {
        let config: QsrConfig = toml::from_str("").unwrap();

        assert_eq!(config.server.listen, "127.0.0.1:8040");
        assert_eq!(config.server.log_level, "info");
        assert_eq!(config.relay.default_ttl_hours, 24);
        assert_eq!(config.relay.default_usage_limit, 3);
        assert_eq!(config.relay.lookup_generation_attempts, 100);
        assert_eq!(config.transfer.chunk_size, 64 * 1024);
        assert_eq!(config.transfer.download_batch_size, 25);
        assert_eq!(config.transfer.key_retry_interval_ms, 2000);
    }

    #[test]
    fn parse_partial_config() {
        let toml_str = r#"
[relay]
default_ttl_hours = 72
"#;
        let config: QsrConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.relay.default_ttl_hours, 72);
        assert_eq!(config.relay.default_usage_limit, 3);
        assert_eq!(config.server.log_level, "info");
    }

    #[test]
    fn serialize_roundtrip() {
        let config = QsrConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: QsrConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.server.listen, parsed.server.listen);
        assert_eq!(config.relay.cleanup_interval_secs, parsed.relay.cleanup_interval_secs);
        assert_eq!(config.transfer.chunk_size, parsed.transfer.chunk_size);
    }
}
