//! Configuration for Vestibule
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::logging::LogFormat;

/// Vestibule - multi-tenant caching reverse proxy
#[derive(Parser, Debug, Clone)]
#[command(name = "vestibule")]
#[command(about = "Caching reverse proxy with per-domain rewrite rules")]
pub struct Args {
    /// Address of the plain HTTP listener
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:10080")]
    pub listen: SocketAddr,

    /// Address of the HTTPS listener (used only when a certificate is set)
    #[arg(long, env = "LISTEN_TLS", default_value = "0.0.0.0:10443")]
    pub listen_tls: SocketAddr,

    /// PEM certificate chain for the HTTPS listener
    #[arg(long, env = "TLS_CERT")]
    pub tls_cert: Option<PathBuf>,

    /// PEM private key for the HTTPS listener
    #[arg(long, env = "TLS_KEY")]
    pub tls_key: Option<PathBuf>,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "vestibule")]
    pub mongodb_db: String,

    /// Fallback cache TTL in milliseconds when neither rule nor config sets
    /// one. Unset, zero or negative disables the fallback.
    #[arg(long = "default-cache-duration-ms", env = "DEFAULT_CACHE_DURATION", allow_negative_numbers = true)]
    pub default_cache_duration_ms: Option<i64>,

    /// Deadline for one upstream fetch, body included
    #[arg(long, env = "UPSTREAM_TIMEOUT_MS", default_value = "10000")]
    pub upstream_timeout_ms: u64,

    /// Deadline for one storage call
    #[arg(long, env = "STORAGE_TIMEOUT_MS", default_value = "1000")]
    pub storage_timeout_ms: u64,

    /// Time allowed for a client to send request headers
    #[arg(long, env = "READ_TIMEOUT_SECS", default_value = "10")]
    pub read_timeout_secs: u64,

    /// Inbound header buffer size
    #[arg(long, env = "MAX_HEADER_BYTES", default_value = "1048576")]
    pub max_header_bytes: usize,

    /// Largest request or upstream response body accepted
    #[arg(long, env = "MAX_BODY_BYTES", default_value = "33554432")]
    pub max_body_bytes: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "pretty")]
    pub log_format: LogFormat,

    /// Append access events to this JSONL file
    #[arg(long, env = "ACCESS_LOG_PATH")]
    pub access_log_path: Option<PathBuf>,

    /// Fall back to in-memory stores when MongoDB is unreachable
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// Tenants and domain configs to load at startup
    #[arg(long, env = "SEED_FILE")]
    pub seed_file: Option<PathBuf>,
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        match (&self.tls_cert, &self.tls_key) {
            (Some(_), None) => return Err("TLS_CERT is set but TLS_KEY is missing".to_string()),
            (None, Some(_)) => return Err("TLS_KEY is set but TLS_CERT is missing".to_string()),
            _ => {}
        }

        if self.tls_enabled() && self.listen == self.listen_tls {
            return Err("LISTEN and LISTEN_TLS must differ".to_string());
        }

        if self.upstream_timeout_ms == 0 {
            return Err("UPSTREAM_TIMEOUT_MS must be greater than zero".to_string());
        }
        if self.storage_timeout_ms == 0 {
            return Err("STORAGE_TIMEOUT_MS must be greater than zero".to_string());
        }
        if self.read_timeout_secs == 0 {
            return Err("READ_TIMEOUT_SECS must be greater than zero".to_string());
        }
        if self.max_header_bytes < 8192 {
            return Err("MAX_HEADER_BYTES must be at least 8192".to_string());
        }
        if self.max_body_bytes == 0 {
            return Err("MAX_BODY_BYTES must be greater than zero".to_string());
        }

        Ok(())
    }

    pub fn tls_enabled(&self) -> bool {
        self.tls_cert.is_some() && self.tls_key.is_some()
    }

    /// Process-wide fallback TTL; `None` means responses without a rule or
    /// config TTL are not cached.
    pub fn default_cache_ttl(&self) -> Option<Duration> {
        self.default_cache_duration_ms
            .filter(|ms| *ms > 0)
            .map(|ms| Duration::from_millis(ms as u64))
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream_timeout_ms)
    }

    pub fn storage_timeout(&self) -> Duration {
        Duration::from_millis(self.storage_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["vestibule"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults_are_valid() {
        let args = parse(&[]);
        assert!(args.validate().is_ok());
        assert!(!args.tls_enabled());
        assert_eq!(args.upstream_timeout(), Duration::from_secs(10));
        assert_eq!(args.max_header_bytes, 1 << 20);
    }

    #[test]
    fn test_default_cache_ttl() {
        assert_eq!(
            parse(&["--default-cache-duration-ms", "1500"]).default_cache_ttl(),
            Some(Duration::from_millis(1500))
        );
        assert_eq!(parse(&["--default-cache-duration-ms", "0"]).default_cache_ttl(), None);
        assert_eq!(parse(&["--default-cache-duration-ms", "-1"]).default_cache_ttl(), None);
        assert_eq!(parse(&[]).default_cache_ttl(), None);
    }

    #[test]
    fn test_tls_requires_both_files() {
        assert!(parse(&["--tls-cert", "cert.pem"]).validate().is_err());
        assert!(parse(&["--tls-key", "key.pem"]).validate().is_err());

        let both = parse(&["--tls-cert", "cert.pem", "--tls-key", "key.pem"]);
        assert!(both.validate().is_ok());
        assert!(both.tls_enabled());
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        assert!(parse(&["--upstream-timeout-ms", "0"]).validate().is_err());
        assert!(parse(&["--storage-timeout-ms", "0"]).validate().is_err());
        assert!(parse(&["--max-header-bytes", "1024"]).validate().is_err());
    }
}
