//! # Configuration
//!
//! Environment-sourced startup configuration (§10). All variables are
//! read once; an unparsable value is a fatal `ConfigError::InvalidValue`
//! rather than a silently-applied default, matching the "Configuration
//! error" startup class in §7.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value}")]
    InvalidValue { var: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: String,
    pub db_path: String,
    pub log_paths: Vec<String>,
    pub data_retention_days: u32,
    pub maxmind_db_path: Option<String>,
    pub privacy_hash_ips: bool,
    pub privacy_hash_salt: String,
    pub privacy_anonymize_last_octet: bool,
    pub raw_retention_hours: u32,
    pub aggregation_interval: Duration,
    pub auth_username: Option<String>,
    pub auth_password: Option<String>,
    pub log_level: String,
    pub log_format: LogFormat,
    pub rate_limit_per_minute: u32,
    pub max_request_body_bytes: u64,
    pub db_max_connections: u32,
    pub db_query_timeout: Duration,
    pub session_duration: Duration,
    pub geo_cache_capacity: u32,
    pub geo_cache_ttl: Duration,
    pub sse_buffer_size: u32,
    pub janitor_interval: Duration,
    pub janitor_vacuum: bool,
    pub report_check_interval: Duration,
    pub smtp: Option<SmtpConfig>,
    pub metrics_enabled: bool,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(|name| std::env::var(name).ok())
    }

    /// Testable indirection over `std::env::var` so config parsing can be
    /// exercised without mutating the process environment.
    fn from_source(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let privacy_hash_ips = parse_bool(&get, "PRIVACY_HASH_IPS", false)?;
        let privacy_hash_salt = get("PRIVACY_HASH_SALT").unwrap_or_else(|| {
            if privacy_hash_ips {
                random_salt()
            } else {
                String::new()
            }
        });

        let smtp_host = get("SMTP_HOST");
        let smtp = smtp_host.map(|host| -> Result<SmtpConfig, ConfigError> {
            Ok(SmtpConfig {
                host,
                port: parse_u32(&get, "SMTP_PORT", 587)? as u16,
                username: get("SMTP_USERNAME"),
                password: get("SMTP_PASSWORD"),
                from: get("SMTP_FROM").unwrap_or_default(),
            })
        }).transpose()?;

        Ok(Self {
            listen_addr: get("LISTEN_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            db_path: get("DB_PATH").unwrap_or_else(|| "./caddystat.db".to_string()),
            log_paths: get("LOG_PATH")
                .map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
                .unwrap_or_default(),
            data_retention_days: parse_u32(&get, "DATA_RETENTION_DAYS", 90)?,
            maxmind_db_path: get("MAXMIND_DB_PATH"),
            privacy_hash_ips,
            privacy_hash_salt,
            privacy_anonymize_last_octet: parse_bool(&get, "PRIVACY_ANONYMIZE_LAST_OCTET", false)?,
            raw_retention_hours: parse_u32(&get, "RAW_RETENTION_HOURS", 0)?,
            aggregation_interval: parse_duration(&get, "AGGREGATION_INTERVAL", Duration::from_secs(3600))?,
            auth_username: get("AUTH_USERNAME"),
            auth_password: get("AUTH_PASSWORD"),
            log_level: get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            log_format: match get("LOG_FORMAT").as_deref() {
                None | Some("text") => LogFormat::Text,
                Some("json") => LogFormat::Json,
                Some(other) => {
                    return Err(ConfigError::InvalidValue { var: "LOG_FORMAT", value: other.to_string() })
                }
            },
            rate_limit_per_minute: parse_u32(&get, "RATE_LIMIT_PER_MINUTE", 120)?,
            max_request_body_bytes: parse_u64(&get, "MAX_REQUEST_BODY_BYTES", 1_048_576)?,
            db_max_connections: parse_u32(&get, "DB_MAX_CONNECTIONS", 1)?,
            db_query_timeout: parse_duration(&get, "DB_QUERY_TIMEOUT", Duration::from_secs(10))?,
            session_duration: parse_duration(&get, "SESSION_DURATION", Duration::from_secs(24 * 3600))?,
            geo_cache_capacity: parse_u32(&get, "GEO_CACHE_CAPACITY", 10_000)?,
            geo_cache_ttl: parse_duration(&get, "GEO_CACHE_TTL", Duration::from_secs(3600))?,
            sse_buffer_size: parse_u32(&get, "SSE_BUFFER_SIZE", 10)?,
            janitor_interval: parse_duration(&get, "JANITOR_INTERVAL", Duration::from_secs(24 * 3600))?,
            janitor_vacuum: parse_bool(&get, "JANITOR_VACUUM", false)?,
            report_check_interval: parse_duration(&get, "REPORT_CHECK_INTERVAL", Duration::from_secs(300))?,
            smtp,
            metrics_enabled: parse_bool(&get, "METRICS_ENABLED", true)?,
        })
    }

    pub fn auth_enabled(&self) -> bool {
        self.auth_username.is_some() && self.auth_password.is_some()
    }
}

fn parse_bool(get: &impl Fn(&str) -> Option<String>, var: &'static str, default: bool) -> Result<bool, ConfigError> {
    match get(var) {
        None => Ok(default),
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => Err(ConfigError::InvalidValue { var, value: raw }),
        },
    }
}

fn parse_u32(get: &impl Fn(&str) -> Option<String>, var: &'static str, default: u32) -> Result<u32, ConfigError> {
    match get(var) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue { var, value: raw }),
    }
}

fn parse_u64(get: &impl Fn(&str) -> Option<String>, var: &'static str, default: u64) -> Result<u64, ConfigError> {
    match get(var) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue { var, value: raw }),
    }
}

/// Parses `duration` values per §10: an integer followed by a unit suffix
/// `s|m|h|d`.
fn parse_duration(get: &impl Fn(&str) -> Option<String>, var: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match get(var) {
        None => Ok(default),
        Some(raw) => {
            let (digits, unit) = raw.split_at(raw.len().saturating_sub(1));
            let value: u64 = digits.parse().map_err(|_| ConfigError::InvalidValue { var, value: raw.clone() })?;
            let secs = match unit {
                "s" => value,
                "m" => value * 60,
                "h" => value * 3600,
                "d" => value * 86400,
                _ => return Err(ConfigError::InvalidValue { var, value: raw }),
            };
            Ok(Duration::from_secs(secs))
        }
    }
}

fn random_salt() -> String {
    use rand::Rng;
    let bytes: [u8; 16] = rand::thread_rng().gen();
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn source(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = AppConfig::from_source(source(&[])).unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.rate_limit_per_minute, 120);
        assert_eq!(config.session_duration, Duration::from_secs(24 * 3600));
        assert!(!config.auth_enabled());
    }

    #[test]
    fn duration_suffix_parses_each_unit() {
        let config = AppConfig::from_source(source(&[
            ("JANITOR_INTERVAL", "2h"),
            ("REPORT_CHECK_INTERVAL", "30m"),
            ("GEO_CACHE_TTL", "45s"),
            ("DATA_RETENTION_DAYS", "90"),
            ("AGGREGATION_INTERVAL", "1d"),
        ])).unwrap();
        assert_eq!(config.janitor_interval, Duration::from_secs(2 * 3600));
        assert_eq!(config.report_check_interval, Duration::from_secs(30 * 60));
        assert_eq!(config.geo_cache_ttl, Duration::from_secs(45));
        assert_eq!(config.aggregation_interval, Duration::from_secs(86400));
    }

    #[test]
    fn invalid_bool_is_fatal() {
        let err = AppConfig::from_source(source(&[("JANITOR_VACUUM", "maybe")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { var: "JANITOR_VACUUM", .. }));
    }

    #[test]
    fn invalid_duration_is_fatal() {
        let err = AppConfig::from_source(source(&[("GEO_CACHE_TTL", "five")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { var: "GEO_CACHE_TTL", .. }));
    }

    #[test]
    fn log_path_splits_and_trims_commas() {
        let config = AppConfig::from_source(source(&[("LOG_PATH", "/var/log/a.log, /var/log/b.log")])).unwrap();
        assert_eq!(config.log_paths, vec!["/var/log/a.log".to_string(), "/var/log/b.log".to_string()]);
    }

    #[test]
    fn auth_requires_both_username_and_password() {
        let config = AppConfig::from_source(source(&[("AUTH_USERNAME", "admin")])).unwrap();
        assert!(!config.auth_enabled());
    }

    #[test]
    fn smtp_absent_when_host_unset() {
        let config = AppConfig::from_source(source(&[])).unwrap();
        assert!(config.smtp.is_none());
    }

    #[test]
    fn smtp_present_when_host_set() {
        let config = AppConfig::from_source(source(&[("SMTP_HOST", "smtp.example.com"), ("SMTP_FROM", "a@b.com")])).unwrap();
        let smtp = config.smtp.unwrap();
        assert_eq!(smtp.host, "smtp.example.com");
        assert_eq!(smtp.port, 587);
    }
}
