//! Trait boundaries for the collaborators §6 treats as externally
//! supplied: the log-line parser, UA classifier, and geo reader. Each
//! ships a small default implementation so the service runs standalone.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use crate::geocache::GeoLocation;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid json: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

/// One parsed access-log line, before enrichment.
#[derive(Debug, Clone)]
pub struct ParsedLine {
    pub timestamp: DateTime<Utc>,
    pub host: String,
    pub path: String,
    pub status: i32,
    pub bytes: i64,
    pub ip: String,
    pub referrer: String,
    pub user_agent: String,
    pub response_time_ms: f64,
}

pub trait LogLineParser: Send + Sync {
    fn parse(&self, line: &[u8]) -> Result<ParsedLine, ParseError>;
}

#[derive(Debug, Clone, Default)]
pub struct UaClassification {
    pub browser: Option<String>,
    pub browser_version: Option<String>,
    pub os: Option<String>,
    pub os_version: Option<String>,
    pub device_type: Option<String>,
    pub is_bot: bool,
    pub bot_name: Option<String>,
    pub bot_intent: Option<String>,
}

pub trait UaClassifier: Send + Sync {
    fn classify(&self, user_agent: &str) -> UaClassification;
}

#[async_trait]
pub trait GeoReader: Send + Sync {
    async fn lookup(&self, ip: &str) -> GeoLocation;
}

/// Newline-delimited JSON, one object per line: `{"ts", "host", "path",
/// "status", "size", "remote_ip", "referrer", "user_agent", "duration_ms"}`.
/// `ts` accepts either an RFC3339 string or a Unix-epoch-seconds number.
#[derive(Debug, Default)]
pub struct JsonLineParser;

#[derive(Debug, Deserialize)]
struct RawLine {
    ts: serde_json::Value,
    #[serde(default)]
    host: String,
    path: String,
    status: i32,
    #[serde(default)]
    size: i64,
    #[serde(default)]
    remote_ip: String,
    #[serde(default)]
    referrer: String,
    #[serde(default)]
    user_agent: String,
    #[serde(default)]
    duration_ms: f64,
}

fn parse_flexible_timestamp(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    if let Some(s) = value.as_str() {
        return DateTime::parse_from_rfc3339(s).ok().map(|d| d.with_timezone(&Utc));
    }
    if let Some(f) = value.as_f64() {
        let secs = f.trunc() as i64;
        let nanos = (f.fract() * 1e9).round() as u32;
        return DateTime::from_timestamp(secs, nanos);
    }
    None
}

impl LogLineParser for JsonLineParser {
    fn parse(&self, line: &[u8]) -> Result<ParsedLine, ParseError> {
        let raw: RawLine = serde_json::from_slice(line)?;
        let timestamp = parse_flexible_timestamp(&raw.ts).ok_or(ParseError::MissingField("ts"))?;
        if raw.path.is_empty() {
            return Err(ParseError::MissingField("path"));
        }
        Ok(ParsedLine {
            timestamp,
            host: raw.host,
            path: raw.path,
            status: raw.status,
            bytes: raw.size,
            ip: raw.remote_ip,
            referrer: raw.referrer,
            user_agent: raw.user_agent,
            response_time_ms: raw.duration_ms,
        })
    }
}

static BOT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)bot|crawl|spider|crawler|preview|pingdom|uptime").unwrap());

/// Lightweight substring-based UA classifier. Not meant to rival a full
/// UA database — good enough to populate browser/os/bot fields without an
/// external dependency.
#[derive(Debug, Default)]
pub struct SubstringUaClassifier;

impl UaClassifier for SubstringUaClassifier {
    fn classify(&self, user_agent: &str) -> UaClassification {
        if user_agent.is_empty() {
            return UaClassification::default();
        }
        if let Some(m) = BOT_PATTERN.find(user_agent) {
            return UaClassification {
                is_bot: true,
                bot_name: Some(m.as_str().to_string()),
                bot_intent: Some("crawl".to_string()),
                ..Default::default()
            };
        }

        let browser = [("Edg", "Edge"), ("Chrome", "Chrome"), ("Firefox", "Firefox"), ("Safari", "Safari"), ("MSIE", "Internet Explorer"), ("Trident", "Internet Explorer")]
            .iter()
            .find(|(needle, _)| user_agent.contains(needle))
            .map(|(_, name)| name.to_string());

        let os = [("Windows", "Windows"), ("Mac OS X", "macOS"), ("Android", "Android"), ("iPhone", "iOS"), ("iPad", "iOS"), ("Linux", "Linux")]
            .iter()
            .find(|(needle, _)| user_agent.contains(needle))
            .map(|(_, name)| name.to_string());

        let device_type = if user_agent.contains("Mobile") || user_agent.contains("Android") {
            Some("mobile".to_string())
        } else if user_agent.contains("iPad") || user_agent.contains("Tablet") {
            Some("tablet".to_string())
        } else {
            Some("desktop".to_string())
        };

        UaClassification {
            browser,
            browser_version: None,
            os,
            os_version: None,
            device_type,
            is_bot: false,
            bot_name: None,
            bot_intent: None,
        }
    }
}

/// Used when `MAXMIND_DB_PATH` is unset: every lookup returns an empty
/// location, which the geo cache still caches to suppress repeat calls.
#[derive(Debug, Default)]
pub struct NullGeoReader;

#[async_trait]
impl GeoReader for NullGeoReader {
    async fn lookup(&self, _ip: &str) -> GeoLocation {
        GeoLocation::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_line_parser_accepts_rfc3339_timestamp() {
        let line = br#"{"ts":"2025-01-01T00:00:00Z","host":"a","path":"/x","status":200,"size":100,"remote_ip":"1.2.3.4"}"#;
        let parsed = JsonLineParser.parse(line).unwrap();
        assert_eq!(parsed.host, "a");
        assert_eq!(parsed.status, 200);
        assert_eq!(parsed.bytes, 100);
    }

    #[test]
    fn json_line_parser_accepts_epoch_seconds() {
        let line = br#"{"ts":1735689600.5,"host":"a","path":"/x","status":200}"#;
        let parsed = JsonLineParser.parse(line).unwrap();
        assert_eq!(parsed.timestamp.timestamp(), 1735689600);
    }

    #[test]
    fn json_line_parser_rejects_missing_path() {
        let line = br#"{"ts":"2025-01-01T00:00:00Z","host":"a","path":"","status":200}"#;
        assert!(JsonLineParser.parse(line).is_err());
    }

    #[test]
    fn substring_classifier_flags_bot_user_agents() {
        let c = SubstringUaClassifier;
        let result = c.classify("Googlebot/2.1 (+http://www.google.com/bot.html)");
        assert!(result.is_bot);
    }

    #[test]
    fn substring_classifier_detects_common_browsers() {
        let c = SubstringUaClassifier;
        let result = c.classify("Mozilla/5.0 (Windows NT 10.0) Chrome/120.0 Safari/537.36");
        assert_eq!(result.browser, Some("Chrome".to_string()));
        assert_eq!(result.os, Some("Windows".to_string()));
        assert!(!result.is_bot);
    }

    #[tokio::test]
    async fn null_geo_reader_returns_empty_location() {
        let reader = NullGeoReader;
        let loc = reader.lookup("1.2.3.4").await;
        assert!(loc.country.is_none());
    }
}
