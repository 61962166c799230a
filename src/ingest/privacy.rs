//! IP privacy transforms applied after enrichment, before insert (§4.3
//! step 5). Geo lookups always see the raw IP; only the stored value is
//! transformed.

use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Default)]
pub struct PrivacyConfig {
    pub hash_ips: bool,
    pub hash_salt: String,
    pub anonymize_last_octet: bool,
}

/// Applies the configured transforms in order: hash first (if enabled),
/// then last-octet anonymization (if enabled). In practice operators
/// enable exactly one; both can be composed if both flags are set.
pub fn apply(ip: &str, config: &PrivacyConfig) -> String {
    let mut ip = ip.to_string();
    if config.hash_ips {
        ip = hash_ip(&ip, &config.hash_salt);
    }
    if config.anonymize_last_octet {
        ip = anonymize_last_octet(&ip);
    }
    ip
}

/// Salted SHA-256, truncated to a 16-hex-character prefix so stored IPs
/// stay compact while remaining consistent across requests from the same
/// client (same salt, same input -> same output).
fn hash_ip(ip: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(ip.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..8])
}

fn anonymize_last_octet(ip: &str) -> String {
    if ip.contains('.') {
        let mut parts: Vec<&str> = ip.split('.').collect();
        if parts.len() == 4 {
            parts[3] = "0";
            return parts.join(".");
        }
        ip.to_string()
    } else if ip.contains(':') {
        let mut parts: Vec<&str> = ip.split(':').collect();
        if let Some(last) = parts.last_mut() {
            *last = "0";
        }
        parts.join(":")
    } else {
        ip.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashing_is_deterministic_for_same_salt() {
        let config = PrivacyConfig {
            hash_ips: true,
            hash_salt: "pepper".to_string(),
            anonymize_last_octet: false,
        };
        let a = apply("1.2.3.4", &config);
        let b = apply("1.2.3.4", &config);
        assert_eq!(a, b);
        assert_ne!(a, "1.2.3.4");
    }

    #[test]
    fn anonymize_zeroes_last_ipv4_octet() {
        let config = PrivacyConfig {
            hash_ips: false,
            hash_salt: String::new(),
            anonymize_last_octet: true,
        };
        assert_eq!(apply("1.2.3.4", &config), "1.2.3.0");
    }

    #[test]
    fn anonymize_zeroes_last_ipv6_hextet() {
        let config = PrivacyConfig {
            hash_ips: false,
            hash_salt: String::new(),
            anonymize_last_octet: true,
        };
        assert_eq!(apply("2001:db8::1", &config), "2001:db8::0");
    }

    #[test]
    fn no_transforms_returns_ip_unchanged() {
        let config = PrivacyConfig::default();
        assert_eq!(apply("1.2.3.4", &config), "1.2.3.4");
    }
}
