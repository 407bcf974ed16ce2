//! Gateway configuration and SSH compatibility constants.
//!
//! `GatewayConfig` is the single configuration surface consumed by the core:
//! pool sizing, timeouts, idle eviction, and the read-only command denylist.
//! All durations deserialize from whole seconds so the struct can be embedded
//! directly in a host application's own config file.
//!
//! The algorithm tables at the bottom mirror what legacy network devices
//! negotiate. Modern defaults frequently fail against older IOS/ASA images, so
//! the real SSH transport offers the broad compatibility set.

use std::time::Duration;

use russh::keys::{Algorithm, EcdsaCurve, HashAlg};
use russh::{cipher, compression, kex, mac};
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// Configuration consumed by the session pool, executor, and facade.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Maximum concurrent sessions per device. Must be at least 1.
    pub max_sessions_per_device: usize,

    /// Bound on SSH connect plus authentication.
    #[serde(with = "secs")]
    pub connect_timeout: Duration,

    /// Default bound on a single command's execution, overridable per request.
    #[serde(with = "secs")]
    pub command_timeout: Duration,

    /// How long `acquire` waits for a free session slot before failing
    /// with `PoolExhausted`.
    #[serde(with = "secs")]
    pub acquire_timeout: Duration,

    /// Idle time after which a pooled session is closed.
    #[serde(with = "secs")]
    pub idle_eviction: Duration,

    /// First-word verbs that mark a command as state-changing.
    pub denylisted_verbs: Vec<String>,

    /// Maximum raw-output length copied into an audit event.
    pub audit_excerpt_len: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_sessions_per_device: 2,
            connect_timeout: Duration::from_secs(15),
            command_timeout: Duration::from_secs(30),
            acquire_timeout: Duration::from_secs(10),
            idle_eviction: Duration::from_secs(5 * 60),
            denylisted_verbs: default_denylist(),
            audit_excerpt_len: 512,
        }
    }
}

impl GatewayConfig {
    /// Validates field ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.max_sessions_per_device == 0 {
            return Err(GatewayError::InvalidConfig(
                "max_sessions_per_device must be at least 1".to_string(),
            ));
        }
        if self.command_timeout.is_zero() || self.connect_timeout.is_zero() {
            return Err(GatewayError::InvalidConfig(
                "connect_timeout and command_timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_denylist() -> Vec<String> {
    [
        "configure", "config", "write", "reload", "clear", "copy", "delete", "erase", "debug",
        "no",
    ]
    .iter()
    .map(|v| v.to_string())
    .collect()
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(de)?))
    }
}

/// Key exchange algorithms in order of preference, legacy variants included.
pub const COMPAT_KEX_ORDER: &[kex::Name] = &[
    kex::CURVE25519,
    kex::CURVE25519_PRE_RFC_8731,
    kex::DH_GEX_SHA256,
    kex::DH_GEX_SHA1,
    kex::DH_G14_SHA256,
    kex::DH_G14_SHA1,
    kex::DH_G1_SHA1,
    kex::ECDH_SHA2_NISTP256,
    kex::ECDH_SHA2_NISTP384,
    kex::ECDH_SHA2_NISTP521,
];

/// Ciphers including CBC modes still common on older device images.
pub static COMPAT_CIPHERS: &[cipher::Name] = &[
    cipher::AES_256_GCM,
    cipher::CHACHA20_POLY1305,
    cipher::AES_128_CTR,
    cipher::AES_192_CTR,
    cipher::AES_256_CTR,
    cipher::AES_128_CBC,
    cipher::AES_192_CBC,
    cipher::AES_256_CBC,
];

/// MAC algorithms, standard and encrypt-then-MAC variants.
pub const COMPAT_MAC_ALGORITHMS: &[mac::Name] = &[
    mac::HMAC_SHA256_ETM,
    mac::HMAC_SHA512_ETM,
    mac::HMAC_SHA256,
    mac::HMAC_SHA512,
    mac::HMAC_SHA1_ETM,
    mac::HMAC_SHA1,
];

/// Compression preferences; legacy zlib kept for old devices.
pub const COMPAT_COMPRESSION_ALGORITHMS: &[compression::Name] = &[
    compression::NONE,
    compression::ZLIB,
    compression::ZLIB_LEGACY,
];

/// Host key algorithms, RSA/DSA retained for legacy devices.
pub const COMPAT_KEY_TYPES: &[Algorithm] = &[
    Algorithm::Ed25519,
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP256,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP384,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP521,
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha512),
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha256),
    },
    Algorithm::Rsa { hash: None },
    Algorithm::Dsa,
];

#[cfg(test)]
mod tests {
    use super::GatewayConfig;
    use std::time::Duration;

    #[test]
    fn defaults_are_valid() {
        let config = GatewayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_sessions_per_device, 2);
        assert!(config.denylisted_verbs.contains(&"configure".to_string()));
    }

    #[test]
    fn zero_sessions_per_device_is_rejected() {
        let config = GatewayConfig {
            max_sessions_per_device: 0,
            ..GatewayConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn durations_deserialize_from_seconds() {
        let config: GatewayConfig =
            serde_json::from_str(r#"{"command_timeout": 7, "max_sessions_per_device": 4}"#)
                .expect("config should deserialize");
        assert_eq!(config.command_timeout, Duration::from_secs(7));
        assert_eq!(config.max_sessions_per_device, 4);
        // Untouched fields fall back to defaults.
        assert_eq!(config.acquire_timeout, Duration::from_secs(10));
    }
}
