//! Startup configuration.
//!
//! A [`Settings`] draft is validated exactly once into an immutable [`Config`].
//! Key material is checked here so that a misconfigured deployment never
//! reaches its first request.

use std::str::FromStr;
use std::time::Duration;

use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use tracing::{event, Level};

use crate::util::crypto::ENCRYPTION_KEY_LEN;
use crate::util::random::random_bytes;

/// HS512 wants at least as many key bits as digest bits.
pub const MIN_SIGNING_KEY_LEN: usize = 64;
pub const MAX_CACHE_TIMEOUT: Duration = Duration::from_millis(200);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is not configured")]
    MissingKey(&'static str),
    #[error("{name} must be at least {required} bytes, got {actual}")]
    KeyTooShort {
        name: &'static str,
        required: usize,
        actual: usize,
    },
    #[error("{name} must be exactly {required} bytes, got {actual}")]
    KeyLength {
        name: &'static str,
        required: usize,
        actual: usize,
    },
    #[error("{name} is not valid base64")]
    KeyEncoding { name: &'static str },
    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Production,
    Test,
}

impl FromStr for Profile {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::InvalidValue {
                name: "KAGI_PROFILE",
                value: other.to_string(),
            }),
        }
    }
}

/// Unvalidated configuration draft.
#[derive(Clone)]
pub struct Settings {
    pub profile: Profile,
    pub database_url: Option<String>,
    pub signing_key: Option<Vec<u8>>,
    pub encryption_key: Option<Vec<u8>>,
    pub client_secret_pepper: Option<Vec<u8>>,
    pub access_ttl_secs: u64,
    pub refresh_ttl_secs: u64,
    pub max_devices: usize,
    pub cache_ttl_ceiling_secs: u64,
    pub cache_timeout: Duration,
    pub retention_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            profile: Profile::Production,
            database_url: None,
            signing_key: None,
            encryption_key: None,
            client_secret_pepper: None,
            access_ttl_secs: 900,
            refresh_ttl_secs: 604_800,
            max_devices: 5,
            cache_ttl_ceiling_secs: 86_400,
            cache_timeout: Duration::from_millis(150),
            retention_secs: 30 * 86_400,
            sweep_interval_secs: 3600,
        }
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("profile", &self.profile)
            .field("access_ttl_secs", &self.access_ttl_secs)
            .field("refresh_ttl_secs", &self.refresh_ttl_secs)
            .field("max_devices", &self.max_devices)
            .finish()
    }
}

impl Settings {
    pub fn test() -> Self {
        Self {
            profile: Profile::Test,
            ..Default::default()
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let mut settings = Settings::default();

        if let Some(profile) = var("KAGI_PROFILE") {
            settings.profile = profile.parse()?;
        }
        settings.database_url = var("DATABASE_URL");
        settings.signing_key = var("KAGI_SIGNING_KEY")
            .map(|k| decode_key("KAGI_SIGNING_KEY", &k))
            .transpose()?;
        settings.encryption_key = var("KAGI_ENCRYPTION_KEY")
            .map(|k| decode_key("KAGI_ENCRYPTION_KEY", &k))
            .transpose()?;
        settings.client_secret_pepper = var("KAGI_CLIENT_SECRET_PEPPER").map(String::into_bytes);

        if let Some(v) = parsed("KAGI_ACCESS_TTL")? {
            settings.access_ttl_secs = v;
        }
        if let Some(v) = parsed("KAGI_REFRESH_TTL")? {
            settings.refresh_ttl_secs = v;
        }
        if let Some(v) = parsed("KAGI_MAX_DEVICES")? {
            settings.max_devices = v;
        }
        if let Some(v) = parsed("KAGI_CACHE_TTL_CEILING")? {
            settings.cache_ttl_ceiling_secs = v;
        }
        if let Some(v) = parsed("KAGI_CACHE_TIMEOUT_MS")? {
            settings.cache_timeout = Duration::from_millis(v);
        }
        if let Some(v) = parsed("KAGI_RETENTION_SECS")? {
            settings.retention_secs = v;
        }
        if let Some(v) = parsed("KAGI_SWEEP_INTERVAL_SECS")? {
            settings.sweep_interval_secs = v;
        }

        Ok(settings)
    }
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parsed<T: FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    var(name)
        .map(|v| {
            v.parse::<T>()
                .map_err(|_| ConfigError::InvalidValue { name, value: v })
        })
        .transpose()
}

pub fn decode_key(name: &'static str, encoded: &str) -> Result<Vec<u8>, ConfigError> {
    let encoded = encoded.trim();
    URL_SAFE_NO_PAD
        .decode(encoded)
        .or_else(|_| URL_SAFE.decode(encoded))
        .or_else(|_| STANDARD.decode(encoded))
        .map_err(|_| ConfigError::KeyEncoding { name })
}

/// Validated, immutable configuration.
#[derive(Clone)]
pub struct Config {
    profile: Profile,
    database_url: Option<String>,
    signing_key: Vec<u8>,
    encryption_key: Vec<u8>,
    client_secret_pepper: Vec<u8>,
    access_ttl_secs: u64,
    refresh_ttl_secs: u64,
    max_devices: usize,
    cache_ttl_ceiling_secs: u64,
    cache_timeout: Duration,
    retention_secs: u64,
    sweep_interval_secs: u64,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("profile", &self.profile)
            .field("access_ttl_secs", &self.access_ttl_secs)
            .field("refresh_ttl_secs", &self.refresh_ttl_secs)
            .field("max_devices", &self.max_devices)
            .field("cache_ttl_ceiling_secs", &self.cache_ttl_ceiling_secs)
            .field("cache_timeout", &self.cache_timeout)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_settings(Settings::from_env()?)
    }

    pub fn from_settings(settings: Settings) -> Result<Self, ConfigError> {
        let profile = settings.profile;

        let signing_key = key_or_ephemeral(
            profile,
            "KAGI_SIGNING_KEY",
            settings.signing_key,
            MIN_SIGNING_KEY_LEN,
        )?;
        if signing_key.len() < MIN_SIGNING_KEY_LEN {
            return Err(ConfigError::KeyTooShort {
                name: "KAGI_SIGNING_KEY",
                required: MIN_SIGNING_KEY_LEN,
                actual: signing_key.len(),
            });
        }

        let encryption_key = key_or_ephemeral(
            profile,
            "KAGI_ENCRYPTION_KEY",
            settings.encryption_key,
            ENCRYPTION_KEY_LEN,
        )?;
        if encryption_key.len() != ENCRYPTION_KEY_LEN {
            return Err(ConfigError::KeyLength {
                name: "KAGI_ENCRYPTION_KEY",
                required: ENCRYPTION_KEY_LEN,
                actual: encryption_key.len(),
            });
        }

        let non_zero = |name: &'static str, v: u64| {
            if v == 0 {
                Err(ConfigError::InvalidValue {
                    name,
                    value: v.to_string(),
                })
            } else {
                Ok(v)
            }
        };
        let access_ttl_secs = non_zero("KAGI_ACCESS_TTL", settings.access_ttl_secs)?;
        let refresh_ttl_secs = non_zero("KAGI_REFRESH_TTL", settings.refresh_ttl_secs)?;
        let cache_ttl_ceiling_secs =
            non_zero("KAGI_CACHE_TTL_CEILING", settings.cache_ttl_ceiling_secs)?;
        let sweep_interval_secs =
            non_zero("KAGI_SWEEP_INTERVAL_SECS", settings.sweep_interval_secs)?;
        let max_devices = non_zero("KAGI_MAX_DEVICES", settings.max_devices as u64)? as usize;

        if settings.cache_timeout.is_zero() || settings.cache_timeout > MAX_CACHE_TIMEOUT {
            return Err(ConfigError::InvalidValue {
                name: "KAGI_CACHE_TIMEOUT_MS",
                value: settings.cache_timeout.as_millis().to_string(),
            });
        }

        Ok(Self {
            profile,
            database_url: settings.database_url,
            signing_key,
            client_secret_pepper: settings
                .client_secret_pepper
                .unwrap_or_else(|| encryption_key.clone()),
            encryption_key,
            access_ttl_secs,
            refresh_ttl_secs,
            max_devices,
            cache_ttl_ceiling_secs,
            cache_timeout: settings.cache_timeout,
            retention_secs: settings.retention_secs,
            sweep_interval_secs,
        })
    }

    pub fn profile(&self) -> Profile {
        self.profile
    }

    pub fn database_url(&self) -> Option<&str> {
        self.database_url.as_deref()
    }

    pub fn signing_key(&self) -> &[u8] {
        &self.signing_key
    }

    pub fn encryption_key(&self) -> &[u8] {
        &self.encryption_key
    }

    pub fn client_secret_pepper(&self) -> &[u8] {
        &self.client_secret_pepper
    }

    pub fn access_ttl_secs(&self) -> u64 {
        self.access_ttl_secs
    }

    pub fn refresh_ttl_secs(&self) -> u64 {
        self.refresh_ttl_secs
    }

    pub fn max_devices(&self) -> usize {
        self.max_devices
    }

    pub fn cache_ttl_ceiling_secs(&self) -> u64 {
        self.cache_ttl_ceiling_secs
    }

    pub fn cache_timeout(&self) -> Duration {
        self.cache_timeout
    }

    pub fn retention_secs(&self) -> u64 {
        self.retention_secs
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn key_or_ephemeral(
    profile: Profile,
    name: &'static str,
    key: Option<Vec<u8>>,
    len: usize,
) -> Result<Vec<u8>, ConfigError> {
    match (key, profile) {
        (Some(key), _) => Ok(key),
        (None, Profile::Test) => {
            event!(
                Level::WARN,
                key = name,
                "!!! NO KEY CONFIGURED: GENERATING AN EPHEMERAL KEY. TOKENS WILL NOT SURVIVE A RESTART. NEVER USE THE TEST PROFILE IN PRODUCTION !!!"
            );
            Ok(random_bytes(len))
        }
        (None, Profile::Production) => Err(ConfigError::MissingKey(name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyed() -> Settings {
        Settings {
            signing_key: Some(vec![1u8; 64]),
            encryption_key: Some(vec![2u8; 32]),
            ..Default::default()
        }
    }

    #[test]
    fn production_requires_keys() {
        let err = Config::from_settings(Settings::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey("KAGI_SIGNING_KEY")));

        let err = Config::from_settings(Settings {
            signing_key: Some(vec![1u8; 64]),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey("KAGI_ENCRYPTION_KEY")));
    }

    #[test]
    fn test_profile_generates_ephemeral_keys() {
        let config = Config::from_settings(Settings::test()).unwrap();
        assert_eq!(config.signing_key().len(), MIN_SIGNING_KEY_LEN);
        assert_eq!(config.encryption_key().len(), ENCRYPTION_KEY_LEN);
    }

    #[test]
    fn undersized_signing_key_is_fatal() {
        let err = Config::from_settings(Settings {
            signing_key: Some(vec![1u8; 32]),
            ..keyed()
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::KeyTooShort { actual: 32, .. }));
    }

    #[test]
    fn encryption_key_must_be_32_bytes() {
        let err = Config::from_settings(Settings {
            encryption_key: Some(vec![2u8; 31]),
            ..keyed()
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::KeyLength { actual: 31, .. }));
    }

    #[test]
    fn cache_timeout_is_bounded() {
        let err = Config::from_settings(Settings {
            cache_timeout: Duration::from_millis(500),
            ..keyed()
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { name: "KAGI_CACHE_TIMEOUT_MS", .. }));
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::from_settings(keyed()).unwrap();
        assert_eq!(config.access_ttl_secs(), 900);
        assert_eq!(config.refresh_ttl_secs(), 604_800);
        assert_eq!(config.max_devices(), 5);
        assert_eq!(config.profile(), Profile::Production);
    }

    #[test]
    fn decodes_keys_in_either_alphabet() {
        let raw = vec![0xfbu8; 48];
        let url = URL_SAFE_NO_PAD.encode(&raw);
        let std = STANDARD.encode(&raw);
        assert_eq!(decode_key("K", &url).unwrap(), raw);
        assert_eq!(decode_key("K", &std).unwrap(), raw);
        assert!(decode_key("K", "***").is_err());
    }
}
