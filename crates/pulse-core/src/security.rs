use secrecy::{ExposeSecret, SecretString};

use crate::errors::ConfigError;
use crate::keys;

const REDACTED: &str = "********";

/// Wraps the device API key with secrecy protection (zeroized on drop, redacted in Debug).
#[derive(Clone)]
pub struct ApiKey(pub SecretString);

impl ApiKey {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(SecretString::from(raw.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiKey([REDACTED])")
    }
}

/// A device identity of the form `owner/device`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub owner: String,
    pub device: String,
}

impl DeviceIdentity {
    /// Split an identity into its two components. Anything other than exactly
    /// two non-empty `/`-separated parts is a configuration error.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let parts: Vec<&str> = raw.split('/').collect();
        match parts.as_slice() {
            [owner, device] if !owner.is_empty() && !device.is_empty() => Ok(Self {
                owner: (*owner).to_string(),
                device: (*device).to_string(),
            }),
            _ => Err(ConfigError::InvalidIdentity(raw.to_string())),
        }
    }
}

impl std::fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.device)
    }
}

/// Everything needed to reach the remote for one pass.
#[derive(Clone, Debug)]
pub struct Credentials {
    pub server: String,
    pub identity: DeviceIdentity,
    pub api_key: ApiKey,
}

/// Render a KV value for diagnostics, hiding values of private keys.
pub fn redact_value<'a>(key: &str, value: &'a str) -> &'a str {
    if keys::is_private(key) {
        REDACTED
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_debug_redacted() {
        let key = ApiKey::new("secret-12345");
        let debug = format!("{:?}", key);
        assert!(!debug.contains("secret"), "key leaked in debug: {debug}");
        assert!(debug.contains("REDACTED"));
        assert_eq!(key.expose(), "secret-12345");
    }

    #[test]
    fn identity_two_components() {
        let id = DeviceIdentity::parse("alice/phone").unwrap();
        assert_eq!(id.owner, "alice");
        assert_eq!(id.device, "phone");
        assert_eq!(id.to_string(), "alice/phone");
    }

    #[test]
    fn identity_malformed() {
        for raw in ["", "alice", "alice/", "/phone", "alice/phone/extra", "//"] {
            assert!(
                matches!(DeviceIdentity::parse(raw), Err(ConfigError::InvalidIdentity(_))),
                "accepted {raw:?}"
            );
        }
    }

    #[test]
    fn credentials_debug_hides_key() {
        let creds = Credentials {
            server: "http://localhost".into(),
            identity: DeviceIdentity::parse("a/b").unwrap(),
            api_key: ApiKey::new("hunter2"),
        };
        assert!(!format!("{creds:?}").contains("hunter2"));
    }

    #[test]
    fn redaction_by_prefix() {
        assert_eq!(redact_value(keys::API_KEY, "hunter2"), REDACTED);
        assert_eq!(redact_value(keys::SERVER, "http://x"), "http://x");
    }
}
