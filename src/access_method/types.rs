// Access method types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use uuid::Uuid;

/// Stable id of the built-in direct access method
pub const DIRECT_METHOD_ID: Uuid = Uuid::from_u128(0xc9db7457_2a55_42c3_a926_c07f82131994);

/// Stable id of the built-in bridges access method
pub const BRIDGES_METHOD_ID: Uuid = Uuid::from_u128(0x8586e75a_ca7b_4432_b70d_ee65f3f95084);

/// One way of reaching the API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum AccessMethodConfiguration {
    /// Connect to the API without any intermediary
    Direct,

    /// Route API traffic through one of the VPN bridges
    Bridge,

    /// Route API traffic through a user supplied proxy
    Proxy(ProxyEndpoint),
}

impl AccessMethodConfiguration {
    pub fn is_builtin(&self) -> bool {
        !matches!(self, AccessMethodConfiguration::Proxy(_))
    }
}

/// Custom proxy server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyEndpoint {
    pub kind: ProxyKind,
    pub host: IpAddr,
    pub port: u16,
    pub credentials: Option<ProxyCredentials>,
}

impl ProxyEndpoint {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

/// Proxy protocol spoken by a custom proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyKind {
    Socks5,
    Shadowsocks(ShadowsocksCipher),
}

/// Credentials presented to a custom proxy
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyCredentials {
    /// SOCKS5 username/password authentication
    UsernamePassword { username: String, password: String },

    /// Shadowsocks shared secret
    Password(String),
}

impl fmt::Debug for ProxyCredentials {
    // Never print secrets
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyCredentials::UsernamePassword { username, .. } => f
                .debug_struct("UsernamePassword")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            ProxyCredentials::Password(_) => f.write_str("Password(<redacted>)"),
        }
    }
}

/// Ciphers accepted for Shadowsocks proxies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ShadowsocksCipher {
    #[serde(rename = "aes-128-gcm")]
    Aes128Gcm,
    #[serde(rename = "aes-256-gcm")]
    Aes256Gcm,
    #[default]
    #[serde(rename = "chacha20-ietf-poly1305")]
    Chacha20IetfPoly1305,
    #[serde(rename = "xchacha20-ietf-poly1305")]
    Xchacha20IetfPoly1305,
}

impl ShadowsocksCipher {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShadowsocksCipher::Aes128Gcm => "aes-128-gcm",
            ShadowsocksCipher::Aes256Gcm => "aes-256-gcm",
            ShadowsocksCipher::Chacha20IetfPoly1305 => "chacha20-ietf-poly1305",
            ShadowsocksCipher::Xchacha20IetfPoly1305 => "xchacha20-ietf-poly1305",
        }
    }

    /// Parse a cipher name, case-insensitive
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "aes-128-gcm" => Some(ShadowsocksCipher::Aes128Gcm),
            "aes-256-gcm" => Some(ShadowsocksCipher::Aes256Gcm),
            "chacha20-ietf-poly1305" => Some(ShadowsocksCipher::Chacha20IetfPoly1305),
            "xchacha20-ietf-poly1305" => Some(ShadowsocksCipher::Xchacha20IetfPoly1305),
            _ => None,
        }
    }
}

/// Access method as stored by a repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentAccessMethod {
    pub id: Uuid,
    pub name: String,
    pub is_enabled: bool,
    pub configuration: AccessMethodConfiguration,
}

impl PersistentAccessMethod {
    /// Access methods every installation starts with
    pub fn defaults() -> Vec<PersistentAccessMethod> {
        vec![
            PersistentAccessMethod {
                id: DIRECT_METHOD_ID,
                name: "Direct".to_string(),
                is_enabled: true,
                configuration: AccessMethodConfiguration::Direct,
            },
            PersistentAccessMethod {
                id: BRIDGES_METHOD_ID,
                name: "Mullvad bridges".to_string(),
                is_enabled: true,
                configuration: AccessMethodConfiguration::Bridge,
            },
        ]
    }

    /// Built-in methods may be toggled but never removed
    pub fn is_builtin_id(id: &Uuid) -> bool {
        *id == DIRECT_METHOD_ID || *id == BRIDGES_METHOD_ID
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_json_shape() {
        let config = AccessMethodConfiguration::Proxy(ProxyEndpoint {
            kind: ProxyKind::Socks5,
            host: "203.0.113.5".parse().unwrap(),
            port: 1080,
            credentials: None,
        });

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["type"], "proxy");
        assert_eq!(json["kind"], "socks5");
        assert_eq!(json["host"], "203.0.113.5");
        assert_eq!(json["port"], 1080);

        let direct = serde_json::to_value(AccessMethodConfiguration::Direct).unwrap();
        assert_eq!(direct["type"], "direct");
    }

    #[test]
    fn test_credentials_debug_is_redacted() {
        let creds = ProxyCredentials::UsernamePassword {
            username: "alice".to_string(),
            password: "hunter2".to_string(),
        };
        let printed = format!("{:?}", creds);
        assert!(printed.contains("alice"));
        assert!(!printed.contains("hunter2"));

        let printed = format!("{:?}", ProxyCredentials::Password("s3cret".to_string()));
        assert!(!printed.contains("s3cret"));
    }

    #[test]
    fn test_parse_cipher_case_insensitive() {
        assert_eq!(
            ShadowsocksCipher::parse("AES-256-GCM"),
            Some(ShadowsocksCipher::Aes256Gcm)
        );
        assert_eq!(ShadowsocksCipher::parse("rc4"), None);
        assert_eq!(
            ShadowsocksCipher::parse(ShadowsocksCipher::default().as_str()),
            Some(ShadowsocksCipher::Chacha20IetfPoly1305)
        );
    }

    #[test]
    fn test_cipher_json_name_matches_as_str() {
        for cipher in [
            ShadowsocksCipher::Aes128Gcm,
            ShadowsocksCipher::Aes256Gcm,
            ShadowsocksCipher::Chacha20IetfPoly1305,
            ShadowsocksCipher::Xchacha20IetfPoly1305,
        ] {
            let json = serde_json::to_string(&cipher).unwrap();
            assert_eq!(json, format!("\"{}\"", cipher.as_str()));
            assert_eq!(
                serde_json::from_str::<ShadowsocksCipher>(&json).unwrap(),
                cipher
            );
        }
    }

    #[test]
    fn test_builtin_ids() {
        let defaults = PersistentAccessMethod::defaults();
        assert_eq!(defaults.len(), 2);
        assert!(defaults
            .iter()
            .all(|m| PersistentAccessMethod::is_builtin_id(&m.id)));
        assert!(!PersistentAccessMethod::is_builtin_id(&Uuid::new_v4()));
    }
}
