// Editable access method draft and its testing state machine

use std::net::IpAddr;
use uuid::Uuid;

use super::types::{
    AccessMethodConfiguration, PersistentAccessMethod, ProxyCredentials, ProxyEndpoint, ProxyKind,
    ShadowsocksCipher,
};
use crate::error::{FieldError, InvalidConfiguration};

/// Reachability test progress for one draft
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TestingStatus {
    /// No test has run, or the result is no longer shown
    #[default]
    Initial,
    InProgress,
    Succeeded,
    Failed,
}

/// Input to the testing state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestingEvent {
    Started,
    Finished { reachable: bool },
    Cancelled,
}

impl TestingStatus {
    /// Next status after `event`, or `None` when the event does not apply
    ///
    /// A result only lands on a test that is still in progress; cancellation
    /// always returns to `Initial`.
    pub fn next(self, event: TestingEvent) -> Option<TestingStatus> {
        match (self, event) {
            (_, TestingEvent::Started) => Some(TestingStatus::InProgress),
            (TestingStatus::InProgress, TestingEvent::Finished { reachable: true }) => {
                Some(TestingStatus::Succeeded)
            }
            (TestingStatus::InProgress, TestingEvent::Finished { reachable: false }) => {
                Some(TestingStatus::Failed)
            }
            (_, TestingEvent::Finished { .. }) => None,
            (_, TestingEvent::Cancelled) => Some(TestingStatus::Initial),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TestingStatus::Succeeded | TestingStatus::Failed)
    }
}

/// Which kind of access method the draft describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMethodKind {
    Direct,
    Bridges,
    #[default]
    Socks5,
    Shadowsocks,
}

/// SOCKS5 fields as typed by the user
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SocksDraft {
    pub server: String,
    pub port: String,
    pub authenticate: bool,
    pub username: String,
    pub password: String,
}

/// Shadowsocks fields as typed by the user
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ShadowsocksDraft {
    pub server: String,
    pub port: String,
    pub password: String,
    pub cipher: ShadowsocksCipher,
}

/// In-memory, possibly invalid edit of one access method
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessMethodViewModel {
    pub id: Uuid,
    pub name: String,
    pub is_enabled: bool,
    pub method: AccessMethodKind,
    pub socks: SocksDraft,
    pub shadowsocks: ShadowsocksDraft,
    pub testing_status: TestingStatus,
}

impl Default for AccessMethodViewModel {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4(),
            name: String::new(),
            is_enabled: true,
            method: AccessMethodKind::default(),
            socks: SocksDraft::default(),
            shadowsocks: ShadowsocksDraft::default(),
            testing_status: TestingStatus::Initial,
        }
    }
}

impl AccessMethodViewModel {
    /// Fresh draft with a generated id that no repository knows yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Draft for editing an already persisted access method
    pub fn from_persistent(method: &PersistentAccessMethod) -> Self {
        let mut draft = Self {
            id: method.id,
            name: method.name.clone(),
            is_enabled: method.is_enabled,
            ..Self::default()
        };

        match &method.configuration {
            AccessMethodConfiguration::Direct => draft.method = AccessMethodKind::Direct,
            AccessMethodConfiguration::Bridge => draft.method = AccessMethodKind::Bridges,
            AccessMethodConfiguration::Proxy(endpoint) => match endpoint.kind {
                ProxyKind::Socks5 => {
                    draft.method = AccessMethodKind::Socks5;
                    draft.socks.server = endpoint.host.to_string();
                    draft.socks.port = endpoint.port.to_string();
                    if let Some(ProxyCredentials::UsernamePassword { username, password }) =
                        &endpoint.credentials
                    {
                        draft.socks.authenticate = true;
                        draft.socks.username = username.clone();
                        draft.socks.password = password.clone();
                    }
                }
                ProxyKind::Shadowsocks(cipher) => {
                    draft.method = AccessMethodKind::Shadowsocks;
                    draft.shadowsocks.server = endpoint.host.to_string();
                    draft.shadowsocks.port = endpoint.port.to_string();
                    draft.shadowsocks.cipher = cipher;
                    if let Some(ProxyCredentials::Password(password)) = &endpoint.credentials {
                        draft.shadowsocks.password = password.clone();
                    }
                }
            },
        }

        draft
    }

    /// Validate the draft and build the configuration a tester can probe
    pub fn into_persistent_proxy_configuration(
        &self,
    ) -> Result<AccessMethodConfiguration, InvalidConfiguration> {
        match self.method {
            AccessMethodKind::Direct => Ok(AccessMethodConfiguration::Direct),
            AccessMethodKind::Bridges => Ok(AccessMethodConfiguration::Bridge),
            AccessMethodKind::Socks5 => self.socks_endpoint().map(AccessMethodConfiguration::Proxy),
            AccessMethodKind::Shadowsocks => self
                .shadowsocks_endpoint()
                .map(AccessMethodConfiguration::Proxy),
        }
    }

    /// Validate the draft and build the record a repository stores
    pub fn into_persistent_access_method(
        &self,
    ) -> Result<PersistentAccessMethod, InvalidConfiguration> {
        let configuration = self.into_persistent_proxy_configuration()?;

        Ok(PersistentAccessMethod {
            id: self.id,
            name: self.name.trim().to_string(),
            is_enabled: self.is_enabled,
            configuration,
        })
    }

    fn socks_endpoint(&self) -> Result<ProxyEndpoint, InvalidConfiguration> {
        let mut errors = Vec::new();
        let host = parse_host(&self.socks.server, &mut errors);
        let port = parse_port(&self.socks.port, &mut errors);

        let credentials = if self.socks.authenticate {
            if self.socks.username.is_empty() {
                errors.push(FieldError::EmptyUsername);
            }
            if self.socks.password.is_empty() {
                errors.push(FieldError::EmptyPassword);
            }
            Some(ProxyCredentials::UsernamePassword {
                username: self.socks.username.clone(),
                password: self.socks.password.clone(),
            })
        } else {
            None
        };

        match (host, port) {
            (Some(host), Some(port)) if errors.is_empty() => Ok(ProxyEndpoint {
                kind: ProxyKind::Socks5,
                host,
                port,
                credentials,
            }),
            _ => Err(InvalidConfiguration(errors)),
        }
    }

    fn shadowsocks_endpoint(&self) -> Result<ProxyEndpoint, InvalidConfiguration> {
        let mut errors = Vec::new();
        let host = parse_host(&self.shadowsocks.server, &mut errors);
        let port = parse_port(&self.shadowsocks.port, &mut errors);

        match (host, port) {
            (Some(host), Some(port)) if errors.is_empty() => Ok(ProxyEndpoint {
                kind: ProxyKind::Shadowsocks(self.shadowsocks.cipher),
                host,
                port,
                credentials: Some(ProxyCredentials::Password(
                    self.shadowsocks.password.clone(),
                )),
            }),
            _ => Err(InvalidConfiguration(errors)),
        }
    }
}

fn parse_host(input: &str, errors: &mut Vec<FieldError>) -> Option<IpAddr> {
    let input = input.trim();
    if input.is_empty() {
        errors.push(FieldError::EmptyHost);
        return None;
    }
    match input.parse() {
        Ok(addr) => Some(addr),
        Err(_) => {
            errors.push(FieldError::InvalidHost(input.to_string()));
            None
        }
    }
}

fn parse_port(input: &str, errors: &mut Vec<FieldError>) -> Option<u16> {
    let input = input.trim();
    if input.is_empty() {
        errors.push(FieldError::EmptyPort);
        return None;
    }
    match input.parse::<u16>() {
        Ok(port) if port > 0 => Some(port),
        _ => {
            errors.push(FieldError::InvalidPort(input.to_string()));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn socks_draft(server: &str, port: &str) -> AccessMethodViewModel {
        AccessMethodViewModel {
            name: "Office proxy".to_string(),
            method: AccessMethodKind::Socks5,
            socks: SocksDraft {
                server: server.to_string(),
                port: port.to_string(),
                ..SocksDraft::default()
            },
            ..AccessMethodViewModel::new()
        }
    }

    #[test]
    fn test_socks_draft_converts() {
        let draft = socks_draft("203.0.113.5", "1080");
        let method = draft.into_persistent_access_method().unwrap();

        assert_eq!(method.id, draft.id);
        assert_eq!(method.name, "Office proxy");
        assert_eq!(
            method.configuration,
            AccessMethodConfiguration::Proxy(ProxyEndpoint {
                kind: ProxyKind::Socks5,
                host: "203.0.113.5".parse().unwrap(),
                port: 1080,
                credentials: None,
            })
        );
    }

    #[test]
    fn test_empty_host_is_rejected() {
        let err = socks_draft("", "1080")
            .into_persistent_access_method()
            .unwrap_err();
        assert_eq!(err.fields(), &[FieldError::EmptyHost]);
    }

    #[test]
    fn test_all_field_errors_are_collected() {
        let mut draft = socks_draft("proxy.example", "70000");
        draft.socks.authenticate = true;

        let err = draft.into_persistent_proxy_configuration().unwrap_err();
        assert_eq!(
            err.fields(),
            &[
                FieldError::InvalidHost("proxy.example".to_string()),
                FieldError::InvalidPort("70000".to_string()),
                FieldError::EmptyUsername,
                FieldError::EmptyPassword,
            ]
        );
    }

    #[test]
    fn test_port_zero_is_rejected() {
        let err = socks_draft("10.0.0.1", "0")
            .into_persistent_proxy_configuration()
            .unwrap_err();
        assert_eq!(err.fields(), &[FieldError::InvalidPort("0".to_string())]);
    }

    #[test]
    fn test_builtin_kinds_always_convert() {
        let mut draft = AccessMethodViewModel::new();
        draft.method = AccessMethodKind::Direct;
        assert_eq!(
            draft.into_persistent_proxy_configuration(),
            Ok(AccessMethodConfiguration::Direct)
        );

        draft.method = AccessMethodKind::Bridges;
        assert_eq!(
            draft.into_persistent_proxy_configuration(),
            Ok(AccessMethodConfiguration::Bridge)
        );
    }

    #[test]
    fn test_persistent_round_trip_keeps_draft_fields() {
        let draft = AccessMethodViewModel {
            name: "Home".to_string(),
            method: AccessMethodKind::Shadowsocks,
            shadowsocks: ShadowsocksDraft {
                server: "2001:db8::1".to_string(),
                port: "443".to_string(),
                password: "secret".to_string(),
                cipher: ShadowsocksCipher::Aes256Gcm,
            },
            ..AccessMethodViewModel::new()
        };

        let method = draft.into_persistent_access_method().unwrap();
        let restored = AccessMethodViewModel::from_persistent(&method);
        assert_eq!(restored, draft);
    }

    #[test]
    fn test_result_only_lands_on_running_test() {
        let status = TestingStatus::Initial;
        assert_eq!(status.next(TestingEvent::Finished { reachable: true }), None);

        let status = status.next(TestingEvent::Started).unwrap();
        assert_eq!(status, TestingStatus::InProgress);
        assert_eq!(
            status.next(TestingEvent::Finished { reachable: false }),
            Some(TestingStatus::Failed)
        );
        assert_eq!(
            status.next(TestingEvent::Cancelled),
            Some(TestingStatus::Initial)
        );
        assert_eq!(
            TestingStatus::Succeeded.next(TestingEvent::Finished { reachable: false }),
            None
        );
    }
}
