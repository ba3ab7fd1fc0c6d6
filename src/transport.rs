use async_trait::async_trait;
use reqwest::{Client, Method, Url};
use serde::de::DeserializeOwned;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::access_method::{AccessMethodConfiguration, ProxyCredentials, ProxyKind};
use crate::address_cache::ApiEndpoint;
use crate::error::{RestError, TransportError};

/// One API call, independent of how it travels
#[derive(Debug, Clone)]
pub struct RestRequest {
    pub method: Method,
    pub path: String,
    pub bearer: Option<String>,
    pub body: Option<serde_json::Value>,
}

impl RestRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            bearer: None,
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }
}

/// Raw API answer
#[derive(Debug, Clone)]
pub struct RestResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl RestResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decode a JSON body
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, RestError> {
        serde_json::from_slice(&self.body).map_err(|e| RestError::Decode(e.to_string()))
    }

    /// Turn a non-success answer into an error
    pub fn error_for_status(self) -> Result<Self, RestError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(RestError::Unhandled {
                status: self.status,
                message: self.text(),
            })
        }
    }
}

/// Append one caller supplied segment to an API path
///
/// The segment is percent-encoded so it can never address another endpoint.
pub fn path_with_segment(base: &str, segment: &str) -> Result<String, RestError> {
    if segment.is_empty() || segment == "." || segment == ".." {
        return Err(RestError::InvalidRequest(format!(
            "invalid path segment {:?}",
            segment
        )));
    }

    let mut url = Url::parse("http://api.invalid/")
        .map_err(|e| RestError::InvalidRequest(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| RestError::InvalidRequest("cannot build API path".to_string()))?
        .extend(base.split('/').filter(|s| !s.is_empty()))
        .push(segment);

    Ok(url.path().trim_start_matches('/').to_string())
}

/// Performs API calls over one particular route
#[async_trait]
pub trait RestTransport: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    async fn send(
        &self,
        endpoint: &ApiEndpoint,
        request: RestRequest,
    ) -> Result<RestResponse, TransportError>;
}

/// Supplies the transport regular API traffic should use right now
pub trait TransportProvider: Send + Sync {
    fn make_transport(&self) -> Result<Arc<dyn RestTransport>, TransportError>;
}

/// Builds a transport that routes through a given access method
pub trait AccessMethodTransportFactory: Send + Sync {
    fn make_transport(
        &self,
        method: &AccessMethodConfiguration,
    ) -> Result<Arc<dyn RestTransport>, TransportError>;
}

/// Timeouts applied to every HTTP transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpSettings {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// reqwest based transport, direct or through a SOCKS5 proxy
pub struct ReqwestTransport {
    name: String,
    proxy: Option<reqwest::Proxy>,
    settings: HttpSettings,

    /// Client bound to the last endpoint, rebuilt when the endpoint changes
    client: Mutex<Option<(ApiEndpoint, Client)>>,
}

impl ReqwestTransport {
    /// Connect straight to the API
    pub fn direct(settings: HttpSettings) -> Self {
        Self {
            name: "direct".to_string(),
            proxy: None,
            settings,
            client: Mutex::new(None),
        }
    }

    /// Route through a SOCKS5 proxy
    pub fn socks5(
        address: std::net::SocketAddr,
        credentials: Option<&ProxyCredentials>,
        settings: HttpSettings,
    ) -> Result<Self, TransportError> {
        let mut url = Url::parse(&format!("socks5://{}", address))
            .map_err(|e| TransportError::Protocol(format!("invalid proxy address: {}", e)))?;

        if let Some(ProxyCredentials::UsernamePassword { username, password }) = credentials {
            url.set_username(username)
                .and_then(|_| url.set_password(Some(password)))
                .map_err(|_| TransportError::Protocol("invalid proxy credentials".to_string()))?;
        }

        let proxy = reqwest::Proxy::all(url)?;

        Ok(Self {
            name: format!("socks5 {}", address),
            proxy: Some(proxy),
            settings,
            client: Mutex::new(None),
        })
    }

    fn client_for(&self, endpoint: &ApiEndpoint) -> Result<Client, TransportError> {
        let mut cached = match self.client.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some((bound, client)) = cached.as_ref() {
            if bound == endpoint {
                return Ok(client.clone());
            }
        }

        let mut builder = Client::builder()
            .connect_timeout(self.settings.connect_timeout)
            .timeout(self.settings.request_timeout)
            .resolve(&endpoint.host, endpoint.address);

        builder = match &self.proxy {
            Some(proxy) => builder.proxy(proxy.clone()),
            None => builder.no_proxy(),
        };

        let client = builder.build()?;
        *cached = Some((endpoint.clone(), client.clone()));
        Ok(client)
    }
}

#[async_trait]
impl RestTransport for ReqwestTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(
        &self,
        endpoint: &ApiEndpoint,
        request: RestRequest,
    ) -> Result<RestResponse, TransportError> {
        let client = self.client_for(endpoint)?;
        let url = endpoint.url(&request.path);

        tracing::debug!(
            transport = %self.name,
            method = %request.method,
            url = %url,
            "Sending API request"
        );

        let mut builder = client.request(request.method.clone(), &url);
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            // Categorize the error for better debugging
            let error_kind = if e.is_timeout() {
                "timeout"
            } else if e.is_connect() {
                "connection_failed"
            } else if e.is_request() {
                "request_error"
            } else {
                "unknown"
            };

            tracing::warn!(
                transport = %self.name,
                error_kind = error_kind,
                error = %e,
                url = %url,
                "API request error"
            );
            TransportError::from(e)
        })?;

        let status = response.status().as_u16();
        tracing::debug!(status = status, url = %url, "Received API response");

        let body = response.bytes().await?.to_vec();
        Ok(RestResponse { status, body })
    }
}

/// Builds reqwest transports for the access methods this client can route itself
pub struct ReqwestTransportFactory {
    settings: HttpSettings,
}

impl ReqwestTransportFactory {
    pub fn new(settings: HttpSettings) -> Self {
        Self { settings }
    }
}

impl AccessMethodTransportFactory for ReqwestTransportFactory {
    fn make_transport(
        &self,
        method: &AccessMethodConfiguration,
    ) -> Result<Arc<dyn RestTransport>, TransportError> {
        match method {
            AccessMethodConfiguration::Direct => {
                Ok(Arc::new(ReqwestTransport::direct(self.settings)))
            }
            AccessMethodConfiguration::Proxy(endpoint) => match endpoint.kind {
                ProxyKind::Socks5 => Ok(Arc::new(ReqwestTransport::socks5(
                    endpoint.socket_addr(),
                    endpoint.credentials.as_ref(),
                    self.settings,
                )?)),
                // Shadowsocks needs a local tunnel client
                ProxyKind::Shadowsocks(_) => Err(TransportError::Unsupported(
                    "shadowsocks proxies require a tunnel-side transport".to_string(),
                )),
            },
            AccessMethodConfiguration::Bridge => Err(TransportError::Unsupported(
                "bridges require a tunnel-side transport".to_string(),
            )),
        }
    }
}

/// Serves the transport for the currently selected access method
pub struct ReqwestTransportProvider {
    factory: Arc<dyn AccessMethodTransportFactory>,
    current: Mutex<(AccessMethodConfiguration, Option<Arc<dyn RestTransport>>)>,
}

impl ReqwestTransportProvider {
    pub fn new(factory: Arc<dyn AccessMethodTransportFactory>) -> Self {
        Self {
            factory,
            current: Mutex::new((AccessMethodConfiguration::Direct, None)),
        }
    }

    /// Switch API traffic to another access method
    pub fn set_access_method(&self, method: AccessMethodConfiguration) {
        let mut current = match self.current.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if current.0 != method {
            tracing::info!(method = ?method, "Switching API access method");
            *current = (method, None);
        }
    }

    pub fn access_method(&self) -> AccessMethodConfiguration {
        match self.current.lock() {
            Ok(guard) => guard.0.clone(),
            Err(poisoned) => poisoned.into_inner().0.clone(),
        }
    }
}

impl TransportProvider for ReqwestTransportProvider {
    fn make_transport(&self) -> Result<Arc<dyn RestTransport>, TransportError> {
        let mut current = match self.current.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(transport) = &current.1 {
            return Ok(Arc::clone(transport));
        }

        let transport = self.factory.make_transport(&current.0)?;
        current.1 = Some(Arc::clone(&transport));
        Ok(transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access_method::{ProxyEndpoint, ShadowsocksCipher};

    #[test]
    fn test_path_with_segment_encodes_separators() {
        assert_eq!(
            path_with_segment("accounts/v1/devices", "dev-1").unwrap(),
            "accounts/v1/devices/dev-1"
        );
        assert_eq!(
            path_with_segment("accounts/v1/devices", "../accounts/me").unwrap(),
            "accounts/v1/devices/..%2Faccounts%2Fme"
        );
        assert_eq!(
            path_with_segment("accounts/v1/devices", "a?b#c").unwrap(),
            "accounts/v1/devices/a%3Fb%23c"
        );
    }

    #[test]
    fn test_path_with_segment_rejects_dot_segments() {
        for segment in ["", ".", ".."] {
            assert!(matches!(
                path_with_segment("accounts/v1/devices", segment),
                Err(RestError::InvalidRequest(_))
            ));
        }
    }

    fn socks_config() -> AccessMethodConfiguration {
        AccessMethodConfiguration::Proxy(ProxyEndpoint {
            kind: ProxyKind::Socks5,
            host: "203.0.113.5".parse().unwrap(),
            port: 1080,
            credentials: Some(ProxyCredentials::UsernamePassword {
                username: "user name".to_string(),
                password: "p@ss".to_string(),
            }),
        })
    }

    #[test]
    fn test_factory_routes_supported_methods() {
        let factory = ReqwestTransportFactory::new(HttpSettings::default());

        let direct = factory
            .make_transport(&AccessMethodConfiguration::Direct)
            .unwrap();
        assert_eq!(direct.name(), "direct");

        let socks = factory.make_transport(&socks_config()).unwrap();
        assert_eq!(socks.name(), "socks5 203.0.113.5:1080");
    }

    #[test]
    fn test_factory_rejects_tunnel_methods() {
        let factory = ReqwestTransportFactory::new(HttpSettings::default());

        let shadowsocks = AccessMethodConfiguration::Proxy(ProxyEndpoint {
            kind: ProxyKind::Shadowsocks(ShadowsocksCipher::Aes256Gcm),
            host: "203.0.113.5".parse().unwrap(),
            port: 443,
            credentials: Some(ProxyCredentials::Password("secret".to_string())),
        });
        assert!(matches!(
            factory.make_transport(&shadowsocks),
            Err(TransportError::Unsupported(_))
        ));
        assert!(matches!(
            factory.make_transport(&AccessMethodConfiguration::Bridge),
            Err(TransportError::Unsupported(_))
        ));
    }

    #[test]
    fn test_provider_caches_until_method_changes() {
        let provider =
            ReqwestTransportProvider::new(Arc::new(ReqwestTransportFactory::new(HttpSettings::default())));

        let first = provider.make_transport().unwrap();
        let second = provider.make_transport().unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        provider.set_access_method(socks_config());
        let third = provider.make_transport().unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(provider.access_method(), socks_config());
    }

    #[test]
    fn test_response_helpers() {
        let ok = RestResponse {
            status: 200,
            body: br#"["10.0.0.1:443"]"#.to_vec(),
        };
        let addrs: Vec<std::net::SocketAddr> = ok.json().unwrap();
        assert_eq!(addrs.len(), 1);

        let err = RestResponse {
            status: 503,
            body: b"maintenance".to_vec(),
        }
        .error_for_status()
        .unwrap_err();
        assert_eq!(
            err,
            RestError::Unhandled {
                status: 503,
                message: "maintenance".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_direct_transport_against_local_server() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/app/v1/api-addrs")
            .match_header("authorization", "Bearer token-1")
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let address: std::net::SocketAddr = server.host_with_port().parse().unwrap();
        let endpoint = ApiEndpoint {
            host: address.ip().to_string(),
            address,
            tls: false,
        };

        let transport = ReqwestTransport::direct(HttpSettings::default());
        let response = transport
            .send(
                &endpoint,
                RestRequest::get("app/v1/api-addrs").with_bearer("token-1"),
            )
            .await
            .unwrap();

        assert!(response.is_success());
        assert_eq!(response.text(), "[]");
        mock.assert_async().await;
    }
}
