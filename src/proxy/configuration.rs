use std::sync::Arc;

use crate::address_cache::AddressCache;
use crate::auth::AccessTokenManager;
use crate::error::{RestError, TransportError};
use crate::transport::{RestRequest, RestResponse, TransportProvider};

/// Transport and address cache shared by every proxy of one session
#[derive(Clone)]
pub struct ProxyConfiguration {
    pub transport_provider: Arc<dyn TransportProvider>,
    pub address_cache: AddressCache,
}

impl ProxyConfiguration {
    pub fn new(transport_provider: Arc<dyn TransportProvider>, address_cache: AddressCache) -> Self {
        Self {
            transport_provider,
            address_cache,
        }
    }

    /// Send an unauthenticated request to the current API endpoint
    ///
    /// Connection failures move the address cache on to the next address.
    pub async fn send(&self, request: RestRequest) -> Result<RestResponse, RestError> {
        let transport = self.transport_provider.make_transport()?;
        let endpoint = self.address_cache.current_endpoint();

        match transport.send(&endpoint, request).await {
            Ok(response) => Ok(response),
            Err(e @ (TransportError::Connect(_) | TransportError::Timeout)) => {
                tracing::warn!(
                    transport = transport.name(),
                    address = %endpoint.address,
                    error = %e,
                    "API unreachable, trying next address on the next request"
                );
                self.address_cache.select_next();
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// `ProxyConfiguration` plus the token manager every authenticated proxy shares
#[derive(Clone)]
pub struct AuthProxyConfiguration {
    pub proxy_configuration: ProxyConfiguration,
    pub access_token_manager: Arc<AccessTokenManager>,
}

impl AuthProxyConfiguration {
    pub fn new(
        proxy_configuration: ProxyConfiguration,
        access_token_manager: Arc<AccessTokenManager>,
    ) -> Self {
        Self {
            proxy_configuration,
            access_token_manager,
        }
    }

    /// Send a request with a bearer token for `account_number`
    ///
    /// A 401 answer replaces the rejected token and retries once.
    pub async fn send_authorized(
        &self,
        account_number: &str,
        request: RestRequest,
    ) -> Result<RestResponse, RestError> {
        let token = self.access_token_manager.get_token(account_number).await?;
        let response = self
            .proxy_configuration
            .send(request.clone().with_bearer(token.value.clone()))
            .await?;

        if response.status != 401 {
            return Ok(response);
        }

        tracing::warn!(path = %request.path, "Received 401, refreshing token and retrying...");
        let token = self
            .access_token_manager
            .refresh_token(account_number, &token)
            .await?;

        self.proxy_configuration
            .send(request.with_bearer(token.value))
            .await
    }
}
