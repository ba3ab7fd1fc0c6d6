use std::sync::Arc;

use super::accounts::{AccountHandling, AccountsProxy};
use super::api::{ApiProxy, ApiQuerying};
use super::configuration::{AuthProxyConfiguration, ProxyConfiguration};
use super::devices::{DeviceHandling, DevicesProxy};
use crate::address_cache::AddressCache;
use crate::auth::{AccessTokenManager, RestAuthenticationProxy, DEFAULT_REFRESH_THRESHOLD};
use crate::transport::TransportProvider;

/// Builds API proxies that share one token manager
pub trait ProxyFactory: Send + Sync {
    fn configuration(&self) -> &AuthProxyConfiguration;

    fn create_api_proxy(&self) -> Arc<dyn ApiQuerying>;

    fn create_accounts_proxy(&self) -> Arc<dyn AccountHandling>;

    fn create_devices_proxy(&self) -> Arc<dyn DeviceHandling>;
}

pub struct RestProxyFactory {
    configuration: AuthProxyConfiguration,
}

impl RestProxyFactory {
    /// Wire one authentication proxy and token manager for all proxies
    pub fn make_proxy_factory(
        transport_provider: Arc<dyn TransportProvider>,
        address_cache: AddressCache,
    ) -> Self {
        Self::make_proxy_factory_with_threshold(
            transport_provider,
            address_cache,
            DEFAULT_REFRESH_THRESHOLD as u64,
        )
    }

    /// Same as `make_proxy_factory` with a token refresh threshold in seconds
    pub fn make_proxy_factory_with_threshold(
        transport_provider: Arc<dyn TransportProvider>,
        address_cache: AddressCache,
        refresh_threshold: u64,
    ) -> Self {
        let basic_configuration = ProxyConfiguration::new(transport_provider, address_cache);

        let authentication_proxy = RestAuthenticationProxy::new(basic_configuration.clone());
        let access_token_manager = AccessTokenManager::with_refresh_threshold(
            Arc::new(authentication_proxy),
            refresh_threshold,
        );

        Self::new(AuthProxyConfiguration::new(
            basic_configuration,
            Arc::new(access_token_manager),
        ))
    }

    pub fn new(configuration: AuthProxyConfiguration) -> Self {
        Self { configuration }
    }
}

impl ProxyFactory for RestProxyFactory {
    fn configuration(&self) -> &AuthProxyConfiguration {
        &self.configuration
    }

    fn create_api_proxy(&self) -> Arc<dyn ApiQuerying> {
        Arc::new(ApiProxy::new(self.configuration.clone()))
    }

    fn create_accounts_proxy(&self) -> Arc<dyn AccountHandling> {
        Arc::new(AccountsProxy::new(self.configuration.clone()))
    }

    fn create_devices_proxy(&self) -> Arc<dyn DeviceHandling> {
        Arc::new(DevicesProxy::new(self.configuration.clone()))
    }
}
