use async_trait::async_trait;
use std::net::SocketAddr;

use super::configuration::AuthProxyConfiguration;
use crate::error::Result;
use crate::transport::RestRequest;

pub(crate) const API_ADDRESSES_PATH: &str = "app/v1/api-addrs";

/// Unauthenticated API queries
#[async_trait]
pub trait ApiQuerying: Send + Sync {
    /// Addresses the API can currently be reached at
    async fn get_api_addresses(&self) -> Result<Vec<SocketAddr>>;
}

pub struct ApiProxy {
    configuration: AuthProxyConfiguration,
}

impl ApiProxy {
    pub fn new(configuration: AuthProxyConfiguration) -> Self {
        Self { configuration }
    }
}

#[async_trait]
impl ApiQuerying for ApiProxy {
    async fn get_api_addresses(&self) -> Result<Vec<SocketAddr>> {
        let response = self
            .configuration
            .proxy_configuration
            .send(RestRequest::get(API_ADDRESSES_PATH))
            .await?
            .error_for_status()?;

        response.json()
    }
}
