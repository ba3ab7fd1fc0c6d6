use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::configuration::AuthProxyConfiguration;
use crate::error::Result;
use crate::transport::RestRequest;

/// Account as reported by the API
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AccountData {
    pub id: String,
    pub expiry: DateTime<Utc>,
}

/// Freshly created account
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewAccountData {
    pub id: String,
    pub expiry: DateTime<Utc>,
    pub number: String,
}

#[async_trait]
pub trait AccountHandling: Send + Sync {
    async fn create_account(&self) -> Result<NewAccountData>;

    async fn get_account_data(&self, account_number: &str) -> Result<AccountData>;
}

pub struct AccountsProxy {
    configuration: AuthProxyConfiguration,
}

impl AccountsProxy {
    pub fn new(configuration: AuthProxyConfiguration) -> Self {
        Self { configuration }
    }
}

#[async_trait]
impl AccountHandling for AccountsProxy {
    async fn create_account(&self) -> Result<NewAccountData> {
        tracing::info!("Creating new account");
        let response = self
            .configuration
            .proxy_configuration
            .send(RestRequest::post("accounts/v1/accounts", serde_json::json!({})))
            .await?
            .error_for_status()?;

        response.json()
    }

    async fn get_account_data(&self, account_number: &str) -> Result<AccountData> {
        let response = self
            .configuration
            .send_authorized(account_number, RestRequest::get("accounts/v1/accounts/me"))
            .await?
            .error_for_status()?;

        response.json()
    }
}
