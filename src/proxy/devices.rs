use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::configuration::AuthProxyConfiguration;
use crate::error::Result;
use crate::transport::{path_with_segment, RestRequest};

const DEVICES_PATH: &str = "accounts/v1/devices";

/// Device registered on an account
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Device {
    pub id: String,
    pub name: String,
    pub pubkey: String,
    pub created: DateTime<Utc>,
}

#[async_trait]
pub trait DeviceHandling: Send + Sync {
    async fn get_devices(&self, account_number: &str) -> Result<Vec<Device>>;

    /// `None` if the device does not exist
    async fn get_device(&self, account_number: &str, id: &str) -> Result<Option<Device>>;

    /// `false` if the device was already gone
    async fn delete_device(&self, account_number: &str, id: &str) -> Result<bool>;
}

pub struct DevicesProxy {
    configuration: AuthProxyConfiguration,
}

impl DevicesProxy {
    pub fn new(configuration: AuthProxyConfiguration) -> Self {
        Self { configuration }
    }
}

#[async_trait]
impl DeviceHandling for DevicesProxy {
    async fn get_devices(&self, account_number: &str) -> Result<Vec<Device>> {
        let response = self
            .configuration
            .send_authorized(account_number, RestRequest::get(DEVICES_PATH))
            .await?
            .error_for_status()?;

        response.json()
    }

    async fn get_device(&self, account_number: &str, id: &str) -> Result<Option<Device>> {
        let path = path_with_segment(DEVICES_PATH, id)?;
        let response = self
            .configuration
            .send_authorized(account_number, RestRequest::get(path))
            .await?;

        if response.status == 404 {
            return Ok(None);
        }

        response.error_for_status()?.json().map(Some)
    }

    async fn delete_device(&self, account_number: &str, id: &str) -> Result<bool> {
        tracing::info!(device = %id, "Deleting device");
        let path = path_with_segment(DEVICES_PATH, id)?;
        let response = self
            .configuration
            .send_authorized(account_number, RestRequest::delete(path))
            .await?;

        if response.status == 404 {
            return Ok(false);
        }

        response.error_for_status()?;
        Ok(true)
    }
}
