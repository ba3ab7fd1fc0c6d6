// Token acquisition against the API

use async_trait::async_trait;
use serde_json::json;

use super::types::{AccessTokenResponse, AuthToken};
use crate::error::{AuthenticationError, RestError};
use crate::proxy::ProxyConfiguration;
use crate::transport::RestRequest;

const ACCESS_TOKEN_PATH: &str = "auth/v1/token";

/// Performs the actual login call for the token manager
#[async_trait]
pub trait AuthenticationProxy: Send + Sync {
    async fn authenticate(&self, account_number: &str) -> Result<AuthToken, AuthenticationError>;
}

/// Authentication over the REST API
pub struct RestAuthenticationProxy {
    configuration: ProxyConfiguration,
}

impl RestAuthenticationProxy {
    pub fn new(configuration: ProxyConfiguration) -> Self {
        Self { configuration }
    }
}

#[async_trait]
impl AuthenticationProxy for RestAuthenticationProxy {
    async fn authenticate(&self, account_number: &str) -> Result<AuthToken, AuthenticationError> {
        tracing::info!("Requesting access token...");

        let body = json!({ "account_number": account_number });
        let request = RestRequest::post(ACCESS_TOKEN_PATH, body);

        let response = self
            .configuration
            .send(request)
            .await
            .map_err(|e| match e {
                RestError::Transport(e) => AuthenticationError::Transport(e),
                other => AuthenticationError::InvalidResponse(other.to_string()),
            })?;

        if !response.is_success() {
            let error_text = response.text();
            tracing::error!(
                status = response.status,
                body = %error_text,
                "Access token request failed"
            );
            return Err(AuthenticationError::Rejected {
                status: response.status,
                message: error_text,
            });
        }

        let data: AccessTokenResponse = serde_json::from_slice(&response.body)
            .map_err(|e| AuthenticationError::InvalidResponse(e.to_string()))?;

        if data.access_token.is_empty() {
            return Err(AuthenticationError::InvalidResponse(
                "response does not contain access_token".to_string(),
            ));
        }

        let token = AuthToken {
            value: data.access_token,
            expiry: data.expiry,
            account_number: account_number.to_string(),
        };

        if token.is_expired() {
            return Err(AuthenticationError::InvalidResponse(format!(
                "access token already expired at {}",
                token.expiry.to_rfc3339()
            )));
        }

        tracing::info!(
            "Access token acquired, expires: {}",
            token.expiry.to_rfc3339()
        );

        Ok(token)
    }
}
