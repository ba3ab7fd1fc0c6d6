// Authentication types

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::fmt;

/// Bearer token for one account
///
/// Never mutated once handed out; a refresh produces a new value.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken {
    pub value: String,
    pub expiry: DateTime<Utc>,
    pub account_number: String,
}

impl AuthToken {
    /// Check if token expires within `threshold` from now
    pub fn expires_within(&self, threshold: Duration) -> bool {
        self.expiry <= Utc::now() + threshold
    }

    /// Check if token is actually expired (not just expiring soon)
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expiry
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix: String = self.value.chars().take(6).collect();
        f.debug_struct("AuthToken")
            .field("value", &format!("{}...", prefix))
            .field("expiry", &self.expiry)
            .field("account_number", &self.account_number)
            .finish()
    }
}

/// Token response body
#[derive(Deserialize)]
pub struct AccessTokenResponse {
    pub access_token: String,
    pub expiry: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(expires_in: i64) -> AuthToken {
        AuthToken {
            value: "mullvad-token-0123456789".to_string(),
            expiry: Utc::now() + Duration::seconds(expires_in),
            account_number: "1234123412341234".to_string(),
        }
    }

    #[test]
    fn test_token_expiration_check() {
        // Token expires in 10 minutes, threshold is 5 minutes - should not need refresh
        assert!(!token(600).expires_within(Duration::seconds(300)));

        // Expires in 2 minutes - should need refresh
        assert!(token(120).expires_within(Duration::seconds(300)));
        assert!(!token(120).is_expired());
    }

    #[test]
    fn test_token_expired_check() {
        // Token expired 1 minute ago
        assert!(token(-60).is_expired());
    }

    #[test]
    fn test_debug_hides_token_value() {
        let printed = format!("{:?}", token(600));
        assert!(printed.contains("mullva..."));
        assert!(!printed.contains("0123456789"));
    }

    #[test]
    fn test_parse_token_response() {
        let body = r#"{"access_token":"abc","expiry":"2030-01-01T00:00:00Z"}"#;
        let parsed: AccessTokenResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.access_token, "abc");
        assert_eq!(parsed.expiry.to_rfc3339(), "2030-01-01T00:00:00+00:00");
    }
}
