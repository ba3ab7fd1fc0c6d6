// API address cache

use chrono::{DateTime, Utc};
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

/// Where API requests are sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiEndpoint {
    /// Host name used for TLS and the Host header
    pub host: String,

    /// Address the connection is actually made to
    pub address: SocketAddr,

    /// `false` only for local test servers
    pub tls: bool,
}

impl ApiEndpoint {
    /// Full URL for an API path such as `app/v1/api-addrs`
    pub fn url(&self, path: &str) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!(
            "{}://{}:{}/{}",
            scheme,
            self.host,
            self.address.port(),
            path.trim_start_matches('/')
        )
    }
}

#[derive(Debug)]
struct AddressList {
    addresses: Vec<SocketAddr>,
    updated_at: Option<DateTime<Utc>>,
}

/// Thread-safe store of known API addresses
///
/// The first address is the current one. Cloning shares the same store.
pub struct AddressCache {
    host: String,
    tls: bool,
    list: Arc<RwLock<AddressList>>,
}

impl AddressCache {
    /// Create a cache for `host`, starting at `bootstrap`
    pub fn new(host: impl Into<String>, bootstrap: SocketAddr) -> Self {
        Self {
            host: host.into(),
            tls: true,
            list: Arc::new(RwLock::new(AddressList {
                addresses: vec![bootstrap],
                updated_at: None,
            })),
        }
    }

    /// Cache for a plain HTTP server (tests and local development)
    pub fn plain_http(host: impl Into<String>, bootstrap: SocketAddr) -> Self {
        Self {
            tls: false,
            ..Self::new(host, bootstrap)
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Endpoint new requests should use
    pub fn current_endpoint(&self) -> ApiEndpoint {
        let address = match self.list.read() {
            Ok(list) => list.addresses[0],
            Err(poisoned) => poisoned.into_inner().addresses[0],
        };
        ApiEndpoint {
            host: self.host.clone(),
            address,
            tls: self.tls,
        }
    }

    /// Replace the known addresses; an empty list is ignored
    pub fn set_addresses(&self, addresses: Vec<SocketAddr>) {
        if addresses.is_empty() {
            tracing::warn!("Ignoring empty API address list");
            return;
        }

        let mut list = match self.list.write() {
            Ok(list) => list,
            Err(poisoned) => poisoned.into_inner(),
        };

        // Keep the current address in front if it is still valid
        let current = list.addresses[0];
        let mut addresses = addresses;
        if let Some(pos) = addresses.iter().position(|a| *a == current) {
            addresses.swap(0, pos);
        }

        tracing::info!(
            "Updating API address cache. Found {} addresses.",
            addresses.len()
        );
        list.addresses = addresses;
        list.updated_at = Some(Utc::now());
    }

    /// Move on to the next known address after a failure
    pub fn select_next(&self) -> SocketAddr {
        let mut list = match self.list.write() {
            Ok(list) => list,
            Err(poisoned) => poisoned.into_inner(),
        };
        list.addresses.rotate_left(1);
        let next = list.addresses[0];
        tracing::debug!(address = %next, "Selected next API address");
        next
    }

    /// All known addresses, current first
    pub fn addresses(&self) -> Vec<SocketAddr> {
        match self.list.read() {
            Ok(list) => list.addresses.clone(),
            Err(poisoned) => poisoned.into_inner().addresses.clone(),
        }
    }

    /// When the list was last replaced from the API
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        match self.list.read() {
            Ok(list) => list.updated_at,
            Err(poisoned) => poisoned.into_inner().updated_at,
        }
    }
}

impl Clone for AddressCache {
    fn clone(&self) -> Self {
        Self {
            host: self.host.clone(),
            tls: self.tls,
            list: Arc::clone(&self.list),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_current_endpoint_url() {
        let cache = AddressCache::new("api.mullvad.net", addr("45.83.223.196:443"));
        let endpoint = cache.current_endpoint();
        assert_eq!(endpoint.address, addr("45.83.223.196:443"));
        assert_eq!(
            endpoint.url("/app/v1/api-addrs"),
            "https://api.mullvad.net:443/app/v1/api-addrs"
        );

        let local = AddressCache::plain_http("127.0.0.1", addr("127.0.0.1:8080"));
        assert_eq!(
            local.current_endpoint().url("auth/v1/token"),
            "http://127.0.0.1:8080/auth/v1/token"
        );
    }

    #[test]
    fn test_set_addresses_keeps_current_first() {
        let cache = AddressCache::new("api.mullvad.net", addr("10.0.0.2:443"));
        assert!(cache.updated_at().is_none());

        cache.set_addresses(vec![addr("10.0.0.1:443"), addr("10.0.0.2:443")]);
        assert_eq!(
            cache.addresses(),
            vec![addr("10.0.0.2:443"), addr("10.0.0.1:443")]
        );
        assert!(cache.updated_at().is_some());

        cache.set_addresses(vec![]);
        assert_eq!(cache.addresses().len(), 2);
    }

    #[test]
    fn test_select_next_rotates_and_is_shared_by_clones() {
        let cache = AddressCache::new("api.mullvad.net", addr("10.0.0.1:443"));
        cache.set_addresses(vec![
            addr("10.0.0.1:443"),
            addr("10.0.0.2:443"),
            addr("10.0.0.3:443"),
        ]);

        let shared = cache.clone();
        assert_eq!(shared.select_next(), addr("10.0.0.2:443"));
        assert_eq!(cache.current_endpoint().address, addr("10.0.0.2:443"));
        assert_eq!(cache.select_next(), addr("10.0.0.3:443"));
        assert_eq!(cache.select_next(), addr("10.0.0.1:443"));
    }
}
