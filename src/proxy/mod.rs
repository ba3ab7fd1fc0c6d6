// REST API proxies

mod accounts;
mod api;
mod configuration;
mod devices;
mod factory;

pub use accounts::{AccountData, AccountHandling, AccountsProxy, NewAccountData};
pub(crate) use api::API_ADDRESSES_PATH;
pub use api::{ApiProxy, ApiQuerying};
pub use configuration::{AuthProxyConfiguration, ProxyConfiguration};
pub use devices::{Device, DeviceHandling, DevicesProxy};
pub use factory::{ProxyFactory, RestProxyFactory};
