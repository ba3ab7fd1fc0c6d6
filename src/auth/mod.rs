// Authentication module
// Manages API token lifecycle

mod manager;
mod proxy;
mod types;

pub use manager::{AccessTokenManager, DEFAULT_REFRESH_THRESHOLD};
pub use proxy::{AuthenticationProxy, RestAuthenticationProxy};
pub use types::AuthToken;
