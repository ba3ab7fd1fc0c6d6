use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::access_method::{AccessMethodKind, AccessMethodViewModel, ShadowsocksCipher};
use crate::transport::HttpSettings;

/// api-access - probe and manage API access methods
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// API host name (used for TLS and the Host header)
    #[arg(long, env = "API_HOST", default_value = "api.mullvad.net")]
    pub api_host: String,

    /// Bootstrap API address
    #[arg(long, env = "API_ADDRESS", default_value = "45.83.223.196:443")]
    pub api_address: String,

    /// Access method to test (direct, bridges, socks5, shadowsocks)
    #[arg(short, long, env = "ACCESS_METHOD", default_value = "direct")]
    pub method: String,

    /// Name stored with a saved access method
    #[arg(short, long, env = "ACCESS_METHOD_NAME", default_value = "")]
    pub name: String,

    /// Proxy server IP address
    #[arg(short = 'H', long, env = "PROXY_HOST", default_value = "")]
    pub proxy_host: String,

    /// Proxy server port
    #[arg(short = 'P', long, env = "PROXY_PORT", default_value = "")]
    pub proxy_port: String,

    /// SOCKS5 username; enables authentication
    #[arg(short, long, env = "PROXY_USERNAME")]
    pub username: Option<String>,

    /// SOCKS5 or Shadowsocks password
    #[arg(short, long, env = "PROXY_PASSWORD")]
    pub password: Option<String>,

    /// Shadowsocks cipher
    #[arg(long, env = "SHADOWSOCKS_CIPHER", default_value = "chacha20-ietf-poly1305")]
    pub cipher: String,

    /// Save the method after a successful test
    #[arg(short, long, env = "SAVE_ACCESS_METHOD", default_value = "false")]
    pub save: bool,

    /// Account number to authenticate after the test
    #[arg(short, long, env = "ACCOUNT_NUMBER")]
    pub account: Option<String>,

    /// Path to the access method database
    #[arg(short = 'd', long, env = "ACCESS_METHODS_DB_FILE")]
    pub db_file: Option<String>,

    /// Probe timeout in seconds
    #[arg(long, env = "PROBE_TIMEOUT", default_value = "10")]
    pub probe_timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

#[derive(Clone, Debug)]
pub struct Config {
    // API
    pub api_host: String,
    pub api_address: SocketAddr,

    // Access method draft
    pub method: AccessMethodKind,
    pub method_name: String,
    pub proxy_host: String,
    pub proxy_port: String,
    pub proxy_username: Option<String>,
    pub proxy_password: Option<String>,
    pub shadowsocks_cipher: ShadowsocksCipher,
    pub save: bool,

    // Account
    pub account_number: Option<String>,

    // Storage
    pub db_file: PathBuf,

    // Timeouts
    pub probe_timeout: u64,
    pub token_refresh_threshold: u64,
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,

    pub log_level: String,
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let args = CliArgs::parse();
        Self::from_args(args)
    }

    fn from_args(args: CliArgs) -> Result<Self> {
        let config = Config {
            api_host: args.api_host,
            api_address: args
                .api_address
                .parse()
                .with_context(|| format!("API_ADDRESS is not a socket address: {}", args.api_address))?,

            method: parse_method(&args.method)
                .with_context(|| format!("Unknown access method: {}", args.method))?,
            method_name: args.name,
            proxy_host: args.proxy_host,
            proxy_port: args.proxy_port,
            proxy_username: args.username,
            proxy_password: args.password,
            shadowsocks_cipher: ShadowsocksCipher::parse(&args.cipher)
                .with_context(|| format!("Unknown Shadowsocks cipher: {}", args.cipher))?,
            save: args.save,

            account_number: args.account,

            db_file: args
                .db_file
                .map(|s| expand_tilde(&s))
                .or_else(default_db_file)
                .context("Cannot determine a data directory (use -d or set ACCESS_METHODS_DB_FILE)")?,

            probe_timeout: args.probe_timeout,

            token_refresh_threshold: std::env::var("TOKEN_REFRESH_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(60),

            http_connect_timeout: std::env::var("HTTP_CONNECT_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),

            http_request_timeout: std::env::var("HTTP_REQUEST_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),

            log_level: args.log_level,
        };

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.probe_timeout == 0 {
            anyhow::bail!("PROBE_TIMEOUT must be at least one second");
        }

        if self.http_connect_timeout == 0 || self.http_request_timeout == 0 {
            anyhow::bail!("HTTP timeouts must be at least one second");
        }

        if let Some(account) = &self.account_number {
            if account.is_empty() || !account.chars().all(|c| c.is_ascii_digit()) {
                anyhow::bail!("ACCOUNT_NUMBER must consist of digits only");
            }
        }

        Ok(())
    }

    pub fn http_settings(&self) -> HttpSettings {
        HttpSettings {
            connect_timeout: Duration::from_secs(self.http_connect_timeout),
            request_timeout: Duration::from_secs(self.http_request_timeout),
        }
    }

    /// Draft built from the command line, validated later by the interactor
    pub fn draft(&self) -> AccessMethodViewModel {
        let mut draft = AccessMethodViewModel::new();
        draft.method = self.method;
        draft.name = if self.method_name.is_empty() {
            format!("{:?}", self.method)
        } else {
            self.method_name.clone()
        };

        match self.method {
            AccessMethodKind::Socks5 => {
                draft.socks.server = self.proxy_host.clone();
                draft.socks.port = self.proxy_port.clone();
                if let Some(username) = &self.proxy_username {
                    draft.socks.authenticate = true;
                    draft.socks.username = username.clone();
                    draft.socks.password = self.proxy_password.clone().unwrap_or_default();
                }
            }
            AccessMethodKind::Shadowsocks => {
                draft.shadowsocks.server = self.proxy_host.clone();
                draft.shadowsocks.port = self.proxy_port.clone();
                draft.shadowsocks.password = self.proxy_password.clone().unwrap_or_default();
                draft.shadowsocks.cipher = self.shadowsocks_cipher;
            }
            AccessMethodKind::Direct | AccessMethodKind::Bridges => {}
        }

        draft
    }
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

fn default_db_file() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("api-access").join("access-methods.sqlite3"))
}

/// Parse access method kind from string
fn parse_method(s: &str) -> Option<AccessMethodKind> {
    match s.to_lowercase().as_str() {
        "direct" => Some(AccessMethodKind::Direct),
        "bridges" | "bridge" => Some(AccessMethodKind::Bridges),
        "socks5" | "socks" => Some(AccessMethodKind::Socks5),
        "shadowsocks" => Some(AccessMethodKind::Shadowsocks),
        _ => None,
    }
}
