use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

use api_access::access_method::{
    AccessMethodConfiguration, AccessMethodInteractor, AccessMethodRepository,
    SqliteAccessMethodRepository,
};
use api_access::address_cache::AddressCache;
use api_access::config::Config;
use api_access::proxy::{ProxyFactory, RestProxyFactory};
use api_access::tester::ApiProxyConfigurationTester;
use api_access::transport::{ReqwestTransportFactory, ReqwestTransportProvider};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (for log level)
    let config = Config::load()?;
    config.validate()?;

    // Initialize logging with a configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("api-access starting...");

    let address_cache = AddressCache::new(config.api_host.clone(), config.api_address);
    tracing::info!(
        "API configured: {} at {}",
        address_cache.host(),
        address_cache.current_endpoint().address
    );

    let repository = Arc::new(
        SqliteAccessMethodRepository::open(&config.db_file).with_context(|| {
            format!(
                "Failed to open access method database {}",
                config.db_file.display()
            )
        })?,
    );
    tracing::info!("Access method database: {}", config.db_file.display());

    let transports = Arc::new(ReqwestTransportFactory::new(config.http_settings()));
    let tester = Arc::new(ApiProxyConfigurationTester::with_timeout(
        transports.clone(),
        address_cache.clone(),
        Duration::from_secs(config.probe_timeout),
    ));

    let interactor = AccessMethodInteractor::new(config.draft(), repository.clone(), tester);

    let reachable = run_test(&interactor).await?;
    print_test_result(&interactor, reachable);

    if config.save {
        if reachable {
            interactor
                .save_access_method()
                .await
                .context("Failed to save access method")?;
            println!("  Saved:       yes");
        } else {
            tracing::warn!("Not saving an access method that failed its test");
        }
    }

    println!();
    println!("Stored access methods:");
    for method in repository.all().await? {
        println!(
            "  {} {:<24} {}",
            if method.is_enabled { "[x]" } else { "[ ]" },
            method.name,
            method.id
        );
    }

    if let Some(account) = &config.account_number {
        let route = if reachable {
            interactor.view_model().into_persistent_proxy_configuration()?
        } else {
            AccessMethodConfiguration::Direct
        };
        query_account(&config, account, route, address_cache, transports).await?;
    }

    Ok(())
}

/// Run the reachability test for the configured draft
async fn run_test(interactor: &AccessMethodInteractor) -> Result<bool> {
    let (tx, rx) = oneshot::channel();

    interactor
        .start_proxy_configuration_test(Some(Box::new(move |reachable| {
            let _ = tx.send(reachable);
        })))
        .context("Access method is not valid")?;

    tokio::select! {
        result = rx => Ok(result.unwrap_or(false)),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C signal, cancelling test...");
            interactor.cancel_proxy_configuration_test();
            anyhow::bail!("Test cancelled")
        }
    }
}

fn print_test_result(interactor: &AccessMethodInteractor, reachable: bool) {
    let view_model = interactor.view_model();

    println!();
    println!("  Method:      {:?}", view_model.method);
    println!("  Name:        {}", view_model.name);
    println!("  Status:      {:?}", view_model.testing_status);
    println!(
        "  Reachable:   {}",
        if reachable { "yes" } else { "no" }
    );
}

/// Authenticate and print account details through the chosen route
async fn query_account(
    config: &Config,
    account: &str,
    route: AccessMethodConfiguration,
    address_cache: AddressCache,
    transports: Arc<ReqwestTransportFactory>,
) -> Result<()> {
    let provider = Arc::new(ReqwestTransportProvider::new(transports));
    provider.set_access_method(route);

    let factory = RestProxyFactory::make_proxy_factory_with_threshold(
        provider,
        address_cache.clone(),
        config.token_refresh_threshold,
    );

    match factory.create_api_proxy().get_api_addresses().await {
        Ok(addresses) => {
            tracing::info!("Fetched {} API addresses", addresses.len());
            address_cache.set_addresses(addresses);
        }
        Err(e) => tracing::warn!(error = %e, "Could not refresh API addresses"),
    }

    let account_data = factory
        .create_accounts_proxy()
        .get_account_data(account)
        .await
        .context("Failed to fetch account data")?;

    let devices = factory
        .create_devices_proxy()
        .get_devices(account)
        .await
        .context("Failed to fetch devices")?;

    println!();
    println!("  Account:     {}", account_data.id);
    println!("  Expires:     {}", account_data.expiry.to_rfc3339());
    println!("  Devices:     {}", devices.len());
    for device in devices {
        println!("    - {} ({})", device.name, device.created.to_rfc3339());
    }

    Ok(())
}
