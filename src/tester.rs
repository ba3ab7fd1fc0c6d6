// Connectivity probes for access methods that are not saved yet

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::AbortHandle;

use crate::access_method::AccessMethodConfiguration;
use crate::address_cache::AddressCache;
use crate::error::{ProbeError, ProbeFailureKind};
use crate::proxy::API_ADDRESSES_PATH;
use crate::task::{Cancellable, CancellationScope};
use crate::transport::{AccessMethodTransportFactory, RestRequest};

/// Default time a probe may take before it counts as failed
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Receives the outcome of one probe
pub type ProbeCompletion = Box<dyn FnOnce(Result<(), ProbeError>) + Send>;

/// Checks whether the API is reachable through a candidate configuration
///
/// At most one probe runs at a time. Starting a new probe or cancelling
/// guarantees that the completion of the previous one is never invoked.
pub trait ProxyConfigurationTester: Send + Sync {
    fn start(&self, configuration: AccessMethodConfiguration, completion: ProbeCompletion);

    fn cancel(&self);
}

type CompletionSlot = Arc<Mutex<Option<ProbeCompletion>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Hand the outcome to the completion unless someone took it first
fn complete(slot: &CompletionSlot, outcome: Result<(), ProbeError>) -> bool {
    let completion = lock(slot).take();
    match completion {
        Some(completion) => {
            completion(outcome);
            true
        }
        None => false,
    }
}

/// A running probe
struct ProbeAttempt {
    completion: CompletionSlot,
    task: AbortHandle,
}

impl Cancellable for ProbeAttempt {
    fn cancel(&self) {
        // Dropping the completion first means an in-flight result finds an empty slot
        drop(lock(&self.completion).take());
        self.task.abort();
    }
}

/// Probes by fetching the API address list through the candidate route
pub struct ApiProxyConfigurationTester {
    transports: Arc<dyn AccessMethodTransportFactory>,
    address_cache: AddressCache,
    timeout: Duration,
    current: Mutex<Option<CancellationScope<ProbeAttempt>>>,
}

impl ApiProxyConfigurationTester {
    pub fn new(transports: Arc<dyn AccessMethodTransportFactory>, address_cache: AddressCache) -> Self {
        Self::with_timeout(transports, address_cache, DEFAULT_PROBE_TIMEOUT)
    }

    pub fn with_timeout(
        transports: Arc<dyn AccessMethodTransportFactory>,
        address_cache: AddressCache,
        timeout: Duration,
    ) -> Self {
        Self {
            transports,
            address_cache,
            timeout,
            current: Mutex::new(None),
        }
    }

    async fn probe(
        transports: Arc<dyn AccessMethodTransportFactory>,
        address_cache: AddressCache,
        timeout: Duration,
        configuration: AccessMethodConfiguration,
    ) -> Result<(), ProbeError> {
        let transport = transports.make_transport(&configuration)?;
        let endpoint = address_cache.current_endpoint();

        tracing::debug!(
            transport = transport.name(),
            address = %endpoint.address,
            "Probing API reachability"
        );

        let request = RestRequest::get(API_ADDRESSES_PATH);
        let response = match tokio::time::timeout(timeout, transport.send(&endpoint, request)).await
        {
            Ok(result) => result?,
            Err(_) => return Err(ProbeError::timeout(timeout)),
        };

        response.error_for_status()?;
        Ok(())
    }
}

impl ProxyConfigurationTester for ApiProxyConfigurationTester {
    fn start(&self, configuration: AccessMethodConfiguration, completion: ProbeCompletion) {
        let slot: CompletionSlot = Arc::new(Mutex::new(Some(completion)));

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(error = %e, "Cannot probe outside of an async runtime");
                self.cancel();
                // `current` must not be held here, the completion may call back in
                complete(
                    &slot,
                    Err(ProbeError::new(ProbeFailureKind::Cancelled, e.to_string())),
                );
                return;
            }
        };

        let mut current = lock(&self.current);

        // Replacing the scope cancels the previous probe
        *current = None;

        let task_slot = Arc::clone(&slot);
        let transports = Arc::clone(&self.transports);
        let address_cache = self.address_cache.clone();
        let timeout = self.timeout;

        let handle = runtime.spawn(async move {
            let outcome = Self::probe(transports, address_cache, timeout, configuration).await;
            match &outcome {
                Ok(()) => tracing::info!("Probe succeeded"),
                Err(e) => tracing::info!(kind = ?e.kind, error = %e.message, "Probe failed"),
            }
            if !complete(&task_slot, outcome) {
                tracing::debug!("Probe result discarded, probe was cancelled");
            }
        });

        *current = Some(CancellationScope::new(ProbeAttempt {
            completion: slot,
            task: handle.abort_handle(),
        }));
    }

    fn cancel(&self) {
        if let Some(attempt) = lock(&self.current).take() {
            tracing::debug!("Cancelling probe");
            attempt.cancel();
        }
    }
}
