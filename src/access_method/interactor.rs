use std::sync::{Arc, Mutex, MutexGuard, Weak};

use super::repository::AccessMethodRepository;
use super::view_model::{AccessMethodViewModel, TestingEvent, TestingStatus};
use crate::error::{AccessMethodError, InvalidConfiguration, RepositoryError};
use crate::tester::ProxyConfigurationTester;

/// Receives whether the API was reachable through the tested draft
pub type TestCompletion = Box<dyn FnOnce(bool) + Send>;

struct SessionState {
    view_model: AccessMethodViewModel,

    /// Bumped on every start and cancel; stale completions carry an older value
    generation: u64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl SessionState {
    /// Apply a testing event; illegal transitions leave the status untouched
    fn dispatch(&mut self, event: TestingEvent) -> bool {
        match self.view_model.testing_status.next(event) {
            Some(next) => {
                tracing::debug!(from = ?self.view_model.testing_status, to = ?next, "Testing status changed");
                self.view_model.testing_status = next;
                true
            }
            None => {
                tracing::debug!(
                    status = ?self.view_model.testing_status,
                    event = ?event,
                    "Ignoring testing event"
                );
                false
            }
        }
    }
}

/// One editing session of an access method
///
/// Owns the draft and its testing status. Dropping the interactor cancels a
/// running test.
pub struct AccessMethodInteractor {
    state: Arc<Mutex<SessionState>>,
    repository: Arc<dyn AccessMethodRepository>,
    tester: Arc<dyn ProxyConfigurationTester>,

    /// Held from the generation bump until the tester has been told, so the
    /// tester sees starts and cancels in generation order
    tester_calls: Mutex<()>,
}

impl AccessMethodInteractor {
    pub fn new(
        view_model: AccessMethodViewModel,
        repository: Arc<dyn AccessMethodRepository>,
        tester: Arc<dyn ProxyConfigurationTester>,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(SessionState {
                view_model,
                generation: 0,
            })),
            repository,
            tester,
            tester_calls: Mutex::new(()),
        }
    }

    /// Snapshot of the current draft
    pub fn view_model(&self) -> AccessMethodViewModel {
        lock(&self.state).view_model.clone()
    }

    pub fn testing_status(&self) -> TestingStatus {
        lock(&self.state).view_model.testing_status
    }

    /// Edit the draft; the testing status is owned by the interactor
    pub fn update_draft<F>(&self, edit: F)
    where
        F: FnOnce(&mut AccessMethodViewModel),
    {
        let mut state = lock(&self.state);
        let status = state.view_model.testing_status;
        edit(&mut state.view_model);
        state.view_model.testing_status = status;
    }

    /// Probe the draft configuration
    ///
    /// Fails without touching the status when the draft is invalid.
    pub fn start_proxy_configuration_test(
        &self,
        completion: Option<TestCompletion>,
    ) -> Result<(), InvalidConfiguration> {
        let _order = lock(&self.tester_calls);

        let (configuration, generation) = {
            let mut state = lock(&self.state);
            let configuration = state.view_model.into_persistent_proxy_configuration()?;
            state.generation += 1;
            state.dispatch(TestingEvent::Started);
            (configuration, state.generation)
        };

        tracing::info!(configuration = ?configuration, "Starting access method test");

        let weak: Weak<Mutex<SessionState>> = Arc::downgrade(&self.state);
        self.tester.start(
            configuration,
            Box::new(move |outcome| {
                let reachable = outcome.is_ok();
                if let Err(e) = &outcome {
                    tracing::info!(kind = ?e.kind, error = %e.message, "Access method unreachable");
                }

                let Some(state) = weak.upgrade() else {
                    return;
                };

                let applied = {
                    let mut state = lock(&state);
                    state.generation == generation
                        && state.dispatch(TestingEvent::Finished { reachable })
                };

                if applied {
                    if let Some(completion) = completion {
                        completion(reachable);
                    }
                }
            }),
        );

        Ok(())
    }

    /// Stop a running test and reset the status
    pub fn cancel_proxy_configuration_test(&self) {
        let _order = lock(&self.tester_calls);
        {
            let mut state = lock(&self.state);
            state.generation += 1;
            state.dispatch(TestingEvent::Cancelled);
        }
        self.tester.cancel();
    }

    /// Persist the draft, inserting or replacing by id
    pub async fn save_access_method(&self) -> Result<(), AccessMethodError> {
        let method = {
            let state = lock(&self.state);
            state.view_model.into_persistent_access_method()?
        };

        tracing::info!(id = %method.id, name = %method.name, "Saving access method");
        self.repository.save(method).await?;
        Ok(())
    }

    /// Cancel any test, then remove the method from the repository
    pub async fn delete_access_method(&self) -> Result<(), RepositoryError> {
        self.cancel_proxy_configuration_test();

        let id = lock(&self.state).view_model.id;
        tracing::info!(id = %id, "Deleting access method");
        self.repository.delete(id).await
    }
}

impl Drop for AccessMethodInteractor {
    fn drop(&mut self) {
        self.tester.cancel();
    }
}
