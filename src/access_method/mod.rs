// Access methods: persisted routes to the API and their editing sessions

mod interactor;
mod repository;
mod types;
mod view_model;

pub use interactor::{AccessMethodInteractor, TestCompletion};
pub use repository::{
    AccessMethodRepository, InMemoryAccessMethodRepository, SqliteAccessMethodRepository,
};
pub use types::{
    AccessMethodConfiguration, PersistentAccessMethod, ProxyCredentials, ProxyEndpoint, ProxyKind,
    ShadowsocksCipher, BRIDGES_METHOD_ID, DIRECT_METHOD_ID,
};
pub use view_model::{
    AccessMethodKind, AccessMethodViewModel, ShadowsocksDraft, SocksDraft, TestingEvent,
    TestingStatus,
};
