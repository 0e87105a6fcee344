#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod practice;
pub mod progress_store;
pub mod session;
pub mod sync;

pub use facts_core::Clock;

pub use config::{CoreConfig, RemoteEndpoint};
pub use error::{ConfigError, PracticeServicesError, RemoteError, SessionError};
pub use practice::PracticeServices;
pub use progress_store::{Durability, ProgressStore, SaveReport};
pub use session::{
    Expiry, FinishedRun, ResponseReceipt, SessionState, SessionTracker, TrackerSettings,
};
pub use sync::{
    InMemoryRemoteStore, RemoteStore, RestRemoteStore, SyncReconciler, SyncStatus,
};
