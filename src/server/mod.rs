//! Server-side modules for the Carelog sync server.

pub mod auth;
pub mod changelog;
pub mod dispatcher;
pub mod routes;
pub mod services;

pub use auth::{ApiKeyStore, AuthUser};
pub use changelog::{ChangeLog, ChangePage};
pub use dispatcher::{BatchOutcome, DispatchError, Dispatcher};
pub use routes::{router, AppState};
pub use services::{Record, RecordService, ServiceError, Services};
