//! Push/pull sync protocol shared by the client and the server.
//!
//! ## Protocol
//!
//! 1. The client appends every local mutation to a durable queue
//! 2. `POST /sync/push` ships queued events; the server answers per event
//! 3. `GET /sync/pull?last_sync=<checkpoint>` returns events recorded since
//!    the checkpoint, paged with `has_more`
//! 4. `GET /sync/status` reports the newest checkpoint and what is pending
//!
//! All bodies are JSON; all timestamps are RFC3339 UTC.

mod error;
mod protocol;

pub use error::SyncError;
pub use protocol::{
    checkpoint_string, generate_client_id, generate_event_id, PullResponse, PushRequest,
    PushResponse, StatusResponse, SyncEvent,
};
