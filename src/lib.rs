//! Carelog sync server.
//!
//! Receives batches of queued client mutations, replays each one into the
//! authoritative record store through the event dispatcher, and serves the
//! resulting change log back to other devices of the same family.

pub mod config;
pub mod db;
pub mod server;
