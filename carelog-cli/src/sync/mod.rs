//! Offline-first synchronization with the Carelog server.
//!
//! Local changes are written to the local store and queued in the same
//! transaction. [`PushSynchronizer`] drains the queue in order, one event per
//! request, and [`PullReconciler`] applies changes made on other devices.
//! Both go through a [`SyncTransport`], so either side can run without the
//! other and the CLI keeps working offline.

pub mod auto_sync;
pub mod pull;
pub mod push;
pub mod transport;

pub use auto_sync::try_auto_sync;
pub use pull::{PullError, PullReconciler, PullReport};
pub use push::{PushError, PushReport, PushSynchronizer, MAX_RETRIES};
pub use transport::{check_server, HttpTransport, SyncTransport};

#[cfg(test)]
pub(crate) mod testing {
    use super::SyncTransport;
    use async_trait::async_trait;
    use carelog_core::{
        Action, PullResponse, PushRequest, PushResponse, StatusResponse, SyncError, SyncEvent,
    };
    use chrono::{DateTime, Utc};
    use std::collections::{HashMap, HashSet, VecDeque};
    use std::sync::Mutex;

    /// Scriptable in-memory server.
    #[derive(Default)]
    pub struct MockTransport {
        /// Every event submitted, in order.
        pub pushed: Mutex<Vec<SyncEvent>>,
        /// Number of upcoming push calls that time out.
        pub failing_pushes: Mutex<u32>,
        /// Entity types the server rejects per event.
        pub rejected_types: Mutex<HashSet<String>>,
        /// Pages returned by successive pulls.
        pub pages: Mutex<VecDeque<PullResponse>>,
        /// Checkpoint passed to each pull.
        pub pulls: Mutex<Vec<Option<DateTime<Utc>>>>,
        /// Client excluded by each pull.
        pub excluded: Mutex<Vec<Option<String>>>,
        /// Fail every pull with a timeout.
        pub offline_pulls: Mutex<bool>,
        next_id: Mutex<u32>,
    }

    impl MockTransport {
        pub fn pushed(&self) -> Vec<SyncEvent> {
            self.pushed.lock().unwrap().clone()
        }

        pub fn fail_next_pushes(&self, n: u32) {
            *self.failing_pushes.lock().unwrap() = n;
        }

        pub fn reject(&self, entity_type: &str) {
            self.rejected_types
                .lock()
                .unwrap()
                .insert(entity_type.to_string());
        }

        pub fn add_page(&self, events: Vec<SyncEvent>, server_time: DateTime<Utc>, has_more: bool) {
            self.pages.lock().unwrap().push_back(PullResponse {
                events,
                server_time,
                has_more,
            });
        }
    }

    #[async_trait]
    impl SyncTransport for MockTransport {
        async fn push(&self, request: &PushRequest) -> Result<PushResponse, SyncError> {
            {
                let mut failing = self.failing_pushes.lock().unwrap();
                if *failing > 0 {
                    *failing -= 1;
                    return Err(SyncError::Timeout);
                }
            }

            let mut failed_ids = Vec::new();
            let mut results = HashMap::new();
            for event in &request.events {
                self.pushed.lock().unwrap().push(event.clone());
                if self.rejected_types.lock().unwrap().contains(&event.entity_type) {
                    failed_ids.push(event.id.clone());
                    continue;
                }
                if event.action == Action::Create.as_str() {
                    let mut next = self.next_id.lock().unwrap();
                    *next += 1;
                    results.insert(event.id.clone(), format!("srv-{}", next));
                }
            }

            Ok(PushResponse {
                processed: request.events.len() - failed_ids.len(),
                failed: failed_ids.len(),
                failed_ids,
                results,
                server_time: Utc::now(),
            })
        }

        async fn pull(
            &self,
            last_sync: Option<DateTime<Utc>>,
            exclude_client: Option<&str>,
        ) -> Result<PullResponse, SyncError> {
            self.pulls.lock().unwrap().push(last_sync);
            self.excluded
                .lock()
                .unwrap()
                .push(exclude_client.map(str::to_string));
            if *self.offline_pulls.lock().unwrap() {
                return Err(SyncError::Timeout);
            }
            Ok(self
                .pages
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| PullResponse {
                    events: Vec::new(),
                    server_time: last_sync.unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
                    has_more: false,
                }))
        }

        async fn status(
            &self,
            _last_sync: Option<DateTime<Utc>>,
            _client_id: &str,
        ) -> Result<StatusResponse, SyncError> {
            Ok(StatusResponse {
                last_sync: String::new(),
                pending: self.pages.lock().unwrap().iter().map(|p| p.events.len() as i64).sum(),
                server_time: Utc::now(),
            })
        }
    }
}
