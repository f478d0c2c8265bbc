//! # Pending Result Manager
//!
//! Correlates asynchronous query completion with synchronous callers. A
//! caller registers interest in a `query_id` before submitting, the worker
//! that processes the query signals the registration with the result, and
//! the caller's wait resolves. Exactly one registration may exist per query
//! id; signalling an unregistered id is a no-op; registrations left
//! unclaimed past their deadline are swept by the heartbeat cycle.
//!
//! This is the bridge that turns the fire-and-forget FIFO pipeline into a
//! synchronous request/response API.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use crate::engine::QueryResult;
use crate::error::{DqmError, Result};

/// Observable lifecycle of a registered query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingStatus {
    /// Registered, no result yet.
    Pending,
    /// Result delivered, not yet claimed by the waiter.
    Ready,
    /// Registration cancelled before a result arrived.
    Cancelled,
}

/// Outcome of waiting on a registration.
#[derive(Debug)]
pub enum WaitOutcome {
    /// The worker signalled this query. `None` means execution failed.
    Ready(Option<QueryResult>),
    /// The deadline elapsed (or the registration was swept) first.
    TimedOut,
    /// The registration was cancelled.
    Cancelled,
}

enum SlotState {
    Waiting,
    Ready(Option<QueryResult>),
    Cancelled,
}

struct PendingSlot {
    state: Mutex<SlotState>,
    ready: Notify,
    deadline: Instant,
    registered_at: DateTime<Utc>,
}

/// Handle returned by [`PendingResultManager::register`]; pass it back to
/// [`PendingResultManager::wait`] to block for the result.
pub struct PendingTicket {
    query_id: String,
    slot: Arc<PendingSlot>,
}

impl PendingTicket {
    pub fn query_id(&self) -> &str {
        &self.query_id
    }
}

/// Registry of in-flight synchronous waits.
#[derive(Default)]
pub struct PendingResultManager {
    slots: Mutex<HashMap<String, Arc<PendingSlot>>>,
}

impl PendingResultManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in a query id. Fails if a registration already
    /// exists for the id - exactly one waiter per query.
    pub fn register(&self, query_id: &str, timeout_seconds: u64) -> Result<PendingTicket> {
        let mut slots = self.slots.lock();
        if slots.contains_key(query_id) {
            return Err(DqmError::DuplicatePendingResult {
                query_id: query_id.to_string(),
            });
        }

        let slot = Arc::new(PendingSlot {
            state: Mutex::new(SlotState::Waiting),
            ready: Notify::new(),
            deadline: Instant::now() + Duration::from_secs(timeout_seconds),
            registered_at: Utc::now(),
        });
        slots.insert(query_id.to_string(), slot.clone());

        debug!(query_id = %query_id, timeout_seconds, "Pending result registered");
        Ok(PendingTicket {
            query_id: query_id.to_string(),
            slot,
        })
    }

    /// Block until the registration is signalled, cancelled, or its deadline
    /// elapses. The registration is always removed before returning.
    pub async fn wait(&self, ticket: PendingTicket) -> WaitOutcome {
        loop {
            let notified = ticket.slot.ready.notified();

            {
                let mut state = ticket.slot.state.lock();
                match std::mem::replace(&mut *state, SlotState::Waiting) {
                    SlotState::Ready(result) => {
                        drop(state);
                        self.remove(&ticket.query_id);
                        return WaitOutcome::Ready(result);
                    }
                    SlotState::Cancelled => {
                        drop(state);
                        self.remove(&ticket.query_id);
                        return WaitOutcome::Cancelled;
                    }
                    SlotState::Waiting => {}
                }
            }

            if tokio::time::timeout_at(ticket.slot.deadline, notified)
                .await
                .is_err()
            {
                // Deadline elapsed; re-check once in case the signal raced in.
                let mut state = ticket.slot.state.lock();
                match std::mem::replace(&mut *state, SlotState::Waiting) {
                    SlotState::Ready(result) => {
                        drop(state);
                        self.remove(&ticket.query_id);
                        return WaitOutcome::Ready(result);
                    }
                    SlotState::Cancelled => {
                        drop(state);
                        self.remove(&ticket.query_id);
                        return WaitOutcome::Cancelled;
                    }
                    SlotState::Waiting => {
                        drop(state);
                        self.remove(&ticket.query_id);
                        debug!(query_id = %ticket.query_id, "Pending result wait timed out");
                        return WaitOutcome::TimedOut;
                    }
                }
            }
        }
    }

    /// Deliver a result to a registration. Ownership of the result transfers
    /// to the slot. Returns false (a no-op, not an error) when no
    /// registration exists for the id.
    pub fn signal_ready(&self, query_id: &str, result: Option<QueryResult>) -> bool {
        let slot = self.slots.lock().get(query_id).cloned();
        match slot {
            Some(slot) => {
                *slot.state.lock() = SlotState::Ready(result);
                slot.ready.notify_one();
                debug!(query_id = %query_id, "Query result signalled as ready");
                true
            }
            None => {
                debug!(query_id = %query_id, "No pending registration for query result");
                false
            }
        }
    }

    /// Cancel a registration. The waiter (if any) wakes with
    /// [`WaitOutcome::Cancelled`]. Returns false when the id is unknown.
    pub fn cancel(&self, query_id: &str) -> bool {
        let slot = self.slots.lock().remove(query_id);
        match slot {
            Some(slot) => {
                *slot.state.lock() = SlotState::Cancelled;
                slot.ready.notify_one();
                true
            }
            None => false,
        }
    }

    /// Current status of a registration, or None when the id is unknown.
    pub fn status(&self, query_id: &str) -> Option<PendingStatus> {
        let slot = self.slots.lock().get(query_id).cloned()?;
        let state = slot.state.lock();
        Some(match *state {
            SlotState::Waiting => PendingStatus::Pending,
            SlotState::Ready(_) => PendingStatus::Ready,
            SlotState::Cancelled => PendingStatus::Cancelled,
        })
    }

    /// Age of a registration in milliseconds, or None when the id is unknown.
    pub fn age_ms(&self, query_id: &str) -> Option<i64> {
        let slot = self.slots.lock().get(query_id).cloned()?;
        Some((Utc::now() - slot.registered_at).num_milliseconds())
    }

    /// Sweep registrations whose deadline has passed. Waiters blocked on a
    /// swept registration wake and observe the timeout. Returns the number
    /// of registrations removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut expired = Vec::new();
        {
            let mut slots = self.slots.lock();
            slots.retain(|query_id, slot| {
                if slot.deadline <= now {
                    expired.push((query_id.clone(), slot.clone()));
                    false
                } else {
                    true
                }
            });
        }
        for (query_id, slot) in &expired {
            slot.ready.notify_one();
            debug!(query_id = %query_id, "Expired pending result removed");
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    fn remove(&self, query_id: &str) {
        self.slots.lock().remove(query_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_result() -> QueryResult {
        QueryResult {
            success: true,
            rows: vec![],
            column_count: 0,
            affected_rows: 3,
            error_message: None,
            execution_time_ms: 1,
        }
    }

    #[tokio::test]
    async fn signal_then_wait_delivers_exact_result() {
        let manager = PendingResultManager::new();
        let ticket = manager.register("q-1", 5).unwrap();

        assert!(manager.signal_ready("q-1", Some(sample_result())));
        match manager.wait(ticket).await {
            WaitOutcome::Ready(Some(result)) => assert_eq!(result.affected_rows, 3),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn wait_then_signal_wakes_waiter() {
        let manager = Arc::new(PendingResultManager::new());
        let ticket = manager.register("q-2", 5).unwrap();

        let signaller = manager.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            signaller.signal_ready("q-2", None);
        });

        match manager.wait(ticket).await {
            WaitOutcome::Ready(None) => {}
            other => panic!("unexpected outcome: {other:?}"),
        }
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn signal_unregistered_id_is_noop() {
        let manager = PendingResultManager::new();
        assert!(!manager.signal_ready("nobody-home", Some(sample_result())));
    }

    #[tokio::test]
    async fn duplicate_registration_rejected() {
        let manager = PendingResultManager::new();
        let _ticket = manager.register("q-3", 5).unwrap();
        assert!(matches!(
            manager.register("q-3", 5),
            Err(DqmError::DuplicatePendingResult { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_times_out_at_deadline() {
        let manager = PendingResultManager::new();
        let ticket = manager.register("q-4", 1).unwrap();
        match manager.wait(ticket).await {
            WaitOutcome::TimedOut => {}
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(manager.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_removes_only_expired() {
        let manager = PendingResultManager::new();
        let _short = manager.register("short", 1).unwrap();
        let _long = manager.register("long", 60).unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(manager.cleanup_expired(), 1);
        assert_eq!(manager.len(), 1);
        assert!(manager.status("long").is_some());
        assert!(manager.status("short").is_none());
    }

    #[tokio::test]
    async fn cancel_wakes_waiter() {
        let manager = Arc::new(PendingResultManager::new());
        let ticket = manager.register("q-5", 30).unwrap();

        let canceller = manager.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            assert!(canceller.cancel("q-5"));
        });

        match manager.wait(ticket).await {
            WaitOutcome::Cancelled => {}
            other => panic!("unexpected outcome: {other:?}"),
        }
        handle.await.unwrap();
    }
}
