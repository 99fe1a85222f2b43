//! Mock broker client for testing.
//!
//! Records every submission and resolves completion handlers on `poll` or
//! `drain`. Failure injection is configured up front by submission index.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::watch;

use super::{BrokerClient, BusError, DeliveryHandler, DeliveryOutcome, Result};

/// Partition reported for every acknowledged mock delivery.
pub const MOCK_PARTITION: i32 = 0;

/// One payload handed to the mock.
#[derive(Debug, Clone)]
pub struct Submission {
    pub topic: String,
    pub payload: Vec<u8>,
    pub at: Instant,
}

/// Mock broker client for testing.
#[derive(Default)]
pub struct MockBroker {
    submissions: Vec<Submission>,
    pending: Vec<(usize, String, DeliveryHandler)>,
    fail_delivery: HashSet<usize>,
    reject_submission: HashSet<usize>,
    unavailable: bool,
    unavailable_from: Option<usize>,
    stall_drain: bool,
    hold_until_drain: bool,
    reverse_order: bool,
    cancel_after: Option<(usize, watch::Sender<bool>)>,
    connects: usize,
    polls: usize,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report a delivery failure for the message at `index`.
    pub fn fail_delivery_of(mut self, index: usize) -> Self {
        self.fail_delivery.insert(index);
        self
    }

    /// Refuse the submission at `index` synchronously.
    pub fn reject_submission_of(mut self, index: usize) -> Self {
        self.reject_submission.insert(index);
        self
    }

    /// Behave as if no broker can be reached.
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    /// Accept `connect` but refuse every submission from `index` on as
    /// unreachable, as when the broker goes away mid-run.
    pub fn unavailable_from(mut self, index: usize) -> Self {
        self.unavailable_from = Some(index);
        self
    }

    /// Never complete a drain; it reports a timeout instead.
    pub fn stall_drain(mut self) -> Self {
        self.stall_drain = true;
        self
    }

    /// Keep all outcomes back until `drain`.
    pub fn hold_until_drain(mut self) -> Self {
        self.hold_until_drain = true;
        self
    }

    /// Resolve pending handlers newest first.
    pub fn acknowledge_in_reverse(mut self) -> Self {
        self.reverse_order = true;
        self
    }

    /// Flip `signal` to `true` once `count` messages have been submitted.
    pub fn cancel_after(mut self, count: usize, signal: watch::Sender<bool>) -> Self {
        self.cancel_after = Some((count, signal));
        self
    }

    pub fn submissions(&self) -> &[Submission] {
        &self.submissions
    }

    pub fn submitted_count(&self) -> usize {
        self.submissions.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn connect_count(&self) -> usize {
        self.connects
    }

    pub fn poll_count(&self) -> usize {
        self.polls
    }

    fn resolve_pending(&mut self) {
        let mut pending = std::mem::take(&mut self.pending);
        if self.reverse_order {
            pending.reverse();
        }

        for (index, topic, handler) in pending {
            let outcome = if self.fail_delivery.contains(&index) {
                DeliveryOutcome::Failed {
                    reason: format!("Mock delivery failure for message {}", index),
                }
            } else {
                DeliveryOutcome::Acknowledged {
                    topic,
                    partition: MOCK_PARTITION,
                }
            };
            handler(outcome);
        }
    }
}

#[async_trait]
impl BrokerClient for MockBroker {
    async fn connect(&mut self, _topic: &str) -> Result<()> {
        self.connects += 1;
        if self.unavailable {
            return Err(BusError::Unavailable("Mock broker unreachable".to_string()));
        }
        Ok(())
    }

    fn submit(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        on_delivery: DeliveryHandler,
    ) -> Result<()> {
        let lost = self
            .unavailable_from
            .is_some_and(|from| self.submissions.len() >= from);
        if self.unavailable || lost {
            return Err(BusError::Unavailable("Mock broker unreachable".to_string()));
        }

        // Rejected submissions still consume an index, as the publisher counts them.
        let index = self.submissions.len();
        self.submissions.push(Submission {
            topic: topic.to_string(),
            payload,
            at: Instant::now(),
        });

        if let Some((count, signal)) = &self.cancel_after {
            if self.submissions.len() == *count {
                let _ = signal.send(true);
            }
        }

        if self.reject_submission.contains(&index) {
            return Err(BusError::Rejected(format!(
                "Mock rejected message {}",
                index
            )));
        }

        self.pending.push((index, topic.to_string(), on_delivery));
        Ok(())
    }

    fn poll(&mut self) {
        self.polls += 1;
        if !self.hold_until_drain {
            self.resolve_pending();
        }
    }

    async fn drain(&mut self, _timeout: Duration) -> Result<()> {
        if self.stall_drain {
            return Err(BusError::FlushTimeout {
                pending: self.pending.len(),
            });
        }
        self.resolve_pending();
        Ok(())
    }
}
