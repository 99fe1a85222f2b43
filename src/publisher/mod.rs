//! Paced location publisher.
//!
//! Drives one publishing run: encode each coordinate, submit it to the broker
//! client, poll, pause for the interval, and drain once the route is done or
//! the run is cancelled. Delivery outcomes are recorded by submission index
//! because brokers may report them out of order.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::bus::{BrokerClient, BusError, DeliveryHandler, DeliveryOutcome};
use crate::coordinates::Coordinate;
use crate::event::{EncodeError, LocationEvent};

/// Default bound on the final drain.
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that abort a publishing run.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// Coordinate `index` could not be encoded. Earlier submissions were
    /// drained; `summary` holds their outcomes.
    #[error("Failed to serialize coordinate {index}: {source}")]
    Serialization {
        index: usize,
        #[source]
        source: EncodeError,
        summary: PublishSummary,
    },

    /// `summary` is `None` when the broker was unreachable before the first
    /// submission.
    #[error("Broker unavailable: {reason}")]
    BrokerUnavailable {
        reason: String,
        summary: Option<PublishSummary>,
    },

    #[error("Drain timed out with {pending} message(s) in flight")]
    FlushTimeout {
        pending: usize,
        summary: PublishSummary,
    },
}

impl PublishError {
    /// Outcomes of the messages submitted before the run failed.
    pub fn summary(&self) -> Option<&PublishSummary> {
        match self {
            PublishError::Serialization { summary, .. } => Some(summary),
            PublishError::BrokerUnavailable { summary, .. } => summary.as_ref(),
            PublishError::FlushTimeout { summary, .. } => Some(summary),
        }
    }
}

/// A message the broker did not accept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFailure {
    pub index: usize,
    pub reason: String,
}

/// Outcome counts of one publishing run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishSummary {
    /// Coordinates handed to the broker client, rejected ones included.
    pub submitted: usize,
    pub acknowledged: usize,
    pub failed: usize,
    /// Failures ordered by submission index.
    pub failures: Vec<DeliveryFailure>,
    /// The run stopped early on an external signal.
    pub cancelled: bool,
    /// Messages still in flight when the final drain timed out.
    pub undrained: Option<usize>,
}

impl PublishSummary {
    /// Submissions without an outcome. Only non-zero after a drain timeout.
    pub fn unresolved(&self) -> usize {
        self.submitted
            .saturating_sub(self.acknowledged)
            .saturating_sub(self.failed)
    }

    pub fn is_complete_success(&self) -> bool {
        self.failed == 0 && self.unresolved() == 0
    }
}

/// Outcomes keyed by submission index.
#[derive(Clone, Default)]
struct OutcomeLedger {
    outcomes: Arc<Mutex<BTreeMap<usize, DeliveryOutcome>>>,
}

impl OutcomeLedger {
    fn handler(&self, index: usize) -> DeliveryHandler {
        let ledger = self.clone();
        Box::new(move |outcome| ledger.record(index, outcome))
    }

    fn record(&self, index: usize, outcome: DeliveryOutcome) {
        match &outcome {
            DeliveryOutcome::Acknowledged { topic, partition } => {
                info!(index, topic = %topic, partition, "Delivered location event");
            }
            DeliveryOutcome::Failed { reason } => {
                warn!(index, reason = %reason, "Location event delivery failed");
            }
        }

        self.outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(index, outcome);
    }

    fn summarize(&self, submitted: usize, cancelled: bool) -> PublishSummary {
        let outcomes = self.outcomes.lock().unwrap_or_else(PoisonError::into_inner);

        let mut summary = PublishSummary {
            submitted,
            cancelled,
            ..PublishSummary::default()
        };
        for (&index, outcome) in outcomes.iter() {
            match outcome {
                DeliveryOutcome::Acknowledged { .. } => summary.acknowledged += 1,
                DeliveryOutcome::Failed { reason } => {
                    summary.failed += 1;
                    summary.failures.push(DeliveryFailure {
                        index,
                        reason: reason.clone(),
                    });
                }
            }
        }
        summary
    }
}

/// Error that stopped the submit loop, completed with the summary once the
/// drain is done.
enum Fatal {
    Serialization { index: usize, source: EncodeError },
    BrokerUnavailable(String),
}

impl Fatal {
    fn into_error(self, summary: PublishSummary) -> PublishError {
        match self {
            Fatal::Serialization { index, source } => PublishError::Serialization {
                index,
                source,
                summary,
            },
            Fatal::BrokerUnavailable(reason) => PublishError::BrokerUnavailable {
                reason,
                summary: Some(summary),
            },
        }
    }
}

/// Sleep for `interval` unless cancellation arrives first.
///
/// Returns `true` when the run should stop. A dropped sender means the run
/// can no longer be cancelled.
async fn pause(interval: Duration, cancel: &mut watch::Receiver<bool>) -> bool {
    if *cancel.borrow_and_update() {
        return true;
    }

    let sleep = tokio::time::sleep(interval);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return false,
            changed = cancel.changed() => match changed {
                Ok(()) if *cancel.borrow_and_update() => return true,
                Ok(()) => continue,
                Err(_) => {
                    (&mut sleep).await;
                    return false;
                }
            }
        }
    }
}

/// Publishes a route as a paced sequence of location events.
///
/// Owns its broker client exclusively; `publish` takes `&mut self`, so two
/// runs can never share the client.
pub struct LocationPublisher<B: BrokerClient> {
    client: B,
    flush_timeout: Duration,
}

impl<B: BrokerClient> LocationPublisher<B> {
    pub fn new(client: B) -> Self {
        Self {
            client,
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
        }
    }

    pub fn with_flush_timeout(mut self, flush_timeout: Duration) -> Self {
        self.flush_timeout = flush_timeout;
        self
    }

    pub fn client(&self) -> &B {
        &self.client
    }

    pub fn into_inner(self) -> B {
        self.client
    }

    /// Publish every coordinate to `topic`, one per `interval`.
    pub async fn publish<I>(
        &mut self,
        coordinates: I,
        topic: &str,
        interval: Duration,
    ) -> Result<PublishSummary, PublishError>
    where
        I: IntoIterator<Item = Coordinate>,
    {
        let (_keep_open, cancel) = watch::channel(false);
        self.publish_until(coordinates, topic, interval, cancel)
            .await
    }

    /// Like `publish`, stopping early once `cancel` becomes `true`.
    ///
    /// Cancellation is observed before each submission and during the pause.
    /// Messages already submitted are still drained.
    pub async fn publish_until<I>(
        &mut self,
        coordinates: I,
        topic: &str,
        interval: Duration,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<PublishSummary, PublishError>
    where
        I: IntoIterator<Item = Coordinate>,
    {
        self.client
            .connect(topic)
            .await
            .map_err(|e| PublishError::BrokerUnavailable {
                reason: e.to_string(),
                summary: None,
            })?;

        let ledger = OutcomeLedger::default();
        let mut submitted = 0;
        let mut cancelled = false;
        let mut fatal = None;
        let mut coordinates = coordinates.into_iter().enumerate().peekable();

        while let Some((index, coordinate)) = coordinates.next() {
            if *cancel.borrow_and_update() {
                cancelled = true;
                break;
            }

            let payload = match LocationEvent::from_coordinate(coordinate).and_then(|e| e.encode())
            {
                Ok(payload) => payload,
                Err(source) => {
                    fatal = Some(Fatal::Serialization { index, source });
                    break;
                }
            };

            match self.client.submit(topic, payload, ledger.handler(index)) {
                Ok(()) => {
                    debug!(index, lon = coordinate.lon, lat = coordinate.lat, "Submitted location");
                }
                Err(BusError::Unavailable(reason)) => {
                    fatal = Some(Fatal::BrokerUnavailable(reason));
                    break;
                }
                Err(e) => ledger.record(
                    index,
                    DeliveryOutcome::Failed {
                        reason: e.to_string(),
                    },
                ),
            }
            submitted += 1;

            self.client.poll();

            if coordinates.peek().is_some() && pause(interval, &mut cancel).await {
                cancelled = true;
                break;
            }
        }

        if cancelled {
            info!(submitted, "Publishing cancelled, draining submitted messages");
        }

        let drained = self.client.drain(self.flush_timeout).await;
        let mut summary = ledger.summarize(submitted, cancelled);
        if let Err(BusError::FlushTimeout { pending }) = &drained {
            summary.undrained = Some(*pending);
        }

        if let Some(fatal) = fatal {
            if let Err(e) = &drained {
                warn!(error = %e, "Drain after fatal error did not complete");
            }
            return Err(fatal.into_error(summary));
        }

        match drained {
            Ok(()) => {
                info!(
                    submitted = summary.submitted,
                    acknowledged = summary.acknowledged,
                    failed = summary.failed,
                    "Publishing finished"
                );
                Ok(summary)
            }
            Err(BusError::FlushTimeout { pending }) => {
                Err(PublishError::FlushTimeout { pending, summary })
            }
            Err(e) => Err(PublishError::BrokerUnavailable {
                reason: e.to_string(),
                summary: Some(summary),
            }),
        }
    }
}

#[cfg(test)]
mod tests;
