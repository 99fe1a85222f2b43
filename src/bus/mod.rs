//! Broker client abstraction for location delivery.
//!
//! This module contains:
//! - `BrokerClient` trait: submit / poll / drain against a message broker
//! - `DeliveryOutcome`: per-message result reported by the broker
//! - Broker configuration types
//! - Implementations: Kafka, Mock

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

// Implementation modules
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod mock;

// Re-exports
#[cfg(feature = "kafka")]
pub use kafka::KafkaBroker;
pub use mock::MockBroker;

// ============================================================================
// Traits
// ============================================================================

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    #[error("Message rejected: {0}")]
    Rejected(String),

    #[error("Drain timed out with {pending} message(s) still in flight")]
    FlushTimeout { pending: usize },

    #[error("Invalid broker configuration: {0}")]
    Config(String),
}

/// Final state of one submitted message, as reported by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The broker durably accepted the message.
    Acknowledged { topic: String, partition: i32 },
    /// The broker gave up on the message.
    Failed { reason: String },
}

impl DeliveryOutcome {
    pub fn is_acknowledged(&self) -> bool {
        matches!(self, DeliveryOutcome::Acknowledged { .. })
    }
}

/// Completion handler invoked exactly once with a message's outcome.
pub type DeliveryHandler = Box<dyn FnOnce(DeliveryOutcome) + Send + 'static>;

/// Capability required of a message broker binding.
///
/// Implementations:
/// - `KafkaBroker`: Apache Kafka via librdkafka
/// - `MockBroker`: In-memory fake for testing
#[async_trait]
pub trait BrokerClient: Send {
    /// Verify that the broker is reachable and serves `topic`.
    ///
    /// Fails with `BusError::Unavailable` when no connection can be made.
    async fn connect(&mut self, topic: &str) -> Result<()>;

    /// Hand one payload to the client for asynchronous delivery.
    ///
    /// On `Ok`, `on_delivery` is invoked later from `poll` or `drain`.
    /// On `Err`, the handler is dropped without being called.
    fn submit(&mut self, topic: &str, payload: Vec<u8>, on_delivery: DeliveryHandler)
        -> Result<()>;

    /// Run handlers for deliveries that have already completed. Never blocks.
    fn poll(&mut self);

    /// Wait until every submitted message has an outcome, or `timeout` elapses.
    async fn drain(&mut self, timeout: Duration) -> Result<()>;
}

// ============================================================================
// Configuration
// ============================================================================

/// Kafka-specific configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    /// Kafka bootstrap servers (comma-separated).
    pub bootstrap_servers: String,
    /// Client identifier reported to the brokers.
    pub client_id: String,
    /// Local delivery timeout for a single message.
    pub message_timeout_ms: u64,
    /// Timeout for the initial metadata request used as a reachability check.
    pub connect_timeout_ms: u64,
    /// SASL username (optional, for authenticated clusters).
    pub sasl_username: Option<String>,
    /// SASL password (optional, for authenticated clusters).
    pub sasl_password: Option<String>,
    /// SASL mechanism (PLAIN, SCRAM-SHA-256, SCRAM-SHA-512).
    pub sasl_mechanism: Option<String>,
    /// Security protocol (PLAINTEXT, SSL, SASL_PLAINTEXT, SASL_SSL).
    pub security_protocol: Option<String>,
    /// SSL CA certificate path (for SSL connections).
    pub ssl_ca_location: Option<String>,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            client_id: "truckfeed".to_string(),
            message_timeout_ms: 5000,
            connect_timeout_ms: 5000,
            sasl_username: None,
            sasl_password: None,
            sasl_mechanism: None,
            security_protocol: None,
            ssl_ca_location: None,
        }
    }
}

impl KafkaConfig {
    /// Create config pointing at the given bootstrap servers.
    pub fn new(bootstrap_servers: impl Into<String>) -> Self {
        Self {
            bootstrap_servers: bootstrap_servers.into(),
            ..Self::default()
        }
    }

    /// Add SASL authentication.
    pub fn with_sasl(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
        mechanism: impl Into<String>,
    ) -> Self {
        self.sasl_username = Some(username.into());
        self.sasl_password = Some(password.into());
        self.sasl_mechanism = Some(mechanism.into());
        self.security_protocol = Some("SASL_SSL".to_string());
        self
    }

    /// Set security protocol.
    pub fn with_security_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.security_protocol = Some(protocol.into());
        self
    }

    /// Set SSL CA certificate location.
    pub fn with_ssl_ca(mut self, ca_location: impl Into<String>) -> Self {
        self.ssl_ca_location = Some(ca_location.into());
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Reject settings librdkafka would only complain about at connect time.
    pub fn validate(&self) -> Result<()> {
        if self.bootstrap_servers.trim().is_empty() {
            return Err(BusError::Config(
                "bootstrap_servers must not be empty".to_string(),
            ));
        }
        if self.message_timeout_ms == 0 {
            return Err(BusError::Config(
                "message_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.sasl_username.is_some() != self.sasl_password.is_some() {
            return Err(BusError::Config(
                "sasl_username and sasl_password must be set together".to_string(),
            ));
        }
        Ok(())
    }
}
