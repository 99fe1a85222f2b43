//! Kafka broker client implementation.
//!
//! Wraps an rdkafka `BaseProducer`. Each submission registers its completion
//! handler under a numeric token that travels with the message as the
//! delivery opaque; the producer context looks the handler up when librdkafka
//! reports the delivery.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::Message;
use rdkafka::producer::{BaseProducer, BaseRecord, DeliveryResult, Producer, ProducerContext};
use rdkafka::{ClientConfig, ClientContext};
use tracing::{debug, error, info, warn};

use super::{BrokerClient, BusError, DeliveryHandler, DeliveryOutcome, KafkaConfig, Result};

/// Producer context that routes delivery reports to registered handlers.
#[derive(Default)]
pub struct DeliveryContext {
    handlers: Mutex<HashMap<usize, DeliveryHandler>>,
}

impl DeliveryContext {
    fn register(&self, token: usize, handler: DeliveryHandler) {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token, handler);
    }

    fn take(&self, token: usize) -> Option<DeliveryHandler> {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&token)
    }

    fn pending(&self) -> usize {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl ClientContext for DeliveryContext {}

impl ProducerContext for DeliveryContext {
    type DeliveryOpaque = usize;

    fn delivery(&self, delivery_result: &DeliveryResult<'_>, token: usize) {
        let Some(handler) = self.take(token) else {
            warn!(token, "Delivery report for unknown message");
            return;
        };

        let outcome = match delivery_result {
            Ok(message) => DeliveryOutcome::Acknowledged {
                topic: message.topic().to_string(),
                partition: message.partition(),
            },
            Err((e, _)) => DeliveryOutcome::Failed {
                reason: e.to_string(),
            },
        };
        handler(outcome);
    }
}

/// Build the librdkafka producer configuration.
pub fn producer_config(config: &KafkaConfig) -> ClientConfig {
    let mut client = ClientConfig::new();
    client.set("bootstrap.servers", &config.bootstrap_servers);
    client.set("client.id", &config.client_id);
    client.set("message.timeout.ms", config.message_timeout_ms.to_string());
    client.set("acks", "all");
    client.set("enable.idempotence", "true");

    if let Some(ref protocol) = config.security_protocol {
        client.set("security.protocol", protocol);
    }

    if let Some(ref mechanism) = config.sasl_mechanism {
        client.set("sasl.mechanism", mechanism);
    }

    if let Some(ref username) = config.sasl_username {
        client.set("sasl.username", username);
    }

    if let Some(ref password) = config.sasl_password {
        client.set("sasl.password", password);
    }

    if let Some(ref ca_location) = config.ssl_ca_location {
        client.set("ssl.ca.location", ca_location);
    }

    client
}

/// Sort a synchronous produce error into fatal and per-message failures.
fn classify_send_error(e: KafkaError) -> BusError {
    match e.rdkafka_error_code() {
        Some(RDKafkaErrorCode::AllBrokersDown) | Some(RDKafkaErrorCode::BrokerTransportFailure) => {
            BusError::Unavailable(e.to_string())
        }
        _ => BusError::Rejected(e.to_string()),
    }
}

/// Kafka broker client.
///
/// Payloads are produced without a key, so librdkafka picks the partition.
pub struct KafkaBroker {
    producer: Arc<BaseProducer<DeliveryContext>>,
    config: KafkaConfig,
    next_token: usize,
}

impl KafkaBroker {
    /// Create the producer. Does not contact the brokers; see `connect`.
    pub fn new(config: KafkaConfig) -> Result<Self> {
        config.validate()?;

        let producer: BaseProducer<DeliveryContext> = producer_config(&config)
            .create_with_context(DeliveryContext::default())
            .map_err(|e| BusError::Config(format!("Failed to create Kafka producer: {}", e)))?;

        Ok(Self {
            producer: Arc::new(producer),
            config,
            next_token: 0,
        })
    }

    pub fn config(&self) -> &KafkaConfig {
        &self.config
    }

    /// Messages handed to librdkafka that have no outcome yet.
    pub fn in_flight(&self) -> usize {
        usize::try_from(self.producer.in_flight_count()).unwrap_or(0)
    }
}

#[async_trait]
impl BrokerClient for KafkaBroker {
    async fn connect(&mut self, topic: &str) -> Result<()> {
        let producer = Arc::clone(&self.producer);
        let topic_name = topic.to_string();
        let timeout = self.config.connect_timeout();

        let metadata = tokio::task::spawn_blocking(move || {
            producer
                .client()
                .fetch_metadata(Some(topic_name.as_str()), timeout)
        })
        .await
        .map_err(|e| BusError::Unavailable(format!("Metadata task failed: {}", e)))?
        .map_err(|e| {
            BusError::Unavailable(format!(
                "Failed to reach Kafka at {}: {}",
                self.config.bootstrap_servers, e
            ))
        })?;

        if metadata.brokers().is_empty() {
            return Err(BusError::Unavailable(format!(
                "No brokers reported by {}",
                self.config.bootstrap_servers
            )));
        }

        info!(
            bootstrap_servers = %self.config.bootstrap_servers,
            brokers = metadata.brokers().len(),
            topic = %topic,
            "Connected to Kafka"
        );
        Ok(())
    }

    fn submit(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        on_delivery: DeliveryHandler,
    ) -> Result<()> {
        let token = self.next_token;
        self.next_token += 1;

        let context = self.producer.context();
        context.register(token, on_delivery);

        let record: BaseRecord<'_, (), Vec<u8>, usize> =
            BaseRecord::with_opaque_to(topic, token).payload(&payload);

        if let Err((e, _)) = self.producer.send(record) {
            context.take(token);
            return Err(classify_send_error(e));
        }

        debug!(topic = %topic, token, bytes = payload.len(), "Queued location event");
        Ok(())
    }

    fn poll(&mut self) {
        self.producer.poll(Duration::ZERO);
    }

    async fn drain(&mut self, timeout: Duration) -> Result<()> {
        let producer = Arc::clone(&self.producer);

        let flushed = tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await
            .map_err(|e| BusError::Unavailable(format!("Flush task failed: {}", e)))?;

        match flushed {
            Ok(()) => Ok(()),
            Err(e) => {
                let pending = self.in_flight().max(self.producer.context().pending());
                error!(error = %e, pending, "Kafka flush did not complete");
                Err(BusError::FlushTimeout { pending })
            }
        }
    }
}
