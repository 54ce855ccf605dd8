use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::{Message, OwnedMessage};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::{ConsumerConfig, KafkaConfig, OffsetReset, PollErrorPolicy};
use crate::metrics_consts::{
    CONSUMER_EMPTY_POLLS, CONSUMER_HANDLER_FAILURES, CONSUMER_MESSAGES_DELIVERED,
};
use crate::rebalance::{AssignmentContext, OffsetResetHandler};

/// Application-supplied message handler. Failures are not caught by the
/// consume loop; they propagate out of [`DrainConsumer::run`].
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: OwnedMessage) -> anyhow::Result<()>;
}

#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error("invalid consumer configuration: {0}")]
    Config(String),
    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("poll returned a broker error: {0}")]
    Poll(#[source] KafkaError),
    #[error("message handler failed: {0}")]
    Handler(#[source] anyhow::Error),
}

/// One drain step: whether the poll delivered a message or came up empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Drained {
    Delivered,
    Empty,
}

/// Owns a subscribed stream consumer and drives the drain-then-sleep
/// consume cycle.
///
/// The consumer is never shared: `run` borrows it and `close` consumes
/// it, so a close cannot race an in-flight poll.
pub struct DrainConsumer {
    consumer: StreamConsumer<AssignmentContext>,
    handler: Arc<dyn MessageHandler>,
    idle_sleep: Duration,
    poll_timeout: Duration,
    poll_error_policy: PollErrorPolicy,
    subscribed: watch::Receiver<bool>,
}

impl DrainConsumer {
    /// Builds the broker connection and subscribes to the configured
    /// topic or pattern. Assignment happens asynchronously through the
    /// group coordinator; no assignment error is reported here.
    pub fn new(
        kafka: &KafkaConfig,
        consumer_config: &ConsumerConfig,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Self, ConsumerError> {
        consumer_config
            .validate(kafka)
            .map_err(ConsumerError::Config)?;

        let mut client_config = kafka.client_config();
        client_config
            .set("group.id", &consumer_config.kafka_consumer_group)
            .set(
                "session.timeout.ms",
                kafka.kafka_session_timeout_ms.to_string(),
            )
            .set(
                "heartbeat.interval.ms",
                kafka.kafka_heartbeat_interval_ms.to_string(),
            )
            .set(
                "max.poll.interval.ms",
                kafka.kafka_max_poll_interval_ms.to_string(),
            );

        if consumer_config.kafka_consumer_offset_reset == OffsetReset::Earliest {
            client_config.set("auto.offset.reset", "earliest");
        }

        if consumer_config.kafka_consumer_avro {
            // Validation guarantees the registry URL is present; decoding
            // itself lives behind the message handler.
            info!(
                registry = kafka.kafka_schema_registry_url.as_deref().unwrap_or_default(),
                "consuming structured payloads"
            );
        }

        let (assignment_handler, subscribed) =
            OffsetResetHandler::new(consumer_config.kafka_consumer_offset_reset);
        let context = AssignmentContext::new(Arc::new(assignment_handler));

        let consumer: StreamConsumer<AssignmentContext> =
            client_config.create_with_context(context)?;
        consumer.subscribe(&[consumer_config.kafka_consumer_topic.as_str()])?;
        info!(
            topic = %consumer_config.kafka_consumer_topic,
            group = %consumer_config.kafka_consumer_group,
            "subscribed, awaiting partition assignment"
        );

        Ok(Self {
            consumer,
            handler,
            idle_sleep: consumer_config.idle_sleep(),
            poll_timeout: consumer_config.poll_timeout(),
            poll_error_policy: consumer_config.kafka_consumer_poll_error_policy,
            subscribed,
        })
    }

    /// Consumes until the shutdown signal flips. Each cycle drains the
    /// topic with no delay between messages, then sleeps for the idle
    /// interval; the sleep races the shutdown signal so a stop request
    /// never waits out a full interval.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), ConsumerError> {
        loop {
            if *shutdown.borrow() {
                info!("shutdown requested, stopping consumer loop");
                return Ok(());
            }

            let delivered = drain(move || self.poll_once()).await?;
            if delivered > 0 {
                debug!(delivered, "drained topic");
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("shutdown requested, stopping consumer loop");
                        return Ok(());
                    }
                }
                _ = tokio::time::sleep(self.idle_sleep) => {}
            }
        }
    }

    /// Polls for a single message within the configured timeout and
    /// dispatches it synchronously to the handler.
    async fn poll_once(&self) -> Result<Drained, ConsumerError> {
        let received = match tokio::time::timeout(self.poll_timeout, self.consumer.recv()).await {
            Err(_elapsed) => {
                metrics::counter!(CONSUMER_EMPTY_POLLS).increment(1);
                return Ok(Drained::Empty);
            }
            Ok(received) => received,
        };

        let message = match received {
            Ok(message) => message,
            Err(err) => return apply_poll_error_policy(self.poll_error_policy, err),
        };

        debug!(
            topic = message.topic(),
            partition = message.partition(),
            offset = message.offset(),
            "message received"
        );

        self.handler.handle(message.detach()).await.map_err(|err| {
            metrics::counter!(CONSUMER_HANDLER_FAILURES).increment(1);
            ConsumerError::Handler(err)
        })?;

        metrics::counter!(CONSUMER_MESSAGES_DELIVERED).increment(1);
        Ok(Drained::Delivered)
    }

    /// True once the group coordinator has delivered the first partition
    /// assignment.
    pub fn is_subscribed(&self) -> bool {
        *self.subscribed.borrow()
    }

    /// Waits for the first partition assignment. `run` does not wait on
    /// this; callers that want to hold off polling until the group has
    /// settled can await it explicitly.
    pub async fn subscribed(&self) {
        let mut subscribed = self.subscribed.clone();
        if subscribed.wait_for(|ready| *ready).await.is_err() {
            warn!("subscription state channel closed before first assignment");
        }
    }

    /// Releases the broker connection. Taking the consumer by value makes
    /// a close concurrent with an in-flight poll impossible.
    pub fn close(self) {
        info!("closing consumer");
        self.consumer.unsubscribe();
    }
}

/// Inner drain loop: keep polling with no delay while messages are
/// delivered, stop at the first empty poll. Returns the number of
/// messages delivered.
async fn drain<F, Fut>(mut poll_once: F) -> Result<u64, ConsumerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Drained, ConsumerError>>,
{
    let mut delivered = 0;
    loop {
        match poll_once().await? {
            Drained::Delivered => delivered += 1,
            Drained::Empty => return Ok(delivered),
        }
    }
}

fn apply_poll_error_policy(
    policy: PollErrorPolicy,
    err: KafkaError,
) -> Result<Drained, ConsumerError> {
    match policy {
        PollErrorPolicy::Fatal => Err(ConsumerError::Poll(err)),
        PollErrorPolicy::Retry => {
            warn!("poll returned a broker error, retrying next cycle: {}", err);
            Ok(Drained::Empty)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdkafka::error::RDKafkaErrorCode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct NoopHandler;

    #[async_trait]
    impl MessageHandler for NoopHandler {
        async fn handle(&self, _message: OwnedMessage) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn kafka_config() -> KafkaConfig {
        KafkaConfig {
            kafka_hosts: "localhost:9092".to_string(),
            kafka_tls: false,
            kafka_session_timeout_ms: 20000,
            kafka_heartbeat_interval_ms: 1500,
            kafka_max_poll_interval_ms: 60000,
            kafka_schema_registry_url: None,
        }
    }

    fn consumer_config() -> ConsumerConfig {
        ConsumerConfig {
            kafka_consumer_group: "transit-consumers".to_string(),
            kafka_consumer_topic: "^transit\\.turnstile".to_string(),
            kafka_consumer_offset_reset: OffsetReset::Earliest,
            kafka_consumer_avro: false,
            kafka_consumer_idle_sleep_ms: 10,
            kafka_consumer_poll_timeout_ms: 10,
            kafka_consumer_poll_error_policy: PollErrorPolicy::Fatal,
        }
    }

    fn broker_error() -> KafkaError {
        KafkaError::MessageConsumption(RDKafkaErrorCode::BrokerTransportFailure)
    }

    #[tokio::test]
    async fn drain_keeps_polling_until_the_first_empty_poll() {
        let outcomes = Mutex::new(vec![
            Ok(Drained::Delivered),
            Ok(Drained::Delivered),
            Ok(Drained::Delivered),
            Ok(Drained::Empty),
        ]);
        let polls = AtomicUsize::new(0);

        let delivered = drain(|| {
            polls.fetch_add(1, Ordering::SeqCst);
            let outcome = outcomes.lock().unwrap().remove(0);
            async move { outcome }
        })
        .await
        .unwrap();

        assert_eq!(delivered, 3);
        assert_eq!(polls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn drain_returns_zero_for_an_idle_topic() {
        let delivered = drain(|| async { Ok(Drained::Empty) }).await.unwrap();
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn drain_surfaces_poll_errors_distinct_from_empty() {
        let outcomes = Mutex::new(vec![
            Ok(Drained::Delivered),
            Err(ConsumerError::Poll(broker_error())),
        ]);

        let result = drain(|| {
            let outcome = outcomes.lock().unwrap().remove(0);
            async move { outcome }
        })
        .await;

        match result {
            Err(ConsumerError::Poll(_)) => {}
            other => panic!("expected a poll error, got {other:?}"),
        }
    }

    #[test]
    fn fatal_policy_raises_broker_errors() {
        let result = apply_poll_error_policy(PollErrorPolicy::Fatal, broker_error());
        assert!(matches!(result, Err(ConsumerError::Poll(_))));
    }

    #[test]
    fn retry_policy_downgrades_broker_errors_to_an_empty_cycle() {
        let result = apply_poll_error_policy(PollErrorPolicy::Retry, broker_error());
        assert!(matches!(result, Ok(Drained::Empty)));
    }

    #[tokio::test]
    async fn run_stops_at_the_cycle_boundary_once_shutdown_is_signalled() {
        let consumer =
            DrainConsumer::new(&kafka_config(), &consumer_config(), Arc::new(NoopHandler))
                .expect("consumer creation does not require a live broker");
        assert!(!consumer.is_subscribed());

        let (shutdown_tx, shutdown_rx) = watch::channel(true);
        consumer.run(shutdown_rx).await.unwrap();
        drop(shutdown_tx);

        consumer.close();
    }
}
