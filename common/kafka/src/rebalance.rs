use std::sync::Arc;

use rdkafka::consumer::{BaseConsumer, Consumer, ConsumerContext};
use rdkafka::types::RDKafkaRespErr;
use rdkafka::{ClientContext, Offset, TopicPartitionList};
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::config::OffsetReset;

/// Capability invoked on every partition assignment, before the
/// assignment is committed back to the client. Implementations may
/// rewrite the offsets in place.
pub trait AssignmentHandler: Send + Sync {
    fn on_assign(&self, assignment: &mut TopicPartitionList);
}

/// Applies the configured offset-reset policy to each assignment and
/// flips the subscription flag once the first assignment arrives.
///
/// Every invocation applies the same policy from configuration, so
/// repeated rebalances are deterministic.
pub struct OffsetResetHandler {
    offset_reset: OffsetReset,
    subscribed: watch::Sender<bool>,
}

impl OffsetResetHandler {
    pub fn new(offset_reset: OffsetReset) -> (Self, watch::Receiver<bool>) {
        let (subscribed, subscribed_rx) = watch::channel(false);
        (
            Self {
                offset_reset,
                subscribed,
            },
            subscribed_rx,
        )
    }
}

impl AssignmentHandler for OffsetResetHandler {
    fn on_assign(&self, assignment: &mut TopicPartitionList) {
        if self.offset_reset == OffsetReset::Earliest {
            debug!(
                partitions = assignment.count(),
                "rewinding assigned partitions to the beginning"
            );
            if let Err(e) = assignment.set_all_offsets(Offset::Beginning) {
                error!("failed to rewind assigned partitions: {}", e);
            }
        }

        self.subscribed.send_replace(true);
    }
}

/// Consumer context that routes librdkafka's rebalance callbacks through
/// an [`AssignmentHandler`].
///
/// The callback runs on the client's rebalance path, not on the async
/// runtime, which is why the handler is held behind an `Arc` and the
/// subscription flag lives in a watch channel.
pub struct AssignmentContext {
    handler: Arc<dyn AssignmentHandler>,
}

impl AssignmentContext {
    pub fn new(handler: Arc<dyn AssignmentHandler>) -> Self {
        Self { handler }
    }
}

impl ClientContext for AssignmentContext {}

impl ConsumerContext for AssignmentContext {
    fn rebalance(
        &self,
        base_consumer: &BaseConsumer<Self>,
        err: RDKafkaRespErr,
        tpl: &mut TopicPartitionList,
    ) {
        match err {
            RDKafkaRespErr::RD_KAFKA_RESP_ERR__ASSIGN_PARTITIONS => {
                self.handler.on_assign(tpl);
                info!(partitions = tpl.count(), "partitions assigned");
                if let Err(e) = base_consumer.assign(tpl) {
                    error!("failed to accept partition assignment: {}", e);
                }
            }
            RDKafkaRespErr::RD_KAFKA_RESP_ERR__REVOKE_PARTITIONS => {
                info!(partitions = tpl.count(), "partitions revoked");
                if let Err(e) = base_consumer.unassign() {
                    error!("failed to release revoked partitions: {}", e);
                }
            }
            other => {
                error!("rebalance protocol error: {:?}", other);
            }
        }
    }
}
