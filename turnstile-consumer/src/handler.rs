use anyhow::Context;
use async_trait::async_trait;
use common_kafka::consumer::MessageHandler;
use rdkafka::message::{Message, OwnedMessage};
use serde::Deserialize;
use tracing::debug;

use crate::metrics_consts::TURNSTILE_ENTRIES;

/// A single turnstile passage reported by a station.
#[derive(Debug, Deserialize)]
pub struct TurnstileEvent {
    pub station_id: i64,
    pub station_name: String,
    pub line: String,
}

/// Counts turnstile entries per line. Decode failures propagate out of
/// the consume loop; there is no skip or dead-letter policy.
pub struct TurnstileHandler;

#[async_trait]
impl MessageHandler for TurnstileHandler {
    async fn handle(&self, message: OwnedMessage) -> anyhow::Result<()> {
        let payload = message
            .payload()
            .context("turnstile message without a payload")?;
        let event: TurnstileEvent =
            serde_json::from_slice(payload).context("malformed turnstile event")?;

        metrics::counter!(TURNSTILE_ENTRIES, "line" => event.line.clone()).increment(1);
        debug!(
            station_id = event.station_id,
            station = %event.station_name,
            line = %event.line,
            "turnstile entry"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdkafka::Timestamp;

    fn message(payload: Option<Vec<u8>>) -> OwnedMessage {
        OwnedMessage::new(
            payload,
            None,
            "transit.turnstile".to_string(),
            Timestamp::NotAvailable,
            0,
            0,
            None,
        )
    }

    #[tokio::test]
    async fn handles_a_well_formed_event() {
        let payload = serde_json::json!({
            "station_id": 40380,
            "station_name": "Clark/Lake",
            "line": "blue",
        });
        let handler = TurnstileHandler;

        let result = handler
            .handle(message(Some(payload.to_string().into_bytes())))
            .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn rejects_a_malformed_payload() {
        let handler = TurnstileHandler;

        let result = handler.handle(message(Some(b"not json".to_vec()))).await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn rejects_a_missing_payload() {
        let handler = TurnstileHandler;

        let result = handler.handle(message(None)).await;

        assert!(result.is_err());
    }
}
