use std::time::Duration;

use rdkafka::admin::AdminClient;
use rdkafka::client::DefaultClientContext;
use rdkafka::error::KafkaError;
use rdkafka::util::Timeout;
use tracing::debug;

use crate::config::KafkaConfig;

/// Checks whether a topic currently exists in the broker's metadata.
///
/// Opens a short-lived admin connection and fetches a fresh metadata
/// snapshot on every call; nothing is cached between calls. Connection
/// failures and timeouts surface as errors rather than being reported as
/// absence.
pub fn topic_exists(
    config: &KafkaConfig,
    topic: &str,
    timeout: Duration,
) -> Result<bool, KafkaError> {
    let admin: AdminClient<DefaultClientContext> = config.client_config().create()?;
    let metadata = admin.inner().fetch_metadata(None, Timeout::from(timeout))?;

    let found = snapshot_contains(metadata.topics().iter().map(|t| t.name()), topic);
    debug!(topic, found, "probed topic metadata");
    Ok(found)
}

fn snapshot_contains<'a>(names: impl IntoIterator<Item = &'a str>, topic: &str) -> bool {
    names.into_iter().any(|name| name == topic)
}
