use std::collections::HashMap;
use std::time::Duration;

use common_kafka::admin;
use common_kafka::config::KafkaConfig;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::Serialize;
use tracing::{debug, info};

/// Derived table created by the provisioning statement; its presence in
/// the broker metadata marks provisioning as already done.
pub const SUMMARY_TABLE: &str = "TURNSTILE_SUMMARY";

const KSQL_CONTENT_TYPE: &str = "application/vnd.ksql.v1+json";

/// A table over the raw turnstile topic, plus the per-station summary
/// computed from it.
const KSQL_STATEMENT: &str = "\
CREATE TABLE turnstile (
    station_id INTEGER, station_name VARCHAR, line VARCHAR
) WITH (
    KEY = 'station_id',
    KAFKA_TOPIC = 'transit.turnstile',
    VALUE_FORMAT = 'AVRO'
);
CREATE TABLE TURNSTILE_SUMMARY WITH (VALUE_FORMAT = 'JSON')
AS SELECT station_id, COUNT(station_id) AS count
FROM turnstile GROUP BY station_id;";

#[derive(Serialize)]
struct StatementRequest<'a> {
    ksql: &'a str,
    #[serde(rename = "streamsProperties")]
    streams_properties: HashMap<&'a str, &'a str>,
}

impl StatementRequest<'static> {
    fn provisioning() -> Self {
        Self {
            ksql: KSQL_STATEMENT,
            streams_properties: HashMap::from([("ksql.streams.auto.offset.reset", "earliest")]),
        }
    }
}

/// Answers whether a topic is currently present in the broker's metadata
/// catalog.
pub trait TopicCatalog {
    fn topic_exists(&self, topic: &str) -> anyhow::Result<bool>;
}

/// Catalog backed by a fresh admin metadata fetch per call.
pub struct AdminCatalog {
    kafka: KafkaConfig,
    timeout: Duration,
}

impl AdminCatalog {
    pub fn new(kafka: KafkaConfig, timeout: Duration) -> Self {
        Self { kafka, timeout }
    }
}

impl TopicCatalog for AdminCatalog {
    fn topic_exists(&self, topic: &str) -> anyhow::Result<bool> {
        Ok(admin::topic_exists(&self.kafka, topic, self.timeout)?)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// The summary table already exists; no statement was submitted.
    AlreadyExists,
    /// The statement was submitted and accepted by the engine.
    Created,
}

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("failed to probe topic metadata: {0}")]
    Catalog(#[source] anyhow::Error),
    #[error("ksql request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("ksql statement rejected with status {status}: {body}")]
    Rejected { status: StatusCode, body: String },
}

/// Ensures the summary table exists, submitting the provisioning
/// statement only when the metadata catalog does not know it yet. A
/// rejected statement is a hard failure; provisioning runs once at
/// deploy time and is not retried.
pub async fn execute_statement(
    catalog: &dyn TopicCatalog,
    client: &reqwest::Client,
    ksql_url: &str,
) -> Result<ProvisionOutcome, ProvisionError> {
    if catalog
        .topic_exists(SUMMARY_TABLE)
        .map_err(ProvisionError::Catalog)?
    {
        info!(table = SUMMARY_TABLE, "summary table already provisioned");
        return Ok(ProvisionOutcome::AlreadyExists);
    }

    debug!("executing ksql statement");
    let response = client
        .post(format!("{ksql_url}/ksql"))
        .json(&StatementRequest::provisioning())
        .header(CONTENT_TYPE, KSQL_CONTENT_TYPE)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ProvisionError::Rejected { status, body });
    }

    info!(table = SUMMARY_TABLE, "summary table provisioned");
    Ok(ProvisionOutcome::Created)
}
