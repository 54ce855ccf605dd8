use std::str::FromStr;
use std::time::Duration;

use envconfig::Envconfig;
use rdkafka::ClientConfig;

#[derive(Envconfig, Debug, Clone)]
pub struct KafkaConfig {
    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    #[envconfig(default = "20000")]
    pub kafka_session_timeout_ms: u32,

    #[envconfig(default = "1500")]
    pub kafka_heartbeat_interval_ms: u32,

    #[envconfig(default = "60000")]
    pub kafka_max_poll_interval_ms: u32,

    // Only consulted by consumers running in avro mode
    pub kafka_schema_registry_url: Option<String>,
}

impl KafkaConfig {
    /// Client options shared by consumers and admin clients.
    pub fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", &self.kafka_hosts);

        if self.kafka_tls {
            config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        config
    }
}

/// What to do with a partition's read position when the group has no
/// committed offset for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetReset {
    /// Rewind to the beginning of the partition on every assignment.
    Earliest,
    /// Leave the client's own reset behavior in place.
    Default,
}

impl FromStr for OffsetReset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "earliest" => Ok(OffsetReset::Earliest),
            "default" => Ok(OffsetReset::Default),
            other => Err(format!("unknown offset reset policy: {other}")),
        }
    }
}

/// What to do when a poll surfaces a broker-reported error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollErrorPolicy {
    /// Surface the error and terminate the consume loop.
    Fatal,
    /// Log the error and treat the cycle as drained.
    Retry,
}

impl FromStr for PollErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fatal" => Ok(PollErrorPolicy::Fatal),
            "retry" => Ok(PollErrorPolicy::Retry),
            other => Err(format!("unknown poll error policy: {other}")),
        }
    }
}

#[derive(Envconfig, Debug, Clone)]
pub struct ConsumerConfig {
    pub kafka_consumer_group: String,

    // A literal topic name, or a pattern when prefixed with '^'
    pub kafka_consumer_topic: String,

    #[envconfig(default = "default")]
    pub kafka_consumer_offset_reset: OffsetReset,

    #[envconfig(default = "false")]
    pub kafka_consumer_avro: bool,

    #[envconfig(default = "1000")]
    pub kafka_consumer_idle_sleep_ms: u64,

    #[envconfig(default = "100")]
    pub kafka_consumer_poll_timeout_ms: u64,

    #[envconfig(default = "fatal")]
    pub kafka_consumer_poll_error_policy: PollErrorPolicy,
}

impl ConsumerConfig {
    /// Because the group and topic are so application specific, we can't
    /// set good defaults in the derive macro, so we expose a way for
    /// services to set them here before init'ing their main config struct
    pub fn set_defaults(consumer_group: &str, consumer_topic: &str) {
        if std::env::var("KAFKA_CONSUMER_GROUP").is_err() {
            std::env::set_var("KAFKA_CONSUMER_GROUP", consumer_group);
        };
        if std::env::var("KAFKA_CONSUMER_TOPIC").is_err() {
            std::env::set_var("KAFKA_CONSUMER_TOPIC", consumer_topic);
        };
    }

    pub fn validate(&self, kafka: &KafkaConfig) -> Result<(), String> {
        if self.kafka_consumer_group.is_empty() {
            return Err("consumer group cannot be empty".to_string());
        }

        if self.kafka_consumer_topic.is_empty() {
            return Err("consumer topic cannot be empty".to_string());
        }

        if self.kafka_consumer_avro && kafka.kafka_schema_registry_url.is_none() {
            return Err(
                "avro consumers require KAFKA_SCHEMA_REGISTRY_URL to be set".to_string(),
            );
        }

        Ok(())
    }

    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.kafka_consumer_idle_sleep_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.kafka_consumer_poll_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kafka_config(schema_registry_url: Option<String>) -> KafkaConfig {
        KafkaConfig {
            kafka_hosts: "localhost:9092".to_string(),
            kafka_tls: false,
            kafka_session_timeout_ms: 20000,
            kafka_heartbeat_interval_ms: 1500,
            kafka_max_poll_interval_ms: 60000,
            kafka_schema_registry_url: schema_registry_url,
        }
    }

    fn consumer_config() -> ConsumerConfig {
        ConsumerConfig {
            kafka_consumer_group: "transit-consumers".to_string(),
            kafka_consumer_topic: "^transit\\.turnstile".to_string(),
            kafka_consumer_offset_reset: OffsetReset::Default,
            kafka_consumer_avro: false,
            kafka_consumer_idle_sleep_ms: 1000,
            kafka_consumer_poll_timeout_ms: 100,
            kafka_consumer_poll_error_policy: PollErrorPolicy::Fatal,
        }
    }

    #[test]
    fn offset_reset_parses_both_policies() {
        assert_eq!("earliest".parse::<OffsetReset>(), Ok(OffsetReset::Earliest));
        assert_eq!("default".parse::<OffsetReset>(), Ok(OffsetReset::Default));
        assert!("latest".parse::<OffsetReset>().is_err());
    }

    #[test]
    fn poll_error_policy_parses_both_policies() {
        assert_eq!("fatal".parse::<PollErrorPolicy>(), Ok(PollErrorPolicy::Fatal));
        assert_eq!("retry".parse::<PollErrorPolicy>(), Ok(PollErrorPolicy::Retry));
        assert!("ignore".parse::<PollErrorPolicy>().is_err());
    }

    #[test]
    fn valid_config_passes_validation() {
        assert!(consumer_config().validate(&kafka_config(None)).is_ok());
    }

    #[test]
    fn avro_mode_requires_a_schema_registry() {
        let mut config = consumer_config();
        config.kafka_consumer_avro = true;

        assert!(config.validate(&kafka_config(None)).is_err());
        assert!(config
            .validate(&kafka_config(Some("http://localhost:8081".to_string())))
            .is_ok());
    }

    #[test]
    fn empty_group_or_topic_is_rejected() {
        let mut config = consumer_config();
        config.kafka_consumer_group = String::new();
        assert!(config.validate(&kafka_config(None)).is_err());

        let mut config = consumer_config();
        config.kafka_consumer_topic = String::new();
        assert!(config.validate(&kafka_config(None)).is_err());
    }
}
