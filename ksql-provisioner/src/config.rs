use std::time::Duration;

use common_kafka::config::KafkaConfig;
use envconfig::Envconfig;

#[derive(Envconfig, Debug, Clone)]
pub struct Config {
    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    #[envconfig(from = "KSQL_URL", default = "http://localhost:8088")]
    pub ksql_url: String,

    #[envconfig(from = "ADMIN_TIMEOUT_MS", default = "5000")]
    pub admin_timeout_ms: u64,
}

impl Config {
    pub fn admin_timeout(&self) -> Duration {
        Duration::from_millis(self.admin_timeout_ms)
    }
}
