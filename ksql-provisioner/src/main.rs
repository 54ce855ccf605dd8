use envconfig::Envconfig;
use tracing::{error, info};

use ksql_provisioner::config::Config;
use ksql_provisioner::statement::{execute_statement, AdminCatalog, ProvisionOutcome};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("failed to load configuration from env");

    let catalog = AdminCatalog::new(config.kafka.clone(), config.admin_timeout());
    let client = reqwest::Client::new();

    match execute_statement(&catalog, &client, &config.ksql_url).await {
        Ok(ProvisionOutcome::AlreadyExists) => info!("summary table already exists, nothing to do"),
        Ok(ProvisionOutcome::Created) => info!("summary table created"),
        Err(e) => {
            error!("provisioning failed: {}", e);
            std::process::exit(1);
        }
    }
}
