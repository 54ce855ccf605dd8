use std::sync::Arc;

use common_kafka::consumer::DrainConsumer;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use turnstile_consumer::config::Config;
use turnstile_consumer::handler::TurnstileHandler;

fn setup_tracing() {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(log_layer).init();
}

async fn shutdown() {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");

    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .expect("failed to register SIGINT handler");

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };

    info!("shutting down gracefully...");
}

#[tokio::main]
async fn main() {
    setup_tracing();
    info!("starting turnstile consumer");

    let config = Config::init_with_defaults().expect("failed to load configuration from env");

    let consumer = DrainConsumer::new(&config.kafka, &config.consumer, Arc::new(TurnstileHandler))
        .expect("failed to create consumer");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown().await;
        shutdown_tx.send(true).ok();
    });

    let result = consumer.run(shutdown_rx).await;
    consumer.close();

    if let Err(e) = result {
        error!("consumer loop failed: {}", e);
        std::process::exit(1);
    }

    info!("exiting");
}
