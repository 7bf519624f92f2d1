use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;
use wamp_topic_client::{Config, ConnectionStatus, Envelope, Registry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "debug".into()))
        .init();

    let url = std::env::var("WAMP_URL").unwrap_or_else(|_| "ws://localhost:8080".to_owned());
    let registry = Registry::default().with_default_url(url);

    let client = registry.get_or_create(
        Config::builder()
            .ping_channel("app/ping")
            .ping_interval(Duration::from_secs(5))
            .session_timeout(Duration::from_secs(10))
            .build(),
    )?;

    client.wait_for_status(ConnectionStatus::Connected).await?;
    info!(url = %client.url(), "Connected");

    let first = client.subscribe("app/chat", |topic, payload| {
        info!(%topic, message = %payload.message, extra = ?payload.extra, "Received");
    });
    client.publish("app/chat", Envelope::new("hello").with("from", "demo"));

    if tokio::time::timeout(Duration::from_secs(30), first).await.unwrap_or(false) {
        info!("First message received");
    }

    registry.destroy_all();
    Ok(())
}
