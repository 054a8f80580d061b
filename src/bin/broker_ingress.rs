//! # Broker Ingress
//!
//! Front door of the eventing data plane. Accepts CloudEvents over HTTP on
//! `POST /{namespace}/{broker}`, resolves the target through the Topic
//! status the controller maintains, and forwards each event to the decouple
//! sink within a fixed deadline.

use anyhow::{Context, Result};
use pubsub_topic_controller::config::IngressConfig;
use pubsub_topic_controller::decouple::TopicDecoupleSink;
use pubsub_topic_controller::ingress::Handler;
use pubsub_topic_controller::metrics;
use pubsub_topic_controller::pubsub::http::HttpPubSubClient;
use pubsub_topic_controller::server::{start_server, ServerState};
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pubsub_topic_controller=info".into()),
        )
        .init();

    info!("Starting Broker Ingress");

    let config = IngressConfig::from_env();
    metrics::register_metrics()?;

    let server_state = ServerState::new();
    let probe_state = Arc::clone(&server_state);
    let metrics_port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = start_server(metrics_port, probe_state).await {
            error!("HTTP server error: {}", e);
        }
    });

    let project_id = config
        .project_id
        .as_deref()
        .context("PROJECT_ID must be set for the broker ingress")?;
    let pubsub = Arc::new(HttpPubSubClient::new(
        project_id,
        &config.pubsub_base_url,
        config.pubsub_token.clone(),
    ));

    let client = kube::Client::try_default().await?;
    let sink = Arc::new(TopicDecoupleSink::new(client, pubsub));
    let handler = Arc::new(Handler::from_config(sink, &config));

    server_state.mark_ready();

    handler.start(config.port).await?;

    info!("Broker ingress stopped");

    Ok(())
}
