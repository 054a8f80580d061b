//! # Pub/Sub Topic Controller
//!
//! A Kubernetes controller that reconciles `Topic` custom resources against
//! a Pub/Sub backend.
//!
//! ## Overview
//!
//! 1. **Watching Topics** - Monitors `Topic` resources across all namespaces
//! 2. **Topic lifecycle** - Creates the backing topic (policy permitting),
//!    verifies pre-existing ones, and deletes provisioned topics through a
//!    finalizer
//! 3. **Publisher workload** - Deploys and converges the companion publisher
//!    Deployment and Service, owned via owner references
//! 4. **Status** - Maintains the condition set, resolved identities, and the
//!    publisher address consumed by the broker ingress
//! 5. **Prometheus metrics** - Exposes metrics for monitoring alongside
//!    liveness and readiness probes

use anyhow::Result;
use futures::StreamExt;
use kube::{Api, Client};
use kube_runtime::{watcher, Controller};
use pubsub_topic_controller::config::ControllerConfig;
use pubsub_topic_controller::pubsub::http::HttpPubSubClientFactory;
use pubsub_topic_controller::reconciler::{self, TopicReconciler};
use pubsub_topic_controller::server::{start_server, ServerState};
use pubsub_topic_controller::{metrics, Topic};
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

    info!("Starting Pub/Sub Topic Controller");

    let config = ControllerConfig::from_env();
    metrics::register_metrics()?;

    let server_state = ServerState::new();
    let probe_state = Arc::clone(&server_state);
    let metrics_port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = start_server(metrics_port, probe_state).await {
            error!("HTTP server error: {}", e);
        }
    });

    let client = Client::try_default().await?;

    // Watch all namespaces so Topics can live next to the workloads they
    // serve.
    let topics: Api<Topic> = Api::all(client.clone());

    let factory = Arc::new(HttpPubSubClientFactory::new(
        &config.pubsub_base_url,
        config.pubsub_token.clone(),
    ));
    let ctx = Arc::new(TopicReconciler {
        client,
        factory,
        config,
    });

    server_state.mark_ready();

    Controller::new(topics, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconciler::reconcile, reconciler::error_policy, ctx)
        .for_each(|_| std::future::ready(()))
        .await;

    info!("Controller stopped");

    Ok(())
}
