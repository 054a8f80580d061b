//! # Configuration
//!
//! Environment-driven configuration for the controller and the broker
//! ingress. Ports, timeouts, and the ambient default project are read once
//! at startup; the core algorithms treat them as constants.

use std::time::Duration;

/// Default bound on a single decouple-sink publish, independent of the
/// inbound caller's own deadline.
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(30);

const DEFAULT_INGRESS_PORT: u16 = 8080;
const DEFAULT_METRICS_PORT: u16 = 9090;
const DEFAULT_PUBSUB_BASE_URL: &str = "https://pubsub.googleapis.com";
const DEFAULT_PUBLISHER_IMAGE: &str = "ghcr.io/octopilot/topic-publisher:latest";

/// Configuration for the topic controller process.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Ambient default project used when a Topic does not declare one.
    pub default_project: Option<String>,
    /// Image for the companion publisher workload.
    pub publisher_image: String,
    /// Port for the metrics/probe server.
    pub metrics_port: u16,
    /// Base URL of the Pub/Sub REST endpoint. Overridable for emulators.
    pub pubsub_base_url: String,
    /// Bearer token for the Pub/Sub REST endpoint, if the ambient
    /// environment does not provide credentials another way.
    pub pubsub_token: Option<String>,
}

impl ControllerConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            default_project: std::env::var("PROJECT_ID").ok(),
            publisher_image: std::env::var("PUBLISHER_IMAGE")
                .unwrap_or_else(|_| DEFAULT_PUBLISHER_IMAGE.to_string()),
            metrics_port: port_from_env("METRICS_PORT", DEFAULT_METRICS_PORT),
            pubsub_base_url: std::env::var("PUBSUB_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_PUBSUB_BASE_URL.to_string()),
            pubsub_token: std::env::var("PUBSUB_ACCESS_TOKEN").ok(),
        }
    }
}

/// Configuration for the broker ingress process.
#[derive(Debug, Clone)]
pub struct IngressConfig {
    /// Listener port for inbound event traffic.
    pub port: u16,
    /// Port for the metrics/probe server.
    pub metrics_port: u16,
    /// Fixed per-request bound on the downstream publish.
    pub publish_timeout: Duration,
    /// Base URL of the Pub/Sub REST endpoint.
    pub pubsub_base_url: String,
    /// Bearer token for the Pub/Sub REST endpoint.
    pub pubsub_token: Option<String>,
    /// Project hosting the decouple topics.
    pub project_id: Option<String>,
}

impl IngressConfig {
    #[must_use]
    pub fn from_env() -> Self {
        let publish_timeout = std::env::var("PUBLISH_TIMEOUT_SECONDS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(DEFAULT_PUBLISH_TIMEOUT, Duration::from_secs);
        Self {
            port: port_from_env("INGRESS_PORT", DEFAULT_INGRESS_PORT),
            metrics_port: port_from_env("METRICS_PORT", DEFAULT_METRICS_PORT),
            publish_timeout,
            pubsub_base_url: std::env::var("PUBSUB_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_PUBSUB_BASE_URL.to_string()),
            pubsub_token: std::env::var("PUBSUB_ACCESS_TOKEN").ok(),
            project_id: std::env::var("PROJECT_ID").ok(),
        }
    }
}

fn port_from_env(var: &str, default: u16) -> u16 {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse::<u16>().ok())
        .unwrap_or(default)
}
