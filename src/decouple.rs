//! # Decouple Sink
//!
//! Forwarding target for the broker ingress. Resolves a logical
//! `(namespace, broker)` pair to the Pub/Sub topic the reconciler
//! provisioned and publishes events into it.
//!
//! Resolution happens at request time against the Topic resource's status so
//! the sink always reflects the latest reconciled state; nothing is cached
//! across requests. A missing resource, an unset topic ID, or a topic that
//! was deleted out-of-band all surface as [`SinkError::NotFound`] rather
//! than publishing to a stale identity.

use crate::event::Event;
use crate::pubsub::{PubSubClient, PubSubError};
use crate::Topic;
use async_trait::async_trait;
use kube::{Api, Client};
use std::sync::Arc;
use thiserror::Error;

/// Why an event could not be handed to the decoupling layer.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The referenced broker has no provisioned topic (reconciliation not
    /// yet complete, or the resource was deleted).
    #[error("no provisioned topic for {namespace}/{broker}")]
    NotFound { namespace: String, broker: String },
    /// Resolving the Topic resource failed for a reason other than absence.
    #[error("failed to resolve target: {0}")]
    Resolve(#[source] kube::Error),
    /// The backend nacked or errored on publish.
    #[error("publish failed: {0}")]
    Publish(#[source] PubSubError),
}

/// Sends events from the broker ingress to the decoupling layer.
#[async_trait]
pub trait DecoupleSink: Send + Sync {
    async fn send(&self, namespace: &str, broker: &str, event: &Event) -> Result<(), SinkError>;
}

/// Resolves `(namespace, broker)` through the Kubernetes API and publishes
/// with a shared backend client. Safe for concurrent use: per-request state
/// is local, the shared pieces are read-only.
pub struct TopicDecoupleSink {
    client: Client,
    pubsub: Arc<dyn PubSubClient>,
}

impl TopicDecoupleSink {
    #[must_use]
    pub fn new(client: Client, pubsub: Arc<dyn PubSubClient>) -> Self {
        Self { client, pubsub }
    }

    async fn resolve_topic_id(&self, namespace: &str, broker: &str) -> Result<String, SinkError> {
        let not_found = || SinkError::NotFound {
            namespace: namespace.to_string(),
            broker: broker.to_string(),
        };

        let topics: Api<Topic> = Api::namespaced(self.client.clone(), namespace);
        let topic = match topics.get(broker).await {
            Ok(topic) => topic,
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => return Err(not_found()),
            Err(e) => return Err(SinkError::Resolve(e)),
        };

        topic
            .status
            .and_then(|status| status.topic_id)
            .filter(|id| !id.is_empty())
            .ok_or_else(not_found)
    }
}

#[async_trait]
impl DecoupleSink for TopicDecoupleSink {
    async fn send(&self, namespace: &str, broker: &str, event: &Event) -> Result<(), SinkError> {
        let topic_id = self.resolve_topic_id(namespace, broker).await?;

        match self.pubsub.publish(&topic_id, event).await {
            Ok(()) => Ok(()),
            // Topic vanished between resolution and publish; still not-found
            // from the caller's perspective.
            Err(PubSubError::NotFound) => Err(SinkError::NotFound {
                namespace: namespace.to_string(),
                broker: broker.to_string(),
            }),
            Err(e) => Err(SinkError::Publish(e)),
        }
    }
}
