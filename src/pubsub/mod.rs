//! # Pub/Sub Capability Interface
//!
//! Abstract interface for the messaging backend: existence check, create,
//! delete, publish. The reconciler and the decouple sink depend only on
//! these traits; [`http::HttpPubSubClient`] is the REST implementation.
//!
//! Clients are created per reconcile pass through [`PubSubClientFactory`]
//! (explicit dependency injection, never ambient state) and released on
//! every exit path by drop.

use crate::event::Event;
use async_trait::async_trait;
use thiserror::Error;

pub mod http;

/// Errors from the messaging backend, classified so callers can tell benign
/// races and absent resources from genuine failures.
#[derive(Debug, Error)]
pub enum PubSubError {
    /// Creation raced with a concurrent creator or a stale existence check.
    #[error("topic already exists")]
    AlreadyExists,
    /// The topic is absent in the backend.
    #[error("topic not found")]
    NotFound,
    /// Network, quota, or other retryable backend failure.
    #[error("backend request failed: {0}")]
    Transient(String),
}

impl PubSubError {
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists)
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

impl From<reqwest::Error> for PubSubError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transient(err.to_string())
    }
}

/// Client for topic lifecycle and publishing against one backend project.
#[async_trait]
pub trait PubSubClient: Send + Sync {
    /// Check whether the topic exists.
    async fn topic_exists(&self, topic_id: &str) -> Result<bool, PubSubError>;

    /// Create the topic. `AlreadyExists` is classified, not collapsed into a
    /// generic failure.
    async fn create_topic(&self, topic_id: &str) -> Result<(), PubSubError>;

    /// Delete the topic.
    async fn delete_topic(&self, topic_id: &str) -> Result<(), PubSubError>;

    /// Publish one event to the topic. Ack is `Ok`, nack is `Err`.
    async fn publish(&self, topic_id: &str, event: &Event) -> Result<(), PubSubError>;
}

/// Constructor for per-project clients, injected into the reconciler.
#[async_trait]
pub trait PubSubClientFactory: Send + Sync {
    async fn create(&self, project_id: &str) -> Result<Box<dyn PubSubClient>, PubSubError>;
}
