//! Pub/Sub REST client
//!
//! Native REST implementation of [`PubSubClient`] against the Pub/Sub API v1.
//! The base URL is configurable so tests and emulators can point it at a
//! local endpoint. Authentication is a bearer token when configured;
//! otherwise the ambient environment (workload identity, metadata server
//! proxy) is expected to authorize requests.

use super::{PubSubClient, PubSubClientFactory, PubSubError};
use crate::event::Event;
use crate::metrics;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::StatusCode;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// REST client scoped to one backend project.
#[derive(Debug)]
pub struct HttpPubSubClient {
    http: reqwest::Client,
    base_url: String,
    project_id: String,
    token: Option<String>,
}

#[derive(Debug, Serialize)]
struct PublishRequest<'a> {
    messages: Vec<PubsubMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct PubsubMessage<'a> {
    /// Base64-encoded payload, per the REST API contract.
    data: String,
    attributes: &'a BTreeMap<String, String>,
}

impl HttpPubSubClient {
    #[must_use]
    pub fn new(project_id: &str, base_url: &str, token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            project_id: project_id.to_string(),
            token,
        }
    }

    fn topic_url(&self, topic_id: &str) -> String {
        format!(
            "{}/v1/projects/{}/topics/{}",
            self.base_url, self.project_id, topic_id
        )
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn classify(response: reqwest::Response) -> Result<reqwest::Response, PubSubError> {
        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::NOT_FOUND => Err(PubSubError::NotFound),
            StatusCode::CONFLICT => Err(PubSubError::AlreadyExists),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(PubSubError::Transient(format!("{status}: {body}")))
            }
        }
    }
}

#[async_trait]
impl PubSubClient for HttpPubSubClient {
    async fn topic_exists(&self, topic_id: &str) -> Result<bool, PubSubError> {
        let response = self
            .authorize(self.http.get(self.topic_url(topic_id)))
            .send()
            .await?;
        match Self::classify(response).await {
            Ok(_) => Ok(true),
            Err(PubSubError::NotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn create_topic(&self, topic_id: &str) -> Result<(), PubSubError> {
        debug!(project = %self.project_id, topic = %topic_id, "Creating topic");
        let response = self
            .authorize(self.http.put(self.topic_url(topic_id)))
            .json(&serde_json::json!({}))
            .send()
            .await?;
        Self::classify(response).await?;
        metrics::increment_topic_operations("create");
        Ok(())
    }

    async fn delete_topic(&self, topic_id: &str) -> Result<(), PubSubError> {
        debug!(project = %self.project_id, topic = %topic_id, "Deleting topic");
        let response = self
            .authorize(self.http.delete(self.topic_url(topic_id)))
            .send()
            .await?;
        Self::classify(response).await?;
        metrics::increment_topic_operations("delete");
        Ok(())
    }

    async fn publish(&self, topic_id: &str, event: &Event) -> Result<(), PubSubError> {
        let attributes = event.wire_attributes();
        let request = PublishRequest {
            messages: vec![PubsubMessage {
                data: general_purpose::STANDARD.encode(event.data()),
                attributes: &attributes,
            }],
        };
        let response = self
            .authorize(
                self.http
                    .post(format!("{}:publish", self.topic_url(topic_id))),
            )
            .json(&request)
            .send()
            .await?;
        Self::classify(response).await?;
        metrics::increment_topic_operations("publish");
        Ok(())
    }
}

/// Factory producing one ephemeral [`HttpPubSubClient`] per reconcile pass.
#[derive(Debug, Clone)]
pub struct HttpPubSubClientFactory {
    base_url: String,
    token: Option<String>,
}

impl HttpPubSubClientFactory {
    #[must_use]
    pub fn new(base_url: &str, token: Option<String>) -> Self {
        Self {
            base_url: base_url.to_string(),
            token,
        }
    }
}

#[async_trait]
impl PubSubClientFactory for HttpPubSubClientFactory {
    async fn create(&self, project_id: &str) -> Result<Box<dyn PubSubClient>, PubSubError> {
        Ok(Box::new(HttpPubSubClient::new(
            project_id,
            &self.base_url,
            self.token.clone(),
        )))
    }
}
