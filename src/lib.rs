//! Pub/Sub Topic Controller Library
//!
//! Core functionality for the eventing control plane and the broker ingress
//! data plane:
//!
//! 1. **Topic reconciliation** - Drives a Pub/Sub topic into the state declared
//!    by a `Topic` custom resource, with a condition-based readiness state
//!    machine, and manages the companion publisher workload.
//! 2. **Broker ingress** - Accepts CloudEvents over HTTP on
//!    `POST /{namespace}/{broker}` and forwards them to the topic the
//!    reconciler provisioned.
//!
//! The two planes communicate only through the `Topic` status object; the
//! ingress resolves the topic identity at request time and never mutates it.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub mod conditions;
pub mod config;
pub mod decouple;
pub mod event;
pub mod ingress;
pub mod metrics;
pub mod publisher;
pub mod pubsub;
pub mod reconciler;
pub mod server;

/// Topic Custom Resource Definition
///
/// Declares a Pub/Sub topic that the controller provisions and keeps in sync.
/// The spec is owned by the user; the status is owned exclusively by the
/// reconciler.
///
/// # Example
///
/// ```yaml
/// apiVersion: eventing.octopilot.io/v1alpha1
/// kind: Topic
/// metadata:
///   name: default-broker
///   namespace: my-namespace
/// spec:
///   project: my-gcp-project
///   topic: cre-default-broker
///   propagationPolicy: CreateDelete
/// ```
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "eventing.octopilot.io",
    version = "v1alpha1",
    kind = "Topic",
    namespaced,
    status = "TopicStatus",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Topic", "type":"string", "jsonPath":".status.topicId"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TopicSpec {
    /// Backend project that hosts the topic.
    /// If not specified, the controller falls back to its ambient default
    /// project (the `PROJECT_ID` environment variable).
    #[serde(default)]
    pub project: Option<String>,
    /// Name of the topic in the backend.
    pub topic: String,
    /// Whether the controller is allowed to create and delete the backing
    /// topic, or must treat it as externally managed.
    #[serde(default)]
    pub propagation_policy: PropagationPolicy,
    /// Reference to a secret holding backend credentials for the publisher
    /// workload. The controller itself authenticates through its ambient
    /// credentials.
    #[serde(default)]
    pub secret: Option<SecretKeyRef>,
}

/// Declared intent for topic lifecycle ownership
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum PropagationPolicy {
    /// The controller creates the topic if missing and deletes it when the
    /// resource is removed.
    #[default]
    CreateDelete,
    /// The topic must pre-exist; the controller never mutates it.
    NoCreateNoDelete,
}

/// Reference to a key in a Kubernetes secret
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeyRef {
    /// Name of the secret.
    pub name: String,
    /// Key within the secret.
    pub key: String,
}

/// Status of the Topic resource
///
/// Mutable, reconciler-owned. Tracks the resolved backend identities and the
/// condition set that aggregates into overall readiness.
#[derive(Debug, Clone, Deserialize, Serialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TopicStatus {
    /// Resolved backend project ID. Cached once resolved; never re-resolved
    /// unless cleared.
    #[serde(default)]
    pub project_id: Option<String>,
    /// Resolved topic ID. Set only after a successful existence-or-create
    /// pass; the ingress publishes to this identity.
    #[serde(default)]
    pub topic_id: Option<String>,
    /// Conditions represent the latest available observations
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Observed generation
    #[serde(default)]
    pub observed_generation: Option<i64>,
    /// Externally reachable address of the publisher workload, once ready
    #[serde(default)]
    pub address: Option<String>,
}

/// Condition represents a status condition for the resource
///
/// A named tri-state health signal (True/False/Unknown) with reason/message,
/// aggregated into overall readiness by [`conditions::ConditionSet`].
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    pub r#type: String,
    /// Status of condition (True, False, Unknown)
    pub status: String,
    /// Last transition time
    #[serde(default)]
    pub last_transition_time: Option<String>,
    /// Reason for condition
    #[serde(default)]
    pub reason: Option<String>,
    /// Message describing condition
    #[serde(default)]
    pub message: Option<String>,
}
