//! # Reconciler
//!
//! Core reconciliation logic for `Topic` resources.
//!
//! The reconciler:
//! - Watches `Topic` resources across all namespaces
//! - Drives the backing Pub/Sub topic to the declared state, within the
//!   bounds of the propagation policy
//! - Manages the companion publisher Deployment and Service
//! - Updates resource status with conditions, resolved identities, and the
//!   publisher address
//!
//! ## Reconciliation Flow
//!
//! 1. Initialize the condition set and record the observed generation
//! 2. Resolve the backend project (status cache, then spec, then ambient
//!    default) and ensure the topic exists per the propagation policy
//! 3. Reconcile the publisher workload and propagate its address
//! 4. Persist status, including partial progress when a step failed
//!
//! Deletion runs through a finalizer: the backing topic is removed only
//! under the `CreateDelete` policy, and only if this controller recorded
//! having provisioned it.

use crate::conditions::{CONDITION_PUBLISHER_READY, CONDITION_TOPIC_READY, TOPIC_CONDITIONS};
use crate::config::ControllerConfig;
use crate::pubsub::{PubSubClientFactory, PubSubError};
use crate::{metrics, publisher, PropagationPolicy, Topic, TopicStatus};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::api::{Patch, PatchParams, PostParams};
use kube::{Api, Client, ResourceExt};
use kube_runtime::controller::Action;
use kube_runtime::finalizer::{finalizer, Error as FinalizerError, Event as FinalizerEvent};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub const TOPIC_FINALIZER: &str = "eventing.octopilot.io/topic-finalizer";

const REQUEUE_AFTER: Duration = Duration::from_secs(300);
const ERROR_REQUEUE_AFTER: Duration = Duration::from_secs(60);

/// Why a reconcile pass could not converge.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The declared policy forbids the mutation required to converge.
    #[error("topic {topic_id} does not exist and the propagation policy forbids creating it")]
    PolicyViolation { topic_id: String },
    /// A dependent object exists but is controlled by someone else.
    #[error("{kind} {name} exists but is not owned by this resource")]
    OwnershipConflict { kind: &'static str, name: String },
    /// The messaging backend failed; retryable.
    #[error("backend error: {0}")]
    Backend(#[from] PubSubError),
    /// The Kubernetes API failed; retryable.
    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),
    /// The resource cannot be reconciled as declared.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Shared context for every reconcile pass.
pub struct TopicReconciler {
    pub client: Client,
    pub factory: Arc<dyn PubSubClientFactory>,
    pub config: ControllerConfig,
}

/// Controller entry point. Routes through the finalizer so deletion always
/// runs cleanup before the resource disappears.
#[allow(
    clippy::missing_errors_doc,
    reason = "Errors are routed to error_policy by the controller runtime"
)]
pub async fn reconcile(
    topic: Arc<Topic>,
    ctx: Arc<TopicReconciler>,
) -> Result<Action, FinalizerError<ReconcileError>> {
    let namespace = topic.namespace().unwrap_or_default();
    let topics: Api<Topic> = Api::namespaced(ctx.client.clone(), &namespace);

    finalizer(&topics, TOPIC_FINALIZER, topic, |event| async {
        match event {
            FinalizerEvent::Apply(topic) => ctx.apply(&topic).await,
            FinalizerEvent::Cleanup(topic) => ctx.cleanup(&topic).await,
        }
    })
    .await
}

pub fn error_policy(
    topic: Arc<Topic>,
    error: &FinalizerError<ReconcileError>,
    _ctx: Arc<TopicReconciler>,
) -> Action {
    error!(
        topic = %topic.name_any(),
        namespace = %topic.namespace().unwrap_or_default(),
        error = %error,
        "Reconciliation failed"
    );
    Action::requeue(ERROR_REQUEUE_AFTER)
}

impl TopicReconciler {
    /// One converge pass. Status is persisted on success and on failure, so
    /// partial progress (a resolved project, a provisioned topic) survives a
    /// later step failing.
    async fn apply(&self, topic: &Topic) -> Result<Action, ReconcileError> {
        let start = Instant::now();
        metrics::increment_reconciliations();

        let name = topic.name_any();
        let namespace = topic.namespace().unwrap_or_default();
        debug!(topic = %name, namespace = %namespace, "Reconciling");

        let mut status = topic.status.clone().unwrap_or_default();
        TOPIC_CONDITIONS.initialize(&mut status.conditions);
        status.observed_generation = topic.metadata.generation;

        let outcome = self.converge(topic, &mut status).await;

        if let Err(e) = self.patch_status(topic, &status).await {
            // The converge error is the more actionable one; report it and
            // let the retry re-persist the status.
            match outcome {
                Ok(()) => return Err(e.into()),
                Err(_) => warn!(topic = %name, error = %e, "Failed to persist status"),
            }
        }
        metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());

        match outcome {
            Ok(()) => {
                info!(
                    topic = %name,
                    namespace = %namespace,
                    ready = TOPIC_CONDITIONS.is_ready(&status.conditions),
                    "Reconciled"
                );
                Ok(Action::requeue(REQUEUE_AFTER))
            }
            Err(e) => {
                metrics::increment_reconciliation_errors();
                Err(e)
            }
        }
    }

    async fn converge(&self, topic: &Topic, status: &mut TopicStatus) -> Result<(), ReconcileError> {
        ensure_topic(
            topic,
            status,
            self.factory.as_ref(),
            self.config.default_project.as_deref(),
        )
        .await?;

        // ensure_topic succeeded, so both identities are resolved.
        let project_id = status
            .project_id
            .clone()
            .ok_or_else(|| ReconcileError::Config("project not resolved".to_string()))?;
        let topic_id = status
            .topic_id
            .clone()
            .ok_or_else(|| ReconcileError::Config("topic not resolved".to_string()))?;

        self.reconcile_publisher(topic, status, &project_id, &topic_id)
            .await
    }

    /// Creates or converges the publisher Deployment and Service, then
    /// reflects their readiness into the `PublisherReady` condition and the
    /// status address.
    async fn reconcile_publisher(
        &self,
        topic: &Topic,
        status: &mut TopicStatus,
        project_id: &str,
        topic_id: &str,
    ) -> Result<(), ReconcileError> {
        let namespace = topic
            .namespace()
            .ok_or_else(|| ReconcileError::Config("resource has no namespace".to_string()))?;
        let topic_name = topic.name_any();
        let name = publisher::publisher_name(&topic_name);

        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), &namespace);
        let desired = publisher::make_deployment(
            topic,
            &self.config.publisher_image,
            project_id,
            topic_id,
        );

        let existing = match deployments.get(&name).await {
            Ok(deployment) => Some(deployment),
            Err(kube::Error::Api(e)) if e.code == 404 => None,
            Err(e) => return Err(e.into()),
        };

        let live = match existing {
            None => {
                info!(topic = %topic_name, deployment = %name, "Creating publisher deployment");
                deployments.create(&PostParams::default(), &desired).await?
            }
            Some(deployment) if !publisher::is_owned_by(&deployment.metadata, topic) => {
                TOPIC_CONDITIONS.mark_false(
                    &mut status.conditions,
                    CONDITION_PUBLISHER_READY,
                    "PublisherNotOwned",
                    &format!("deployment {name} exists but is not owned by this resource"),
                );
                return Err(ReconcileError::OwnershipConflict {
                    kind: "Deployment",
                    name,
                });
            }
            Some(deployment) if publisher::spec_differs(&desired, &deployment) => {
                info!(topic = %topic_name, deployment = %name, "Updating publisher deployment");
                deployments
                    .patch(&name, &PatchParams::default(), &Patch::Merge(&desired))
                    .await?
            }
            Some(deployment) => deployment,
        };

        let services: Api<Service> = Api::namespaced(self.client.clone(), &namespace);
        let desired_service = publisher::make_service(topic);
        match services.get(&name).await {
            Ok(service) if !publisher::is_owned_by(&service.metadata, topic) => {
                TOPIC_CONDITIONS.mark_false(
                    &mut status.conditions,
                    CONDITION_PUBLISHER_READY,
                    "PublisherNotOwned",
                    &format!("service {name} exists but is not owned by this resource"),
                );
                return Err(ReconcileError::OwnershipConflict {
                    kind: "Service",
                    name,
                });
            }
            Ok(service) if publisher::service_spec_differs(&desired_service, &service) => {
                info!(topic = %topic_name, service = %name, "Updating publisher service");
                services
                    .patch(&name, &PatchParams::default(), &Patch::Merge(&desired_service))
                    .await?;
            }
            Ok(_) => {}
            Err(kube::Error::Api(e)) if e.code == 404 => {
                info!(topic = %topic_name, service = %name, "Creating publisher service");
                services
                    .create(&PostParams::default(), &desired_service)
                    .await?;
            }
            Err(e) => return Err(e.into()),
        }

        if publisher::deployment_ready(&live) {
            TOPIC_CONDITIONS.mark_true(&mut status.conditions, CONDITION_PUBLISHER_READY);
            status.address = Some(publisher::publisher_address(&topic_name, &namespace));
        } else {
            TOPIC_CONDITIONS.mark_unknown(
                &mut status.conditions,
                CONDITION_PUBLISHER_READY,
                "PublisherDeploying",
                "publisher deployment is not yet available",
            );
            status.address = None;
        }

        Ok(())
    }

    /// Finalizer path. Deletes the backing topic only when this controller
    /// owns its lifecycle and previously recorded provisioning it.
    async fn cleanup(&self, topic: &Topic) -> Result<Action, ReconcileError> {
        let status = topic.status.clone().unwrap_or_default();
        finalize_topic(topic, &status, self.factory.as_ref()).await?;
        Ok(Action::await_change())
    }

    async fn patch_status(&self, topic: &Topic, status: &TopicStatus) -> Result<(), kube::Error> {
        let namespace = topic.namespace().unwrap_or_default();
        let topics: Api<Topic> = Api::namespaced(self.client.clone(), &namespace);
        let patch = serde_json::json!({ "status": status });
        topics
            .patch_status(
                &topic.name_any(),
                &PatchParams::default(),
                &Patch::Merge(&patch),
            )
            .await?;
        Ok(())
    }
}

/// Ensures the backing topic matches the declared state, marking the
/// `TopicReady` condition and recording the resolved identities in status.
///
/// The project is resolved once and cached in status; later passes reuse the
/// cached value so the topic identity never silently moves between projects.
/// `topic_id` is recorded only after the topic is known to exist, so the
/// ingress never publishes to an unverified identity.
pub async fn ensure_topic(
    topic: &Topic,
    status: &mut TopicStatus,
    factory: &dyn PubSubClientFactory,
    default_project: Option<&str>,
) -> Result<(), ReconcileError> {
    let project_id = match status
        .project_id
        .clone()
        .filter(|p| !p.is_empty())
        .or_else(|| topic.spec.project.clone())
        .or_else(|| default_project.map(str::to_string))
    {
        Some(project) => project,
        None => {
            let message = "no project declared and no ambient default configured";
            TOPIC_CONDITIONS.mark_false(
                &mut status.conditions,
                CONDITION_TOPIC_READY,
                "ProjectResolveFailed",
                message,
            );
            return Err(ReconcileError::Config(message.to_string()));
        }
    };
    status.project_id = Some(project_id.clone());

    let topic_id = topic.spec.topic.clone();
    let client = match factory.create(&project_id).await {
        Ok(client) => client,
        Err(e) => {
            TOPIC_CONDITIONS.mark_false(
                &mut status.conditions,
                CONDITION_TOPIC_READY,
                "ClientCreateFailed",
                &e.to_string(),
            );
            return Err(e.into());
        }
    };

    let exists = match client.topic_exists(&topic_id).await {
        Ok(exists) => exists,
        Err(e) => {
            TOPIC_CONDITIONS.mark_false(
                &mut status.conditions,
                CONDITION_TOPIC_READY,
                "TopicVerifyFailed",
                &e.to_string(),
            );
            return Err(e.into());
        }
    };

    if !exists {
        match topic.spec.propagation_policy {
            PropagationPolicy::NoCreateNoDelete => {
                let err = ReconcileError::PolicyViolation {
                    topic_id: topic_id.clone(),
                };
                TOPIC_CONDITIONS.mark_false(
                    &mut status.conditions,
                    CONDITION_TOPIC_READY,
                    "TopicPolicyViolation",
                    &err.to_string(),
                );
                return Err(err);
            }
            PropagationPolicy::CreateDelete => {
                match client.create_topic(&topic_id).await {
                    Ok(()) => info!(project = %project_id, topic = %topic_id, "Created topic"),
                    // Lost a race with a concurrent creator; the topic exists,
                    // which is the state we wanted.
                    Err(PubSubError::AlreadyExists) => {
                        debug!(project = %project_id, topic = %topic_id, "Topic already exists");
                    }
                    Err(e) => {
                        TOPIC_CONDITIONS.mark_false(
                            &mut status.conditions,
                            CONDITION_TOPIC_READY,
                            "TopicCreateFailed",
                            &e.to_string(),
                        );
                        return Err(e.into());
                    }
                }
            }
        }
    }

    status.topic_id = Some(topic_id);
    TOPIC_CONDITIONS.mark_true(&mut status.conditions, CONDITION_TOPIC_READY);
    Ok(())
}

/// Deletes the backing topic on finalization. A no-op under
/// `NoCreateNoDelete`, when provisioning never completed, or when the topic
/// is already gone out-of-band.
pub async fn finalize_topic(
    topic: &Topic,
    status: &TopicStatus,
    factory: &dyn PubSubClientFactory,
) -> Result<(), ReconcileError> {
    if topic.spec.propagation_policy != PropagationPolicy::CreateDelete {
        return Ok(());
    }
    let (Some(project_id), Some(topic_id)) = (
        status.project_id.as_deref().filter(|p| !p.is_empty()),
        status.topic_id.as_deref().filter(|t| !t.is_empty()),
    ) else {
        // Provisioning never recorded an identity; nothing to tear down.
        return Ok(());
    };

    let client = factory.create(project_id).await?;
    if !client.topic_exists(topic_id).await? {
        info!(project = %project_id, topic = %topic_id, "Topic already deleted");
        return Ok(());
    }
    match client.delete_topic(topic_id).await {
        Ok(()) => {
            info!(project = %project_id, topic = %topic_id, "Deleted topic");
            Ok(())
        }
        // Deleted between the existence check and the delete call.
        Err(PubSubError::NotFound) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditions::{get_condition, STATUS_FALSE, STATUS_TRUE};
    use crate::event::Event;
    use crate::pubsub::PubSubClient;
    use crate::TopicSpec;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory backend shared between factory and clients, with counters
    /// for asserting which operations ran.
    #[derive(Default)]
    struct MemoryPubSub {
        topics: Mutex<HashSet<String>>,
        creates: AtomicUsize,
        deletes: AtomicUsize,
        /// When set, existence checks report absent even for present topics,
        /// simulating a stale check racing a concurrent creator.
        stale_exists: bool,
        /// When set, creates fail with a transient backend error.
        fail_create: bool,
    }

    impl MemoryPubSub {
        fn contains(&self, topic_id: &str) -> bool {
            self.topics.lock().unwrap().contains(topic_id)
        }
    }

    struct MemoryClient {
        backend: Arc<MemoryPubSub>,
    }

    #[async_trait]
    impl PubSubClient for MemoryClient {
        async fn topic_exists(&self, topic_id: &str) -> Result<bool, PubSubError> {
            if self.backend.stale_exists {
                return Ok(false);
            }
            Ok(self.backend.contains(topic_id))
        }

        async fn create_topic(&self, topic_id: &str) -> Result<(), PubSubError> {
            self.backend.creates.fetch_add(1, Ordering::SeqCst);
            if self.backend.fail_create {
                return Err(PubSubError::Transient("quota exceeded".to_string()));
            }
            if !self.backend.topics.lock().unwrap().insert(topic_id.to_string()) {
                return Err(PubSubError::AlreadyExists);
            }
            Ok(())
        }

        async fn delete_topic(&self, topic_id: &str) -> Result<(), PubSubError> {
            self.backend.deletes.fetch_add(1, Ordering::SeqCst);
            if !self.backend.topics.lock().unwrap().remove(topic_id) {
                return Err(PubSubError::NotFound);
            }
            Ok(())
        }

        async fn publish(&self, _topic_id: &str, _event: &Event) -> Result<(), PubSubError> {
            Ok(())
        }
    }

    fn make_topic(policy: PropagationPolicy) -> Topic {
        let mut topic = Topic::new(
            "br",
            TopicSpec {
                project: Some("proj-1".to_string()),
                topic: "events".to_string(),
                propagation_policy: policy,
                secret: None,
            },
        );
        topic.metadata.namespace = Some("ns1".to_string());
        topic
    }

    fn topic_ready_status(status: &TopicStatus) -> &str {
        &get_condition(&status.conditions, CONDITION_TOPIC_READY)
            .expect("TopicReady condition missing")
            .status
    }

    #[tokio::test]
    async fn test_ensure_topic_creates_when_absent() {
        let backend = Arc::new(SharedBackendFactory::new(false));
        let topic = make_topic(PropagationPolicy::CreateDelete);
        let mut status = TopicStatus::default();
        TOPIC_CONDITIONS.initialize(&mut status.conditions);

        ensure_topic(&topic, &mut status, backend.as_ref(), None)
            .await
            .expect("ensure_topic failed");

        assert!(backend.contains("events"));
        assert_eq!(status.project_id.as_deref(), Some("proj-1"));
        assert_eq!(status.topic_id.as_deref(), Some("events"));
        assert_eq!(topic_ready_status(&status), STATUS_TRUE);
    }

    #[tokio::test]
    async fn test_ensure_topic_is_idempotent() {
        let backend = Arc::new(SharedBackendFactory::new(false));
        let topic = make_topic(PropagationPolicy::CreateDelete);
        let mut status = TopicStatus::default();
        TOPIC_CONDITIONS.initialize(&mut status.conditions);

        ensure_topic(&topic, &mut status, backend.as_ref(), None)
            .await
            .expect("first pass failed");
        ensure_topic(&topic, &mut status, backend.as_ref(), None)
            .await
            .expect("second pass failed");

        // The second pass sees the topic and never re-creates it.
        assert_eq!(backend.creates(), 1);
        assert_eq!(topic_ready_status(&status), STATUS_TRUE);
    }

    #[tokio::test]
    async fn test_ensure_topic_tolerates_creation_race() {
        let backend = Arc::new(SharedBackendFactory::new(true));
        backend.insert("events");
        let topic = make_topic(PropagationPolicy::CreateDelete);
        let mut status = TopicStatus::default();
        TOPIC_CONDITIONS.initialize(&mut status.conditions);

        // Stale existence check says absent; the create then reports
        // AlreadyExists. That outcome is success.
        ensure_topic(&topic, &mut status, backend.as_ref(), None)
            .await
            .expect("race should be tolerated");
        assert_eq!(status.topic_id.as_deref(), Some("events"));
        assert_eq!(topic_ready_status(&status), STATUS_TRUE);
    }

    #[tokio::test]
    async fn test_ensure_topic_policy_violation() {
        let backend = Arc::new(SharedBackendFactory::new(false));
        let topic = make_topic(PropagationPolicy::NoCreateNoDelete);
        let mut status = TopicStatus::default();
        TOPIC_CONDITIONS.initialize(&mut status.conditions);

        let err = ensure_topic(&topic, &mut status, backend.as_ref(), None)
            .await
            .expect_err("absent topic under NoCreateNoDelete must fail");

        assert!(matches!(err, ReconcileError::PolicyViolation { .. }));
        assert!(!backend.contains("events"));
        // The failure is reflected in conditions, and no publishable identity
        // is recorded.
        assert_eq!(topic_ready_status(&status), STATUS_FALSE);
        assert_eq!(
            get_condition(&status.conditions, CONDITION_TOPIC_READY)
                .unwrap()
                .reason
                .as_deref(),
            Some("TopicPolicyViolation")
        );
        assert!(status.topic_id.is_none());
    }

    #[tokio::test]
    async fn test_ensure_topic_create_failure_marks_condition_false() {
        let backend = Arc::new(SharedBackendFactory::failing_create());
        let topic = make_topic(PropagationPolicy::CreateDelete);
        let mut status = TopicStatus::default();
        TOPIC_CONDITIONS.initialize(&mut status.conditions);

        let err = ensure_topic(&topic, &mut status, backend.as_ref(), None)
            .await
            .expect_err("transient create failure must surface");

        assert!(matches!(err, ReconcileError::Backend(_)));
        // A failed pass leaves the condition False with a reason, never
        // parked at Unknown, and records no publishable identity.
        assert_eq!(topic_ready_status(&status), STATUS_FALSE);
        assert_eq!(
            get_condition(&status.conditions, CONDITION_TOPIC_READY)
                .unwrap()
                .reason
                .as_deref(),
            Some("TopicCreateFailed")
        );
        assert!(status.topic_id.is_none());
    }

    #[tokio::test]
    async fn test_ensure_topic_accepts_preexisting_under_no_create() {
        let backend = Arc::new(SharedBackendFactory::new(false));
        backend.insert("events");
        let topic = make_topic(PropagationPolicy::NoCreateNoDelete);
        let mut status = TopicStatus::default();
        TOPIC_CONDITIONS.initialize(&mut status.conditions);

        ensure_topic(&topic, &mut status, backend.as_ref(), None)
            .await
            .expect("pre-existing topic should satisfy NoCreateNoDelete");
        assert_eq!(status.topic_id.as_deref(), Some("events"));
        assert_eq!(backend.creates(), 0);
    }

    #[tokio::test]
    async fn test_ensure_topic_requires_a_project() {
        let backend = Arc::new(SharedBackendFactory::new(false));
        let mut topic = make_topic(PropagationPolicy::CreateDelete);
        topic.spec.project = None;
        let mut status = TopicStatus::default();
        TOPIC_CONDITIONS.initialize(&mut status.conditions);

        let err = ensure_topic(&topic, &mut status, backend.as_ref(), None)
            .await
            .expect_err("no project anywhere must fail");
        assert!(matches!(err, ReconcileError::Config(_)));
        assert_eq!(topic_ready_status(&status), STATUS_FALSE);
    }

    #[tokio::test]
    async fn test_ensure_topic_falls_back_to_ambient_project() {
        let backend = Arc::new(SharedBackendFactory::new(false));
        let mut topic = make_topic(PropagationPolicy::CreateDelete);
        topic.spec.project = None;
        let mut status = TopicStatus::default();
        TOPIC_CONDITIONS.initialize(&mut status.conditions);

        ensure_topic(&topic, &mut status, backend.as_ref(), Some("ambient-proj"))
            .await
            .expect("ambient default should apply");
        assert_eq!(status.project_id.as_deref(), Some("ambient-proj"));
    }

    #[tokio::test]
    async fn test_ensure_topic_reuses_cached_project() {
        let backend = Arc::new(SharedBackendFactory::new(false));
        let mut topic = make_topic(PropagationPolicy::CreateDelete);
        topic.spec.project = Some("proj-new".to_string());
        let mut status = TopicStatus {
            project_id: Some("proj-cached".to_string()),
            ..TopicStatus::default()
        };
        TOPIC_CONDITIONS.initialize(&mut status.conditions);

        ensure_topic(&topic, &mut status, backend.as_ref(), None)
            .await
            .expect("cached project should be reused");
        // The identity never silently moves to the newly declared project.
        assert_eq!(status.project_id.as_deref(), Some("proj-cached"));
    }

    #[tokio::test]
    async fn test_finalize_deletes_provisioned_topic() {
        let backend = Arc::new(SharedBackendFactory::new(false));
        backend.insert("events");
        let topic = make_topic(PropagationPolicy::CreateDelete);
        let status = TopicStatus {
            project_id: Some("proj-1".to_string()),
            topic_id: Some("events".to_string()),
            ..TopicStatus::default()
        };

        finalize_topic(&topic, &status, backend.as_ref())
            .await
            .expect("finalize failed");
        assert!(!backend.contains("events"));
    }

    #[tokio::test]
    async fn test_finalize_is_noop_when_topic_gone_out_of_band() {
        let backend = Arc::new(SharedBackendFactory::new(false));
        let topic = make_topic(PropagationPolicy::CreateDelete);
        let status = TopicStatus {
            project_id: Some("proj-1".to_string()),
            topic_id: Some("events".to_string()),
            ..TopicStatus::default()
        };

        finalize_topic(&topic, &status, backend.as_ref())
            .await
            .expect("absent topic is not an error on finalize");
        assert_eq!(backend.deletes(), 0);
    }

    #[tokio::test]
    async fn test_finalize_respects_no_delete_policy() {
        let backend = Arc::new(SharedBackendFactory::new(false));
        backend.insert("events");
        let topic = make_topic(PropagationPolicy::NoCreateNoDelete);
        let status = TopicStatus {
            project_id: Some("proj-1".to_string()),
            topic_id: Some("events".to_string()),
            ..TopicStatus::default()
        };

        finalize_topic(&topic, &status, backend.as_ref())
            .await
            .expect("finalize failed");
        assert!(backend.contains("events"));
        assert_eq!(backend.deletes(), 0);
    }

    #[tokio::test]
    async fn test_finalize_is_noop_without_recorded_identity() {
        let backend = Arc::new(SharedBackendFactory::new(false));
        backend.insert("events");
        let topic = make_topic(PropagationPolicy::CreateDelete);

        finalize_topic(&topic, &TopicStatus::default(), backend.as_ref())
            .await
            .expect("finalize failed");
        // Provisioning never completed, so the topic is treated as foreign.
        assert!(backend.contains("events"));
    }

    /// Factory whose clients all share one topic set, so state created in
    /// one pass is visible to the next.
    struct SharedBackendFactory {
        state: Arc<MemoryPubSub>,
    }

    impl SharedBackendFactory {
        fn new(stale_exists: bool) -> Self {
            Self {
                state: Arc::new(MemoryPubSub {
                    stale_exists,
                    ..MemoryPubSub::default()
                }),
            }
        }

        fn failing_create() -> Self {
            Self {
                state: Arc::new(MemoryPubSub {
                    fail_create: true,
                    ..MemoryPubSub::default()
                }),
            }
        }

        fn insert(&self, topic_id: &str) {
            self.state.topics.lock().unwrap().insert(topic_id.to_string());
        }

        fn contains(&self, topic_id: &str) -> bool {
            self.state.contains(topic_id)
        }

        fn creates(&self) -> usize {
            self.state.creates.load(Ordering::SeqCst)
        }

        fn deletes(&self) -> usize {
            self.state.deletes.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PubSubClientFactory for SharedBackendFactory {
        async fn create(&self, _project_id: &str) -> Result<Box<dyn PubSubClient>, PubSubError> {
            Ok(Box::new(MemoryClient {
                backend: Arc::clone(&self.state),
            }))
        }
    }
}
