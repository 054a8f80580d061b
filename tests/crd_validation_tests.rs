//! Validation of the Topic CRD surface: manifest deserialization, defaults,
//! and the generated CRD metadata.

use kube::core::CustomResourceExt;
use pubsub_topic_controller::{PropagationPolicy, Topic, TopicSpec, TopicStatus};

#[test]
fn test_minimal_manifest_deserializes_with_defaults() {
    let manifest = serde_json::json!({
        "apiVersion": "eventing.octopilot.io/v1alpha1",
        "kind": "Topic",
        "metadata": { "name": "default-broker", "namespace": "ns1" },
        "spec": { "topic": "cre-default-broker" }
    });

    let topic: Topic = serde_json::from_value(manifest).expect("manifest should deserialize");
    assert_eq!(topic.spec.topic, "cre-default-broker");
    assert_eq!(topic.spec.propagation_policy, PropagationPolicy::CreateDelete);
    assert!(topic.spec.project.is_none());
    assert!(topic.spec.secret.is_none());
}

#[test]
fn test_full_manifest_deserializes() {
    let manifest = serde_json::json!({
        "apiVersion": "eventing.octopilot.io/v1alpha1",
        "kind": "Topic",
        "metadata": { "name": "default-broker", "namespace": "ns1" },
        "spec": {
            "project": "my-project",
            "topic": "cre-default-broker",
            "propagationPolicy": "NoCreateNoDelete",
            "secret": { "name": "pubsub-creds", "key": "key.json" }
        }
    });

    let topic: Topic = serde_json::from_value(manifest).expect("manifest should deserialize");
    assert_eq!(topic.spec.project.as_deref(), Some("my-project"));
    assert_eq!(
        topic.spec.propagation_policy,
        PropagationPolicy::NoCreateNoDelete
    );
    assert_eq!(topic.spec.secret.as_ref().unwrap().name, "pubsub-creds");
}

#[test]
fn test_unknown_propagation_policy_is_rejected() {
    let manifest = serde_json::json!({
        "apiVersion": "eventing.octopilot.io/v1alpha1",
        "kind": "Topic",
        "metadata": { "name": "b", "namespace": "ns1" },
        "spec": { "topic": "t", "propagationPolicy": "DeleteOnly" }
    });

    assert!(serde_json::from_value::<Topic>(manifest).is_err());
}

#[test]
fn test_crd_metadata() {
    let crd = Topic::crd();
    assert_eq!(crd.metadata.name.as_deref(), Some("topics.eventing.octopilot.io"));
    assert_eq!(crd.spec.group, "eventing.octopilot.io");
    assert_eq!(crd.spec.names.kind, "Topic");
    assert_eq!(crd.spec.scope, "Namespaced");
    assert_eq!(crd.spec.versions.len(), 1);
    assert_eq!(crd.spec.versions[0].name, "v1alpha1");
}

#[test]
fn test_status_serializes_camel_case() {
    let status = TopicStatus {
        project_id: Some("proj".to_string()),
        topic_id: Some("events".to_string()),
        observed_generation: Some(3),
        address: Some("http://b-publisher.ns1.svc.cluster.local".to_string()),
        ..TopicStatus::default()
    };

    let value = serde_json::to_value(&status).expect("status should serialize");
    assert_eq!(value["projectId"], "proj");
    assert_eq!(value["topicId"], "events");
    assert_eq!(value["observedGeneration"], 3);
    assert_eq!(value["address"], "http://b-publisher.ns1.svc.cluster.local");
}

#[test]
fn test_spec_round_trips() {
    let spec = TopicSpec {
        project: None,
        topic: "events".to_string(),
        propagation_policy: PropagationPolicy::CreateDelete,
        secret: None,
    };
    let value = serde_json::to_value(&spec).expect("spec should serialize");
    assert_eq!(value["propagationPolicy"], "CreateDelete");
    let back: TopicSpec = serde_json::from_value(value).expect("spec should deserialize");
    assert_eq!(back.topic, "events");
}
