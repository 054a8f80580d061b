//! # Publisher Workload
//!
//! Renders and inspects the companion publisher Deployment and Service for a
//! Topic. The publisher accepts events over HTTP inside the cluster and
//! publishes them into the reconciled topic; the reconciler owns its
//! lifecycle through owner references.
//!
//! Rendering is pure so it can be tested without an API server. The
//! reconciler compares the rendered spec against the live object
//! structurally, field by field, so defaulted fields added by the API server
//! do not cause spurious updates.

use crate::{Topic, TopicSpec};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, PodSpec, PodTemplateSpec, SecretVolumeSource, Service,
    ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;

const PUBLISHER_PORT: i32 = 8080;
const CREDENTIALS_VOLUME: &str = "pubsub-credentials";
const CREDENTIALS_PATH: &str = "/var/secrets/pubsub";

/// Name of the publisher Deployment and Service for a Topic.
#[must_use]
pub fn publisher_name(topic_name: &str) -> String {
    format!("{topic_name}-publisher")
}

/// In-cluster address of the publisher Service, propagated to the Topic
/// status once the Deployment reports Available.
#[must_use]
pub fn publisher_address(topic_name: &str, namespace: &str) -> String {
    format!(
        "http://{}.{}.svc.cluster.local",
        publisher_name(topic_name),
        namespace
    )
}

fn selector_labels(topic_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), "topic-publisher".to_string()),
        ("topic".to_string(), topic_name.to_string()),
    ])
}

/// Controller owner reference pointing at the Topic. Garbage collection
/// removes the publisher when the Topic goes away even if finalization is
/// skipped.
#[must_use]
pub fn owner_reference(topic: &Topic) -> OwnerReference {
    OwnerReference {
        api_version: Topic::api_version(&()).to_string(),
        kind: Topic::kind(&()).to_string(),
        name: topic.name_any(),
        uid: topic.uid().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Whether the object is controlled by this Topic. Identity is the owner
/// UID, not the name, so a recreated Topic does not adopt a stale workload.
#[must_use]
pub fn is_owned_by(meta: &ObjectMeta, topic: &Topic) -> bool {
    let Some(uid) = topic.uid() else {
        return false;
    };
    meta.owner_references
        .as_deref()
        .unwrap_or_default()
        .iter()
        .any(|or| or.controller == Some(true) && or.uid == uid)
}

fn publisher_env(spec: &TopicSpec, project_id: &str, topic_id: &str) -> Vec<EnvVar> {
    let mut env = vec![
        EnvVar {
            name: "PROJECT_ID".to_string(),
            value: Some(project_id.to_string()),
            ..EnvVar::default()
        },
        EnvVar {
            name: "TOPIC_ID".to_string(),
            value: Some(topic_id.to_string()),
            ..EnvVar::default()
        },
    ];
    if let Some(secret) = &spec.secret {
        env.push(EnvVar {
            name: "GOOGLE_APPLICATION_CREDENTIALS".to_string(),
            value: Some(format!("{CREDENTIALS_PATH}/{}", secret.key)),
            ..EnvVar::default()
        });
    }
    env
}

/// Renders the desired publisher Deployment for a reconciled Topic.
#[must_use]
pub fn make_deployment(topic: &Topic, image: &str, project_id: &str, topic_id: &str) -> Deployment {
    let name = topic.name_any();
    let labels = selector_labels(&name);

    let mut volumes: Option<Vec<Volume>> = None;
    let mut volume_mounts: Option<Vec<VolumeMount>> = None;
    if let Some(secret) = &topic.spec.secret {
        volumes = Some(vec![Volume {
            name: CREDENTIALS_VOLUME.to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(secret.name.clone()),
                ..SecretVolumeSource::default()
            }),
            ..Volume::default()
        }]);
        volume_mounts = Some(vec![VolumeMount {
            name: CREDENTIALS_VOLUME.to_string(),
            mount_path: CREDENTIALS_PATH.to_string(),
            read_only: Some(true),
            ..VolumeMount::default()
        }]);
    }

    Deployment {
        metadata: ObjectMeta {
            name: Some(publisher_name(&name)),
            namespace: topic.namespace(),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner_reference(topic)]),
            ..ObjectMeta::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..LabelSelector::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..ObjectMeta::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "publisher".to_string(),
                        image: Some(image.to_string()),
                        env: Some(publisher_env(&topic.spec, project_id, topic_id)),
                        ports: Some(vec![ContainerPort {
                            container_port: PUBLISHER_PORT,
                            name: Some("http".to_string()),
                            ..ContainerPort::default()
                        }]),
                        volume_mounts,
                        ..Container::default()
                    }],
                    volumes,
                    ..PodSpec::default()
                }),
            },
            ..DeploymentSpec::default()
        }),
        ..Deployment::default()
    }
}

/// Renders the Service fronting the publisher Deployment.
#[must_use]
pub fn make_service(topic: &Topic) -> Service {
    let name = topic.name_any();
    let labels = selector_labels(&name);

    Service {
        metadata: ObjectMeta {
            name: Some(publisher_name(&name)),
            namespace: topic.namespace(),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner_reference(topic)]),
            ..ObjectMeta::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(labels),
            ports: Some(vec![ServicePort {
                name: Some("http".to_string()),
                port: 80,
                target_port: Some(IntOrString::Int(PUBLISHER_PORT)),
                ..ServicePort::default()
            }]),
            ..ServiceSpec::default()
        }),
        ..Service::default()
    }
}

/// Structural comparison of the fields this controller manages. The live
/// object carries defaulted fields the rendered one does not, so only the
/// managed fields participate.
#[must_use]
pub fn spec_differs(desired: &Deployment, existing: &Deployment) -> bool {
    let replicas = |d: &Deployment| d.spec.as_ref().and_then(|s| s.replicas);
    let container = |d: &Deployment| {
        d.spec
            .as_ref()
            .and_then(|s| s.template.spec.as_ref())
            .and_then(|p| p.containers.first())
            .cloned()
    };
    let (Some(want), Some(have)) = (container(desired), container(existing)) else {
        return true;
    };
    replicas(desired) != replicas(existing)
        || want.image != have.image
        || want.env.unwrap_or_default() != have.env.unwrap_or_default()
        || want.volume_mounts.unwrap_or_default() != have.volume_mounts.unwrap_or_default()
}

/// Structural comparison of the Service fields this controller manages.
/// Per-port identity is name/port/target; server-defaulted fields such as
/// the protocol and allocated node ports do not participate.
#[must_use]
pub fn service_spec_differs(desired: &Service, existing: &Service) -> bool {
    let spec = |s: &Service| s.spec.clone().unwrap_or_default();
    let ports = |s: &ServiceSpec| {
        s.ports
            .clone()
            .unwrap_or_default()
            .into_iter()
            .map(|p| (p.name, p.port, p.target_port))
            .collect::<Vec<_>>()
    };
    let (want, have) = (spec(desired), spec(existing));
    want.selector != have.selector || ports(&want) != ports(&have)
}

/// Whether the Deployment reports the `Available` condition as True.
#[must_use]
pub fn deployment_ready(deployment: &Deployment) -> bool {
    deployment
        .status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Available" && c.status == "True")
        })
}
