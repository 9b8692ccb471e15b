use crate::reactor::WorkloadUpdater;
use crate::workload::{Container, Trigger, Workload};
use anyhow::Context;
use chrono::Utc;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::PodSpec;
use kube::api::PostParams;
use kube::{Api, Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use tracing::debug;

pub static KUBE_IMAGE_TRIGGER_ANNOTATION: &str = "kube-image-trigger/triggers";
static KUBE_IMAGE_TRIGGERED_AT_ANNOTATION: &str = "kube-image-trigger/triggeredAt";
static KUBE_IMAGE_TRIGGER_FIELD_MANAGER: &str = "kube-image-trigger";

/// A namespaced Kubernetes resource with a pod template that can carry image triggers.
pub trait TriggeredResource
where
    Self: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Send
        + Sync
        + Serialize
        + DeserializeOwned
        + 'static,
{
    fn kind_name() -> String {
        Self::kind(&()).into_owned()
    }
    fn pod_spec(&self) -> Option<&PodSpec>;
    fn pod_spec_mut(&mut self) -> Option<&mut PodSpec>;

    /// Reads the trigger annotation and pod template into a [`Workload`].
    /// Resources without the annotation have no triggers and yield `None`.
    fn to_workload(&self) -> anyhow::Result<Option<Workload>> {
        let Some(raw_triggers) = self.annotations().get(KUBE_IMAGE_TRIGGER_ANNOTATION) else {
            return Ok(None);
        };
        let name = self.name_any();
        let namespace = self.namespace().unwrap_or_default();

        let mut triggers: Vec<Trigger> = serde_json::from_str(raw_triggers).with_context(|| {
            format!(
                "Invalid {} annotation on {} {}",
                KUBE_IMAGE_TRIGGER_ANNOTATION,
                Self::kind_name(),
                name
            )
        })?;
        // tags without a namespace live next to the resource
        for trigger in triggers.iter_mut() {
            if trigger.from.namespace.is_empty() {
                trigger.from.namespace.clone_from(&namespace);
            }
        }

        let containers = self
            .pod_spec()
            .map(|spec| {
                spec.init_containers
                    .iter()
                    .flatten()
                    .chain(spec.containers.iter())
                    .map(|c| Container {
                        name: c.name.clone(),
                        image: c.image.clone().unwrap_or_default(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Some(Workload {
            namespace,
            name,
            triggers,
            containers,
        }))
    }

    /// Writes trigger state and container images of `workload` into the resource.
    fn apply_workload(&mut self, workload: &Workload) -> anyhow::Result<()> {
        let k8s_resource_kind = Self::kind_name();
        let resource_name = self.name_any();

        let triggers =
            serde_json::to_string(&workload.triggers).context("Failed to serialize triggers")?;
        let annotations = self.annotations_mut();
        annotations.insert(KUBE_IMAGE_TRIGGER_ANNOTATION.to_string(), triggers);
        annotations.insert(
            KUBE_IMAGE_TRIGGERED_AT_ANNOTATION.to_string(),
            Utc::now().to_rfc3339(),
        );

        let spec = self.pod_spec_mut().with_context(|| {
            format!(
                "{} {} has no pod template spec",
                k8s_resource_kind, resource_name
            )
        })?;
        for container in spec
            .init_containers
            .iter_mut()
            .flatten()
            .chain(spec.containers.iter_mut())
        {
            let Some(desired) = workload.containers.iter().find(|c| c.name == container.name)
            else {
                continue;
            };
            if container.image.as_deref() != Some(desired.image.as_str()) {
                debug!(
                    "Setting image of container {} in {} {} to {}",
                    container.name, k8s_resource_kind, resource_name, desired.image
                );
                container.image = Some(desired.image.clone());
            }
        }
        Ok(())
    }
}

/// Replaces the observed resource with the candidate applied to it. The request carries
/// the observed `resourceVersion`, so the API server rejects it if the resource moved on.
pub struct ResourceUpdater<'a, K> {
    api: &'a Api<K>,
    resource: &'a K,
}

impl<'a, K: TriggeredResource> ResourceUpdater<'a, K> {
    pub fn new(api: &'a Api<K>, resource: &'a K) -> Self {
        Self { api, resource }
    }
}

impl<K: TriggeredResource> WorkloadUpdater for ResourceUpdater<'_, K> {
    async fn update(&self, candidate: &Workload) -> anyhow::Result<()> {
        let k8s_resource_kind = K::kind_name();
        let mut resource = self.resource.clone();
        resource.apply_workload(candidate)?;

        debug!(
            "Replacing {} {} with updated triggers",
            k8s_resource_kind, candidate.name
        );
        let params = PostParams {
            field_manager: Some(KUBE_IMAGE_TRIGGER_FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        self.api
            .replace(&candidate.name, &params, &resource)
            .await
            .with_context(|| {
                format!(
                    "Failed to replace {} {} with updated images",
                    k8s_resource_kind, candidate.name
                )
            })?;
        Ok(())
    }
}

impl TriggeredResource for Deployment {
    fn pod_spec(&self) -> Option<&PodSpec> {
        self.spec.as_ref().and_then(|s| s.template.spec.as_ref())
    }

    fn pod_spec_mut(&mut self) -> Option<&mut PodSpec> {
        self.spec.as_mut().and_then(|s| s.template.spec.as_mut())
    }
}

impl TriggeredResource for StatefulSet {
    fn pod_spec(&self) -> Option<&PodSpec> {
        self.spec.as_ref().and_then(|s| s.template.spec.as_ref())
    }

    fn pod_spec_mut(&mut self) -> Option<&mut PodSpec> {
        self.spec.as_mut().and_then(|s| s.template.spec.as_mut())
    }
}

impl TriggeredResource for DaemonSet {
    fn pod_spec(&self) -> Option<&PodSpec> {
        self.spec.as_ref().and_then(|s| s.template.spec.as_ref())
    }

    fn pod_spec_mut(&mut self) -> Option<&mut PodSpec> {
        self.spec.as_mut().and_then(|s| s.template.spec.as_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::TagReference;
    use serde_json::json;

    fn deployment(triggers: Option<&str>) -> Deployment {
        let mut annotations = serde_json::Map::new();
        if let Some(triggers) = triggers {
            annotations.insert(KUBE_IMAGE_TRIGGER_ANNOTATION.to_string(), json!(triggers));
        }
        serde_json::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {
                "name": "test",
                "namespace": "default",
                "resourceVersion": "42",
                "annotations": annotations,
            },
            "spec": {
                "selector": { "matchLabels": { "app": "test" } },
                "template": {
                    "metadata": { "labels": { "app": "test" } },
                    "spec": {
                        "initContainers": [{ "name": "migrate", "image": "" }],
                        "containers": [
                            { "name": "test", "image": "" },
                            { "name": "sidecar", "image": "proxy:1" }
                        ]
                    }
                }
            }
        }))
        .expect("Should build deployment")
    }

    fn images(deployment: &Deployment) -> Vec<(String, Option<String>)> {
        let spec = deployment.pod_spec().expect("Should have pod spec");
        spec.init_containers
            .iter()
            .flatten()
            .chain(spec.containers.iter())
            .map(|c| (c.name.clone(), c.image.clone()))
            .collect()
    }

    #[test]
    fn test_kind_name() {
        assert_eq!(Deployment::kind_name(), "Deployment");
        assert_eq!(StatefulSet::kind_name(), "StatefulSet");
        assert_eq!(DaemonSet::kind_name(), "DaemonSet");
    }

    #[test]
    fn test_to_workload_without_annotation() {
        let workload = deployment(None).to_workload().expect("Should not fail");
        assert_eq!(workload, None);
    }

    #[test]
    fn test_to_workload_with_invalid_annotation() {
        assert!(deployment(Some("not json")).to_workload().is_err());
    }

    #[test]
    fn test_to_workload() {
        let triggers = r#"[
            {"from": {"namespace": "other", "name": "stream-1:1"}, "containerNames": ["test"]},
            {"automatic": false, "from": {"name": "stream-2:1"}, "containerNames": ["migrate"], "lastTriggeredImage": "old"}
        ]"#;
        let workload = deployment(Some(triggers))
            .to_workload()
            .expect("Should not fail")
            .expect("Should have triggers");

        assert_eq!(workload.namespace, "default");
        assert_eq!(workload.name, "test");
        assert_eq!(workload.triggers.len(), 2);
        assert!(workload.triggers[0].automatic);
        assert_eq!(
            workload.triggers[1].from,
            TagReference {
                namespace: "default".to_string(),
                name: "stream-2:1".to_string(),
            }
        );
        assert!(!workload.triggers[1].automatic);
        assert_eq!(workload.triggers[1].last_triggered_image, "old");
        let names: Vec<_> = workload.containers.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["migrate", "test", "sidecar"]);
        assert_eq!(workload.containers[2].image, "proxy:1");
    }

    #[test]
    fn test_apply_workload() {
        let triggers = r#"[{"from": {"namespace": "other", "name": "stream-1:1"}, "containerNames": ["test", "migrate"]}]"#;
        let mut resource = deployment(Some(triggers));
        let mut workload = resource
            .to_workload()
            .expect("Should not fail")
            .expect("Should have triggers");
        workload.triggers[0].last_triggered_image = "image-lookup-1".to_string();
        for container in workload.containers.iter_mut().filter(|c| c.name != "sidecar") {
            container.image = "image-lookup-1".to_string();
        }

        resource.apply_workload(&workload).expect("Should apply");

        assert_eq!(
            images(&resource),
            vec![
                ("migrate".to_string(), Some("image-lookup-1".to_string())),
                ("test".to_string(), Some("image-lookup-1".to_string())),
                ("sidecar".to_string(), Some("proxy:1".to_string())),
            ]
        );
        assert!(
            resource
                .annotations()
                .contains_key(KUBE_IMAGE_TRIGGERED_AT_ANNOTATION)
        );
        assert_eq!(resource.resource_version().as_deref(), Some("42"));

        let reread = resource
            .to_workload()
            .expect("Should not fail")
            .expect("Should have triggers");
        assert_eq!(reread, workload);
    }

    #[test]
    fn test_apply_workload_without_pod_spec() {
        let mut resource: Deployment = serde_json::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": "test", "namespace": "default" }
        }))
        .expect("Should build deployment");
        let workload = Workload {
            namespace: "default".to_string(),
            name: "test".to_string(),
            triggers: vec![],
            containers: vec![],
        };

        assert!(resource.apply_workload(&workload).is_err());
    }
}
