use crate::reactor::{ImageChangeReactor, Outcome};
use crate::resolver::{RegistryTagResolver, TagResolver};
use crate::resource::{KUBE_IMAGE_TRIGGER_ANNOTATION, ResourceUpdater, TriggeredResource};
use crate::state::ControllerContext;
use anyhow::Context;
use globset::{Glob, GlobSet, GlobSetBuilder};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use kube::api::ListParams;
use kube::{Api, Client, ResourceExt};
use tracing::{debug, error, info, warn};

static KUBE_IMAGE_TRIGGER_LABEL: &str = "kube-image-trigger/enabled=true";

pub async fn create_client() -> anyhow::Result<Client> {
    info!("Initializing K8s controller");
    let client = Client::try_default().await?;
    let api_server_info = client.apiserver_version().await?;
    info!(
        "Connected to namespace {}, in-cluster Kubernetes API server with version {}.{}",
        client.default_namespace(),
        api_server_info.major,
        api_server_info.minor
    );
    Ok(client)
}

/// One reconciliation pass over every labelled workload in the default namespace.
pub async fn run(ctx: &ControllerContext) -> anyhow::Result<()> {
    let excluded = build_exclude_set(&ctx.config.exclude_workloads)?;
    let resolver = RegistryTagResolver::new(&ctx.config, &ctx.http_client);

    reconcile_kind::<Deployment, _>(ctx, &excluded, &resolver).await?;
    reconcile_kind::<StatefulSet, _>(ctx, &excluded, &resolver).await?;
    reconcile_kind::<DaemonSet, _>(ctx, &excluded, &resolver).await?;

    Ok(())
}

fn build_exclude_set(patterns: &[String]) -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .with_context(|| format!("Invalid excludeWorkloads pattern {}", pattern))?;
        builder.add(glob);
    }
    builder
        .build()
        .context("Failed to build excludeWorkloads matcher")
}

async fn reconcile_kind<K, R>(
    ctx: &ControllerContext,
    excluded: &GlobSet,
    resolver: &R,
) -> anyhow::Result<()>
where
    K: TriggeredResource,
    R: TagResolver,
{
    let k8s_resource_kind = K::kind_name();
    let api: Api<K> = Api::default_namespaced(ctx.kube_client.clone());
    let lp = ListParams::default().labels(KUBE_IMAGE_TRIGGER_LABEL);

    // List based on label selector (server-side filtering)
    let resources = api
        .list(&lp)
        .await
        .with_context(|| format!("Failed to list {} resources", k8s_resource_kind))?;

    info!(
        "Scanning for image changes in {} {} resources with label {}",
        resources.items.len(),
        k8s_resource_kind,
        KUBE_IMAGE_TRIGGER_LABEL
    );

    for resource in resources.items {
        let resource_name = resource.name_any();
        if excluded.is_match(&resource_name) {
            info!(
                "Skipping {} {} as it matches excludeWorkloads",
                k8s_resource_kind, resource_name
            );
            continue;
        }

        if let Err(e) = reconcile_resource(&api, &resource, resolver).await {
            error!(
                "Failed to reconcile {} {}: {:#}",
                k8s_resource_kind, resource_name, e
            );
        }
    }

    Ok(())
}

async fn reconcile_resource<K, R>(api: &Api<K>, resource: &K, resolver: &R) -> anyhow::Result<()>
where
    K: TriggeredResource,
    R: TagResolver,
{
    let k8s_resource_kind = K::kind_name();
    let Some(workload) = resource.to_workload()? else {
        warn!(
            "{} {} is labelled {} but has no {} annotation",
            k8s_resource_kind,
            resource.name_any(),
            KUBE_IMAGE_TRIGGER_LABEL,
            KUBE_IMAGE_TRIGGER_ANNOTATION
        );
        return Ok(());
    };

    let reactor = ImageChangeReactor::new(ResourceUpdater::new(api, resource));
    match reactor.image_changed(&workload, resolver).await? {
        Outcome::Updated(candidate) => {
            for (before, after) in workload.containers.iter().zip(&candidate.containers) {
                if before.image != after.image {
                    info!(
                        "Updated container {} of {} {} to {}",
                        after.name, k8s_resource_kind, candidate.name, after.image
                    );
                }
            }
        }
        Outcome::Unchanged => {
            debug!(
                "Skipping {} {}, images are up to date",
                k8s_resource_kind, workload.name
            );
        }
    }

    Ok(())
}
