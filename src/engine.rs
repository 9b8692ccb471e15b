use crate::resolver::{ResolvedTag, TagResolver};
use crate::workload::Workload;
use anyhow::Context;
use futures::future::try_join_all;
use tracing::debug;

/// Decides whether the image triggers of `workload` advance its images.
///
/// Returns `Ok(None)` when no update is required, either because nothing changed or
/// because an automatic trigger has never resolved yet. Returns the candidate workload
/// to persist otherwise. `workload` itself is never modified; a resolver fault aborts
/// the evaluation before any candidate exists.
pub async fn evaluate<R: TagResolver>(
    workload: &Workload,
    resolver: &R,
) -> anyhow::Result<Option<Workload>> {
    if workload.triggers.is_empty() {
        return Ok(None);
    }

    // resolve every automatic trigger before looking at any result
    let lookups = workload
        .triggers
        .iter()
        .enumerate()
        .filter(|(_, trigger)| trigger.automatic)
        .map(move |(index, trigger)| async move {
            let resolved = resolver
                .lookup(&trigger.from.namespace, &trigger.from.name)
                .await
                .with_context(|| {
                    format!(
                        "Failed to resolve tag {} for trigger {} of {}",
                        trigger.from, index, workload
                    )
                })?;
            anyhow::Ok((index, resolved))
        });
    let resolutions: Vec<(usize, Option<ResolvedTag>)> = try_join_all(lookups).await?;

    let mut changes = Vec::new();
    for (index, resolved) in resolutions {
        let Some(trigger) = workload.triggers.get(index) else {
            continue;
        };
        match resolved {
            Some(tag) if tag.reference != trigger.last_triggered_image => {
                debug!(
                    "Tag {} of {} advanced to {} (resourceVersion {})",
                    trigger.from, workload, tag.reference, tag.resource_version
                );
                changes.push((index, tag.reference));
            }
            Some(_) => {}
            None if trigger.has_fired() => {
                debug!(
                    "Tag {} of {} is unresolved, keeping {}",
                    trigger.from, workload, trigger.last_triggered_image
                );
            }
            None => {
                debug!(
                    "Tag {} of {} has never resolved, holding back all triggers",
                    trigger.from, workload
                );
                return Ok(None);
            }
        }
    }

    if changes.is_empty() {
        debug!("All triggers of {} are up to date", workload);
        return Ok(None);
    }

    let mut candidate = workload.clone();
    for (index, reference) in changes {
        let Some(trigger) = candidate.triggers.get_mut(index) else {
            continue;
        };
        for container_name in &trigger.container_names {
            match candidate
                .containers
                .iter_mut()
                .find(|c| &c.name == container_name)
            {
                Some(container) => container.image.clone_from(&reference),
                None => debug!(
                    "Trigger {} of {} names missing container {}",
                    index, workload, container_name
                ),
            }
        }
        trigger.last_triggered_image = reference;
    }

    Ok(Some(candidate))
}
