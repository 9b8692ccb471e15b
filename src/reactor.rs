use crate::engine::evaluate;
use crate::resolver::TagResolver;
use crate::workload::Workload;
use anyhow::Context;
use tracing::{debug, info};

/// Persists a candidate workload with a single conditional write.
pub trait WorkloadUpdater {
    async fn update(&self, candidate: &Workload) -> anyhow::Result<()>;
}

#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    Unchanged,
    Updated(Workload),
}

/// Runs the trigger engine for a workload and writes back what it decides.
pub struct ImageChangeReactor<U> {
    updater: U,
}

impl<U: WorkloadUpdater> ImageChangeReactor<U> {
    pub fn new(updater: U) -> Self {
        Self { updater }
    }

    pub async fn image_changed<R: TagResolver>(
        &self,
        workload: &Workload,
        resolver: &R,
    ) -> anyhow::Result<Outcome> {
        let Some(candidate) = evaluate(workload, resolver).await? else {
            debug!("No image change for {}", workload);
            return Ok(Outcome::Unchanged);
        };

        info!("Updating images of {} from its triggers", workload);
        self.updater
            .update(&candidate)
            .await
            .with_context(|| format!("Failed to update {}", workload))?;

        Ok(Outcome::Updated(candidate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{FailingTagResolver, StaticTagResolver};
    use crate::workload::{Container, TagReference, Trigger};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingUpdater {
        updates: Mutex<Vec<Workload>>,
        fail: bool,
    }

    impl WorkloadUpdater for &RecordingUpdater {
        async fn update(&self, candidate: &Workload) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("the object has been modified");
            }
            if let Ok(mut updates) = self.updates.lock() {
                updates.push(candidate.clone());
            }
            Ok(())
        }
    }

    impl RecordingUpdater {
        fn updates(&self) -> Vec<Workload> {
            self.updates.lock().map(|u| u.clone()).unwrap_or_default()
        }
    }

    fn workload(last: &str, image: &str) -> Workload {
        Workload {
            namespace: "default".to_string(),
            name: "test".to_string(),
            triggers: vec![Trigger {
                automatic: true,
                from: TagReference {
                    namespace: "other".to_string(),
                    name: "stream-1:1".to_string(),
                },
                container_names: vec!["test".to_string()],
                last_triggered_image: last.to_string(),
            }],
            containers: vec![Container {
                name: "test".to_string(),
                image: image.to_string(),
            }],
        }
    }

    fn resolver() -> StaticTagResolver {
        StaticTagResolver::default().with_tag("other", "stream-1:1", "image-lookup-1", 2)
    }

    #[tokio::test]
    async fn test_issues_exactly_one_update() {
        let updater = RecordingUpdater::default();
        let reactor = ImageChangeReactor::new(&updater);
        let input = workload("", "");

        let outcome = reactor
            .image_changed(&input, &resolver())
            .await
            .expect("Should update");

        let expected = workload("image-lookup-1", "image-lookup-1");
        assert_eq!(outcome, Outcome::Updated(expected.clone()));
        assert_eq!(updater.updates(), vec![expected]);
        assert_eq!(input, workload("", ""));
    }

    #[tokio::test]
    async fn test_no_update_when_unchanged() {
        let updater = RecordingUpdater::default();
        let reactor = ImageChangeReactor::new(&updater);

        let outcome = reactor
            .image_changed(&workload("image-lookup-1", "image-lookup-1"), &resolver())
            .await
            .expect("Should not fail");

        assert_eq!(outcome, Outcome::Unchanged);
        assert!(updater.updates().is_empty());
    }

    #[tokio::test]
    async fn test_no_update_when_not_ready() {
        let updater = RecordingUpdater::default();
        let reactor = ImageChangeReactor::new(&updater);

        let outcome = reactor
            .image_changed(&workload("", ""), &StaticTagResolver::default())
            .await
            .expect("Not ready is not a failure");

        assert_eq!(outcome, Outcome::Unchanged);
        assert!(updater.updates().is_empty());
    }

    #[tokio::test]
    async fn test_resolver_fault_skips_update() {
        let updater = RecordingUpdater::default();
        let reactor = ImageChangeReactor::new(&updater);

        let result = reactor
            .image_changed(&workload("", ""), &FailingTagResolver)
            .await;

        assert!(result.is_err());
        assert!(updater.updates().is_empty());
    }

    #[tokio::test]
    async fn test_update_fault_is_propagated() {
        let updater = RecordingUpdater {
            fail: true,
            ..Default::default()
        };
        let reactor = ImageChangeReactor::new(&updater);

        let err = reactor
            .image_changed(&workload("", ""), &resolver())
            .await
            .expect_err("Update faults must surface");

        assert_eq!(err.to_string(), "Failed to update default/test");
    }
}
