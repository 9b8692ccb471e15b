use crate::config::Config;
use crate::image_reference::split_stream_tag;
use crate::oci_registry::fetch_digest_from_tag;
use anyhow::Context;
use tracing::{debug, warn};

/// The currently resolved reference of an image tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTag {
    pub reference: String,
    pub resource_version: i64,
}

/// Maps a tag identity to its current reference.
///
/// `Ok(None)` means no reference is currently known for the tag. `Err` is reserved
/// for infrastructure faults and aborts the evaluation that issued the lookup.
pub trait TagResolver {
    async fn lookup(&self, namespace: &str, name: &str) -> anyhow::Result<Option<ResolvedTag>>;
}

/// Resolves `stream:tag` names against the registries configured as tag sources.
/// Registries carry no generation counter, so `resource_version` is always 0.
pub struct RegistryTagResolver<'a> {
    config: &'a Config,
    http_client: &'a reqwest::Client,
}

impl<'a> RegistryTagResolver<'a> {
    pub fn new(config: &'a Config, http_client: &'a reqwest::Client) -> Self {
        Self {
            config,
            http_client,
        }
    }
}

impl TagResolver for RegistryTagResolver<'_> {
    async fn lookup(&self, namespace: &str, name: &str) -> anyhow::Result<Option<ResolvedTag>> {
        let Some((stream, tag)) = split_stream_tag(name) else {
            warn!(
                "Tag {}/{} is not of the form stream:tag and can never resolve",
                namespace, name
            );
            return Ok(None);
        };
        let Some(source) = self.config.find_tag_source(namespace, stream) else {
            debug!("No tag source configured for {}/{}", namespace, stream);
            return Ok(None);
        };

        let image = source
            .image
            .tagged(tag)
            .with_context(|| format!("Invalid tag {} for image {}", tag, source.image))?;
        let token = self
            .config
            .find_registry_for_hostname(&image.registry)
            .and_then(|r| r.token.as_ref())
            .map(|t| t.expose_secret());

        let digest = fetch_digest_from_tag(
            &image,
            token,
            self.http_client,
            self.config.feature_flags.enable_jfrog_artifactory_fallback,
        )
        .await
        .with_context(|| format!("Failed to resolve tag {}/{} from registry", namespace, name))?;

        Ok(digest.map(|digest| ResolvedTag {
            reference: image.pinned(&digest),
            resource_version: 0,
        }))
    }
}

/// In-memory resolver keyed by `(namespace, name)`.
#[cfg(test)]
#[derive(Default)]
pub struct StaticTagResolver {
    tags: Vec<(String, String, ResolvedTag)>,
    lookups: std::sync::Mutex<Vec<String>>,
}

#[cfg(test)]
impl StaticTagResolver {
    pub fn with_tag(mut self, namespace: &str, name: &str, reference: &str, rv: i64) -> Self {
        self.tags.push((
            namespace.to_string(),
            name.to_string(),
            ResolvedTag {
                reference: reference.to_string(),
                resource_version: rv,
            },
        ));
        self
    }

    /// Names of every tag looked up so far, as `namespace/name`.
    pub fn lookups(&self) -> Vec<String> {
        self.lookups.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
impl TagResolver for StaticTagResolver {
    async fn lookup(&self, namespace: &str, name: &str) -> anyhow::Result<Option<ResolvedTag>> {
        if let Ok(mut lookups) = self.lookups.lock() {
            lookups.push(format!("{}/{}", namespace, name));
        }
        Ok(self
            .tags
            .iter()
            .find(|(ns, n, _)| ns == namespace && n == name)
            .map(|(_, _, tag)| tag.clone()))
    }
}

/// Resolver whose every lookup fails as if the registry were unreachable.
#[cfg(test)]
pub struct FailingTagResolver;

#[cfg(test)]
impl TagResolver for FailingTagResolver {
    async fn lookup(&self, namespace: &str, name: &str) -> anyhow::Result<Option<ResolvedTag>> {
        anyhow::bail!("connection refused while resolving {}/{}", namespace, name)
    }
}
