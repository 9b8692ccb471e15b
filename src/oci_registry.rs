use crate::config::Config;
use crate::image_reference::ImageReference;
use anyhow::{Context, Result};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Certificate, Client, Response, StatusCode};
use std::fs;
use tracing::{debug, info};

const MANIFEST_MEDIA_TYPES: &str = "application/vnd.oci.image.index.v1+json, \
     application/vnd.oci.image.manifest.v1+json, \
     application/vnd.docker.distribution.manifest.list.v2+json, \
     application/vnd.docker.distribution.manifest.v2+json";

pub fn create_client(config: &Config) -> Result<Client> {
    info!("Initializing OCI Registry HTTP client");
    // System certificates are loaded automatically with rustls-tls-native-roots
    let mut client_builder = Client::builder();

    for file_path in &config.tls.ca_certificate_paths {
        let file_content = fs::read(file_path)
            .with_context(|| format!("Failed to read file {}", file_path.display()))?;
        let cert = Certificate::from_pem(&file_content).context("Failed to parse certificate")?;
        client_builder = client_builder.add_root_certificate(cert);
    }

    client_builder.build().context("Failed to build HTTP client")
}

/// Fetches the manifest digest a tag currently points at.
/// `Ok(None)` means the registry does not know the tag.
pub async fn fetch_digest_from_tag(
    image_reference: &ImageReference,
    registry_auth_token: Option<&str>,
    client: &Client,
    enable_jfrog_artifactory_fallback: bool,
) -> Result<Option<String>> {
    let url = format!(
        "https://{}/v2/{}/manifests/{}",
        image_reference.registry, image_reference.repository, image_reference.tag
    );

    let response = fetch_docker_manifest(client, image_reference, registry_auth_token, &url).await;
    let response = match response {
        Ok(Some(response)) => Some(response),
        primary if enable_jfrog_artifactory_fallback => {
            if let Err(e) = primary {
                debug!("Primary manifest lookup failed: {:#}", e);
            }
            info!("Falling back to JFrog Artifactory specific Repository Path Method");
            let repository_name = image_reference
                .repository
                .split('/')
                .next()
                .unwrap_or(&image_reference.repository);
            // Create URL according to JFrog Artifactory's Repository Path Method (https://jfrog.com/help/r/jfrog-artifactory-documentation/the-repository-path-method-for-docker)
            let fallback_url = format!(
                "https://{}/artifactory/api/docker/{}/v2/{}/manifests/{}",
                image_reference.registry,
                repository_name,
                image_reference.repository,
                image_reference.tag
            );
            fetch_docker_manifest(client, image_reference, registry_auth_token, &fallback_url)
                .await?
        }
        primary => primary?,
    };

    let Some(response) = response else {
        debug!("Registry does not know tag {}", image_reference);
        return Ok(None);
    };
    let digest = get_digest_from_response(&response)?;
    debug!("Tag {} resolves to digest {}", image_reference, digest);

    Ok(Some(digest))
}

async fn fetch_docker_manifest(
    client: &Client,
    image_reference: &ImageReference,
    registry_auth_token: Option<&str>,
    url: &str,
) -> Result<Option<Response>> {
    debug!("Fetching docker manifest from URL {}", url);
    let mut request = client.head(url).header(ACCEPT, MANIFEST_MEDIA_TYPES);
    if let Some(token) = registry_auth_token {
        request = request.header(AUTHORIZATION, format!("Bearer {}", token));
    }
    let response = request
        .send()
        .await
        .context("Failed to send request to fetch manifest")?;

    if response.status() == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    if !response.status().is_success() {
        anyhow::bail!(
            "Registry {} returned error status {} while fetching OCI image manifest",
            image_reference.registry,
            response.status()
        );
    }
    Ok(Some(response))
}

fn get_digest_from_response(response: &Response) -> Result<String> {
    Ok(response
        .headers()
        .get("Docker-Content-Digest")
        .context("Response does not contain HTTP header Docker-Content-Digest")?
        .to_str()
        .context("Received invalid UTF-8 content in Docker-Content-Digest header")?
        .to_owned())
}
