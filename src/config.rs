use crate::image_reference::ImageRepository;
use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::{env, fmt, fs};
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub webserver: Webserver,
    #[serde(default = "default_cron_schedule")]
    pub cron_schedule: String,
    #[serde(default)]
    pub registries: Vec<Registry>,
    #[serde(default)]
    pub tag_sources: Vec<TagSource>,
    #[serde(default)]
    pub tls: Tls,
    #[serde(default)]
    pub exclude_workloads: Vec<String>,
    #[serde(default)]
    pub feature_flags: FeatureFlags,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Webserver {
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Registry {
    pub hostname: String,
    pub token: Option<Token>,
}

/// Maps an image stream `namespace/name` onto the registry repository its tags live in.
#[derive(Debug, Clone, Deserialize)]
pub struct TagSource {
    pub namespace: String,
    pub name: String,
    pub image: ImageRepository,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tls {
    #[serde(default)]
    pub ca_certificate_paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlags {
    #[serde(default)]
    pub enable_jfrog_artifactory_fallback: bool,
}

/// Registry bearer token, printed as `<REDACTED, length n>`.
#[derive(Clone, Deserialize)]
#[serde(transparent)]
pub struct Token(String);

impl Token {
    pub fn expose_secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<REDACTED, length {}>", self.0.len())
    }
}

fn default_cron_schedule() -> String {
    "*/30 * * * * *".to_string()
}

impl Config {
    pub fn find_registry_for_hostname(&self, hostname: &str) -> Option<&Registry> {
        self.registries.iter().find(|r| r.hostname == hostname)
    }

    pub fn find_tag_source(&self, namespace: &str, name: &str) -> Option<&TagSource> {
        self.tag_sources
            .iter()
            .find(|s| s.namespace == namespace && s.name == name)
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    info!("Loading config from file {}", path.as_ref().display());
    let yaml_str = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

    let expanded = expand_env_vars(&yaml_str)?;

    let config = serde_yaml_ng::from_str(&expanded)
        .context("Failed to parse YAML config after environment variable expansion")?;

    Ok(config)
}

/// Replaces `${VAR}` placeholders with environment variables values.
/// Returns an error naming the first missing variable.
fn expand_env_vars(input: &str) -> Result<String> {
    let re =
        Regex::new(r"\$\{([^}]+)}").context("Invalid regex pattern for env var substitution")?;

    let mut result = String::with_capacity(input.len());
    let mut last = 0;
    for caps in re.captures_iter(input) {
        let (Some(placeholder), Some(var_name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let value = env::var(var_name.as_str())
            .with_context(|| format!("Missing environment variable: {}", var_name.as_str()))?;
        result.push_str(&input[last..placeholder.start()]);
        result.push_str(&value);
        last = placeholder.end();
    }
    result.push_str(&input[last..]);

    Ok(result)
}
