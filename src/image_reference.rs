use serde::Deserialize;
use std::fmt;

/// An image repository without tag or digest, e.g. `ghcr.io/org/app`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct ImageRepository {
    pub registry: String,
    pub repository: String,
}

/// A tagged image inside a repository.
#[derive(Debug, PartialEq, Eq)]
pub struct ImageReference {
    pub registry: String,
    pub repository: String,
    pub tag: String,
}

#[derive(Debug)]
pub enum ParseError {
    MissingRegistry,
    MissingRepository,
    MissingTag,
    InvalidFormat(String),
    TagNotAllowed,
    DigestNotAllowed,
}

impl std::error::Error for ParseError {}
impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::DigestNotAllowed => write!(f, "digest references are not allowed"),
            ParseError::TagNotAllowed => write!(f, "image repositories must not carry a tag"),
            ParseError::MissingRegistry => write!(f, "registry is missing"),
            ParseError::MissingRepository => write!(f, "repository is missing"),
            ParseError::MissingTag => write!(f, "tag is missing"),
            ParseError::InvalidFormat(image) => write!(f, "invalid image format: {}", image),
        }
    }
}

impl fmt::Display for ImageRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry, self.repository)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.registry, self.repository, self.tag)
    }
}

impl TryFrom<String> for ImageRepository {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl ImageRepository {
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        if s.contains('@') {
            return Err(ParseError::DigestNotAllowed);
        }
        // a colon after the last slash is a tag, before it a registry port
        let last_slash = s.rfind('/').unwrap_or(0);
        if s.rfind(':').is_some_and(|pos| pos > last_slash) {
            return Err(ParseError::TagNotAllowed);
        }

        let (registry, repository) = s
            .split_once('/')
            .ok_or_else(|| ParseError::InvalidFormat(s.to_string()))?;

        if registry.is_empty() {
            return Err(ParseError::MissingRegistry);
        }
        if repository.is_empty() {
            return Err(ParseError::MissingRepository);
        }

        Ok(Self {
            registry: registry.to_string(),
            repository: repository.to_string(),
        })
    }

    pub fn tagged(&self, tag: &str) -> Result<ImageReference, ParseError> {
        if tag.is_empty() {
            return Err(ParseError::MissingTag);
        }
        Ok(ImageReference {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            tag: tag.to_string(),
        })
    }
}

impl ImageReference {
    /// The digest-pinned form `registry/repository@digest`.
    pub fn pinned(&self, digest: &str) -> String {
        format!("{}/{}@{}", self.registry, self.repository, digest)
    }
}

/// Splits an image stream tag name `stream:tag` into its parts.
pub fn split_stream_tag(name: &str) -> Option<(&str, &str)> {
    match name.rsplit_once(':') {
        Some((stream, tag)) if !stream.is_empty() && !tag.is_empty() => Some((stream, tag)),
        _ => None,
    }
}
