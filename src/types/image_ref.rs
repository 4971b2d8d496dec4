// ABOUTME: Image reference parsing for image-list lines.
// ABOUTME: Handles formats like nginx, reg.io/proj/img:tag, with registry/project defaulting.

use std::fmt;
use thiserror::Error;

/// Registry assumed when an image-list line carries none.
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// Project (namespace) assumed when an image-list line carries none.
pub const DEFAULT_PROJECT: &str = "library";

const DEFAULT_TAG: &str = "latest";

#[derive(Debug, Error)]
pub enum ParseRefError {
    #[error("image reference cannot be empty")]
    Empty,

    #[error("invalid character in image reference: {0:?}")]
    InvalidChar(char),

    #[error("invalid image reference format: {0}")]
    InvalidFormat(String),
}

/// A fully resolved image reference: registry, project, name and tag.
///
/// Parsing applies the same defaults a container engine would: a missing
/// registry becomes `docker.io`, a missing project becomes `library`, a
/// missing tag becomes `latest`. An optional digest pin is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    registry: String,
    project: String,
    name: String,
    tag: String,
    digest: Option<String>,
}

impl ImageRef {
    pub fn parse(input: &str) -> Result<Self, ParseRefError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ParseRefError::Empty);
        }

        for c in input.chars() {
            if !c.is_ascii_alphanumeric()
                && c != '/'
                && c != ':'
                && c != '.'
                && c != '-'
                && c != '_'
                && c != '@'
            {
                return Err(ParseRefError::InvalidChar(c));
            }
        }

        // Split off a digest pin if present.
        let (without_digest, digest) = match input.split_once('@') {
            Some((before, after)) => (before, Some(after.to_string())),
            None => (input, None),
        };

        // Split off the tag. A colon before the first slash belongs to a
        // registry port, not a tag.
        let (without_tag, tag) = match without_digest.rsplit_once(':') {
            Some((before, after)) if !after.contains('/') => (before, Some(after.to_string())),
            _ => (without_digest, None),
        };
        if without_tag.is_empty() {
            return Err(ParseRefError::InvalidFormat(input.to_string()));
        }

        let parts: Vec<&str> = without_tag.split('/').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(ParseRefError::InvalidFormat(input.to_string()));
        }

        // The first component is a registry only when it looks like a host.
        let has_registry = parts.len() > 1
            && (parts[0].contains('.') || parts[0].contains(':') || parts[0] == "localhost");

        let (registry, rest) = if has_registry {
            (parts[0].to_string(), &parts[1..])
        } else {
            (DEFAULT_REGISTRY.to_string(), &parts[..])
        };

        let (project, name) = match rest {
            [name] => (DEFAULT_PROJECT.to_string(), (*name).to_string()),
            [project @ .., name] => (project.join("/"), (*name).to_string()),
            [] => return Err(ParseRefError::InvalidFormat(input.to_string())),
        };

        Ok(Self {
            registry,
            project,
            name,
            tag: tag.unwrap_or_else(|| DEFAULT_TAG.to_string()),
            digest,
        })
    }

    /// Replace registry and/or project, used for source overrides.
    pub fn with_overrides(mut self, registry: Option<&str>, project: Option<&str>) -> Self {
        if let Some(registry) = registry {
            self.registry = registry.to_string();
        }
        if let Some(project) = project {
            self.project = project.to_string();
        }
        self
    }

    pub fn registry(&self) -> &str {
        &self.registry
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// `project/name` without registry or tag, used for repository paths.
    pub fn repository(&self) -> String {
        format!("{}/{}", self.project, self.name)
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}:{}",
            self.registry, self.project, self.name, self.tag
        )?;
        if let Some(ref digest) = self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_name_gets_all_defaults() {
        let r = ImageRef::parse("nginx").unwrap();
        assert_eq!(r.registry(), "docker.io");
        assert_eq!(r.project(), "library");
        assert_eq!(r.name(), "nginx");
        assert_eq!(r.tag(), "latest");
    }

    #[test]
    fn full_reference_round_trips() {
        let r = ImageRef::parse("reg.example.com:5000/rancher/mirrored-coredns:1.10").unwrap();
        assert_eq!(r.registry(), "reg.example.com:5000");
        assert_eq!(r.project(), "rancher");
        assert_eq!(r.name(), "mirrored-coredns");
        assert_eq!(r.tag(), "1.10");
        assert_eq!(
            r.to_string(),
            "reg.example.com:5000/rancher/mirrored-coredns:1.10"
        );
    }

    #[test]
    fn project_without_registry() {
        let r = ImageRef::parse("rancher/rke2-runtime:v1.27").unwrap();
        assert_eq!(r.registry(), "docker.io");
        assert_eq!(r.project(), "rancher");
    }

    #[test]
    fn nested_project_is_kept_whole() {
        let r = ImageRef::parse("quay.io/team/sub/app:1").unwrap();
        assert_eq!(r.project(), "team/sub");
        assert_eq!(r.name(), "app");
    }

    #[test]
    fn digest_pin_is_preserved() {
        let r = ImageRef::parse("nginx@sha256:abcd").unwrap();
        assert_eq!(r.digest(), Some("sha256:abcd"));
    }

    #[test]
    fn overrides_replace_registry_and_project() {
        let r = ImageRef::parse("nginx:1.25")
            .unwrap()
            .with_overrides(Some("harbor.internal"), Some("mirror"));
        assert_eq!(r.registry(), "harbor.internal");
        assert_eq!(r.project(), "mirror");
        assert_eq!(r.name(), "nginx");
    }

    #[test]
    fn rejects_garbage() {
        assert!(ImageRef::parse("").is_err());
        assert!(ImageRef::parse("has space").is_err());
        assert!(ImageRef::parse("a//b").is_err());
        assert!(ImageRef::parse(":tagonly").is_err());
    }
}
