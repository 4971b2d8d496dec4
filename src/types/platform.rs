// ABOUTME: Architecture/OS filter applied to multi-arch manifest lists.
// ABOUTME: An image instance is transferred only when both its arch and OS are listed.

use std::collections::BTreeSet;
use std::fmt;

/// The set of platforms a run is interested in.
///
/// An empty arch set matches every architecture; an empty OS set matches
/// every OS. `amd64,arm64` / `linux` are the usual operator inputs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlatformSet {
    archs: BTreeSet<String>,
    oses: BTreeSet<String>,
}

impl PlatformSet {
    pub fn new<A, O, S>(archs: A, oses: O) -> Self
    where
        A: IntoIterator<Item = S>,
        O: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            archs: archs
                .into_iter()
                .map(|s| s.into().trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            oses: oses
                .into_iter()
                .map(|s| s.into().trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    /// Match-everything filter.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn matches(&self, arch: &str, os: &str) -> bool {
        (self.archs.is_empty() || self.archs.contains(arch))
            && (self.oses.is_empty() || self.oses.contains(os))
    }

    pub fn archs(&self) -> impl Iterator<Item = &str> {
        self.archs.iter().map(String::as_str)
    }
}

impl fmt::Display for PlatformSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let archs: Vec<&str> = self.archs.iter().map(String::as_str).collect();
        let oses: Vec<&str> = self.oses.iter().map(String::as_str).collect();
        write!(
            f,
            "arch[{}] os[{}]",
            if archs.is_empty() { "*".into() } else { archs.join(",") },
            if oses.is_empty() { "*".into() } else { oses.join(",") },
        )
    }
}
