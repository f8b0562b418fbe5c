//! Domain primitive types used across the shipcheck workspace.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Identifier the container runtime assigned to a launched container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a new container ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the first twelve characters, as container runtimes print them.
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to a container image (`repository[:tag]`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef(String);

impl ImageRef {
    /// Creates an image reference from a string value.
    #[must_use]
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// Derives the output image name for a scenario.
    ///
    /// The result depends only on `base` and `scenario`, so repeated runs
    /// produce the same tag while distinct scenarios never share one.
    #[must_use]
    pub fn for_scenario(base: &str, scenario: &str) -> Self {
        let base = sanitize(base);
        let suffix = sanitize(scenario);
        Self(format!(
            "{base}-{}-{suffix}",
            crate::constants::TEST_IMAGE_INFIX
        ))
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lowercases and replaces characters that are not valid in image names.
fn sanitize(raw: &str) -> String {
    let mapped: String = raw
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '/' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    mapped.trim_matches(|c| c == '-' || c == '/').to_string()
}

/// Lifecycle status of a container handle owned by the harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HandleStatus {
    /// Launch requested; no identifier observed yet.
    Pending,
    /// Identifier observed; the container is assumed live.
    Running,
    /// The container has been stopped.
    Stopped,
    /// The container has been removed from the runtime.
    Removed,
}

impl fmt::Display for HandleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Removed => write!(f, "removed"),
        }
    }
}

/// Where the application source for a build comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceLocation {
    /// A directory on the local filesystem.
    Local(PathBuf),
    /// A remote git repository, optionally pinned to a revision.
    Git {
        /// Clone URL.
        url: String,
        /// Branch, tag, or commit to build. `None` builds the default branch.
        revision: Option<String>,
    },
}

impl SourceLocation {
    /// Parses a source URI: anything with a URL scheme or a `.git`
    /// suffix is a git repository, everything else a local path.
    #[must_use]
    pub fn parse(uri: &str) -> Self {
        let (base, revision) = match uri.split_once('#') {
            Some((base, rev)) if !rev.is_empty() => (base, Some(rev.to_string())),
            _ => (uri.trim_end_matches('#'), None),
        };
        if base.contains("://") || base.starts_with("git@") || base.ends_with(".git") {
            Self::Git {
                url: base.to_string(),
                revision,
            }
        } else {
            Self::Local(PathBuf::from(uri))
        }
    }

    /// Returns the location formatted the way build tools accept it.
    #[must_use]
    pub fn uri(&self) -> String {
        match self {
            Self::Local(path) => path.display().to_string(),
            Self::Git { url, .. } => url.clone(),
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::Git {
                url,
                revision: Some(rev),
            } => write!(f, "{url}#{rev}"),
            Self::Git { url, revision: None } => write!(f, "{url}"),
        }
    }
}

/// Generates a unique container name for one launch.
#[must_use]
pub fn unique_container_name(image: &ImageRef) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    let stem: String = image
        .as_str()
        .rsplit('/')
        .next()
        .unwrap_or(image.as_str())
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect();
    format!("{stem}-{}", &id[..8])
}
