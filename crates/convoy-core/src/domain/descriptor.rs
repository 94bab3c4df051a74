//! App descriptors and the name newtypes shared across the engine.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A strongly-typed application name (the directory name under a scan root).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AppName(pub String);

impl fmt::Display for AppName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for AppName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for AppName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// External tag correlating one release event with its follow-up batch.
/// Opaque to the engine; equality is all that matters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeploymentId(pub String);

impl fmt::Display for DeploymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for DeploymentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DeploymentId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// One discovered application directory.
///
/// Ephemeral: rebuilt on every registry scan, no identity beyond its path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppDescriptor {
    pub name: AppName,
    /// Directory containing the app, as found under the scan root.
    pub path: PathBuf,
    /// Whether the dependency manifest file is present at the top level.
    pub has_manifest: bool,
    /// Test command to run during validation, when one could be derived.
    pub test_command: Option<String>,
    /// A `tests`/`test`/`testing` directory exists.
    pub has_tests: bool,
    /// A `Dockerfile` exists at the top level.
    pub has_docker: bool,
}

impl AppDescriptor {
    /// Path to the dependency manifest inside the app directory.
    pub fn manifest_path(&self, manifest_name: &str) -> PathBuf {
        self.path.join(manifest_name)
    }
}
