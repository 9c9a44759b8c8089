//! Target tree description: root directory, platform and run mode.

use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Operating system a run is adapting the tree for.
///
/// Names are matched case-insensitively, so both `std::env::consts::OS`
/// values (`"windows"`, `"macos"`) and the names build hosts report
/// (`"Windows"`, `"Darwin"`) resolve to the same variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(from = "String")]
pub enum Platform {
    Windows,
    Linux,
    MacOs,
    Other(String),
}

impl Platform {
    /// Platform the binary was compiled for.
    pub fn current() -> Self {
        Self::from(std::env::consts::OS)
    }

    pub fn is_windows(&self) -> bool {
        matches!(self, Platform::Windows)
    }
}

impl From<&str> for Platform {
    fn from(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "windows" | "win32" | "win64" => Platform::Windows,
            "linux" => Platform::Linux,
            "macos" | "darwin" | "osx" => Platform::MacOs,
            other => Platform::Other(other.to_string()),
        }
    }
}

impl From<String> for Platform {
    fn from(name: String) -> Self {
        Self::from(name.as_str())
    }
}

impl FromStr for Platform {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Windows => write!(f, "windows"),
            Platform::Linux => write!(f, "linux"),
            Platform::MacOs => write!(f, "macos"),
            Platform::Other(name) => write!(f, "{name}"),
        }
    }
}

/// Direction of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Unpatched -> Patched
    Apply,
    /// Patched -> Unpatched
    Revert,
}

impl Mode {
    /// Map the host hook's revert flag (`"True"`/`"False"`) onto a mode.
    ///
    /// An absent or empty flag means apply.
    pub fn from_revert_flag(flag: Option<&str>) -> Result<Self, ModeError> {
        let Some(raw) = flag else {
            return Ok(Mode::Apply);
        };

        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "false" | "0" | "no" | "off" => Ok(Mode::Apply),
            "true" | "1" | "yes" | "on" => Ok(Mode::Revert),
            _ => Err(ModeError::UnrecognizedFlag(raw.to_string())),
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Mode::Apply => Mode::Revert,
            Mode::Revert => Mode::Apply,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Apply => write!(f, "apply"),
            Mode::Revert => write!(f, "revert"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModeError {
    #[error("unrecognized revert flag value '{0}' (expected True or False)")]
    UnrecognizedFlag(String),
}

/// The source tree being adapted.
#[derive(Debug, Clone)]
pub struct TargetTree {
    root: PathBuf,
    platform: Platform,
}

impl TargetTree {
    pub fn new(root: impl Into<PathBuf>, platform: Platform) -> Self {
        Self {
            root: root.into(),
            platform,
        }
    }

    /// Pick the block folder when it exists, otherwise the project folder.
    pub fn resolve(
        preferred: impl Into<PathBuf>,
        fallback: impl Into<PathBuf>,
        platform: Platform,
    ) -> Self {
        let preferred = preferred.into();
        let root = if preferred.exists() {
            preferred
        } else {
            fallback.into()
        };
        Self::new(root, platform)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// Resolve a tree-relative path (forward slashes allowed) against the root.
    pub fn join(&self, relative: &str) -> PathBuf {
        relative
            .split('/')
            .filter(|part| !part.is_empty())
            .fold(self.root.clone(), |path, part| path.join(part))
    }
}
