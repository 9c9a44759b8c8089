use crate::tree::Platform;
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;

/// Transformation descriptor for one target tree.
#[derive(Debug, Deserialize, Clone)]
pub struct HookConfig {
    pub meta: Metadata,
    #[serde(default)]
    pub staging: Staging,
    #[serde(default)]
    pub samples: Option<Samples>,
    #[serde(default)]
    pub mains: Option<Mains>,
    #[serde(default)]
    pub literal: Vec<LiteralRule>,
    #[serde(default)]
    pub include: Vec<IncludeRule>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Metadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Tree-relative path of the build descriptor holding the marker
    pub descriptor: String,
    /// Substring whose presence means the tree is patched
    pub marker: String,
    /// Tree-relative path of the persisted state record
    #[serde(default = "default_state_file")]
    pub state_file: String,
}

fn default_state_file() -> String {
    ".tree-patcher.json".to_string()
}

/// Configuration files staged inside the tree and copied out on apply.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Staging {
    #[serde(default)]
    pub dir: String,
    #[serde(default)]
    pub files: Vec<StagedFile>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StagedFile {
    /// Path relative to the staging directory
    pub source: String,
    /// Path relative to the tree root
    pub dest: String,
}

/// Per-module sample directories copied under one destination directory.
#[derive(Debug, Deserialize, Clone)]
pub struct Samples {
    #[serde(default = "default_samples_dir")]
    pub source_dir: String,
    #[serde(default = "default_examples_dir")]
    pub dest_dir: String,
    #[serde(default)]
    pub denylist: Vec<String>,
    #[serde(default)]
    pub platform_only: Vec<PlatformOnly>,
}

fn default_samples_dir() -> String {
    "samples".to_string()
}

fn default_examples_dir() -> String {
    "examples".to_string()
}

impl Samples {
    /// Reason a module's samples must not be copied on `platform`, if any.
    pub fn exclusion(&self, module: &str, platform: &Platform) -> Option<String> {
        if self.denylist.iter().any(|denied| denied == module) {
            return Some("module is denylisted".to_string());
        }
        self.platform_only
            .iter()
            .find(|only| only.module == module && &only.platform != platform)
            .map(|only| format!("module only applies to {}", only.platform))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PlatformOnly {
    pub module: String,
    pub platform: Platform,
}

/// Placeholder in a provisioned file that is swapped for example entry points.
#[derive(Debug, Deserialize, Clone)]
pub struct Mains {
    pub file: String,
    pub placeholder: String,
    pub block: String,
}

/// Exact-token swap in one file.
#[derive(Debug, Deserialize, Clone)]
pub struct LiteralRule {
    pub id: String,
    pub file: String,
    /// Token present in the unpatched tree
    pub original: String,
    /// Token present in the patched tree
    pub patched: String,
    /// Convert both tokens to CRLF when the target file uses CRLF
    #[serde(default)]
    pub match_line_endings: bool,
}

/// Include-path prefix toggle over every file of a set of directories.
#[derive(Debug, Deserialize, Clone)]
pub struct IncludeRule {
    pub id: String,
    /// Only run on this platform
    #[serde(default)]
    pub platform: Option<Platform>,
    /// Path segment stripped on apply and restored on revert, e.g. `Poco/Net/`
    pub prefix: String,
    /// Directory whose file names make up the header alternation
    pub header_dir: String,
    /// Directories whose files are rewritten
    pub targets: Vec<String>,
}

impl IncludeRule {
    pub fn applies_to(&self, platform: &Platform) -> bool {
        match &self.platform {
            Some(only) => only == platform,
            None => true,
        }
    }
}

impl HookConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        if self.meta.descriptor.trim().is_empty() {
            issues.push(ValidationIssue::MissingField {
                rule_id: None,
                field: "meta.descriptor",
            });
        }
        if self.meta.marker.trim().is_empty() {
            issues.push(ValidationIssue::MissingField {
                rule_id: None,
                field: "meta.marker",
            });
        }
        if self.meta.state_file.trim().is_empty() {
            issues.push(ValidationIssue::MissingField {
                rule_id: None,
                field: "meta.state_file",
            });
        }

        if !self.staging.files.is_empty() && self.staging.dir.trim().is_empty() {
            issues.push(ValidationIssue::MissingField {
                rule_id: None,
                field: "staging.dir",
            });
        }
        for file in &self.staging.files {
            if file.source.trim().is_empty() || file.dest.trim().is_empty() {
                issues.push(ValidationIssue::InvalidCombo {
                    rule_id: None,
                    message: "staged files need both source and dest".to_string(),
                });
            }
            if is_tree_root(&file.dest) {
                issues.push(ValidationIssue::InvalidCombo {
                    rule_id: None,
                    message: format!("staged file '{}' targets the tree root", file.source),
                });
            }
        }

        if let Some(samples) = &self.samples {
            if samples.source_dir.trim().is_empty() {
                issues.push(ValidationIssue::MissingField {
                    rule_id: None,
                    field: "samples.source_dir",
                });
            }
            if is_tree_root(&samples.dest_dir) {
                issues.push(ValidationIssue::InvalidCombo {
                    rule_id: None,
                    message: "samples.dest_dir must not be the tree root".to_string(),
                });
            }
        }

        if let Some(mains) = &self.mains {
            if mains.placeholder.is_empty() || mains.block.is_empty() {
                issues.push(ValidationIssue::InvalidCombo {
                    rule_id: None,
                    message: "mains needs both placeholder and block".to_string(),
                });
            }
        }

        let mut seen_ids = HashSet::new();
        let rule_ids = self
            .literal
            .iter()
            .map(|rule| rule.id.as_str())
            .chain(self.include.iter().map(|rule| rule.id.as_str()));
        for id in rule_ids {
            if id.trim().is_empty() {
                issues.push(ValidationIssue::MissingField {
                    rule_id: None,
                    field: "id",
                });
            } else if !seen_ids.insert(id) {
                issues.push(ValidationIssue::DuplicateId(id.to_string()));
            }
        }

        for rule in &self.literal {
            if rule.file.trim().is_empty() {
                issues.push(ValidationIssue::MissingField {
                    rule_id: Some(rule.id.clone()),
                    field: "file",
                });
            }
            if rule.original.is_empty() || rule.patched.is_empty() {
                issues.push(ValidationIssue::InvalidCombo {
                    rule_id: Some(rule.id.clone()),
                    message: "original and patched tokens must be non-empty".to_string(),
                });
            } else if rule.original == rule.patched {
                issues.push(ValidationIssue::InvalidCombo {
                    rule_id: Some(rule.id.clone()),
                    message: "original and patched tokens are identical".to_string(),
                });
            }
        }

        for rule in &self.include {
            if rule.prefix.trim().is_empty() {
                issues.push(ValidationIssue::MissingField {
                    rule_id: Some(rule.id.clone()),
                    field: "prefix",
                });
            }
            if rule.header_dir.trim().is_empty() {
                issues.push(ValidationIssue::MissingField {
                    rule_id: Some(rule.id.clone()),
                    field: "header_dir",
                });
            }
            if rule.targets.is_empty() {
                issues.push(ValidationIssue::MissingField {
                    rule_id: Some(rule.id.clone()),
                    field: "targets",
                });
            }
        }

        // Apply has to flip the detected state, or every run would re-apply
        let marker = self.meta.marker.as_str();
        let flips_state = !marker.trim().is_empty()
            && self.literal.iter().any(|rule| {
                rule.file == self.meta.descriptor
                    && rule.patched.contains(marker)
                    && !rule.original.contains(marker)
            });
        if !flips_state {
            issues.push(ValidationIssue::MarkerNeverWritten {
                descriptor: self.meta.descriptor.clone(),
                marker: marker.to_string(),
            });
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }
}

fn is_tree_root(relative: &str) -> bool {
    relative
        .split('/')
        .all(|part| part.is_empty() || part == ".")
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone)]
pub enum ValidationIssue {
    MissingField {
        rule_id: Option<String>,
        field: &'static str,
    },
    InvalidCombo {
        rule_id: Option<String>,
        message: String,
    },
    DuplicateId(String),
    MarkerNeverWritten {
        descriptor: String,
        marker: String,
    },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::MissingField { rule_id, field } => match rule_id {
                Some(id) => write!(f, "rule '{id}' missing required field '{field}'"),
                None => write!(f, "config missing required field '{field}'"),
            },
            ValidationIssue::InvalidCombo { rule_id, message } => match rule_id {
                Some(id) => write!(f, "rule '{id}' has invalid configuration: {message}"),
                None => write!(f, "invalid configuration: {message}"),
            },
            ValidationIssue::DuplicateId(id) => write!(f, "rule id '{id}' is used more than once"),
            ValidationIssue::MarkerNeverWritten { descriptor, marker } => write!(
                f,
                "no literal rule on '{descriptor}' introduces the marker '{marker}'"
            ),
        }
    }
}
