//! Policy definitions and the directory loader.
//!
//! A policy file is YAML or JSON with a top-level `policies` array:
//!
//! ```yaml
//! policies:
//!   - name: s3-encryption
//!     description: Buckets must be encrypted at rest
//!     resource_types: [aws_s3_bucket]
//!     rules:
//!       - property: server_side_encryption_configuration
//!         required: true
//! ```

pub mod compliance;
pub mod evaluate;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, Result};

/// A named rule-set scoped to a set of resource types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub resource_types: BTreeSet<String>,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl Policy {
    pub fn applies_to(&self, resource_type: &str) -> bool {
        self.resource_types.contains(resource_type)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    #[serde(default)]
    pub property: String,
    #[serde(default)]
    pub required: bool,
}

#[derive(Deserialize)]
struct PolicyFile {
    #[serde(default)]
    policies: Vec<RawPolicy>,
}

#[derive(Deserialize)]
struct RawPolicy {
    name: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    resource_types: BTreeSet<String>,
    #[serde(default)]
    rules: Vec<Rule>,
}

/// Every loaded policy, keyed by name.
///
/// Names are unique: when two files define the same name, the file loaded
/// later replaces the earlier definition (files load in file-name order).
#[derive(Debug, Clone, Default)]
pub struct PolicySet {
    policies: BTreeMap<String, Policy>,
}

impl PolicySet {
    pub fn from_policies<I: IntoIterator<Item = Policy>>(policies: I) -> Self {
        let mut set = Self::default();
        for policy in policies {
            set.insert(policy, Path::new("<inline>"));
        }
        set
    }

    /// Load every `.yml`, `.yaml` and `.json` file directly inside `dir`.
    ///
    /// A missing directory yields an empty set with a warning, and a file
    /// that fails to parse is skipped with a warning; neither is fatal.
    pub fn load(dir: &Path) -> Self {
        let mut set = Self::default();

        if !dir.is_dir() {
            tracing::warn!(dir = %dir.display(), "policies directory does not exist");
            return set;
        }

        for path in policy_files(dir) {
            match read_policy_file(&path) {
                Ok(policies) => {
                    for raw in policies {
                        let Some(name) = raw.name.filter(|n| !n.is_empty()) else {
                            tracing::warn!(file = %path.display(), "policy without a name, skipping");
                            continue;
                        };
                        let policy = Policy {
                            name,
                            description: raw.description,
                            resource_types: raw.resource_types,
                            rules: raw.rules,
                        };
                        set.insert(policy, &path);
                    }
                }
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "unreadable policy file, skipping");
                }
            }
        }

        set
    }

    fn insert(&mut self, policy: Policy, source: &Path) {
        if self.policies.contains_key(&policy.name) {
            tracing::warn!(
                policy = %policy.name,
                file = %source.display(),
                "policy redefined, later definition wins"
            );
        }
        self.policies.insert(policy.name.clone(), policy);
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Policy> {
        self.policies.get(name)
    }

    /// Policies in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Policy> {
        self.policies.values()
    }

    pub fn summary(&self) -> PoliciesSummary {
        PoliciesSummary {
            total_policies: self.len(),
            policies: self
                .iter()
                .map(|p| PolicyOverview {
                    name: p.name.clone(),
                    description: p.description.clone(),
                    resource_types: p.resource_types.iter().cloned().collect(),
                    rules_count: p.rules.len(),
                })
                .collect(),
        }
    }
}

/// Listing used by the `list-policies` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoliciesSummary {
    pub total_policies: usize,
    pub policies: Vec<PolicyOverview>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyOverview {
    pub name: String,
    pub description: String,
    pub resource_types: Vec<String>,
    pub rules_count: usize,
}

fn policy_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| matches!(e, "yml" | "yaml" | "json"))
            })
            .collect(),
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "cannot list policies directory");
            Vec::new()
        }
    };
    files.sort();
    files
}

fn read_policy_file(path: &Path) -> Result<Vec<RawPolicy>> {
    let content = std::fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    let file: Option<PolicyFile> = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&content)?,
        Some("yml") | Some("yaml") => serde_yaml::from_str(&content)?,
        _ => {
            return Err(HarnessError::Config(format!(
                "unsupported policy file {}",
                path.display()
            )))
        }
    };
    Ok(file.map(|f| f.policies).unwrap_or_default())
}
