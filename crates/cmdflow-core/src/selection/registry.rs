//! Capability registry: loads and indexes agent capability records.
//!
//! The registry is built once through an explicit [`CapabilityRegistry::initialize`]
//! step and is read-only afterwards, so it can be shared behind an `Arc`
//! without locking.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::selection::error::{SelectionError, SelectionResult};

/// Capability profile of one agent role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityRecord {
    /// Unique role id. Defaults to the map key when omitted in the source.
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub domains: BTreeSet<String>,
    #[serde(default)]
    pub expertise: BTreeSet<String>,
    /// Tie-break; higher wins.
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub selection_criteria: BTreeSet<String>,
}

impl CapabilityRecord {
    /// Whether `tag` appears in any of the record's tag sets.
    pub fn covers(&self, tag: &str) -> bool {
        self.domains.contains(tag)
            || self.expertise.contains(tag)
            || self.selection_criteria.contains(tag)
    }
}

/// On-disk/wire schema of the capability source.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CapabilityFile {
    capabilities: BTreeMap<String, CapabilityRecord>,
    #[serde(default)]
    selection_criteria: BTreeMap<String, String>,
    #[serde(default)]
    task_domains: BTreeMap<String, String>,
}

/// Where capability records come from.
#[derive(Debug, Clone)]
pub enum CapabilitySource {
    /// JSON file on disk.
    Path(PathBuf),
    /// JSON bytes already in memory.
    Bytes(Vec<u8>),
}

#[derive(Debug)]
struct LoadedRegistry {
    records: BTreeMap<String, CapabilityRecord>,
    selection_criteria: BTreeMap<String, String>,
    task_domains: BTreeMap<String, String>,
}

/// Mapping `role -> CapabilityRecord` plus descriptive tag tables.
#[derive(Debug)]
pub struct CapabilityRegistry {
    source: CapabilitySource,
    loaded: Option<LoadedRegistry>,
    /// Reason the last `initialize()` failed, reported by every read.
    load_error: Option<String>,
}

impl CapabilityRegistry {
    /// Create an uninitialized registry over `source`.
    pub fn new(source: CapabilitySource) -> Self {
        Self {
            source,
            loaded: None,
            load_error: None,
        }
    }

    /// Create and initialize in one step.
    pub fn load(source: CapabilitySource) -> SelectionResult<Self> {
        let mut registry = Self::new(source);
        registry.initialize()?;
        Ok(registry)
    }

    /// Parse the backing source.
    ///
    /// Fails with [`SelectionError::RegistryLoad`] when the source is missing
    /// or malformed. Calling it again reloads the source. After a failure the
    /// registry is uninitialized and every read reports the same reason.
    pub fn initialize(&mut self) -> SelectionResult<()> {
        match self.parse_source() {
            Ok(loaded) => {
                info!(roles = loaded.records.len(), "capability registry initialized");
                self.loaded = Some(loaded);
                self.load_error = None;
                Ok(())
            }
            Err(e) => {
                self.loaded = None;
                self.load_error = Some(match &e {
                    SelectionError::RegistryLoad { reason } => reason.clone(),
                    other => other.to_string(),
                });
                Err(e)
            }
        }
    }

    fn parse_source(&self) -> SelectionResult<LoadedRegistry> {
        let bytes = match &self.source {
            CapabilitySource::Path(path) => std::fs::read(path).map_err(|e| {
                SelectionError::registry_load(format!("cannot read {}: {e}", path.display()))
            })?,
            CapabilitySource::Bytes(bytes) => bytes.clone(),
        };

        let file: CapabilityFile = serde_json::from_slice(&bytes)
            .map_err(|e| SelectionError::registry_load(format!("malformed capabilities: {e}")))?;

        let mut records = BTreeMap::new();
        for (key, mut record) in file.capabilities {
            if key.trim().is_empty() {
                return Err(SelectionError::registry_load("capability with an empty role"));
            }
            if record.role.is_empty() {
                record.role = key.clone();
            } else if record.role != key {
                return Err(SelectionError::registry_load(format!(
                    "capability key {key} does not match its role {}",
                    record.role
                )));
            }
            debug!(role = %key, domains = record.domains.len(), "loaded capability");
            records.insert(key, record);
        }

        Ok(LoadedRegistry {
            records,
            selection_criteria: file.selection_criteria,
            task_domains: file.task_domains,
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.loaded.is_some()
    }

    fn loaded(&self) -> SelectionResult<&LoadedRegistry> {
        self.loaded.as_ref().ok_or_else(|| match &self.load_error {
            Some(reason) => SelectionError::registry_load(reason.clone()),
            None => SelectionError::registry_load("registry was never initialized"),
        })
    }

    /// All records, keyed by role.
    pub fn records(&self) -> SelectionResult<&BTreeMap<String, CapabilityRecord>> {
        Ok(&self.loaded()?.records)
    }

    pub fn get(&self, role: &str) -> Option<&CapabilityRecord> {
        self.loaded.as_ref().and_then(|l| l.records.get(role))
    }

    pub fn len(&self) -> usize {
        self.loaded.as_ref().map_or(0, |l| l.records.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Human-readable description of `tag`, from either descriptive table.
    pub fn describe(&self, tag: &str) -> Option<&str> {
        let loaded = self.loaded.as_ref()?;
        loaded
            .task_domains
            .get(tag)
            .or_else(|| loaded.selection_criteria.get(tag))
            .map(String::as_str)
    }

    /// Roles named in `criteria`, plus roles whose selection criteria
    /// intersect `criteria`.
    pub fn roles_matching_criteria(&self, criteria: &[String]) -> SelectionResult<BTreeSet<String>> {
        let records = self.records()?;
        Ok(records
            .values()
            .filter(|r| {
                criteria
                    .iter()
                    .any(|c| *c == r.role || r.selection_criteria.contains(c))
            })
            .map(|r| r.role.clone())
            .collect())
    }
}
