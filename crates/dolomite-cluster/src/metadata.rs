//! Index metadata: settings and alias resolution.

use std::collections::{BTreeSet, HashMap};

use dolomite_types::IndexUuid;
use serde::{Deserialize, Serialize};

use crate::error::{ClusterError, Result};

/// Per-index settings the write path cares about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    pub number_of_shards: u32,
    pub number_of_replicas: u32,

    /// Shadow-replica indices share storage between copies; replicas of such
    /// an index do not receive replica writes.
    pub shadow_replicas: bool,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            number_of_shards: 1,
            number_of_replicas: 1,
            shadow_replicas: false,
        }
    }
}

/// Metadata of one index incarnation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub name: String,
    pub uuid: IndexUuid,
    pub settings: IndexSettings,
    aliases: BTreeSet<String>,
}

impl IndexMetadata {
    pub fn new(name: impl Into<String>, settings: IndexSettings) -> Self {
        Self {
            name: name.into(),
            uuid: IndexUuid::random(),
            settings,
            aliases: BTreeSet::new(),
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.insert(alias.into());
        self
    }

    pub fn has_alias(&self, alias: &str) -> bool {
        self.aliases.contains(alias)
    }
}

/// Metadata of every index in the observed state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    indices: HashMap<String, IndexMetadata>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_index(mut self, index: IndexMetadata) -> Self {
        self.indices.insert(index.name.clone(), index);
        self
    }

    pub fn index(&self, name: &str) -> Option<&IndexMetadata> {
        self.indices.get(name)
    }

    /// Resolves an index name or alias to the single concrete index writes
    /// should go to.
    ///
    /// A concrete index name always resolves to itself. An alias resolves
    /// only if exactly one index carries it; an alias spanning several
    /// indices has no defined write target and is rejected.
    pub fn resolve_write_index(&self, name: &str) -> Result<&IndexMetadata> {
        if let Some(index) = self.indices.get(name) {
            return Ok(index);
        }

        let mut matches = self
            .indices
            .values()
            .filter(|index| index.has_alias(name))
            .collect::<Vec<_>>();

        match matches.len() {
            0 => Err(ClusterError::IndexNotFound {
                index: name.to_string(),
            }),
            1 => Ok(matches.remove(0)),
            _ => {
                let mut indices = matches
                    .iter()
                    .map(|index| index.name.clone())
                    .collect::<Vec<_>>();
                indices.sort();
                Err(ClusterError::AmbiguousWriteTarget {
                    alias: name.to_string(),
                    indices,
                })
            }
        }
    }
}
