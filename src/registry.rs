//! The relation registry.
//!
//! The registry is built once at startup from a JSON document and shared
//! read-only afterwards (`Arc<RelationRegistry>`). It is deliberately tolerant
//! of relations whose field is not a weak reference: those are rejected
//! individually when processed, so one bad entry cannot stop the rest of the
//! registry from being reconciled.
//!
//! # File Format
//!
//! ```json
//! {
//!   "relations": [
//!     {
//!       "referencing_table": "sentry_rule",
//!       "field": "owner_user_id",
//!       "owning_table": "auth_user",
//!       "policy": "set_null",
//!       "silo": "region"
//!     }
//!   ]
//! }
//! ```

use std::collections::HashMap;
use std::io;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::types::{Relation, RelationKey, SiloMode};

/// Errors that can occur while building the registry.
///
/// All of these are configuration errors: retrying cannot fix them.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("IO error reading registry: {0}")]
    Io(#[from] io::Error),

    /// Malformed document, including unknown cascade policies or silo modes.
    #[error("invalid registry document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("relation {0} is registered more than once")]
    DuplicateRelation(RelationKey),
}

pub type Result<T> = std::result::Result<T, RegistryError>;

#[derive(Debug, Deserialize)]
struct RegistryDocument {
    relations: Vec<Relation>,
}

/// Immutable set of registered relations, in registration order.
#[derive(Debug, Clone, Default)]
pub struct RelationRegistry {
    relations: Vec<Relation>,
    index: HashMap<RelationKey, usize>,
}

impl RelationRegistry {
    /// Builds a registry, rejecting duplicate relation keys.
    pub fn new(relations: Vec<Relation>) -> Result<Self> {
        let mut index = HashMap::with_capacity(relations.len());
        for (position, relation) in relations.iter().enumerate() {
            if index.insert(relation.key(), position).is_some() {
                return Err(RegistryError::DuplicateRelation(relation.key()));
            }
        }
        Ok(RelationRegistry { relations, index })
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let document: RegistryDocument = serde_json::from_slice(bytes)?;
        Self::new(document.relations)
    }

    /// Loads the registry from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_json(&bytes)
    }

    pub fn get(&self, key: &RelationKey) -> Option<&Relation> {
        self.index.get(key).map(|&position| &self.relations[position])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Relation> {
        self.relations.iter()
    }

    /// Relations processed by the given silo mode, in registration order.
    pub fn for_silo(&self, silo: SiloMode) -> impl Iterator<Item = &Relation> {
        self.relations.iter().filter(move |r| r.silo == silo)
    }

    pub fn len(&self) -> usize {
        self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }
}
