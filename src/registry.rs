//! An immutable index of all known flag configurations.
//!
//! The registry is built once from every [`FlagConfigSource`] and never changes afterwards, so
//! readers can share it between threads without locking.
use std::{collections::HashMap, sync::Arc};

use crate::{Error, FlagConfig, FlagConfigSource, Result};

/// Identifies a flag either by its stable key or by its name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FlagIdentifier {
    /// Stable key of the flag.
    Key(String),
    /// Human-friendly name of the flag.
    Name(String),
}

impl FlagIdentifier {
    /// The identifier as supplied by the caller.
    pub fn as_str(&self) -> &str {
        match self {
            FlagIdentifier::Key(key) => key,
            FlagIdentifier::Name(name) => name,
        }
    }
}

/// Merge flag sources in registration order.
///
/// When two sources define a flag with the same name, the flag from the source registered later
/// replaces the earlier one entirely. Duplicates are not an error.
pub fn merge(sources: impl IntoIterator<Item = FlagConfigSource>) -> HashMap<String, FlagConfig> {
    let mut merged = HashMap::new();
    for flag in sources.into_iter().flat_map(FlagConfigSource::into_flags) {
        if let Some(previous) = merged.insert(flag.name.clone(), flag) {
            log::debug!(target: "izanami",
                flag_name = previous.name.as_str(),
                flag_key = previous.id.as_str();
                "flag configuration overridden by a later source");
        }
    }
    merged
}

/// `FlagConfigRegistry` holds every known flag, indexed by key and by name.
#[derive(Debug, Default)]
pub struct FlagConfigRegistry {
    by_name: HashMap<String, Arc<FlagConfig>>,
    by_key: HashMap<String, Arc<FlagConfig>>,
}

impl FlagConfigRegistry {
    /// Build a registry from sources. See [`merge`] for override semantics.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateFlagKey`] if two flags with different names share a key.
    pub fn new(sources: impl IntoIterator<Item = FlagConfigSource>) -> Result<FlagConfigRegistry> {
        let by_name: HashMap<String, Arc<FlagConfig>> = merge(sources)
            .into_iter()
            .map(|(name, flag)| (name, Arc::new(flag)))
            .collect();

        let mut by_key = HashMap::with_capacity(by_name.len());
        for flag in by_name.values() {
            if let Some(other) = by_key.insert(flag.id.clone(), Arc::clone(flag)) {
                let (first, second) = if other.name < flag.name {
                    (other.name.clone(), flag.name.clone())
                } else {
                    (flag.name.clone(), other.name.clone())
                };
                return Err(Error::DuplicateFlagKey {
                    key: flag.id.clone(),
                    first,
                    second,
                });
            }
        }

        Ok(FlagConfigRegistry { by_name, by_key })
    }

    /// The flag with this key.
    pub fn by_key(&self, key: &str) -> Option<Arc<FlagConfig>> {
        self.by_key.get(key).cloned()
    }

    /// The flag with this name.
    pub fn by_name(&self, name: &str) -> Option<Arc<FlagConfig>> {
        self.by_name.get(name).cloned()
    }

    /// The flag designated by `identifier`.
    pub fn lookup(&self, identifier: &FlagIdentifier) -> Option<Arc<FlagConfig>> {
        match identifier {
            FlagIdentifier::Key(key) => self.by_key(key),
            FlagIdentifier::Name(name) => self.by_name(name),
        }
    }

    /// All flags, ordered by name.
    pub fn all(&self) -> Vec<Arc<FlagConfig>> {
        let mut flags: Vec<_> = self.by_name.values().cloned().collect();
        flags.sort_by(|a, b| a.name.cmp(&b.name));
        flags
    }
}
