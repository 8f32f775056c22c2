// SPDX-License-Identifier: Apache-2.0

//! Known tool limitations and the shared compatibility cache.
//!
//! Together these form the compatibility predicate consulted before any
//! translator is invoked: the registry encodes what the project already knows
//! a tool cannot handle, the cache what a tool has declined during this run.

use std::collections::HashSet;
use std::sync::RwLock;

use regex::Regex;

use crate::config::KnownLimitationConfig;
use crate::error::ConfigError;
use crate::translator::{Compatibility, OptionProfile, Translator};

#[derive(Debug)]
pub struct KnownLimitation {
    pub translator: String,
    pub profile: Option<String>,
    pub pattern: Regex,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct KnownLimitations {
    entries: Vec<KnownLimitation>,
}

impl KnownLimitations {
    pub fn new(entries: Vec<KnownLimitation>) -> Self {
        KnownLimitations { entries }
    }

    pub fn from_config(configs: &[KnownLimitationConfig]) -> Result<Self, ConfigError> {
        let mut entries = Vec::with_capacity(configs.len());
        for c in configs {
            entries.push(KnownLimitation {
                translator: c.translator.clone(),
                profile: c.profile.clone(),
                pattern: Regex::new(&c.pattern)?,
                reason: c.reason.clone(),
            });
        }
        Ok(KnownLimitations { entries })
    }

    /// Returns the first entry that rules out `translator`/`profile` for
    /// `source`.
    pub fn check(&self, translator: &str, profile: &str, source: &str) -> Option<&KnownLimitation> {
        self.entries.iter().find(|e| {
            e.translator == translator
                && e.profile.as_deref().map_or(true, |p| p == profile)
                && e.pattern.is_match(source)
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Edges excluded for particular inputs after a translator declined them.
///
/// Keyed by (root source digest, translator, profile). Inserts are
/// idempotent and entries are never removed.
#[derive(Debug, Default)]
pub struct CompatibilityCache {
    excluded: RwLock<HashSet<(String, String, String)>>,
}

impl CompatibilityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_excluded(&self, digest: &str, translator: &str, profile: &str) -> bool {
        let guard = self.excluded.read().unwrap_or_else(|e| e.into_inner());
        guard.contains(&(
            digest.to_string(),
            translator.to_string(),
            profile.to_string(),
        ))
    }

    /// Returns true if the entry was not already present.
    pub fn exclude(&self, digest: &str, translator: &str, profile: &str) -> bool {
        let mut guard = self.excluded.write().unwrap_or_else(|e| e.into_inner());
        guard.insert((
            digest.to_string(),
            translator.to_string(),
            profile.to_string(),
        ))
    }

    pub fn len(&self) -> usize {
        self.excluded.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The combined pre-invocation check for one edge and one root source.
#[derive(Debug, Default)]
pub struct CompatibilityPredicate {
    pub limitations: KnownLimitations,
    pub cache: CompatibilityCache,
}

impl CompatibilityPredicate {
    pub fn new(limitations: KnownLimitations) -> Self {
        CompatibilityPredicate {
            limitations,
            cache: CompatibilityCache::new(),
        }
    }

    pub fn check(
        &self,
        translator: &dyn Translator,
        profile: &OptionProfile,
        digest: &str,
        source: &str,
    ) -> Compatibility {
        if self.cache.is_excluded(digest, translator.name(), &profile.name) {
            return Compatibility::Incompatible(format!(
                "{}/{} previously declined this input",
                translator.name(),
                profile.name
            ));
        }
        if let Some(entry) = self.limitations.check(translator.name(), &profile.name, source) {
            return Compatibility::Incompatible(format!(
                "known limitation of {}: {}",
                entry.translator, entry.reason
            ));
        }
        translator.compatibility(source)
    }
}
