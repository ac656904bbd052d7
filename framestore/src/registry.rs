/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Identity registry: unique string identifiers, partitioned by entity
//! kind.
//!
//! Every storage, view and container carries a string ID unique within
//! its owning scope. IDs are prefixed by kind (`"S"`, `"V"`, `"C"`);
//! callers may request a specific ID or let the registry synthesize the
//! lowest unused `prefix + %04d` one. Registering an ID that is already
//! taken logs a warning and overwrites by default; a registry created
//! with [`Registry::strict`] turns the collision into a hard error
//! instead.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

/// The entity kinds an identifier can name.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize
)]
pub enum Kind {
    Container,
    Storage,
    View,
}

impl Kind {
    /// The single-letter prefix carried by every ID of this kind.
    pub fn prefix(&self) -> &'static str {
        match self {
            Kind::Container => "C",
            Kind::Storage => "S",
            Kind::View => "V",
        }
    }
}

/// Errors that can occur when registering an identifier.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("id {id} already registered in the {kind:?} pool")]
    IdTaken { kind: Kind, id: String },
}

/// The outcome of a successful registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registered {
    /// The final, fully-prefixed identifier.
    pub id: String,
    /// True when an existing registration was displaced (lenient mode
    /// only).
    pub overwrote: bool,
}

/// Per-kind pools of registered identifiers.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    strict: bool,
    pools: BTreeMap<Kind, BTreeSet<String>>,
}

impl Registry {
    /// A lenient registry: ID collisions warn and overwrite.
    pub fn new() -> Self {
        Self {
            strict: false,
            pools: BTreeMap::new(),
        }
    }

    /// A strict registry: ID collisions fail with
    /// [`RegistryError::IdTaken`].
    pub fn strict() -> Self {
        Self {
            strict: true,
            pools: BTreeMap::new(),
        }
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// The fully-prefixed form of a requested identifier: a name that
    /// already carries the kind prefix is kept as-is, any other name
    /// gets the prefix prepended.
    pub fn qualify(kind: Kind, name: &str) -> String {
        let prefix = kind.prefix();
        if name.starts_with(prefix) {
            name.to_string()
        } else {
            format!("{}{}", prefix, name)
        }
    }

    /// Registers an identifier in the pool for `kind`.
    ///
    /// A requested ID is qualified with the kind prefix first. With no
    /// requested ID, the lowest unused `prefix + %04d` identifier is
    /// synthesized. A collision overwrites with a warning, or fails in
    /// strict mode.
    pub fn register(
        &mut self,
        kind: Kind,
        requested: Option<&str>,
    ) -> Result<Registered, RegistryError> {
        let pool = self.pools.entry(kind).or_default();
        let id = match requested {
            Some(name) => Self::qualify(kind, name),
            None => {
                let id = Self::synthesize(pool, kind.prefix());
                tracing::debug!(id = %id, kind = ?kind, "synthesized id");
                id
            }
        };
        let overwrote = pool.contains(&id);
        if overwrote {
            if self.strict {
                return Err(RegistryError::IdTaken { kind, id });
            }
            tracing::warn!(id = %id, kind = ?kind, "overwriting id already in pool");
        }
        pool.insert(id.clone());
        Ok(Registered { id, overwrote })
    }

    /// Inserts an identifier without collision handling. Used when a
    /// container clone carries over the IDs of its source.
    pub fn adopt(&mut self, kind: Kind, id: &str) {
        self.pools.entry(kind).or_default().insert(id.to_string());
    }

    /// Frees an identifier, making it available for synthesis again.
    /// Returns false if it was not registered.
    pub fn release(&mut self, kind: Kind, id: &str) -> bool {
        self.pools
            .get_mut(&kind)
            .map(|pool| pool.remove(id))
            .unwrap_or(false)
    }

    pub fn contains(&self, kind: Kind, id: &str) -> bool {
        self.pools
            .get(&kind)
            .map(|pool| pool.contains(id))
            .unwrap_or(false)
    }

    fn synthesize(pool: &BTreeSet<String>, prefix: &str) -> String {
        let mut index = 0usize;
        loop {
            let candidate = format!("{}{:04}", prefix, index);
            if !pool.contains(&candidate) {
                return candidate;
            }
            index += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthesized_ids_count_up() {
        let mut registry = Registry::new();
        let first = registry.register(Kind::Storage, None).unwrap();
        let second = registry.register(Kind::Storage, None).unwrap();
        assert_eq!(first.id, "S0000");
        assert_eq!(second.id, "S0001");
        assert!(!first.overwrote);
    }

    #[test]
    fn test_synthesis_fills_the_lowest_gap() {
        let mut registry = Registry::new();
        registry.adopt(Kind::Storage, "S0000");
        registry.adopt(Kind::Storage, "S0001");
        registry.release(Kind::Storage, "S0000");
        let next = registry.register(Kind::Storage, None).unwrap();
        assert_eq!(next.id, "S0000");
        let after = registry.register(Kind::Storage, None).unwrap();
        assert_eq!(after.id, "S0002");
    }

    #[test]
    fn test_requested_ids_are_prefixed() {
        let mut registry = Registry::new();
        let bare = registry.register(Kind::Storage, Some("probe")).unwrap();
        assert_eq!(bare.id, "Sprobe");
        let prefixed = registry.register(Kind::Storage, Some("Sobj")).unwrap();
        assert_eq!(prefixed.id, "Sobj");
    }

    #[test]
    fn test_lenient_collision_overwrites() {
        let mut registry = Registry::new();
        let first = registry.register(Kind::View, Some("V0000")).unwrap();
        assert!(!first.overwrote);
        let second = registry.register(Kind::View, Some("V0000")).unwrap();
        assert!(second.overwrote);
        assert_eq!(second.id, "V0000");
    }

    #[test]
    fn test_strict_collision_fails() {
        let mut registry = Registry::strict();
        registry.register(Kind::Storage, Some("S0000")).unwrap();
        let err = registry.register(Kind::Storage, Some("S0000"));
        assert!(matches!(err, Err(RegistryError::IdTaken { .. })));
    }

    #[test]
    fn test_kind_pools_are_independent() {
        let mut registry = Registry::new();
        let container = registry.register(Kind::Container, None).unwrap();
        let storage = registry.register(Kind::Storage, None).unwrap();
        assert_eq!(container.id, "C0000");
        assert_eq!(storage.id, "S0000");
        assert!(registry.contains(Kind::Container, "C0000"));
        assert!(!registry.contains(Kind::View, "V0000"));
    }

    #[test]
    fn test_release_unknown_is_false() {
        let mut registry = Registry::new();
        assert!(!registry.release(Kind::Storage, "S0000"));
    }
}
