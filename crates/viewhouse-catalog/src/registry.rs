//! Snapshot Registry
//!
//! The registry publishes immutable snapshots of the descriptor set. Readers
//! clone an `Arc<RegistrySnapshot>` and plan against it for as long as they
//! like; writers build a modified copy and swap it in under a brief
//! exclusive lock. Swaps are linearizable: a reader sees either the whole
//! old state or the whole new state, never a mix.
//!
//! The snapshot's `epoch` increments on every swap. Holders of an old epoch
//! (in-flight queries) keep old descriptors - and therefore old ready
//! directories - alive until they drop; retired file deletion is deferred
//! past a grace period for exactly this reason.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::descriptor::{Health, ViewDescriptor};
use crate::error::{CatalogError, Result};

/// An immutable view of the registry at one instant.
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    views: BTreeMap<String, Arc<ViewDescriptor>>,
    epoch: u64,
}

impl RegistrySnapshot {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn get(&self, name: &str) -> Option<Arc<ViewDescriptor>> {
        self.views.get(name).cloned()
    }

    /// Views the planner may route to, name-ordered for determinism.
    pub fn list_healthy(&self) -> Vec<Arc<ViewDescriptor>> {
        self.views
            .values()
            .filter(|d| d.is_healthy())
            .cloned()
            .collect()
    }

    pub fn list_all(&self) -> Vec<Arc<ViewDescriptor>> {
        self.views.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }
}

/// The mutable registry handle. Cheap to share via `Arc<Registry>`.
#[derive(Debug)]
pub struct Registry {
    inner: RwLock<Arc<RegistrySnapshot>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Registry {
        Registry {
            inner: RwLock::new(Arc::new(RegistrySnapshot {
                views: BTreeMap::new(),
                epoch: 0,
            })),
        }
    }

    /// Load a registry from an `mvs/` root by reading every view manifest.
    ///
    /// A view left in BUILDING by a crashed builder is demoted to what its
    /// ready directory still supports (STALE if one exists, MISSING if not).
    /// A malformed manifest is fatal.
    pub fn open(mvs_root: &Path) -> Result<Registry> {
        let registry = Registry::new();
        if !mvs_root.exists() {
            return Ok(registry);
        }
        for entry in std::fs::read_dir(mvs_root)? {
            let entry = entry?;
            let view_dir = entry.path();
            if !view_dir.is_dir() {
                continue;
            }
            if !view_dir.join(crate::descriptor::MANIFEST_FILE).exists() {
                continue;
            }
            let mut desc = ViewDescriptor::load_manifest(&view_dir)?;
            let ready = view_dir.join("ready");
            if desc.health == Health::Building {
                let demoted = if ready.is_dir() {
                    Health::Stale
                } else {
                    Health::Missing
                };
                warn!(view = %desc.name, to = demoted.as_str(), "recovering interrupted build");
                desc.health = demoted;
            } else if desc.is_healthy() && !ready.is_dir() {
                return Err(CatalogError::Corrupt {
                    path: view_dir,
                    reason: format!("view {} is HEALTHY but has no ready directory", desc.name),
                });
            }
            registry.register(desc)?;
        }
        Ok(registry)
    }

    /// Current snapshot; the only entry point for readers.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.inner.read().clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<ViewDescriptor>> {
        self.snapshot().get(name)
    }

    pub fn list_healthy(&self) -> Vec<Arc<ViewDescriptor>> {
        self.snapshot().list_healthy()
    }

    /// Transition a view's health, enforcing the lifecycle state machine.
    pub fn mark(&self, name: &str, to: Health) -> Result<()> {
        self.swap(|views| {
            let current = views
                .get(name)
                .ok_or_else(|| CatalogError::UnknownView(name.to_string()))?;
            let from = current.health;
            if !from.can_transition(to) {
                return Err(CatalogError::InvalidTransition {
                    name: name.to_string(),
                    from,
                    to,
                });
            }
            let mut updated = (**current).clone();
            updated.health = to;
            info!(view = name, from = from.as_str(), to = to.as_str(), "health transition");
            views.insert(name.to_string(), Arc::new(updated));
            Ok(())
        })
    }

    /// Insert or replace a descriptor.
    ///
    /// Rejects a HEALTHY registration whose fingerprint collides with a
    /// different healthy view - the schema-drift guard: two views computing
    /// the same definition must never both be routable.
    pub fn register(&self, desc: ViewDescriptor) -> Result<()> {
        self.swap(|views| {
            if desc.is_healthy() {
                if let Some(existing) = views.values().find(|d| {
                    d.name != desc.name
                        && d.is_healthy()
                        && d.schema_fingerprint == desc.schema_fingerprint
                }) {
                    return Err(CatalogError::SchemaDrift {
                        name: desc.name.clone(),
                        existing: existing.name.clone(),
                        fingerprint: desc.schema_fingerprint.clone(),
                    });
                }
            }
            views.insert(desc.name.clone(), Arc::new(desc));
            Ok(())
        })
    }

    pub fn remove(&self, name: &str) -> Result<()> {
        self.swap(|views| {
            views
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| CatalogError::UnknownView(name.to_string()))
        })
    }

    /// Copy-modify-swap under the brief exclusive section.
    fn swap<F>(&self, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut BTreeMap<String, Arc<ViewDescriptor>>) -> Result<()>,
    {
        let mut guard = self.inner.write();
        let mut views = guard.views.clone();
        mutate(&mut views)?;
        *guard = Arc::new(RegistrySnapshot {
            views,
            epoch: guard.epoch + 1,
        });
        Ok(())
    }
}
