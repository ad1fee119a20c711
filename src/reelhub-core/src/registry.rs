//! In-memory directory of active providers.
//!
//! The registry is the single source of truth for "what can be queried right
//! now". Handles are kept in insertion order so fan-out enumeration is
//! deterministic. Every mutation and every snapshot happens under one
//! registry-wide lock; reads share it.

use crate::provider::ProviderHandle;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
pub struct CapabilityRegistry {
    providers: RwLock<Vec<ProviderHandle>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a handle, replacing any handle registered under the same name.
    ///
    /// The previous handle is removed and torn down before the new one is
    /// inserted; it is returned to the caller.
    pub fn register(&self, handle: ProviderHandle) -> Option<ProviderHandle> {
        let mut providers = self.write();
        let replaced = take_named(&mut providers, handle.name());
        if let Some(old) = &replaced {
            old.teardown();
            tracing::info!(provider = %handle.name(), "replaced registered provider");
        } else {
            tracing::debug!(provider = %handle.name(), "registered provider");
        }
        providers.push(handle);
        replaced
    }

    /// Remove the handle registered under `name`. Unknown names are a no-op.
    pub fn unregister(&self, name: &str) -> Option<ProviderHandle> {
        let removed = take_named(&mut self.write(), name);
        if let Some(old) = &removed {
            old.teardown();
            tracing::debug!(provider = %name, "unregistered provider");
        }
        removed
    }

    pub fn lookup(&self, name: &str) -> Option<ProviderHandle> {
        self.read().iter().find(|p| p.name() == name).cloned()
    }

    /// Snapshot of every registered handle, in registration order.
    pub fn list_all(&self) -> Vec<ProviderHandle> {
        self.read().clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.read().iter().map(|p| p.name().to_string()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().iter().any(|p| p.name() == name)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<ProviderHandle>> {
        self.providers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<ProviderHandle>> {
        self.providers.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn take_named(providers: &mut Vec<ProviderHandle>, name: &str) -> Option<ProviderHandle> {
    let index = providers.iter().position(|p| p.name() == name)?;
    Some(providers.remove(index))
}
