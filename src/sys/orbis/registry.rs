//! Module registry of a process.
//!
//! The registry owns the modules loaded into one process and hands out
//! [`ModuleRef`]s, reference-counted handles whose holder count is exposed to
//! the guest as a module's `ref_count`. The count is maintained explicitly by
//! `ModuleRef`'s `Clone` and `Drop` so its meaning does not depend on the
//! internals of `Arc`: the registry's own listing is one holder, and every
//! outstanding `ModuleRef` is one more.
//!
//! Syscalls inspect modules through [`ModuleRegistry::with_module`], which
//! borrows the registry's reference under the read lock instead of cloning
//! it, so concurrent queries never show up in each other's counts.

use super::module::Module;
use crate::{Error, Result};
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

struct Slot {
    module: Module,
    holders: AtomicUsize,
}

/// A counted reference to a loaded module.
pub struct ModuleRef {
    slot: Arc<Slot>,
}

impl ModuleRef {
    fn new(module: Module) -> Self {
        Self {
            slot: Arc::new(Slot {
                module,
                holders: AtomicUsize::new(1),
            }),
        }
    }

    /// Number of live holders of this module, including `self`.
    pub fn holders(&self) -> usize {
        self.slot.holders.load(Ordering::Acquire)
    }

    /// Whether both references point to the same loaded module.
    pub fn ptr_eq(a: &ModuleRef, b: &ModuleRef) -> bool {
        Arc::ptr_eq(&a.slot, &b.slot)
    }
}

impl Deref for ModuleRef {
    type Target = Module;

    fn deref(&self) -> &Module {
        &self.slot.module
    }
}

impl Clone for ModuleRef {
    fn clone(&self) -> Self {
        self.slot.holders.fetch_add(1, Ordering::Relaxed);
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl Drop for ModuleRef {
    fn drop(&mut self) {
        self.slot.holders.fetch_sub(1, Ordering::Release);
    }
}

impl std::fmt::Debug for ModuleRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRef")
            .field("handle", &self.handle())
            .field("name", &self.name)
            .field("holders", &self.holders())
            .finish()
    }
}

#[derive(Default)]
struct Inner {
    /// Map from handle to the registry's reference
    modules: HashMap<u32, ModuleRef>,
    /// Handles in load order
    order: Vec<u32>,
    next_handle: u32,
    /// Set once `u32::MAX` has been handed out
    exhausted: bool,
}

impl Inner {
    fn register(&mut self, mut module: Module) -> ModuleRef {
        let handle = self.next_handle;
        match handle.checked_add(1) {
            Some(next) => self.next_handle = next,
            None => self.exhausted = true,
        }

        module.handle = handle;
        debug!("registering module {} with handle {}", module.name, handle);

        let entry = ModuleRef::new(module);
        self.modules.insert(handle, entry.clone());
        self.order.push(handle);
        entry
    }
}

/// Modules currently loaded into a process.
#[derive(Default)]
pub struct ModuleRegistry {
    inner: RwLock<Inner>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// A registry whose first module is `module`, with handle 0.
    pub fn with_first(module: Module) -> (Self, ModuleRef) {
        let registry = Self::new();
        let entry = registry.write().register(module);
        (registry, entry)
    }

    /// Register a module handed over by the loader and assign its handle.
    ///
    /// Handles are never reused, so this fails once every `u32` handle has
    /// been handed out.
    pub fn insert(&self, module: Module) -> Result<ModuleRef> {
        let mut inner = self.write();
        if inner.exhausted {
            return Err(Error::HandlesExhausted);
        }
        Ok(inner.register(module))
    }

    /// Remove a module from the listing.
    ///
    /// The registry's reference is returned; the module stays alive until
    /// it and every other outstanding reference are dropped.
    pub fn remove(&self, handle: u32) -> Option<ModuleRef> {
        let mut inner = self.write();
        let entry = inner.modules.remove(&handle)?;
        inner.order.retain(|&h| h != handle);
        debug!("unregistered module {} (handle {})", entry.name, handle);
        Some(entry)
    }

    /// Take a counted reference to module `handle`.
    pub fn get(&self, handle: u32) -> Option<ModuleRef> {
        self.read().modules.get(&handle).cloned()
    }

    /// Run `f` on module `handle` without taking a reference to it.
    ///
    /// The read lock is held while `f` runs.
    pub fn with_module<R>(&self, handle: u32, f: impl FnOnce(&ModuleRef) -> R) -> Option<R> {
        self.read().modules.get(&handle).map(f)
    }

    /// Visit loaded modules in load order without taking references, until
    /// `f` returns `false`.
    pub fn for_each_while(&self, mut f: impl FnMut(&ModuleRef) -> bool) {
        let inner = self.read();
        for handle in &inner.order {
            let Some(module) = inner.modules.get(handle) else {
                continue;
            };
            if !f(module) {
                break;
            }
        }
    }

    /// Loaded modules in load order.
    pub fn list(&self) -> Vec<ModuleRef> {
        let inner = self.read();
        inner
            .order
            .iter()
            .filter_map(|handle| inner.modules.get(handle).cloned())
            .collect()
    }

    /// Handles of the loaded modules in load order.
    pub fn handles(&self) -> Vec<u32> {
        self.read().order.clone()
    }
}
