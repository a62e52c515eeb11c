//! Guest process context.
//!
//! Every dynlib syscall runs against exactly one [`Process`], passed in
//! explicitly by the caller. A process owns the registry of its loaded
//! modules and remembers which of them is the main executable.

use super::module::{Module, ProcParam};
use super::registry::{ModuleRef, ModuleRegistry};
use crate::Result;
use tracing::{debug, warn};

/// How `dynlib_get_list` treats the caller's buffer capacity.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ListBound {
    /// Never write more handles than the buffer holds.
    #[default]
    Exact,
    /// Reproduce the reference kernel's `count++ > capacity` check, which
    /// writes one handle past the buffer and may report a count larger than
    /// the number of handles written.
    Compat,
}

pub struct ProcessBuilder {
    list_bound: ListBound,
    trap_diagnostics: bool,
}

impl Default for ProcessBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessBuilder {
    pub fn new() -> Self {
        Self {
            list_bound: ListBound::Exact,
            trap_diagnostics: false,
        }
    }

    pub fn list_bound(mut self, list_bound: ListBound) -> Self {
        self.list_bound = list_bound;
        self
    }

    /// Panic at the points where the reference kernel breaks into the
    /// debugger, instead of only logging them.
    pub fn trap_diagnostics(mut self, trap_diagnostics: bool) -> Self {
        self.trap_diagnostics = trap_diagnostics;
        self
    }

    /// Create the process with its main executable as the first module.
    pub fn build(self, main: Module) -> Process {
        let (modules, main) = ModuleRegistry::with_first(main);
        let main_handle = main.handle();
        debug!("process created, main executable has handle {}", main_handle);
        Process {
            modules,
            main_handle,
            list_bound: self.list_bound,
            trap_diagnostics: self.trap_diagnostics,
        }
    }
}

/// Represents a guest process
pub struct Process {
    modules: ModuleRegistry,
    main_handle: u32,
    list_bound: ListBound,
    trap_diagnostics: bool,
}

impl Process {
    /// Create a process with the default configuration.
    pub fn new(main: Module) -> Self {
        ProcessBuilder::new().build(main)
    }

    pub fn modules(&self) -> &ModuleRegistry {
        &self.modules
    }

    /// Register a module the loader has finished mapping and relocating.
    pub fn load(&self, module: Module) -> Result<ModuleRef> {
        self.modules.insert(module)
    }

    pub fn unload(&self, handle: u32) -> Option<ModuleRef> {
        self.modules.remove(handle)
    }

    /// Take a counted reference to module `handle`.
    pub fn module(&self, handle: u32) -> Option<ModuleRef> {
        self.modules.get(handle)
    }

    /// Run `f` on module `handle` without adding to its holder count.
    pub fn with_module<R>(&self, handle: u32, f: impl FnOnce(&ModuleRef) -> R) -> Option<R> {
        self.modules.with_module(handle, f)
    }

    /// Startup parameters published by the main executable.
    pub fn proc_param(&self) -> Option<ProcParam> {
        self.with_module(self.main_handle, |main| main.proc_param)?
    }

    pub fn list_bound(&self) -> ListBound {
        self.list_bound
    }

    /// Report a point where the reference kernel traps into the debugger.
    pub(crate) fn diagnostic(&self, what: &str) {
        warn!("{}", what);
        if self.trap_diagnostics {
            panic!("dynlib diagnostic trap: {what}");
        }
    }
}
