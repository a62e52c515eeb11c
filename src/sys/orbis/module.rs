//! Loaded module representation.
//!
//! A [`Module`] is what the external PRX loader hands over once it has mapped
//! a library into guest memory and applied its relocations. Everything here
//! is immutable after registration; the only per-module state that changes
//! at runtime is its holder count, which lives in the registry.

use crate::nid;
use std::collections::HashMap;

/// Number of memory segments reported per module.
pub const SEGMENT_SLOTS: usize = 2;

/// Length of the content fingerprint.
pub const FINGERPRINT_LEN: usize = 20;

/// A mapped memory segment of a module.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub address: u64,
    pub size: u64,
}

/// Thread-local storage layout of a module.
///
/// A zero `init_addr` means the module has no TLS block and the remaining
/// fields are ignored.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TlsInfo {
    /// Address of the TLS template image
    pub init_addr: u64,
    /// TLS module index
    pub index: u32,
    pub align: u32,
    /// Bytes copied from the template into each thread's block
    pub init_size: u32,
    /// Total per-thread block size
    pub size: u32,
}

impl TlsInfo {
    #[inline]
    pub const fn is_present(&self) -> bool {
        self.init_addr != 0
    }
}

/// Exception unwind tables of a module.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EhFrameInfo {
    pub addr: u64,
    pub size: u64,
    pub hdr_addr: u64,
    pub hdr_size: u64,
}

/// Process startup parameters published by the main executable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcParam {
    /// Guest address of the parameter blob
    pub address: u64,
    /// Value of the blob's own `size` field
    pub size: u64,
}

/// A shared module loaded into a process.
#[derive(Debug, Clone)]
pub struct Module {
    pub(super) handle: u32,
    pub name: String,
    pub fingerprint: [u8; FINGERPRINT_LEN],
    pub segments: [Segment; SEGMENT_SLOTS],
    pub tls: TlsInfo,
    pub init_addr: u64,
    pub fini_addr: u64,
    pub eh_frame: EhFrameInfo,
    pub proc_param: Option<ProcParam>,
    /// Exported symbols: lookup key -> address
    exports: HashMap<String, u64>,
}

impl Module {
    /// Handle assigned by the registry when the module was loaded.
    #[inline]
    pub fn handle(&self) -> u32 {
        self.handle
    }

    /// Look up an export by its full lookup key.
    pub fn symbol(&self, key: &str) -> Option<u64> {
        self.exports.get(key).copied()
    }

    /// Resolve a readable symbol name exported under this module's own name.
    pub fn resolve(&self, symbol_name: impl AsRef<[u8]>) -> Option<u64> {
        let key = nid::lookup_key(&nid::encode(symbol_name), &self.name);
        self.symbol(&key)
    }
}

/// Builder for modules handed over by the loader.
pub struct ModuleBuilder {
    module: Module,
}

impl ModuleBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            module: Module {
                handle: 0,
                name: name.to_string(),
                fingerprint: [0; FINGERPRINT_LEN],
                segments: [Segment::default(); SEGMENT_SLOTS],
                tls: TlsInfo::default(),
                init_addr: 0,
                fini_addr: 0,
                eh_frame: EhFrameInfo::default(),
                proc_param: None,
                exports: HashMap::new(),
            },
        }
    }

    pub fn fingerprint(mut self, fingerprint: [u8; FINGERPRINT_LEN]) -> Self {
        self.module.fingerprint = fingerprint;
        self
    }

    /// Set the code and data segments.
    pub fn segments(mut self, code: Segment, data: Segment) -> Self {
        self.module.segments = [code, data];
        self
    }

    pub fn tls(mut self, tls: TlsInfo) -> Self {
        self.module.tls = tls;
        self
    }

    pub fn init_fini(mut self, init_addr: u64, fini_addr: u64) -> Self {
        self.module.init_addr = init_addr;
        self.module.fini_addr = fini_addr;
        self
    }

    pub fn eh_frame(mut self, eh_frame: EhFrameInfo) -> Self {
        self.module.eh_frame = eh_frame;
        self
    }

    pub fn proc_param(mut self, address: u64, size: u64) -> Self {
        self.module.proc_param = Some(ProcParam { address, size });
        self
    }

    /// Export `symbol_name` under this module's library name.
    pub fn export(self, symbol_name: &str, address: u64) -> Self {
        let key = nid::lookup_key(&nid::encode(symbol_name), &self.module.name);
        self.export_key(key, address)
    }

    /// Export an already encoded lookup key, as found in the module's
    /// dynamic symbol table.
    pub fn export_key(mut self, key: impl Into<String>, address: u64) -> Self {
        self.module.exports.insert(key.into(), address);
        self
    }

    pub fn build(self) -> Module {
        self.module
    }
}
