//! Orbis (guest console kernel) interfaces.
//!
//! This module provides the guest kernel's view of a process and its
//! loaded shared modules, and the dynlib syscalls built on top of it.
//!
//! # Submodules
//!
//! - [`kernel`] - Process context and its configuration
//! - [`module`] - Loaded module representation and builder
//! - [`registry`] - Module registry with guest-visible reference counts
//! - [`info`] - Guest module information records
//! - [`dynlib`] - Dynamic library syscalls

pub mod dynlib;
pub mod info;
pub mod kernel;
pub mod module;
pub mod registry;

pub use info::{DynlibInfo, DynlibInfoEx};
pub use kernel::{ListBound, Process, ProcessBuilder};
pub use module::{EhFrameInfo, Module, ModuleBuilder, ProcParam, Segment, TlsInfo};
pub use registry::{ModuleRef, ModuleRegistry};
