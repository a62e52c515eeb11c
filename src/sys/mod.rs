//! Guest system interfaces.
//!
//! This module collects the guest operating system's kernel services that
//! the emulator reimplements on the host. Only the Orbis kernel is modelled.

pub mod orbis;

pub use orbis::{Process, ProcessBuilder};
