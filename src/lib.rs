//! Dynlib - guest dynamic-module services for a console OS emulator.
//!
//! Guest binaries of the emulated console manage their shared modules (PRX
//! libraries) through a small family of kernel syscalls: enumerating the
//! loaded modules, querying their metadata, resolving exported symbols and
//! fetching the process startup parameters. This crate reproduces those
//! services on top of modules that an external loader has already mapped
//! into guest memory.
//!
//! # Modules
//!
//! - [`nid`] - Symbol name (NID) encoding used as export-table keys
//! - [`sys`] - Guest kernel interfaces: process context, module registry,
//!   metadata records and the dynlib syscalls
//! - [`syscalls`] - Syscall number table and raw argument dispatch
//!
//! # Error Handling
//!
//! All typed operations use the consolidated [`Error`] type. Guest-facing
//! entry points map it down to a [`Status`] code at the syscall boundary.

pub mod nid;
pub mod syscalls;
pub mod sys;

/// Consolidated error type for all dynlib operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("{0} is not implemented on retail kernels")]
    NotImplemented(&'static str),

    #[error("record declares size {declared}, expected {expected}")]
    SizeMismatch { declared: u64, expected: u64 },

    #[error("invalid object member index {0}")]
    InvalidMemberIndex(u8),

    #[error("no module with handle {0}")]
    NoSuchModule(u32),

    #[error("symbol {symbol} not exported by {module}")]
    SymbolNotFound { symbol: String, module: String },

    #[error("process has no startup parameters")]
    NoProcParam,

    #[error("bad guest address")]
    BadAddress,

    #[error("module handles exhausted")]
    HandlesExhausted,
}

impl Error {
    /// Map the error to the status code the guest kernel reports.
    pub fn status(&self) -> Status {
        match self {
            Error::NotImplemented(_) => Status::NoSys,
            Error::SizeMismatch { .. } | Error::InvalidMemberIndex(_) => Status::Inval,
            Error::NoSuchModule(_) => Status::Srch,
            Error::BadAddress => Status::Fault,
            Error::SymbolNotFound { .. } | Error::NoProcParam | Error::HandlesExhausted => {
                Status::Failure
            }
        }
    }

    /// Map the error for the calls whose guest ABI does not distinguish
    /// lookup failures: every "could not satisfy" cause becomes `-1`.
    pub fn coarse_status(&self) -> Status {
        match self {
            Error::NoSuchModule(_) | Error::SymbolNotFound { .. } | Error::NoProcParam => {
                Status::Failure
            }
            other => other.status(),
        }
    }
}

pub type Result<T> = core::result::Result<T, Error>;

/// Status codes returned to the guest.
///
/// The guest kernel is FreeBSD derived, so the structured codes use FreeBSD
/// errno numbering.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(i32)]
pub enum Status {
    Ok = 0,
    /// Undifferentiated failure.
    Failure = -1,
    Srch = 3,
    Fault = 14,
    Inval = 22,
    NoSys = 78,
}

impl Status {
    #[inline]
    pub const fn code(self) -> i32 {
        self as i32
    }
}

impl From<Status> for i64 {
    fn from(status: Status) -> Self {
        status.code().into()
    }
}

impl From<Result<()>> for Status {
    fn from(result: Result<()>) -> Self {
        match result {
            Ok(()) => Status::Ok,
            Err(e) => e.status(),
        }
    }
}

pub use sys::orbis::{
    ListBound, Module, ModuleBuilder, ModuleRef, ModuleRegistry, Process, ProcessBuilder,
};
pub use syscalls::{SyscallArgs, dispatch};
