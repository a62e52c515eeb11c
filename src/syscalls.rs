//! Guest syscall table.
//!
//! This module provides a distributed slice that collects every handler
//! registered via the `#[syscall(N)]` attribute macro, and the dispatcher
//! that routes raw register arguments to them.

use crate::Status;
use crate::sys::orbis::Process;
use linkme::distributed_slice;
use std::ffi::CStr;
use tracing::{trace, warn};

/// Raw syscall arguments as passed in the guest's argument registers.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyscallArgs(pub [u64; 6]);

impl SyscallArgs {
    /// Build arguments from up to six register values; missing ones are zero.
    pub fn new(args: &[u64]) -> Self {
        let mut regs = [0u64; 6];
        for (reg, arg) in regs.iter_mut().zip(args) {
            *reg = *arg;
        }
        Self(regs)
    }

    #[inline]
    pub fn get(&self, index: usize) -> u64 {
        self.0[index]
    }

    #[inline]
    pub fn u32(&self, index: usize) -> u32 {
        self.0[index] as u32
    }

    #[inline]
    pub fn i32(&self, index: usize) -> i32 {
        self.0[index] as i32
    }

    /// Interpret an argument as a guest pointer.
    #[inline]
    pub fn ptr<T>(&self, index: usize) -> *mut T {
        self.0[index] as usize as *mut T
    }

    /// Read a NUL-terminated guest string, or `None` for a null pointer.
    ///
    /// # Safety
    ///
    /// A non-null argument must point to a NUL-terminated string that stays
    /// valid and unmodified for `'a`.
    pub unsafe fn c_str<'a>(&self, index: usize) -> Option<&'a [u8]> {
        let ptr = self.ptr::<libc::c_char>(index);
        if ptr.is_null() {
            return None;
        }
        Some(unsafe { CStr::from_ptr(ptr) }.to_bytes())
    }
}

/// A syscall handler.
///
/// Handlers receive raw guest pointers and are unsafe to call for the same
/// reason [`dispatch`] is.
pub type SyscallFn = unsafe fn(&Process, &SyscallArgs) -> Status;

/// A registered syscall.
pub struct SyscallEntry {
    pub number: u32,
    pub name: &'static str,
    pub handler: SyscallFn,
}

/// Distributed slice of syscall handlers.
#[distributed_slice]
pub static SYSCALLS: [SyscallEntry] = [..];

/// Look up a syscall by number.
pub fn lookup(number: u32) -> Option<&'static SyscallEntry> {
    SYSCALLS.iter().find(|entry| entry.number == number)
}

/// Invoke syscall `number` on behalf of `process`.
///
/// Unknown syscall numbers report [`Status::NoSys`].
///
/// # Safety
///
/// Every pointer argument the selected syscall dereferences must be null or
/// valid for the guest record, string or output slot it names, as laid out
/// by that syscall's guest ABI.
pub unsafe fn dispatch(process: &Process, number: u32, args: &SyscallArgs) -> Status {
    let Some(entry) = lookup(number) else {
        warn!("unsupported syscall {}", number);
        return Status::NoSys;
    };
    trace!("syscall {}({}) args={:x?}", entry.name, number, args.0);
    let status = unsafe { (entry.handler)(process, args) };
    trace!("syscall {} -> {:?}", entry.name, status);
    status
}
