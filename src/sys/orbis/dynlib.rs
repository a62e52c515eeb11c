//! Dynamic library syscalls.
//!
//! These are the kernel services guest code uses to inspect the modules
//! loaded into its process. Each service has a typed entry point that works
//! on Rust values and reports a rich [`Error`], and a raw `#[syscall]`
//! handler that reads the guest's argument registers, validates guest
//! pointers and maps the outcome to the [`Status`] the guest ABI expects.
//!
//! Loading itself happens before any of these run: the loader maps and
//! relocates modules and registers them with [`Process::load`].

use super::info::{
    DynlibInfo, DynlibInfoEx, check_size, guest_record, project_info, project_info_ex,
};
use super::kernel::{ListBound, Process};
use super::module::ProcParam;
use crate::syscalls::SyscallArgs;
use crate::{Error, Result, Status};
use macros::syscall;
use tracing::{debug, trace, warn};

/// The only object member index the kernel defines: the module's init
/// routine.
pub const OBJ_MEMBER_INIT_PROC: u8 = 1;

/// Handles collected by [`get_list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleList {
    /// Handles to copy into the guest buffer, in load order
    pub handles: Vec<u32>,
    /// Count reported to the guest
    pub count: usize,
}

fn rejected(process: &Process, call: &str, err: Error) -> Error {
    process.diagnostic(&format!("{call}: {err}"));
    err
}

/// Open a module by path.
///
/// Only development kernels implement this; retail kernels report it as
/// unsupported and so does this one.
pub fn dlopen(_process: &Process, path: &[u8]) -> Result<u32> {
    warn!(
        "dynlib_dlopen({}) is not supported",
        String::from_utf8_lossy(path)
    );
    Err(Error::NotImplemented("dynlib_dlopen"))
}

/// Fill the compact information record of module `handle`.
pub fn get_info(process: &Process, handle: u32, info: &mut DynlibInfo) -> Result<()> {
    check_size::<DynlibInfo>(info.size).map_err(|e| rejected(process, "dynlib_get_info", e))?;
    process
        .with_module(handle, |module| {
            debug!("dynlib_get_info: {} (handle {})", module.name, handle);
            project_info(module, info)
        })
        .unwrap_or(Err(Error::NoSuchModule(handle)))
}

/// Fill the extended information record of module `handle`.
///
/// `flags` is always 1 in known guest code and is otherwise ignored.
///
/// The module is projected under the registry's read lock, so `ref_count`
/// only counts the registry's listing and references kept by the loader or
/// other long-lived holders, never concurrent queries.
pub fn get_info_ex(
    process: &Process,
    handle: u32,
    flags: i32,
    info: &mut DynlibInfoEx,
) -> Result<()> {
    check_size::<DynlibInfoEx>(info.size)
        .map_err(|e| rejected(process, "dynlib_get_info_ex", e))?;
    if flags != 1 {
        trace!("dynlib_get_info_ex: unexpected flags {}", flags);
    }
    process
        .with_module(handle, |module| project_info_ex(module, info))
        .unwrap_or(Err(Error::NoSuchModule(handle)))
}

/// Resolve `symbol_name` in the exports of module `handle`.
pub fn dlsym(process: &Process, handle: u32, symbol_name: &[u8]) -> Result<u64> {
    let symbol = String::from_utf8_lossy(symbol_name);
    let found = process.with_module(handle, |module| {
        debug!("dynlib_dlsym: {},{}", module.name, symbol);
        let addr = module.resolve(symbol_name);
        if let Some(addr) = addr {
            trace!("dynlib_dlsym: {} -> 0x{:x}", symbol, addr);
        }
        addr.ok_or_else(|| module.name.clone())
    });
    match found {
        Some(Ok(addr)) => Ok(addr),
        Some(Err(module)) => {
            warn!("unable to find export {} ({})", symbol, handle);
            Err(Error::SymbolNotFound {
                symbol: symbol.into_owned(),
                module,
            })
        }
        None => Err(Error::NoSuchModule(handle)),
    }
}

/// Read an object member of module `handle`.
///
/// The index is validated before the handle.
pub fn get_obj_member(process: &Process, handle: u32, index: u8) -> Result<u64> {
    if index != OBJ_MEMBER_INIT_PROC {
        return Err(Error::InvalidMemberIndex(index));
    }
    process
        .with_module(handle, |module| module.init_addr)
        .ok_or(Error::NoSuchModule(handle))
}

/// Startup parameters of the process's main executable.
pub fn get_proc_param(process: &Process) -> Result<ProcParam> {
    process
        .proc_param()
        .ok_or_else(|| rejected(process, "dynlib_get_proc_param", Error::NoProcParam))
}

/// Collect up to `capacity` module handles in load order.
///
/// With [`ListBound::Compat`] the reference kernel's boundary check is
/// reproduced: `capacity + 1` handles are collected when more modules are
/// loaded, and the reported count can exceed the number collected. A zero
/// capacity collects nothing in either mode.
pub fn get_list(process: &Process, capacity: usize) -> HandleList {
    if capacity == 0 {
        return HandleList {
            handles: Vec::new(),
            count: 0,
        };
    }

    let bound = process.list_bound();
    let mut handles = Vec::new();
    let mut count = 0;
    process.modules().for_each_while(|module| {
        trace!("module {} -> handle {}", module.name, module.handle());
        match bound {
            ListBound::Exact => {
                if count == capacity {
                    return false;
                }
                count += 1;
            }
            ListBound::Compat => {
                let over = count > capacity;
                count += 1;
                if over {
                    return false;
                }
            }
        }
        handles.push(module.handle());
        true
    });
    HandleList { handles, count }
}

/// Relocation and dependency loading are finished by the loader before a
/// module is registered, so there is nothing left to do here.
pub fn process_needed_and_relocate(_process: &Process) -> Result<()> {
    trace!("dynlib_process_needed_and_relocate: nothing to do");
    Ok(())
}

/// Write a value to a guest output slot.
///
/// # Safety
///
/// `ptr` must be null or valid for writes of a `T`.
unsafe fn put<T>(ptr: *mut T, value: T) -> Result<()> {
    if ptr.is_null() || !ptr.is_aligned() {
        return Err(Error::BadAddress);
    }
    unsafe { ptr.write(value) };
    Ok(())
}

#[syscall(589)]
unsafe fn dynlib_dlopen(process: &Process, args: &SyscallArgs) -> Status {
    let path = unsafe { args.c_str(0) }.unwrap_or_default();
    match dlopen(process, path) {
        Ok(_) => Status::Ok,
        Err(e) => e.status(),
    }
}

#[syscall(593)]
unsafe fn dynlib_get_info(process: &Process, args: &SyscallArgs) -> Status {
    let handle = args.u32(0);
    match unsafe { guest_record::<DynlibInfo>(args.ptr(1)) } {
        Ok(info) => get_info(process, handle, info).into(),
        Err(e) => rejected(process, "dynlib_get_info", e).status(),
    }
}

#[syscall(608)]
unsafe fn dynlib_get_info_ex(process: &Process, args: &SyscallArgs) -> Status {
    let handle = args.u32(0);
    let flags = args.i32(1);
    match unsafe { guest_record::<DynlibInfoEx>(args.ptr(2)) } {
        Ok(info) => get_info_ex(process, handle, flags, info).into(),
        Err(e) => rejected(process, "dynlib_get_info_ex", e).status(),
    }
}

#[syscall(591)]
unsafe fn dynlib_dlsym(process: &Process, args: &SyscallArgs) -> Status {
    let handle = args.u32(0);
    let out = args.ptr::<u64>(2);
    let Some(symbol_name) = (unsafe { args.c_str(1) }) else {
        return Error::BadAddress.coarse_status();
    };

    let result = match dlsym(process, handle, symbol_name) {
        Ok(addr) => unsafe { put(out, addr) },
        Err(e @ Error::SymbolNotFound { .. }) => unsafe { put(out, 0) }.and(Err(e)),
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => Status::Ok,
        Err(e) => e.coarse_status(),
    }
}

#[syscall(649)]
unsafe fn dynlib_get_obj_member(process: &Process, args: &SyscallArgs) -> Status {
    let handle = args.u32(0);
    let index = args.get(1) as u8;
    let result = get_obj_member(process, handle, index)
        .and_then(|addr| unsafe { put(args.ptr::<u64>(2), addr) });
    match result {
        Ok(()) => Status::Ok,
        Err(e) => e.coarse_status(),
    }
}

#[syscall(598)]
unsafe fn dynlib_get_proc_param(process: &Process, args: &SyscallArgs) -> Status {
    let data = args.ptr::<u64>(0);
    let size = args.ptr::<u64>(1);
    let (address, len, status) = match get_proc_param(process) {
        Ok(param) => (param.address, param.size, Status::Ok),
        Err(e) => (0, 0, e.coarse_status()),
    };
    let written = unsafe { put(data, address) }.and_then(|()| unsafe { put(size, len) });
    match written {
        Ok(()) => status,
        Err(e) => e.coarse_status(),
    }
}

#[syscall(592)]
unsafe fn dynlib_get_list(process: &Process, args: &SyscallArgs) -> Status {
    let out = args.ptr::<u32>(0);
    // A negative capacity from a signed guest variable writes nothing.
    let capacity = usize::try_from(args.get(1) as i64).unwrap_or(0);
    let count = args.ptr::<u64>(2);

    let list = get_list(process, capacity);
    if !list.handles.is_empty() && (out.is_null() || !out.is_aligned()) {
        return Error::BadAddress.status();
    }
    for (i, handle) in list.handles.iter().enumerate() {
        unsafe { out.add(i).write(*handle) };
    }
    match unsafe { put(count, list.count as u64) } {
        Ok(()) => Status::Ok,
        Err(e) => e.status(),
    }
}

#[syscall(599)]
unsafe fn dynlib_process_needed_and_relocate(process: &Process, _args: &SyscallArgs) -> Status {
    process_needed_and_relocate(process).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sys::orbis::{ModuleBuilder, ProcessBuilder};

    fn process(bound: ListBound, modules: usize) -> Process {
        let process = ProcessBuilder::new()
            .list_bound(bound)
            .build(ModuleBuilder::new("eboot.bin").build());
        for i in 1..modules {
            process
                .load(ModuleBuilder::new(&format!("lib{i}")).build())
                .unwrap();
        }
        process
    }

    #[test]
    fn dlopen_is_not_implemented() {
        let process = process(ListBound::Exact, 1);
        assert_eq!(
            dlopen(&process, b"/app0/sce_module/libc.prx"),
            Err(Error::NotImplemented("dynlib_dlopen"))
        );
        assert_eq!(process.modules().handles().len(), 1);
    }

    #[test]
    fn get_info_checks_size_before_handle() {
        let process = process(ListBound::Exact, 1);
        let mut info = DynlibInfo::zeroed();
        info.size = 16;
        assert!(matches!(
            get_info(&process, 99, &mut info),
            Err(Error::SizeMismatch { .. })
        ));

        let mut info = DynlibInfo::new();
        assert_eq!(get_info(&process, 99, &mut info), Err(Error::NoSuchModule(99)));
        assert_eq!(info, DynlibInfo::new());
    }

    #[test]
    fn get_info_ex_counts_only_kept_references() {
        let process = process(ListBound::Exact, 2);
        let mut info = DynlibInfoEx::new();
        get_info_ex(&process, 1, 1, &mut info).unwrap();
        assert_eq!(info.ref_count, 1);

        let held = process.module(1).unwrap();
        let mut info = DynlibInfoEx::new();
        get_info_ex(&process, 1, 1, &mut info).unwrap();
        assert_eq!(info.ref_count, 2);
        drop(held);

        let mut info = DynlibInfoEx::new();
        get_info_ex(&process, 1, 1, &mut info).unwrap();
        assert_eq!(info.ref_count, 1);
    }

    #[test]
    fn lookups_leave_holder_counts_alone() {
        let process = process(ListBound::Exact, 3);
        get_list(&process, 8);
        dlsym(&process, 1, b"foo").unwrap_err();
        get_obj_member(&process, 2, OBJ_MEMBER_INIT_PROC).unwrap();
        get_proc_param(&process).unwrap_err();
        for handle in process.modules().handles() {
            assert_eq!(process.with_module(handle, |m| m.holders()), Some(1));
        }
    }

    #[test]
    fn dlsym_resolves_by_nid() {
        let process = process(ListBound::Exact, 1);
        let libfoo = process
            .load(ModuleBuilder::new("libFoo").export("foo", 0x1234).build())
            .unwrap();

        assert_eq!(dlsym(&process, libfoo.handle(), b"foo"), Ok(0x1234));
        assert_eq!(
            dlsym(&process, libfoo.handle(), b"bar"),
            Err(Error::SymbolNotFound {
                symbol: "bar".into(),
                module: "libFoo".into()
            })
        );
        assert_eq!(dlsym(&process, 77, b"foo"), Err(Error::NoSuchModule(77)));
    }

    #[test]
    fn dlsym_does_not_search_other_modules() {
        let process = process(ListBound::Exact, 1);
        process
            .load(ModuleBuilder::new("libFoo").export("foo", 0x1234).build())
            .unwrap();
        let libbar = process.load(ModuleBuilder::new("libBar").build()).unwrap();
        assert!(dlsym(&process, libbar.handle(), b"foo").is_err());
    }

    #[test]
    fn obj_member_index_is_checked_first() {
        let process = process(ListBound::Exact, 1);
        let lib = process
            .load(ModuleBuilder::new("libc").init_fini(0x5000, 0x6000).build())
            .unwrap();

        assert_eq!(get_obj_member(&process, lib.handle(), 1), Ok(0x5000));
        assert_eq!(
            get_obj_member(&process, 42, 0),
            Err(Error::InvalidMemberIndex(0))
        );
        assert_eq!(
            get_obj_member(&process, lib.handle(), 2),
            Err(Error::InvalidMemberIndex(2))
        );
        assert_eq!(get_obj_member(&process, 42, 1), Err(Error::NoSuchModule(42)));
    }

    #[test]
    fn proc_param_missing() {
        let process = process(ListBound::Exact, 1);
        assert_eq!(get_proc_param(&process), Err(Error::NoProcParam));
    }

    #[test]
    fn exact_list_never_exceeds_capacity() {
        let process = process(ListBound::Exact, 5);
        assert_eq!(
            get_list(&process, 3),
            HandleList {
                handles: vec![0, 1, 2],
                count: 3
            }
        );
        assert_eq!(get_list(&process, 5).handles, vec![0, 1, 2, 3, 4]);
        assert_eq!(get_list(&process, 5).count, 5);
        assert_eq!(get_list(&process, 8).count, 5);
        assert_eq!(get_list(&process, 0).count, 0);
    }

    #[test]
    fn compat_list_overruns_by_one() {
        let process = process(ListBound::Compat, 5);

        // More than one module past capacity: capacity + 1 written, and the
        // count includes the iteration that tripped the check.
        let list = get_list(&process, 3);
        assert_eq!(list.handles, vec![0, 1, 2, 3]);
        assert_eq!(list.count, 5);

        let list = get_list(&process, 4);
        assert_eq!(list.handles, vec![0, 1, 2, 3, 4]);
        assert_eq!(list.count, 5);

        let list = get_list(&process, 5);
        assert_eq!(list.handles, vec![0, 1, 2, 3, 4]);
        assert_eq!(list.count, 5);

        let list = get_list(&process, 1);
        assert_eq!(list.handles, vec![0, 1]);
        assert_eq!(list.count, 3);

        assert_eq!(get_list(&process, 0).handles, Vec::<u32>::new());
    }

    #[test]
    fn relocation_is_a_no_op() {
        let process = process(ListBound::Exact, 3);
        assert_eq!(process_needed_and_relocate(&process), Ok(()));
        assert_eq!(process.modules().handles().len(), 3);
    }
}
