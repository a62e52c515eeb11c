//! Guest-visible module information records.
//!
//! `dynlib_get_info` and `dynlib_get_info_ex` fill caller-allocated records
//! whose first field declares the record size the caller was compiled
//! against. A record is only written once its declared size matches the
//! layout below exactly; it is then zero-filled and populated field by
//! field, so fields a module does not provide stay zero.
//!
//! Both layouts spell out their padding as reserved fields. Zero-filling the
//! typed record therefore clears every byte the guest can observe.

use super::module::{FINGERPRINT_LEN, Module, SEGMENT_SLOTS, Segment};
use super::registry::ModuleRef;
use crate::{Error, Result};
use std::mem::{offset_of, size_of};

/// Length of the name field in both records.
pub const NAME_LEN: usize = 256;

/// Segment count reported by `dynlib_get_info`.
pub const INFO_SEGMENT_COUNT: u32 = 2;

/// Segment count reported by `dynlib_get_info_ex`. The reference kernel
/// leaves it at zero even though the segments are filled in.
pub const INFO_EX_SEGMENT_COUNT: u32 = 0;

/// A record whose first field declares its own size.
pub trait GuestRecord {
    /// Size of the record in this ABI revision.
    const SIZE: u64;

    fn declared_size(&self) -> u64;
}

/// Compact module information (`dynlib_info`).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DynlibInfo {
    pub size: u64,
    pub name: [u8; NAME_LEN],
    pub fingerprint: [u8; FINGERPRINT_LEN],
    pub reserved0: [u8; 4],
    pub segments: [Segment; SEGMENT_SLOTS],
    pub segment_count: u32,
    pub reserved1: u32,
}

/// Extended module information (`dynlib_info_ex`).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DynlibInfoEx {
    pub size: u64,
    pub handle: i32,
    pub name: [u8; NAME_LEN],
    pub reserved0: [u8; 4],
    pub segments: [Segment; SEGMENT_SLOTS],
    pub segment_count: u32,
    pub ref_count: u32,
    pub tls_index: u32,
    pub tls_align: u32,
    pub tls_init_size: u32,
    pub tls_size: u32,
    pub tls_init_addr: u64,
    pub init_proc_addr: u64,
    pub fini_proc_addr: u64,
    pub eh_frame_addr: u64,
    pub eh_frame_size: u64,
    pub eh_frame_hdr_addr: u64,
    pub eh_frame_hdr_size: u64,
}

const _: () = {
    assert!(size_of::<DynlibInfo>() == 328);
    assert!(offset_of!(DynlibInfo, fingerprint) == 264);
    assert!(offset_of!(DynlibInfo, segments) == 288);
    assert!(offset_of!(DynlibInfo, segment_count) == 320);

    assert!(size_of::<DynlibInfoEx>() == 384);
    assert!(offset_of!(DynlibInfoEx, name) == 12);
    assert!(offset_of!(DynlibInfoEx, segments) == 272);
    assert!(offset_of!(DynlibInfoEx, ref_count) == 308);
    assert!(offset_of!(DynlibInfoEx, tls_init_addr) == 328);
    assert!(offset_of!(DynlibInfoEx, eh_frame_hdr_size) == 376);
};

impl DynlibInfo {
    pub const fn zeroed() -> Self {
        Self {
            size: 0,
            name: [0; NAME_LEN],
            fingerprint: [0; FINGERPRINT_LEN],
            reserved0: [0; 4],
            segments: [Segment { address: 0, size: 0 }; SEGMENT_SLOTS],
            segment_count: 0,
            reserved1: 0,
        }
    }

    /// An empty record declaring the current ABI size, as a guest would
    /// prepare it.
    pub const fn new() -> Self {
        let mut info = Self::zeroed();
        info.size = Self::SIZE;
        info
    }

    pub fn name(&self) -> &[u8] {
        trim_nul(&self.name)
    }
}

impl Default for DynlibInfo {
    fn default() -> Self {
        Self::new()
    }
}

impl GuestRecord for DynlibInfo {
    const SIZE: u64 = size_of::<Self>() as u64;

    fn declared_size(&self) -> u64 {
        self.size
    }
}

impl DynlibInfoEx {
    pub const fn zeroed() -> Self {
        Self {
            size: 0,
            handle: 0,
            name: [0; NAME_LEN],
            reserved0: [0; 4],
            segments: [Segment { address: 0, size: 0 }; SEGMENT_SLOTS],
            segment_count: 0,
            ref_count: 0,
            tls_index: 0,
            tls_align: 0,
            tls_init_size: 0,
            tls_size: 0,
            tls_init_addr: 0,
            init_proc_addr: 0,
            fini_proc_addr: 0,
            eh_frame_addr: 0,
            eh_frame_size: 0,
            eh_frame_hdr_addr: 0,
            eh_frame_hdr_size: 0,
        }
    }

    pub const fn new() -> Self {
        let mut info = Self::zeroed();
        info.size = Self::SIZE;
        info
    }

    pub fn name(&self) -> &[u8] {
        trim_nul(&self.name)
    }
}

impl Default for DynlibInfoEx {
    fn default() -> Self {
        Self::new()
    }
}

impl GuestRecord for DynlibInfoEx {
    const SIZE: u64 = size_of::<Self>() as u64;

    fn declared_size(&self) -> u64 {
        self.size
    }
}

/// Reject a record compiled against a different ABI revision.
pub fn check_size<T: GuestRecord>(declared: u64) -> Result<()> {
    if declared != T::SIZE {
        return Err(Error::SizeMismatch {
            declared,
            expected: T::SIZE,
        });
    }
    Ok(())
}

/// Validate a guest record in place.
///
/// Only the leading size field is read before validation, so a guest may
/// pass a record from an older, smaller ABI revision without anything past
/// that field being touched.
///
/// # Safety
///
/// `ptr` must be null or valid for reads of 8 bytes, and, when the declared
/// size matches `T::SIZE`, valid for reads and writes of a whole `T` for the
/// lifetime `'a` with no other live reference to it.
pub unsafe fn guest_record<'a, T: GuestRecord>(ptr: *mut T) -> Result<&'a mut T> {
    if ptr.is_null() || !ptr.is_aligned() {
        return Err(Error::BadAddress);
    }
    let declared = unsafe { ptr.cast::<u64>().read() };
    check_size::<T>(declared)?;
    Ok(unsafe { &mut *ptr })
}

/// Fill a compact record for `module`.
///
/// The size field is not re-emitted: after the zero fill it reads back as
/// zero, matching the reference kernel.
pub fn project_info(module: &Module, info: &mut DynlibInfo) -> Result<()> {
    check_size::<DynlibInfo>(info.declared_size())?;

    *info = DynlibInfo::zeroed();
    copy_name(&mut info.name, &module.name);
    info.fingerprint = module.fingerprint;
    info.segments = module.segments;
    info.segment_count = INFO_SEGMENT_COUNT;
    Ok(())
}

/// Fill an extended record for `module`.
///
/// `ref_count` is sampled from the live holder count at the time of the
/// call: the registry's listing plus every reference kept elsewhere,
/// including `module` itself when the caller holds its own clone.
pub fn project_info_ex(module: &ModuleRef, info: &mut DynlibInfoEx) -> Result<()> {
    check_size::<DynlibInfoEx>(info.declared_size())?;

    *info = DynlibInfoEx::zeroed();
    info.size = DynlibInfoEx::SIZE;
    info.handle = module.handle() as i32;

    copy_name(&mut info.name, &module.name);
    info.segments = module.segments;
    info.segment_count = INFO_EX_SEGMENT_COUNT;
    info.ref_count = u32::try_from(module.holders()).unwrap_or(u32::MAX);

    if module.tls.is_present() {
        info.tls_index = module.tls.index;
        info.tls_align = module.tls.align;
        info.tls_init_size = module.tls.init_size;
        info.tls_size = module.tls.size;
        info.tls_init_addr = module.tls.init_addr;
    }

    info.init_proc_addr = module.init_addr;
    info.fini_proc_addr = module.fini_addr;

    info.eh_frame_addr = module.eh_frame.addr;
    info.eh_frame_size = module.eh_frame.size;
    info.eh_frame_hdr_addr = module.eh_frame.hdr_addr;
    info.eh_frame_hdr_size = module.eh_frame.hdr_size;
    Ok(())
}

/// Copy a module name with `strncpy` semantics: stop at the first NUL,
/// pad with NULs, and leave the field unterminated when the name fills it.
fn copy_name(dst: &mut [u8; NAME_LEN], name: &str) {
    for (d, s) in dst
        .iter_mut()
        .zip(name.bytes().take_while(|&b| b != 0))
    {
        *d = s;
    }
}

fn trim_nul(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    &bytes[..end]
}
