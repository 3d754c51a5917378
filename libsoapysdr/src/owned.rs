//! Scoped ownership of memory crossing the C boundary.
//!
//! There are two kinds of allocation and each one is bound to its release
//! routine where it is created:
//!
//! * [`HostArray`] / [`host_strdup`]: buffers this crate allocates to pass
//!   *into* a foreign call. Released with `libc::free`, walking nested
//!   records first.
//! * [`Foreign`], [`ForeignStr`], [`ForeignRecord`]: buffers the driver
//!   allocates and hands *out*. Released only through the clear routine of
//!   the [`Abi`] table they came from.
//!
//! Both release on drop, so every exit path of an operation frees what the
//! operation acquired.

use std::cell::Cell;
use std::ffi::CString;
use std::mem;
use std::ptr;

use libc::{c_char, c_void, size_t};

use crate::error::Fault;
use crate::ffi::{Abi, SoapySDRArgInfo, SoapySDRDevice, SoapySDRKwargs, SoapySDRRange};
use crate::view::ArrayView;

thread_local! {
    static LIVE: Cell<isize> = const { Cell::new(0) };
}

/// Number of host allocations made by this crate on the current thread that
/// have not been released yet.
pub fn live_host_allocations() -> isize {
    LIVE.with(|c| c.get())
}

fn host_calloc(count: usize, size: usize) -> Result<*mut c_void, Fault> {
    let ptr = unsafe { libc::calloc(count, size) };
    if ptr.is_null() {
        return Err(Fault::OutOfMemory(count.saturating_mul(size)));
    }
    LIVE.with(|c| c.set(c.get() + 1));
    Ok(ptr)
}

/// Free memory obtained from [`host_calloc`]. Null is ignored.
unsafe fn host_free(ptr: *mut c_void) {
    if ptr.is_null() {
        return;
    }
    libc::free(ptr);
    LIVE.with(|c| c.set(c.get() - 1));
}

/// Copy `s` into a NUL-terminated host buffer.
pub(crate) fn host_strdup(s: &str) -> Result<*mut c_char, Fault> {
    let c = CString::new(s).map_err(|_| Fault::InteriorNul)?;
    let bytes = c.as_bytes_with_nul();
    let dst = host_calloc(bytes.len(), 1)? as *mut u8;
    unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len()) };
    Ok(dst as *mut c_char)
}

/// A record that may own nested host allocations.
///
/// A zeroed record owns nothing, so releasing a partly filled array is safe.
pub(crate) trait HostRecord {
    /// Release nested allocations. The record itself is not freed.
    unsafe fn release_nested(&mut self);
}

impl HostRecord for size_t {
    unsafe fn release_nested(&mut self) {}
}

impl HostRecord for *mut SoapySDRDevice {
    // Device handles are borrowed from their wrappers.
    unsafe fn release_nested(&mut self) {}
}

impl HostRecord for *mut c_char {
    unsafe fn release_nested(&mut self) {
        host_free(mem::replace(self, ptr::null_mut()) as *mut c_void);
    }
}

impl HostRecord for SoapySDRKwargs {
    unsafe fn release_nested(&mut self) {
        let mut keys = HostArray::<*mut c_char>::from_raw(self.keys, self.size);
        let mut vals = HostArray::<*mut c_char>::from_raw(self.vals, self.size);
        keys.release();
        vals.release();
        *self = SoapySDRKwargs::empty();
    }
}

/// A zero-initialised array allocated by this crate.
pub(crate) struct HostArray<T: HostRecord> {
    ptr: *mut T,
    len: usize,
}

impl<T: HostRecord> HostArray<T> {
    /// Allocate `len` zeroed records. A zero length allocates nothing.
    pub fn zeroed(len: usize) -> Result<Self, Fault> {
        if len == 0 {
            return Ok(HostArray {
                ptr: ptr::null_mut(),
                len: 0,
            });
        }
        let ptr = host_calloc(len, mem::size_of::<T>())? as *mut T;
        Ok(HostArray { ptr, len })
    }

    /// Take back ownership of an array released with [`HostArray::into_raw`].
    unsafe fn from_raw(ptr: *mut T, len: usize) -> Self {
        HostArray { ptr, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn as_ptr(&self) -> *const T {
        self.ptr
    }

    pub fn as_mut_ptr(&mut self) -> *mut T {
        self.ptr
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        if self.ptr.is_null() {
            return &mut [];
        }
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }

    /// Hand the array to an owning parent record.
    pub fn into_raw(self) -> *mut T {
        let ptr = self.ptr;
        mem::forget(self);
        ptr
    }

    fn release(&mut self) {
        for rec in self.as_mut_slice() {
            unsafe { rec.release_nested() };
        }
        unsafe { host_free(self.ptr as *mut c_void) };
        self.ptr = ptr::null_mut();
        self.len = 0;
    }
}

impl<T: HostRecord> Drop for HostArray<T> {
    fn drop(&mut self) {
        self.release();
    }
}

/// A driver-allocated array of `len` records.
pub(crate) struct Foreign<T> {
    abi: &'static Abi,
    ptr: *mut T,
    len: usize,
    clear: unsafe fn(&Abi, *mut T, usize),
}

unsafe fn clear_strings(abi: &Abi, ptr: *mut *mut c_char, len: usize) {
    let mut base = ptr;
    (abi.strings_clear)(&mut base, len);
}

unsafe fn clear_free<T>(abi: &Abi, ptr: *mut T, _len: usize) {
    (abi.free)(ptr as *mut c_void);
}

unsafe fn clear_kwargs_list(abi: &Abi, ptr: *mut SoapySDRKwargs, len: usize) {
    (abi.kwargs_list_clear)(ptr, len);
}

unsafe fn clear_arg_info_list(abi: &Abi, ptr: *mut SoapySDRArgInfo, len: usize) {
    (abi.arg_info_list_clear)(ptr, len);
}

impl<T> Foreign<T> {
    /// Read-only view over the records.
    pub fn view(&self) -> Result<ArrayView<'_, T>, Fault> {
        unsafe { ArrayView::new(self.ptr, self.len) }
    }
}

impl Foreign<*mut c_char> {
    pub unsafe fn strings(abi: &'static Abi, ptr: *mut *mut c_char, len: usize) -> Self {
        Foreign {
            abi,
            ptr,
            len,
            clear: clear_strings,
        }
    }
}

impl Foreign<SoapySDRRange> {
    pub unsafe fn ranges(abi: &'static Abi, ptr: *mut SoapySDRRange, len: usize) -> Self {
        Foreign {
            abi,
            ptr,
            len,
            clear: clear_free::<SoapySDRRange>,
        }
    }
}

impl Foreign<SoapySDRKwargs> {
    pub unsafe fn kwargs_list(abi: &'static Abi, ptr: *mut SoapySDRKwargs, len: usize) -> Self {
        Foreign {
            abi,
            ptr,
            len,
            clear: clear_kwargs_list,
        }
    }
}

impl Foreign<SoapySDRArgInfo> {
    pub unsafe fn arg_info_list(abi: &'static Abi, ptr: *mut SoapySDRArgInfo, len: usize) -> Self {
        Foreign {
            abi,
            ptr,
            len,
            clear: clear_arg_info_list,
        }
    }
}

impl Foreign<*mut SoapySDRDevice> {
    /// The pointer array returned by a bulk make. The handles themselves are
    /// not released here.
    pub unsafe fn devices(abi: &'static Abi, ptr: *mut *mut SoapySDRDevice, len: usize) -> Self {
        Foreign {
            abi,
            ptr,
            len,
            clear: clear_free::<*mut SoapySDRDevice>,
        }
    }
}

impl<T> Drop for Foreign<T> {
    fn drop(&mut self) {
        if self.ptr.is_null() {
            return;
        }
        unsafe { (self.clear)(self.abi, self.ptr, self.len) };
        self.ptr = ptr::null_mut();
    }
}

/// A driver-allocated C string.
pub(crate) struct ForeignStr {
    abi: &'static Abi,
    ptr: *mut c_char,
}

impl ForeignStr {
    pub unsafe fn new(abi: &'static Abi, ptr: *mut c_char) -> Self {
        ForeignStr { abi, ptr }
    }

    pub fn read(&self) -> Result<String, Fault> {
        unsafe { crate::record::string_from_foreign(self.ptr) }
    }
}

impl Drop for ForeignStr {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe { (self.abi.free)(self.ptr as *mut c_void) };
        }
    }
}

/// A record returned by value whose nested fields the driver allocated.
pub(crate) struct ForeignRecord<T> {
    abi: &'static Abi,
    value: T,
    clear: unsafe fn(&Abi, &mut T),
}

unsafe fn clear_kwargs(abi: &Abi, value: &mut SoapySDRKwargs) {
    (abi.kwargs_clear)(value);
}

unsafe fn clear_arg_info(abi: &Abi, value: &mut SoapySDRArgInfo) {
    (abi.arg_info_clear)(value);
}

impl ForeignRecord<SoapySDRKwargs> {
    pub unsafe fn kwargs(abi: &'static Abi, value: SoapySDRKwargs) -> Self {
        ForeignRecord {
            abi,
            value,
            clear: clear_kwargs,
        }
    }
}

impl ForeignRecord<SoapySDRArgInfo> {
    pub unsafe fn arg_info(abi: &'static Abi, value: SoapySDRArgInfo) -> Self {
        ForeignRecord {
            abi,
            value,
            clear: clear_arg_info,
        }
    }
}

impl<T> ForeignRecord<T> {
    pub fn get(&self) -> &T {
        &self.value
    }
}

impl<T> Drop for ForeignRecord<T> {
    fn drop(&mut self) {
        // The clear routine frees the contents, not the record itself.
        unsafe { (self.clear)(self.abi, &mut self.value) };
    }
}
