//! Device handles: enumeration, construction and release.
//!
//! A [`Device`] is the single owner of one foreign handle. Release consumes
//! the wrapper, so a handle cannot be released twice; a wrapper that goes out
//! of scope unreleased is released on drop.

use std::mem;
use std::ptr::{self, NonNull};

use libc::{c_char, c_int, size_t};
use tracing::{debug, error, warn};

use crate::array;
use crate::error::{Error, Fault, Result};
use crate::ffi::{Abi, SoapySDRArgInfo, SoapySDRDevice, SoapySDRKwargs, SoapySDRRange};
use crate::owned::{Foreign, ForeignRecord, ForeignStr};
use crate::record;
use crate::types::{ArgInfo, Kwargs, Range};

/// An open device.
pub struct Device {
    abi: &'static Abi,
    raw: NonNull<SoapySDRDevice>,
}

// One wrapper owns the handle. No locking is added here: concurrent calls
// are only as safe as the driver makes them. Sync lets streams on one
// device run on separate threads.
unsafe impl Send for Device {}
unsafe impl Sync for Device {}

impl Device {
    /// List the devices visible to `abi` that match `filter`.
    pub fn enumerate(abi: &'static Abi, filter: &Kwargs) -> Result<Vec<Kwargs>> {
        let args = array::kwargs_to_foreign(filter)?;
        let mut len: size_t = 0;
        let ptr = unsafe { (abi.enumerate)(args.as_ptr(), &mut len) };
        let list = unsafe { Foreign::kwargs_list(abi, ptr, len) };
        let found = array::kwargs_list(list.view()?)?;
        debug!(abi = abi.name, filter = %filter, found = found.len(), "enumerated devices");
        Ok(found)
    }

    /// [`Device::enumerate`] with the filter given in markup form.
    pub fn enumerate_str(abi: &'static Abi, filter: &str) -> Result<Vec<Kwargs>> {
        Self::enumerate(abi, &Kwargs::from_markup(filter))
    }

    /// Open one device.
    pub fn make(abi: &'static Abi, args: &Kwargs) -> Result<Device> {
        let foreign = array::kwargs_to_foreign(args)?;
        let raw = unsafe { (abi.make)(foreign.as_ptr()) };
        match NonNull::new(raw) {
            Some(raw) => {
                debug!(abi = abi.name, args = %args, "device made");
                Ok(Device { abi, raw })
            }
            None => {
                let msg = abi.last_error();
                debug!(abi = abi.name, args = %args, error = %msg, "device make failed");
                Err(Error::Driver(msg))
            }
        }
    }

    /// [`Device::make`] with the arguments given in markup form.
    pub fn make_str(abi: &'static Abi, args: &str) -> Result<Device> {
        Self::make(abi, &Kwargs::from_markup(args))
    }

    /// Close the device.
    pub fn unmake(self) -> Result<()> {
        let (abi, raw) = (self.abi, self.raw);
        mem::forget(self);
        let code = unsafe { (abi.unmake)(raw.as_ptr()) };
        debug!(abi = abi.name, code, "device unmade");
        check_call(abi, code)
    }

    /// Open one device per argument map, in order.
    ///
    /// Either every device opens or none stays open: when the driver reports
    /// a failure for any entry, the handles that did open are released in
    /// one bulk call before the error is returned.
    pub fn make_list(abi: &'static Abi, args: &[Kwargs]) -> Result<Vec<Device>> {
        if args.is_empty() {
            return Ok(Vec::new());
        }
        let foreign = array::kwargs_list_to_foreign(args)?;
        let ptr = unsafe { (abi.make_list)(foreign.as_ptr(), args.len()) };
        if ptr.is_null() {
            return Err(Error::Driver(abi.last_error()));
        }
        let list = unsafe { Foreign::devices(abi, ptr, args.len()) };
        let handles = array::handles(list.view()?);
        drop(list);

        if let Some(idx) = handles.iter().position(|h| h.is_null()) {
            // Read the message before the rollback call overwrites it.
            let msg = abi.last_error();
            let opened: Vec<*mut SoapySDRDevice> =
                handles.into_iter().filter(|h| !h.is_null()).collect();
            error!(
                abi = abi.name,
                index = idx,
                opened = opened.len(),
                error = %msg,
                "bulk make failed, rolling back"
            );
            release_raw(abi, &opened);
            if msg.is_empty() {
                return Err(Fault::NullHandle(idx).into());
            }
            return Err(Error::Driver(msg));
        }

        debug!(abi = abi.name, count = handles.len(), "devices made");
        Ok(handles
            .into_iter()
            .filter_map(NonNull::new)
            .map(|raw| Device { abi, raw })
            .collect())
    }

    /// Close several devices in one driver call.
    ///
    /// All devices must come from the same [`Abi`]. On a mix the devices are
    /// released one by one and [`Fault::MixedAbi`] is returned.
    pub fn unmake_list(devices: Vec<Device>) -> Result<()> {
        let Some(first) = devices.first() else {
            return Ok(());
        };
        let abi = first.abi;
        if devices.iter().any(|d| !ptr::eq(d.abi, abi)) {
            return Err(Fault::MixedAbi.into());
        }
        let raws: Vec<*mut SoapySDRDevice> = devices.iter().map(|d| d.raw.as_ptr()).collect();
        let mut foreign = array::handles_to_foreign(&raws)?;
        devices.into_iter().for_each(mem::forget);
        let code = unsafe { (abi.unmake_list)(foreign.as_mut_ptr(), raws.len()) };
        debug!(abi = abi.name, count = raws.len(), code, "devices unmade");
        check_call(abi, code)
    }

    /// The table this device was opened through.
    pub fn abi(&self) -> &'static Abi {
        self.abi
    }

    pub(crate) fn raw(&self) -> *mut SoapySDRDevice {
        self.raw.as_ptr()
    }

    pub fn driver_key(&self) -> Result<String> {
        let ptr = unsafe { (self.abi.get_driver_key)(self.raw()) };
        self.take_string(ptr)
    }

    pub fn hardware_key(&self) -> Result<String> {
        let ptr = unsafe { (self.abi.get_hardware_key)(self.raw()) };
        self.take_string(ptr)
    }

    /// Free-form information about the hardware (serial, firmware, ...).
    pub fn hardware_info(&self) -> Result<Kwargs> {
        let raw = unsafe { (self.abi.get_hardware_info)(self.raw()) };
        self.take_kwargs(raw)
    }

    // Helpers shared by the property families. Each takes ownership of what
    // a foreign call just returned and must run before any other foreign
    // call, since that call would clear the last error.

    /// Fail with the driver's last error if the previous call reported one.
    pub(crate) fn outcome(&self) -> Result<()> {
        match self.abi.last_status() {
            0 => Ok(()),
            _ => Err(Error::Driver(self.abi.last_error())),
        }
    }

    pub(crate) fn status(&self, code: c_int) -> Result<()> {
        check_call(self.abi, code)
    }

    pub(crate) fn take_string(&self, ptr: *mut c_char) -> Result<String> {
        if ptr.is_null() {
            return Err(Error::Driver(self.abi.last_error()));
        }
        let s = unsafe { ForeignStr::new(self.abi, ptr) };
        Ok(s.read()?)
    }

    pub(crate) fn take_strings(&self, ptr: *mut *mut c_char, len: size_t) -> Result<Vec<String>> {
        let list = unsafe { Foreign::strings(self.abi, ptr, len) };
        self.outcome()?;
        Ok(array::strings(list.view()?)?)
    }

    pub(crate) fn take_ranges(&self, ptr: *mut SoapySDRRange, len: size_t) -> Result<Vec<Range>> {
        let list = unsafe { Foreign::ranges(self.abi, ptr, len) };
        self.outcome()?;
        Ok(array::ranges(list.view()?))
    }

    pub(crate) fn take_kwargs(&self, raw: SoapySDRKwargs) -> Result<Kwargs> {
        let rec = unsafe { ForeignRecord::kwargs(self.abi, raw) };
        self.outcome()?;
        Ok(unsafe { record::kwargs_from_foreign(rec.get()) }?)
    }

    pub(crate) fn take_arg_info(&self, raw: SoapySDRArgInfo) -> Result<ArgInfo> {
        let rec = unsafe { ForeignRecord::arg_info(self.abi, raw) };
        self.outcome()?;
        Ok(unsafe { record::arg_info_from_foreign(rec.get()) }?)
    }

    pub(crate) fn take_arg_info_list(
        &self,
        ptr: *mut SoapySDRArgInfo,
        len: size_t,
    ) -> Result<Vec<ArgInfo>> {
        let list = unsafe { Foreign::arg_info_list(self.abi, ptr, len) };
        self.outcome()?;
        Ok(array::arg_info_list(list.view()?)?)
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        let code = unsafe { (self.abi.unmake)(self.raw.as_ptr()) };
        if code != 0 {
            warn!(abi = self.abi.name, code, error = %self.abi.last_error(), "device unmake on drop failed");
        }
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("abi", &self.abi.name)
            .field("raw", &self.raw)
            .finish()
    }
}

/// Result of a non-stream call that returns 0 on success.
fn check_call(abi: &Abi, code: c_int) -> Result<()> {
    if code == 0 {
        return Ok(());
    }
    let msg = abi.last_error();
    if msg.is_empty() {
        return Err(Error::Driver(format!("call failed with code {code}")));
    }
    Err(Error::Driver(msg))
}

/// Release raw handles that never got a wrapper.
fn release_raw(abi: &Abi, handles: &[*mut SoapySDRDevice]) {
    if handles.is_empty() {
        return;
    }
    match array::handles_to_foreign(handles) {
        Ok(mut list) => {
            let code = unsafe { (abi.unmake_list)(list.as_mut_ptr(), handles.len()) };
            if code != 0 {
                warn!(abi = abi.name, code, "bulk unmake during rollback failed");
            }
        }
        Err(_) => {
            for &h in handles {
                unsafe { (abi.unmake)(h) };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock;

    fn mock_args() -> Kwargs {
        Kwargs::new().with("driver", "mock")
    }

    #[test]
    fn enumerate_filters() {
        let abi = mock::abi();
        let all = Device::enumerate(abi, &Kwargs::new()).unwrap();
        assert_eq!(all.len(), mock::SERIALS.len());
        assert_eq!(all[0].get("driver"), Some("mock"));

        let one = Device::enumerate_str(abi, "serial=mock-1").unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].get("serial"), Some("mock-1"));

        assert!(Device::enumerate_str(abi, "driver=other").unwrap().is_empty());
    }

    #[test]
    fn make_failure_carries_last_error() {
        let err = Device::make_str(mock::abi(), "driver=hackrf").unwrap_err();
        assert_eq!(err, Error::Driver("no match for driver=hackrf".into()));
        assert!(!err.is_fatal());
    }

    #[test]
    fn unmake_consumes_and_releases() {
        let before = mock::live_allocations();
        let dev = Device::make(mock::abi(), &mock_args()).unwrap();
        assert_eq!(mock::live_allocations(), before + 1);
        dev.unmake().unwrap();
        assert_eq!(mock::live_allocations(), before);
    }

    #[test]
    fn drop_releases() {
        let before = mock::live_allocations();
        {
            let _dev = Device::make_str(mock::abi(), "driver=mock").unwrap();
        }
        assert_eq!(mock::live_allocations(), before);
    }

    #[test]
    fn make_list_preserves_order() {
        let abi = mock::abi();
        let args = vec![
            mock_args().with("serial", "mock-1"),
            mock_args().with("serial", "mock-0"),
            mock_args().with("serial", "mock-1"),
        ];
        let devices = Device::make_list(abi, &args).unwrap();
        assert_eq!(devices.len(), 3);
        let serials: Vec<String> = devices
            .iter()
            .map(|d| d.hardware_info().unwrap().get("serial").unwrap_or_default().to_string())
            .collect();
        assert_eq!(serials, vec!["mock-1", "mock-0", "mock-1"]);
        Device::unmake_list(devices).unwrap();
    }

    #[test]
    fn make_list_rolls_back_on_failure() {
        let abi = mock::abi();
        let before = mock::live_allocations();
        let args = vec![
            mock_args(),
            mock_args().with("fail_open", "1"),
            mock_args().with("serial", "mock-1"),
        ];
        let err = Device::make_list(abi, &args).unwrap_err();
        assert_eq!(err, Error::Driver("device refused to open".into()));
        assert_eq!(mock::live_allocations(), before);
    }

    #[test]
    fn empty_lists_make_no_calls() {
        assert!(Device::make_list(mock::abi(), &[]).unwrap().is_empty());
        Device::unmake_list(Vec::new()).unwrap();
    }

    #[test]
    fn identification() {
        let dev = Device::make(mock::abi(), &mock_args()).unwrap();
        assert_eq!(dev.driver_key().unwrap(), "mock");
        assert_eq!(dev.hardware_key().unwrap(), "mock-hw");
        assert_eq!(dev.hardware_info().unwrap().get("serial"), Some("mock-0"));
    }

    #[test]
    fn foreign_results_are_released() {
        let dev = Device::make(mock::abi(), &mock_args()).unwrap();
        let before = mock::live_allocations();
        for _ in 0..3 {
            dev.driver_key().unwrap();
            dev.hardware_info().unwrap();
        }
        assert_eq!(mock::live_allocations(), before);
    }
}
