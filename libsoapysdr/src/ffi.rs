//! Foreign record shapes and the entry-point table of the SoapySDR C API.
//!
//! Every call this crate makes into the driver layer goes through an [`Abi`]
//! table. The table is either bound to the system `libSoapySDR` (feature
//! `system`) or to the in-process mock driver in [`crate::mock`].

use libc::{c_char, c_double, c_int, c_long, c_longlong, c_void, size_t};
use std::ffi::CStr;

/// `SOAPY_SDR_TX`
pub const SOAPY_SDR_TX: c_int = 0;
/// `SOAPY_SDR_RX`
pub const SOAPY_SDR_RX: c_int = 1;

pub const SOAPY_SDR_ARG_INFO_BOOL: c_int = 0;
pub const SOAPY_SDR_ARG_INFO_INT: c_int = 1;
pub const SOAPY_SDR_ARG_INFO_FLOAT: c_int = 2;
pub const SOAPY_SDR_ARG_INFO_STRING: c_int = 3;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SoapySDRRange {
    pub minimum: c_double,
    pub maximum: c_double,
    pub step: c_double,
}

/// One key/value map. `keys` and `vals` both hold `size` entries.
#[repr(C)]
#[derive(Debug)]
pub struct SoapySDRKwargs {
    pub size: size_t,
    pub keys: *mut *mut c_char,
    pub vals: *mut *mut c_char,
}

impl SoapySDRKwargs {
    pub const fn empty() -> Self {
        SoapySDRKwargs {
            size: 0,
            keys: std::ptr::null_mut(),
            vals: std::ptr::null_mut(),
        }
    }
}

#[repr(C)]
#[derive(Debug)]
pub struct SoapySDRArgInfo {
    pub key: *mut c_char,
    pub value: *mut c_char,
    pub name: *mut c_char,
    pub description: *mut c_char,
    pub units: *mut c_char,
    pub arg_type: c_int,
    pub range: SoapySDRRange,
    pub num_options: size_t,
    pub options: *mut *mut c_char,
    pub option_names: *mut *mut c_char,
}

impl SoapySDRArgInfo {
    pub const fn empty() -> Self {
        SoapySDRArgInfo {
            key: std::ptr::null_mut(),
            value: std::ptr::null_mut(),
            name: std::ptr::null_mut(),
            description: std::ptr::null_mut(),
            units: std::ptr::null_mut(),
            arg_type: SOAPY_SDR_ARG_INFO_STRING,
            range: SoapySDRRange {
                minimum: 0.0,
                maximum: 0.0,
                step: 0.0,
            },
            num_options: 0,
            options: std::ptr::null_mut(),
            option_names: std::ptr::null_mut(),
        }
    }
}

/// Opaque device handle owned by the driver layer.
#[repr(C)]
pub struct SoapySDRDevice {
    _private: [u8; 0],
}

/// Opaque stream handle owned by the driver layer.
#[repr(C)]
pub struct SoapySDRStream {
    _private: [u8; 0],
}

type Dev = SoapySDRDevice;
type Strm = SoapySDRStream;

/// Function table of the foreign API.
///
/// Field names follow the C entry points with the `SoapySDRDevice_` /
/// `SoapySDR` prefixes removed.
pub struct Abi {
    pub name: &'static str,

    // memory release routines owned by the driver side
    pub free: unsafe extern "C" fn(*mut c_void),
    pub strings_clear: unsafe extern "C" fn(*mut *mut *mut c_char, size_t),
    pub kwargs_clear: unsafe extern "C" fn(*mut SoapySDRKwargs),
    pub kwargs_list_clear: unsafe extern "C" fn(*mut SoapySDRKwargs, size_t),
    pub arg_info_clear: unsafe extern "C" fn(*mut SoapySDRArgInfo),
    pub arg_info_list_clear: unsafe extern "C" fn(*mut SoapySDRArgInfo, size_t),

    pub last_error: unsafe extern "C" fn() -> *const c_char,
    pub last_status: unsafe extern "C" fn() -> c_int,

    pub enumerate: unsafe extern "C" fn(*const SoapySDRKwargs, *mut size_t) -> *mut SoapySDRKwargs,
    pub make: unsafe extern "C" fn(*const SoapySDRKwargs) -> *mut Dev,
    pub unmake: unsafe extern "C" fn(*mut Dev) -> c_int,
    pub make_list: unsafe extern "C" fn(*const SoapySDRKwargs, size_t) -> *mut *mut Dev,
    pub unmake_list: unsafe extern "C" fn(*mut *mut Dev, size_t) -> c_int,

    pub get_driver_key: unsafe extern "C" fn(*const Dev) -> *mut c_char,
    pub get_hardware_key: unsafe extern "C" fn(*const Dev) -> *mut c_char,
    pub get_hardware_info: unsafe extern "C" fn(*const Dev) -> SoapySDRKwargs,

    pub get_num_channels: unsafe extern "C" fn(*const Dev, c_int) -> size_t,
    pub get_channel_info: unsafe extern "C" fn(*const Dev, c_int, size_t) -> SoapySDRKwargs,
    pub get_full_duplex: unsafe extern "C" fn(*const Dev, c_int, size_t) -> bool,

    pub get_stream_formats:
        unsafe extern "C" fn(*const Dev, c_int, size_t, *mut size_t) -> *mut *mut c_char,
    pub get_native_stream_format:
        unsafe extern "C" fn(*const Dev, c_int, size_t, *mut c_double) -> *mut c_char,
    pub get_stream_args_info:
        unsafe extern "C" fn(*const Dev, c_int, size_t, *mut size_t) -> *mut SoapySDRArgInfo,
    pub setup_stream: unsafe extern "C" fn(
        *mut Dev,
        c_int,
        *const c_char,
        *const size_t,
        size_t,
        *const SoapySDRKwargs,
    ) -> *mut Strm,
    pub close_stream: unsafe extern "C" fn(*mut Dev, *mut Strm) -> c_int,
    pub get_stream_mtu: unsafe extern "C" fn(*const Dev, *mut Strm) -> size_t,
    pub activate_stream: unsafe extern "C" fn(*mut Dev, *mut Strm, c_int, c_longlong, size_t) -> c_int,
    pub deactivate_stream: unsafe extern "C" fn(*mut Dev, *mut Strm, c_int, c_longlong) -> c_int,
    pub read_stream: unsafe extern "C" fn(
        *mut Dev,
        *mut Strm,
        *const *mut c_void,
        size_t,
        *mut c_int,
        *mut c_longlong,
        c_long,
    ) -> c_int,
    pub write_stream: unsafe extern "C" fn(
        *mut Dev,
        *mut Strm,
        *const *const c_void,
        size_t,
        *mut c_int,
        c_longlong,
        c_long,
    ) -> c_int,
    pub read_stream_status: unsafe extern "C" fn(
        *mut Dev,
        *mut Strm,
        *mut size_t,
        *mut c_int,
        *mut c_longlong,
        c_long,
    ) -> c_int,
    pub get_num_direct_access_buffers: unsafe extern "C" fn(*mut Dev, *mut Strm) -> size_t,
    pub acquire_read_buffer: unsafe extern "C" fn(
        *mut Dev,
        *mut Strm,
        *mut size_t,
        *mut *const c_void,
        *mut c_int,
        *mut c_longlong,
        c_long,
    ) -> c_int,
    pub release_read_buffer: unsafe extern "C" fn(*mut Dev, *mut Strm, size_t),
    pub acquire_write_buffer:
        unsafe extern "C" fn(*mut Dev, *mut Strm, *mut size_t, *mut *mut c_void, c_long) -> c_int,
    pub release_write_buffer:
        unsafe extern "C" fn(*mut Dev, *mut Strm, size_t, size_t, *mut c_int, c_longlong),

    pub list_antennas:
        unsafe extern "C" fn(*const Dev, c_int, size_t, *mut size_t) -> *mut *mut c_char,
    pub set_antenna: unsafe extern "C" fn(*mut Dev, c_int, size_t, *const c_char) -> c_int,
    pub get_antenna: unsafe extern "C" fn(*const Dev, c_int, size_t) -> *mut c_char,

    pub list_gains: unsafe extern "C" fn(*const Dev, c_int, size_t, *mut size_t) -> *mut *mut c_char,
    pub set_gain: unsafe extern "C" fn(*mut Dev, c_int, size_t, c_double) -> c_int,
    pub get_gain: unsafe extern "C" fn(*const Dev, c_int, size_t) -> c_double,
    pub get_gain_range: unsafe extern "C" fn(*const Dev, c_int, size_t) -> SoapySDRRange,

    pub set_frequency:
        unsafe extern "C" fn(*mut Dev, c_int, size_t, c_double, *const SoapySDRKwargs) -> c_int,
    pub get_frequency: unsafe extern "C" fn(*const Dev, c_int, size_t) -> c_double,
    pub get_frequency_range:
        unsafe extern "C" fn(*const Dev, c_int, size_t, *mut size_t) -> *mut SoapySDRRange,

    pub set_sample_rate: unsafe extern "C" fn(*mut Dev, c_int, size_t, c_double) -> c_int,
    pub get_sample_rate: unsafe extern "C" fn(*const Dev, c_int, size_t) -> c_double,
    pub get_sample_rate_range:
        unsafe extern "C" fn(*const Dev, c_int, size_t, *mut size_t) -> *mut SoapySDRRange,

    pub get_setting_info: unsafe extern "C" fn(*const Dev, *mut size_t) -> *mut SoapySDRArgInfo,
    pub write_setting: unsafe extern "C" fn(*mut Dev, *const c_char, *const c_char) -> c_int,
    pub read_setting: unsafe extern "C" fn(*const Dev, *const c_char) -> *mut c_char,

    pub list_sensors: unsafe extern "C" fn(*const Dev, *mut size_t) -> *mut *mut c_char,
    pub get_sensor_info: unsafe extern "C" fn(*const Dev, *const c_char) -> SoapySDRArgInfo,
    pub read_sensor: unsafe extern "C" fn(*const Dev, *const c_char) -> *mut c_char,
}

impl Abi {
    /// The last error message recorded by the driver layer on this thread.
    ///
    /// Must be read before any other foreign call: the next call clears it.
    pub fn last_error(&self) -> String {
        // Internal string of the driver layer, not to be freed.
        let msg = unsafe { (self.last_error)() };
        if msg.is_null() {
            return String::new();
        }
        unsafe { CStr::from_ptr(msg) }.to_string_lossy().into_owned()
    }

    /// The status code of the last device call on this thread.
    pub fn last_status(&self) -> i32 {
        unsafe { (self.last_status)() }
    }

    /// Bindings to the system `libSoapySDR`.
    #[cfg(feature = "system")]
    pub fn system() -> &'static Abi {
        &system::ABI
    }
}

impl std::fmt::Debug for Abi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Abi").field("name", &self.name).finish_non_exhaustive()
    }
}

#[cfg(feature = "system")]
mod system {
    use super::*;

    #[link(name = "SoapySDR")]
    extern "C" {
        fn SoapySDR_free(ptr: *mut c_void);
        fn SoapySDRStrings_clear(elems: *mut *mut *mut c_char, length: size_t);
        fn SoapySDRKwargs_clear(args: *mut SoapySDRKwargs);
        fn SoapySDRKwargsList_clear(args: *mut SoapySDRKwargs, length: size_t);
        fn SoapySDRArgInfo_clear(info: *mut SoapySDRArgInfo);
        fn SoapySDRArgInfoList_clear(info: *mut SoapySDRArgInfo, length: size_t);

        fn SoapySDRDevice_lastError() -> *const c_char;
        fn SoapySDRDevice_lastStatus() -> c_int;

        fn SoapySDRDevice_enumerate(args: *const SoapySDRKwargs, length: *mut size_t) -> *mut SoapySDRKwargs;
        fn SoapySDRDevice_make(args: *const SoapySDRKwargs) -> *mut Dev;
        fn SoapySDRDevice_unmake(device: *mut Dev) -> c_int;
        fn SoapySDRDevice_make_list(args: *const SoapySDRKwargs, length: size_t) -> *mut *mut Dev;
        fn SoapySDRDevice_unmake_list(devices: *mut *mut Dev, length: size_t) -> c_int;

        fn SoapySDRDevice_getDriverKey(device: *const Dev) -> *mut c_char;
        fn SoapySDRDevice_getHardwareKey(device: *const Dev) -> *mut c_char;
        fn SoapySDRDevice_getHardwareInfo(device: *const Dev) -> SoapySDRKwargs;

        fn SoapySDRDevice_getNumChannels(device: *const Dev, direction: c_int) -> size_t;
        fn SoapySDRDevice_getChannelInfo(device: *const Dev, direction: c_int, channel: size_t) -> SoapySDRKwargs;
        fn SoapySDRDevice_getFullDuplex(device: *const Dev, direction: c_int, channel: size_t) -> bool;

        fn SoapySDRDevice_getStreamFormats(
            device: *const Dev,
            direction: c_int,
            channel: size_t,
            length: *mut size_t,
        ) -> *mut *mut c_char;
        fn SoapySDRDevice_getNativeStreamFormat(
            device: *const Dev,
            direction: c_int,
            channel: size_t,
            full_scale: *mut c_double,
        ) -> *mut c_char;
        fn SoapySDRDevice_getStreamArgsInfo(
            device: *const Dev,
            direction: c_int,
            channel: size_t,
            length: *mut size_t,
        ) -> *mut SoapySDRArgInfo;
        fn SoapySDRDevice_setupStream(
            device: *mut Dev,
            direction: c_int,
            format: *const c_char,
            channels: *const size_t,
            num_chans: size_t,
            args: *const SoapySDRKwargs,
        ) -> *mut Strm;
        fn SoapySDRDevice_closeStream(device: *mut Dev, stream: *mut Strm) -> c_int;
        fn SoapySDRDevice_getStreamMTU(device: *const Dev, stream: *mut Strm) -> size_t;
        fn SoapySDRDevice_activateStream(
            device: *mut Dev,
            stream: *mut Strm,
            flags: c_int,
            time_ns: c_longlong,
            num_elems: size_t,
        ) -> c_int;
        fn SoapySDRDevice_deactivateStream(
            device: *mut Dev,
            stream: *mut Strm,
            flags: c_int,
            time_ns: c_longlong,
        ) -> c_int;
        fn SoapySDRDevice_readStream(
            device: *mut Dev,
            stream: *mut Strm,
            buffs: *const *mut c_void,
            num_elems: size_t,
            flags: *mut c_int,
            time_ns: *mut c_longlong,
            timeout_us: c_long,
        ) -> c_int;
        fn SoapySDRDevice_writeStream(
            device: *mut Dev,
            stream: *mut Strm,
            buffs: *const *const c_void,
            num_elems: size_t,
            flags: *mut c_int,
            time_ns: c_longlong,
            timeout_us: c_long,
        ) -> c_int;
        fn SoapySDRDevice_readStreamStatus(
            device: *mut Dev,
            stream: *mut Strm,
            chan_mask: *mut size_t,
            flags: *mut c_int,
            time_ns: *mut c_longlong,
            timeout_us: c_long,
        ) -> c_int;
        fn SoapySDRDevice_getNumDirectAccessBuffers(device: *mut Dev, stream: *mut Strm) -> size_t;
        fn SoapySDRDevice_acquireReadBuffer(
            device: *mut Dev,
            stream: *mut Strm,
            handle: *mut size_t,
            buffs: *mut *const c_void,
            flags: *mut c_int,
            time_ns: *mut c_longlong,
            timeout_us: c_long,
        ) -> c_int;
        fn SoapySDRDevice_releaseReadBuffer(device: *mut Dev, stream: *mut Strm, handle: size_t);
        fn SoapySDRDevice_acquireWriteBuffer(
            device: *mut Dev,
            stream: *mut Strm,
            handle: *mut size_t,
            buffs: *mut *mut c_void,
            timeout_us: c_long,
        ) -> c_int;
        fn SoapySDRDevice_releaseWriteBuffer(
            device: *mut Dev,
            stream: *mut Strm,
            handle: size_t,
            num_elems: size_t,
            flags: *mut c_int,
            time_ns: c_longlong,
        );

        fn SoapySDRDevice_listAntennas(
            device: *const Dev,
            direction: c_int,
            channel: size_t,
            length: *mut size_t,
        ) -> *mut *mut c_char;
        fn SoapySDRDevice_setAntenna(device: *mut Dev, direction: c_int, channel: size_t, name: *const c_char) -> c_int;
        fn SoapySDRDevice_getAntenna(device: *const Dev, direction: c_int, channel: size_t) -> *mut c_char;

        fn SoapySDRDevice_listGains(
            device: *const Dev,
            direction: c_int,
            channel: size_t,
            length: *mut size_t,
        ) -> *mut *mut c_char;
        fn SoapySDRDevice_setGain(device: *mut Dev, direction: c_int, channel: size_t, value: c_double) -> c_int;
        fn SoapySDRDevice_getGain(device: *const Dev, direction: c_int, channel: size_t) -> c_double;
        fn SoapySDRDevice_getGainRange(device: *const Dev, direction: c_int, channel: size_t) -> SoapySDRRange;

        fn SoapySDRDevice_setFrequency(
            device: *mut Dev,
            direction: c_int,
            channel: size_t,
            frequency: c_double,
            args: *const SoapySDRKwargs,
        ) -> c_int;
        fn SoapySDRDevice_getFrequency(device: *const Dev, direction: c_int, channel: size_t) -> c_double;
        fn SoapySDRDevice_getFrequencyRange(
            device: *const Dev,
            direction: c_int,
            channel: size_t,
            length: *mut size_t,
        ) -> *mut SoapySDRRange;

        fn SoapySDRDevice_setSampleRate(device: *mut Dev, direction: c_int, channel: size_t, rate: c_double) -> c_int;
        fn SoapySDRDevice_getSampleRate(device: *const Dev, direction: c_int, channel: size_t) -> c_double;
        fn SoapySDRDevice_getSampleRateRange(
            device: *const Dev,
            direction: c_int,
            channel: size_t,
            length: *mut size_t,
        ) -> *mut SoapySDRRange;

        fn SoapySDRDevice_getSettingInfo(device: *const Dev, length: *mut size_t) -> *mut SoapySDRArgInfo;
        fn SoapySDRDevice_writeSetting(device: *mut Dev, key: *const c_char, value: *const c_char) -> c_int;
        fn SoapySDRDevice_readSetting(device: *const Dev, key: *const c_char) -> *mut c_char;

        fn SoapySDRDevice_listSensors(device: *const Dev, length: *mut size_t) -> *mut *mut c_char;
        fn SoapySDRDevice_getSensorInfo(device: *const Dev, key: *const c_char) -> SoapySDRArgInfo;
        fn SoapySDRDevice_readSensor(device: *const Dev, key: *const c_char) -> *mut c_char;
    }

    pub(super) static ABI: Abi = Abi {
        name: "SoapySDR",
        free: SoapySDR_free,
        strings_clear: SoapySDRStrings_clear,
        kwargs_clear: SoapySDRKwargs_clear,
        kwargs_list_clear: SoapySDRKwargsList_clear,
        arg_info_clear: SoapySDRArgInfo_clear,
        arg_info_list_clear: SoapySDRArgInfoList_clear,
        last_error: SoapySDRDevice_lastError,
        last_status: SoapySDRDevice_lastStatus,
        enumerate: SoapySDRDevice_enumerate,
        make: SoapySDRDevice_make,
        unmake: SoapySDRDevice_unmake,
        make_list: SoapySDRDevice_make_list,
        unmake_list: SoapySDRDevice_unmake_list,
        get_driver_key: SoapySDRDevice_getDriverKey,
        get_hardware_key: SoapySDRDevice_getHardwareKey,
        get_hardware_info: SoapySDRDevice_getHardwareInfo,
        get_num_channels: SoapySDRDevice_getNumChannels,
        get_channel_info: SoapySDRDevice_getChannelInfo,
        get_full_duplex: SoapySDRDevice_getFullDuplex,
        get_stream_formats: SoapySDRDevice_getStreamFormats,
        get_native_stream_format: SoapySDRDevice_getNativeStreamFormat,
        get_stream_args_info: SoapySDRDevice_getStreamArgsInfo,
        setup_stream: SoapySDRDevice_setupStream,
        close_stream: SoapySDRDevice_closeStream,
        get_stream_mtu: SoapySDRDevice_getStreamMTU,
        activate_stream: SoapySDRDevice_activateStream,
        deactivate_stream: SoapySDRDevice_deactivateStream,
        read_stream: SoapySDRDevice_readStream,
        write_stream: SoapySDRDevice_writeStream,
        read_stream_status: SoapySDRDevice_readStreamStatus,
        get_num_direct_access_buffers: SoapySDRDevice_getNumDirectAccessBuffers,
        acquire_read_buffer: SoapySDRDevice_acquireReadBuffer,
        release_read_buffer: SoapySDRDevice_releaseReadBuffer,
        acquire_write_buffer: SoapySDRDevice_acquireWriteBuffer,
        release_write_buffer: SoapySDRDevice_releaseWriteBuffer,
        list_antennas: SoapySDRDevice_listAntennas,
        set_antenna: SoapySDRDevice_setAntenna,
        get_antenna: SoapySDRDevice_getAntenna,
        list_gains: SoapySDRDevice_listGains,
        set_gain: SoapySDRDevice_setGain,
        get_gain: SoapySDRDevice_getGain,
        get_gain_range: SoapySDRDevice_getGainRange,
        set_frequency: SoapySDRDevice_setFrequency,
        get_frequency: SoapySDRDevice_getFrequency,
        get_frequency_range: SoapySDRDevice_getFrequencyRange,
        set_sample_rate: SoapySDRDevice_setSampleRate,
        get_sample_rate: SoapySDRDevice_getSampleRate,
        get_sample_rate_range: SoapySDRDevice_getSampleRateRange,
        get_setting_info: SoapySDRDevice_getSettingInfo,
        write_setting: SoapySDRDevice_writeSetting,
        read_setting: SoapySDRDevice_readSetting,
        list_sensors: SoapySDRDevice_listSensors,
        get_sensor_info: SoapySDRDevice_getSensorInfo,
        read_sensor: SoapySDRDevice_readSensor,
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{align_of, size_of};

    #[test]
    fn record_layouts() {
        assert_eq!(size_of::<SoapySDRRange>(), 3 * size_of::<f64>());
        assert_eq!(
            size_of::<SoapySDRKwargs>(),
            size_of::<size_t>() + 2 * size_of::<*mut c_char>()
        );
        assert_eq!(align_of::<SoapySDRArgInfo>(), align_of::<f64>().max(align_of::<usize>()));
    }

    #[test]
    fn mock_table_reports_its_name() {
        let abi = crate::mock::abi();
        assert_eq!(abi.name, "mock");
        assert!(format!("{abi:?}").contains("mock"));
    }
}
