//! In-process driver implementing the foreign API.
//!
//! Selected with `driver=mock` (or no driver key). The mock exposes
//! [`RX_CHANNELS`] receive and [`TX_CHANNELS`] transmit channels, hands out
//! every foreign allocation through a counting allocator so tests can check
//! that the binding releases what it receives, and clears the last error at
//! the start of every call like the real library does.
//!
//! Two knobs exist for exercising failure paths:
//! * writing the setting `fault` to a status code makes the next stream
//!   transfer return that code;
//! * a `fail_open` key in construction arguments makes that construction fail.

use std::cell::{Cell, RefCell};
use std::ffi::{CStr, CString};
use std::mem;
use std::ptr;
use std::sync::{Mutex, MutexGuard};

use libc::{c_char, c_double, c_int, c_long, c_longlong, c_void, size_t};

use crate::error::ErrorKind;
use crate::ffi::{
    Abi, SoapySDRArgInfo, SoapySDRDevice, SoapySDRKwargs, SoapySDRRange, SoapySDRStream,
    SOAPY_SDR_RX, SOAPY_SDR_TX,
};
use crate::record;
use crate::stream::StreamFlags;
use crate::time::ticks_to_time_ns;
use crate::types::{ArgInfo, ArgType, Direction, Kwargs, Range};

pub const RX_CHANNELS: usize = 4;
pub const TX_CHANNELS: usize = 2;
pub const MTU: usize = 1024;
pub const DIRECT_BUFFERS: usize = 4;
pub const SERIALS: [&str; 2] = ["mock-0", "mock-1"];

const RX_ANTENNAS: [&str; 2] = ["RX1", "RX2"];
const TX_ANTENNAS: [&str; 1] = ["TX"];
const GAINS: [&str; 2] = ["LNA", "VGA"];
const FORMATS: [&str; 6] = ["CS8", "CS16", "CF32", "CU8", "CU16", "CF64"];
const GAIN_RANGE: Range = Range {
    minimum: 0.0,
    maximum: 70.0,
    step: 1.0,
};
const FREQUENCY_RANGE: Range = Range {
    minimum: 1e6,
    maximum: 6e9,
    step: 0.0,
};
const RATE_RANGES: [Range; 2] = [
    Range {
        minimum: 250e3,
        maximum: 250e3,
        step: 0.0,
    },
    Range {
        minimum: 1e6,
        maximum: 20e6,
        step: 0.0,
    },
];

thread_local! {
    static LAST_ERROR: RefCell<CString> = RefCell::new(CString::default());
    static LAST_STATUS: Cell<c_int> = const { Cell::new(0) };
    static LIVE: Cell<isize> = const { Cell::new(0) };
}

/// Outstanding allocations handed out by the mock on this thread, devices
/// and streams included.
pub fn live_allocations() -> isize {
    LIVE.with(|c| c.get())
}

/// The mock's entry-point table.
pub fn abi() -> &'static Abi {
    &ABI
}

fn begin() {
    LAST_ERROR.with(|e| *e.borrow_mut() = CString::default());
    LAST_STATUS.with(|s| s.set(0));
}

fn fail(msg: impl Into<String>) {
    let msg = CString::new(msg.into()).unwrap_or_default();
    tracing::trace!(target: "soapysdr::mock", error = ?msg, "call failed");
    LAST_ERROR.with(|e| *e.borrow_mut() = msg);
    LAST_STATUS.with(|s| s.set(-1));
}

fn status(code: c_int) -> c_int {
    LAST_STATUS.with(|s| s.set(code));
    code
}

fn counted(delta: isize) {
    LIVE.with(|c| c.set(c.get() + delta));
}

unsafe fn alloc<T>(len: usize) -> *mut T {
    if len == 0 {
        return ptr::null_mut();
    }
    let p = libc::calloc(len, mem::size_of::<T>()) as *mut T;
    if !p.is_null() {
        counted(1);
    }
    p
}

unsafe fn dup(s: &str) -> *mut c_char {
    let bytes = s.as_bytes();
    let p = alloc::<u8>(bytes.len() + 1);
    if !p.is_null() {
        ptr::copy_nonoverlapping(bytes.as_ptr(), p, bytes.len());
    }
    p as *mut c_char
}

unsafe fn strings_out<S: AsRef<str>>(items: &[S], length: *mut size_t) -> *mut *mut c_char {
    let arr = alloc::<*mut c_char>(items.len());
    for (i, s) in items.iter().enumerate() {
        *arr.add(i) = dup(s.as_ref());
    }
    if !length.is_null() {
        *length = if arr.is_null() { 0 } else { items.len() };
    }
    arr
}

unsafe fn kwargs_out(args: &Kwargs) -> SoapySDRKwargs {
    let keys: Vec<&str> = args.keys().collect();
    let vals: Vec<&str> = args.iter().map(|(_, v)| v).collect();
    SoapySDRKwargs {
        size: args.len(),
        keys: strings_out(&keys, ptr::null_mut()),
        vals: strings_out(&vals, ptr::null_mut()),
    }
}

unsafe fn arg_info_out(info: &ArgInfo) -> SoapySDRArgInfo {
    SoapySDRArgInfo {
        key: dup(&info.key),
        value: dup(&info.value),
        name: dup(&info.name),
        description: dup(&info.description),
        units: dup(&info.units),
        arg_type: record::arg_type_to_foreign(info.arg_type),
        range: record::range_to_foreign(&info.range),
        num_options: info.options.len(),
        options: strings_out(&info.options, ptr::null_mut()),
        option_names: strings_out(&info.option_names, ptr::null_mut()),
    }
}

unsafe fn arg_info_list_out(list: &[ArgInfo], length: *mut size_t) -> *mut SoapySDRArgInfo {
    let arr = alloc::<SoapySDRArgInfo>(list.len());
    for (i, info) in list.iter().enumerate() {
        arr.add(i).write(arg_info_out(info));
    }
    *length = if arr.is_null() { 0 } else { list.len() };
    arr
}

unsafe fn ranges_out(list: &[Range], length: *mut size_t) -> *mut SoapySDRRange {
    let arr = alloc::<SoapySDRRange>(list.len());
    for (i, r) in list.iter().enumerate() {
        arr.add(i).write(record::range_to_foreign(r));
    }
    *length = if arr.is_null() { 0 } else { list.len() };
    arr
}

unsafe fn input_kwargs(args: *const SoapySDRKwargs) -> Kwargs {
    if args.is_null() {
        return Kwargs::new();
    }
    record::kwargs_from_foreign(&*args).unwrap_or_default()
}

unsafe fn input_str<'a>(s: *const c_char) -> Option<&'a str> {
    if s.is_null() {
        fail("null string argument");
        return None;
    }
    match CStr::from_ptr(s).to_str() {
        Ok(s) => Some(s),
        Err(_) => {
            fail("string argument is not UTF-8");
            None
        }
    }
}

fn dir_name(dir: c_int) -> String {
    Direction::from_raw(dir).map_or_else(|| format!("direction {dir}"), |d| d.to_string())
}

// ---- memory release ----

unsafe extern "C" fn mock_free(ptr: *mut c_void) {
    if ptr.is_null() {
        return;
    }
    libc::free(ptr);
    counted(-1);
}

unsafe extern "C" fn mock_strings_clear(elems: *mut *mut *mut c_char, length: size_t) {
    if elems.is_null() || (*elems).is_null() {
        return;
    }
    let arr = *elems;
    for i in 0..length {
        mock_free(*arr.add(i) as *mut c_void);
    }
    mock_free(arr as *mut c_void);
    *elems = ptr::null_mut();
}

unsafe extern "C" fn mock_kwargs_clear(args: *mut SoapySDRKwargs) {
    if args.is_null() {
        return;
    }
    let a = &mut *args;
    mock_strings_clear(&mut a.keys, a.size);
    mock_strings_clear(&mut a.vals, a.size);
    *a = SoapySDRKwargs::empty();
}

unsafe extern "C" fn mock_kwargs_list_clear(list: *mut SoapySDRKwargs, length: size_t) {
    if list.is_null() {
        return;
    }
    for i in 0..length {
        mock_kwargs_clear(list.add(i));
    }
    mock_free(list as *mut c_void);
}

unsafe extern "C" fn mock_arg_info_clear(info: *mut SoapySDRArgInfo) {
    if info.is_null() {
        return;
    }
    let i = &mut *info;
    for s in [i.key, i.value, i.name, i.description, i.units] {
        mock_free(s as *mut c_void);
    }
    mock_strings_clear(&mut i.options, i.num_options);
    mock_strings_clear(&mut i.option_names, i.num_options);
    *i = SoapySDRArgInfo::empty();
}

unsafe extern "C" fn mock_arg_info_list_clear(list: *mut SoapySDRArgInfo, length: size_t) {
    if list.is_null() {
        return;
    }
    for i in 0..length {
        mock_arg_info_clear(list.add(i));
    }
    mock_free(list as *mut c_void);
}

unsafe extern "C" fn mock_last_error() -> *const c_char {
    LAST_ERROR.with(|e| e.borrow().as_ptr())
}

unsafe extern "C" fn mock_last_status() -> c_int {
    LAST_STATUS.with(|s| s.get())
}

// ---- devices ----

struct Channel {
    antenna: String,
    gain: f64,
    frequency: f64,
    sample_rate: f64,
}

impl Channel {
    fn new(antenna: &str) -> Self {
        Channel {
            antenna: antenna.to_string(),
            gain: 0.0,
            frequency: 100e6,
            sample_rate: 1e6,
        }
    }
}

struct DeviceState {
    serial: String,
    rx: Vec<Channel>,
    tx: Vec<Channel>,
    settings: Kwargs,
    fault: Option<c_int>,
}

impl DeviceState {
    fn channel(&mut self, dir: c_int, ch: size_t) -> Option<&mut Channel> {
        let list = match dir {
            SOAPY_SDR_RX => &mut self.rx,
            SOAPY_SDR_TX => &mut self.tx,
            _ => {
                fail(format!("invalid direction {dir}"));
                return None;
            }
        };
        if ch >= list.len() {
            fail(format!("no {} channel {ch}", dir_name(dir)));
            return None;
        }
        list.get_mut(ch)
    }
}

/// What a device handle points at.
struct MockDevice {
    state: Mutex<DeviceState>,
}

impl MockDevice {
    fn new(serial: &str) -> Self {
        MockDevice {
            state: Mutex::new(DeviceState {
                serial: serial.to_string(),
                rx: (0..RX_CHANNELS).map(|_| Channel::new(RX_ANTENNAS[0])).collect(),
                tx: (0..TX_CHANNELS).map(|_| Channel::new(TX_ANTENNAS[0])).collect(),
                settings: Kwargs::new(),
                fault: None,
            }),
        }
    }
}

unsafe fn lock<'a>(dev: *const SoapySDRDevice) -> Option<MutexGuard<'a, DeviceState>> {
    if dev.is_null() {
        fail("null device handle");
        return None;
    }
    let d = &*(dev as *const MockDevice);
    Some(d.state.lock().unwrap_or_else(|e| e.into_inner()))
}

fn candidates() -> Vec<Kwargs> {
    SERIALS
        .iter()
        .enumerate()
        .map(|(i, serial)| {
            Kwargs::new()
                .with("driver", "mock")
                .with("label", format!("Mock SDR #{i}"))
                .with("serial", *serial)
        })
        .collect()
}

fn matches(filter: &Kwargs, candidate: &Kwargs) -> bool {
    ["driver", "serial"]
        .iter()
        .all(|key| filter.get(key).map_or(true, |v| candidate.get(key) == Some(v)))
}

fn open(args: &Kwargs) -> Result<*mut SoapySDRDevice, String> {
    if let Some(driver) = args.get("driver") {
        if driver != "mock" {
            return Err(format!("no match for driver={driver}"));
        }
    }
    if args.get("fail_open").is_some() {
        return Err("device refused to open".to_string());
    }
    let serial = args.get("serial").unwrap_or(SERIALS[0]);
    if !SERIALS.contains(&serial) {
        return Err(format!("no mock device with serial {serial}"));
    }
    counted(1);
    Ok(Box::into_raw(Box::new(MockDevice::new(serial))) as *mut SoapySDRDevice)
}

unsafe fn close(dev: *mut SoapySDRDevice) {
    drop(Box::from_raw(dev as *mut MockDevice));
    counted(-1);
}

unsafe extern "C" fn mock_enumerate(
    args: *const SoapySDRKwargs,
    length: *mut size_t,
) -> *mut SoapySDRKwargs {
    begin();
    let filter = input_kwargs(args);
    if filter.get("driver").is_some_and(|d| d != "mock") {
        *length = 0;
        return ptr::null_mut();
    }
    let found: Vec<Kwargs> = candidates()
        .into_iter()
        .filter(|c| matches(&filter, c))
        .collect();
    let list = alloc::<SoapySDRKwargs>(found.len());
    for (i, k) in found.iter().enumerate() {
        list.add(i).write(kwargs_out(k));
    }
    *length = if list.is_null() { 0 } else { found.len() };
    list
}

unsafe extern "C" fn mock_make(args: *const SoapySDRKwargs) -> *mut SoapySDRDevice {
    begin();
    match open(&input_kwargs(args)) {
        Ok(dev) => dev,
        Err(msg) => {
            fail(msg);
            ptr::null_mut()
        }
    }
}

unsafe extern "C" fn mock_unmake(dev: *mut SoapySDRDevice) -> c_int {
    begin();
    if dev.is_null() {
        fail("null device handle");
        return -1;
    }
    close(dev);
    0
}

unsafe extern "C" fn mock_make_list(
    args: *const SoapySDRKwargs,
    length: size_t,
) -> *mut *mut SoapySDRDevice {
    begin();
    let list = alloc::<*mut SoapySDRDevice>(length);
    if list.is_null() {
        fail("empty construction list");
        return list;
    }
    // A failed construction leaves a null entry.
    for i in 0..length {
        match open(&input_kwargs(args.add(i))) {
            Ok(dev) => *list.add(i) = dev,
            Err(msg) => fail(msg),
        }
    }
    list
}

unsafe extern "C" fn mock_unmake_list(devs: *mut *mut SoapySDRDevice, length: size_t) -> c_int {
    begin();
    if devs.is_null() {
        return 0;
    }
    for i in 0..length {
        let dev = *devs.add(i);
        if !dev.is_null() {
            close(dev);
        }
    }
    0
}

unsafe extern "C" fn mock_get_driver_key(dev: *const SoapySDRDevice) -> *mut c_char {
    begin();
    match lock(dev) {
        Some(_) => dup("mock"),
        None => ptr::null_mut(),
    }
}

unsafe extern "C" fn mock_get_hardware_key(dev: *const SoapySDRDevice) -> *mut c_char {
    begin();
    match lock(dev) {
        Some(_) => dup("mock-hw"),
        None => ptr::null_mut(),
    }
}

unsafe extern "C" fn mock_get_hardware_info(dev: *const SoapySDRDevice) -> SoapySDRKwargs {
    begin();
    let Some(d) = lock(dev) else {
        return SoapySDRKwargs::empty();
    };
    let info = Kwargs::new()
        .with("serial", d.serial.as_str())
        .with("firmware", "1.0")
        .with("origin", "in-process");
    kwargs_out(&info)
}

// ---- channels ----

unsafe extern "C" fn mock_get_num_channels(dev: *const SoapySDRDevice, dir: c_int) -> size_t {
    begin();
    let Some(d) = lock(dev) else {
        return 0;
    };
    match dir {
        SOAPY_SDR_RX => d.rx.len(),
        SOAPY_SDR_TX => d.tx.len(),
        _ => 0,
    }
}

unsafe extern "C" fn mock_get_channel_info(
    dev: *const SoapySDRDevice,
    dir: c_int,
    ch: size_t,
) -> SoapySDRKwargs {
    begin();
    let Some(mut d) = lock(dev) else {
        return SoapySDRKwargs::empty();
    };
    if d.channel(dir, ch).is_none() {
        return SoapySDRKwargs::empty();
    }
    let info = Kwargs::new().with("name", format!("{}{ch}", dir_name(dir)));
    kwargs_out(&info)
}

unsafe extern "C" fn mock_get_full_duplex(dev: *const SoapySDRDevice, dir: c_int, ch: size_t) -> bool {
    begin();
    lock(dev).is_some_and(|mut d| d.channel(dir, ch).is_some())
}

// ---- stream capabilities ----

unsafe extern "C" fn mock_get_stream_formats(
    dev: *const SoapySDRDevice,
    dir: c_int,
    ch: size_t,
    length: *mut size_t,
) -> *mut *mut c_char {
    begin();
    *length = 0;
    let Some(mut d) = lock(dev) else {
        return ptr::null_mut();
    };
    if d.channel(dir, ch).is_none() {
        return ptr::null_mut();
    }
    strings_out(&FORMATS, length)
}

unsafe extern "C" fn mock_get_native_stream_format(
    dev: *const SoapySDRDevice,
    dir: c_int,
    ch: size_t,
    full_scale: *mut c_double,
) -> *mut c_char {
    begin();
    let Some(mut d) = lock(dev) else {
        return ptr::null_mut();
    };
    if d.channel(dir, ch).is_none() {
        return ptr::null_mut();
    }
    *full_scale = 127.0;
    dup("CS8")
}

fn stream_args() -> Vec<ArgInfo> {
    vec![ArgInfo {
        key: "buffers".into(),
        value: "8".into(),
        name: "Buffer count".into(),
        description: "Number of transfer buffers".into(),
        units: String::new(),
        arg_type: ArgType::Int,
        range: Range::new(1.0, 64.0, 1.0),
        options: vec![],
        option_names: vec![],
    }]
}

unsafe extern "C" fn mock_get_stream_args_info(
    dev: *const SoapySDRDevice,
    dir: c_int,
    ch: size_t,
    length: *mut size_t,
) -> *mut SoapySDRArgInfo {
    begin();
    *length = 0;
    let Some(mut d) = lock(dev) else {
        return ptr::null_mut();
    };
    if d.channel(dir, ch).is_none() {
        return ptr::null_mut();
    }
    arg_info_list_out(&stream_args(), length)
}

// ---- streams ----

/// What a stream handle points at.
struct MockStream {
    direction: c_int,
    elem_size: usize,
    channels: Vec<usize>,
    active: bool,
    rate: f64,
    start_ns: i64,
    ticks: i64,
    burst_left: Option<usize>,
    end_of_burst: Option<i64>,
    direct: Vec<Vec<Vec<u8>>>,
    direct_busy: [bool; DIRECT_BUFFERS],
}

impl MockStream {
    fn now(&self) -> i64 {
        self.start_ns + ticks_to_time_ns(self.ticks, self.rate)
    }

    fn advance(&mut self, n: usize) {
        self.ticks += n as i64;
    }

    /// Fill one channel buffer with a ramp that continues across calls.
    unsafe fn fill(&self, buf: *mut u8, n: usize, chan: usize) {
        for e in 0..n {
            let v = ((self.ticks as usize + e + chan) & 0x7f) as u8;
            ptr::write_bytes(buf.add(e * self.elem_size), v, self.elem_size);
        }
    }

    /// Elements the next receive may produce, or `None` when a burst is spent.
    fn quota(&self, wanted: usize) -> Option<usize> {
        let n = wanted.min(MTU);
        match self.burst_left {
            Some(0) => None,
            Some(left) => Some(n.min(left)),
            None => Some(n),
        }
    }

    fn consume_burst(&mut self, n: usize) -> bool {
        match &mut self.burst_left {
            Some(left) => {
                *left -= n;
                *left == 0
            }
            None => false,
        }
    }
}

unsafe fn stream<'a>(strm: *mut SoapySDRStream) -> Option<&'a mut MockStream> {
    if strm.is_null() {
        fail("null stream handle");
        return None;
    }
    Some(&mut *(strm as *mut MockStream))
}

fn element_size(format: &str) -> Option<usize> {
    match format {
        "CU8" | "CS8" => Some(2),
        "CU16" | "CS16" => Some(4),
        "CF32" => Some(8),
        "CF64" => Some(16),
        _ => None,
    }
}

unsafe fn take_fault(dev: *const SoapySDRDevice) -> Option<c_int> {
    lock(dev)?.fault.take()
}

unsafe extern "C" fn mock_setup_stream(
    dev: *mut SoapySDRDevice,
    dir: c_int,
    format: *const c_char,
    channels: *const size_t,
    num_chans: size_t,
    args: *const SoapySDRKwargs,
) -> *mut SoapySDRStream {
    begin();
    let Some(mut d) = lock(dev) else {
        return ptr::null_mut();
    };
    let Some(format) = input_str(format) else {
        return ptr::null_mut();
    };
    let Some(elem_size) = element_size(format) else {
        fail(format!("unsupported stream format {format}"));
        return ptr::null_mut();
    };
    let chans: Vec<usize> = if num_chans == 0 {
        vec![0]
    } else if channels.is_null() {
        fail("null channel list");
        return ptr::null_mut();
    } else {
        std::slice::from_raw_parts(channels, num_chans).to_vec()
    };
    let mut rate = 0.0;
    for &ch in &chans {
        match d.channel(dir, ch) {
            Some(c) => rate = c.sample_rate,
            None => return ptr::null_mut(),
        }
    }
    let args = input_kwargs(args);
    let buffers = args.get("buffers").and_then(|b| b.parse::<usize>().ok()).unwrap_or(8);
    if buffers == 0 {
        fail("buffers must be positive");
        return ptr::null_mut();
    }
    let stream = MockStream {
        direction: dir,
        elem_size,
        direct: (0..DIRECT_BUFFERS)
            .map(|_| chans.iter().map(|_| vec![0u8; MTU * elem_size]).collect())
            .collect(),
        channels: chans,
        active: false,
        rate,
        start_ns: 0,
        ticks: 0,
        burst_left: None,
        end_of_burst: None,
        direct_busy: [false; DIRECT_BUFFERS],
    };
    counted(1);
    Box::into_raw(Box::new(stream)) as *mut SoapySDRStream
}

unsafe extern "C" fn mock_close_stream(_dev: *mut SoapySDRDevice, strm: *mut SoapySDRStream) -> c_int {
    begin();
    if strm.is_null() {
        fail("null stream handle");
        return -1;
    }
    drop(Box::from_raw(strm as *mut MockStream));
    counted(-1);
    0
}

unsafe extern "C" fn mock_get_stream_mtu(_dev: *const SoapySDRDevice, _strm: *mut SoapySDRStream) -> size_t {
    begin();
    MTU
}

unsafe extern "C" fn mock_activate_stream(
    _dev: *mut SoapySDRDevice,
    strm: *mut SoapySDRStream,
    flags: c_int,
    time_ns: c_longlong,
    num_elems: size_t,
) -> c_int {
    begin();
    let Some(s) = stream(strm) else {
        return status(ErrorKind::STREAM_ERROR);
    };
    if flags & StreamFlags::WAIT_TRIGGER.bits() != 0 {
        return status(ErrorKind::NOT_SUPPORTED);
    }
    if flags & StreamFlags::HAS_TIME.bits() != 0 {
        s.start_ns = time_ns;
        s.ticks = 0;
    }
    s.burst_left = (num_elems > 0).then_some(num_elems);
    s.active = true;
    0
}

unsafe extern "C" fn mock_deactivate_stream(
    _dev: *mut SoapySDRDevice,
    strm: *mut SoapySDRStream,
    _flags: c_int,
    _time_ns: c_longlong,
) -> c_int {
    begin();
    let Some(s) = stream(strm) else {
        return status(ErrorKind::STREAM_ERROR);
    };
    s.active = false;
    0
}

/// Common checks before a transfer. Returns a status to report on failure.
unsafe fn transfer_check(dev: *const SoapySDRDevice, s: &MockStream, dir: c_int) -> Option<c_int> {
    if s.direction != dir {
        return Some(ErrorKind::NOT_SUPPORTED);
    }
    if !s.active {
        return Some(ErrorKind::STREAM_ERROR);
    }
    take_fault(dev)
}

unsafe extern "C" fn mock_read_stream(
    dev: *mut SoapySDRDevice,
    strm: *mut SoapySDRStream,
    buffs: *const *mut c_void,
    num_elems: size_t,
    flags: *mut c_int,
    time_ns: *mut c_longlong,
    _timeout_us: c_long,
) -> c_int {
    begin();
    let Some(s) = stream(strm) else {
        return status(ErrorKind::STREAM_ERROR);
    };
    if let Some(code) = transfer_check(dev, s, SOAPY_SDR_RX) {
        return status(code);
    }
    let Some(n) = s.quota(num_elems) else {
        return status(ErrorKind::TIMEOUT);
    };
    for c in 0..s.channels.len() {
        let buf = *buffs.add(c) as *mut u8;
        if buf.is_null() {
            fail(format!("null buffer for channel {c}"));
            return status(ErrorKind::STREAM_ERROR);
        }
        s.fill(buf, n, c);
    }
    let mut out = StreamFlags::HAS_TIME.bits();
    if s.consume_burst(n) {
        out |= StreamFlags::END_BURST.bits();
    }
    *flags = out;
    *time_ns = s.now();
    s.advance(n);
    n as c_int
}

unsafe extern "C" fn mock_write_stream(
    dev: *mut SoapySDRDevice,
    strm: *mut SoapySDRStream,
    buffs: *const *const c_void,
    num_elems: size_t,
    flags: *mut c_int,
    time_ns: c_longlong,
    _timeout_us: c_long,
) -> c_int {
    begin();
    let Some(s) = stream(strm) else {
        return status(ErrorKind::STREAM_ERROR);
    };
    if let Some(code) = transfer_check(dev, s, SOAPY_SDR_TX) {
        return status(code);
    }
    if (0..s.channels.len()).any(|c| (*buffs.add(c)).is_null()) {
        fail("null transmit buffer");
        return status(ErrorKind::STREAM_ERROR);
    }
    let in_flags = *flags;
    if in_flags & StreamFlags::HAS_TIME.bits() != 0 {
        if time_ns < s.now() {
            return status(ErrorKind::TIME_ERROR);
        }
        s.start_ns = time_ns;
        s.ticks = 0;
    }
    let n = num_elems.min(MTU);
    s.advance(n);
    if in_flags & StreamFlags::END_BURST.bits() != 0 && n == num_elems {
        s.end_of_burst = Some(s.now());
    }
    *flags = 0;
    n as c_int
}

unsafe extern "C" fn mock_read_stream_status(
    _dev: *mut SoapySDRDevice,
    strm: *mut SoapySDRStream,
    chan_mask: *mut size_t,
    flags: *mut c_int,
    time_ns: *mut c_longlong,
    _timeout_us: c_long,
) -> c_int {
    begin();
    let Some(s) = stream(strm) else {
        return status(ErrorKind::STREAM_ERROR);
    };
    if s.direction != SOAPY_SDR_TX {
        return status(ErrorKind::NOT_SUPPORTED);
    }
    match s.end_of_burst.take() {
        Some(t) => {
            *chan_mask = s.channels.iter().fold(0, |m, &c| m | (1 << c));
            *flags = (StreamFlags::END_BURST | StreamFlags::HAS_TIME).bits();
            *time_ns = t;
            0
        }
        None => status(ErrorKind::TIMEOUT),
    }
}

unsafe extern "C" fn mock_get_num_direct_access_buffers(
    _dev: *mut SoapySDRDevice,
    strm: *mut SoapySDRStream,
) -> size_t {
    begin();
    if strm.is_null() {
        return 0;
    }
    DIRECT_BUFFERS
}

unsafe extern "C" fn mock_acquire_read_buffer(
    dev: *mut SoapySDRDevice,
    strm: *mut SoapySDRStream,
    handle: *mut size_t,
    buffs: *mut *const c_void,
    flags: *mut c_int,
    time_ns: *mut c_longlong,
    _timeout_us: c_long,
) -> c_int {
    begin();
    let Some(s) = stream(strm) else {
        return status(ErrorKind::STREAM_ERROR);
    };
    if let Some(code) = transfer_check(dev, s, SOAPY_SDR_RX) {
        return status(code);
    }
    let Some(idx) = s.direct_busy.iter().position(|busy| !busy) else {
        return status(ErrorKind::TIMEOUT);
    };
    let Some(n) = s.quota(MTU) else {
        return status(ErrorKind::TIMEOUT);
    };
    for c in 0..s.channels.len() {
        let buf = s.direct[idx][c].as_mut_ptr();
        s.fill(buf, n, c);
        *buffs.add(c) = buf as *const c_void;
    }
    s.direct_busy[idx] = true;
    let mut out = StreamFlags::HAS_TIME.bits();
    if s.consume_burst(n) {
        out |= StreamFlags::END_BURST.bits();
    }
    *handle = idx;
    *flags = out;
    *time_ns = s.now();
    s.advance(n);
    n as c_int
}

unsafe extern "C" fn mock_release_read_buffer(
    _dev: *mut SoapySDRDevice,
    strm: *mut SoapySDRStream,
    handle: size_t,
) {
    begin();
    if let Some(busy) = stream(strm).and_then(|s| s.direct_busy.get_mut(handle)) {
        *busy = false;
    }
}

unsafe extern "C" fn mock_acquire_write_buffer(
    dev: *mut SoapySDRDevice,
    strm: *mut SoapySDRStream,
    handle: *mut size_t,
    buffs: *mut *mut c_void,
    _timeout_us: c_long,
) -> c_int {
    begin();
    let Some(s) = stream(strm) else {
        return status(ErrorKind::STREAM_ERROR);
    };
    if let Some(code) = transfer_check(dev, s, SOAPY_SDR_TX) {
        return status(code);
    }
    let Some(idx) = s.direct_busy.iter().position(|busy| !busy) else {
        return status(ErrorKind::TIMEOUT);
    };
    for c in 0..s.channels.len() {
        *buffs.add(c) = s.direct[idx][c].as_mut_ptr() as *mut c_void;
    }
    s.direct_busy[idx] = true;
    *handle = idx;
    MTU as c_int
}

unsafe extern "C" fn mock_release_write_buffer(
    _dev: *mut SoapySDRDevice,
    strm: *mut SoapySDRStream,
    handle: size_t,
    num_elems: size_t,
    flags: *mut c_int,
    _time_ns: c_longlong,
) {
    begin();
    let Some(s) = stream(strm) else {
        return;
    };
    if let Some(busy) = s.direct_busy.get_mut(handle) {
        *busy = false;
    }
    s.advance(num_elems.min(MTU));
    if !flags.is_null() && *flags & StreamFlags::END_BURST.bits() != 0 {
        s.end_of_burst = Some(s.now());
    }
}

// ---- antennas ----

unsafe extern "C" fn mock_list_antennas(
    dev: *const SoapySDRDevice,
    dir: c_int,
    ch: size_t,
    length: *mut size_t,
) -> *mut *mut c_char {
    begin();
    *length = 0;
    let Some(mut d) = lock(dev) else {
        return ptr::null_mut();
    };
    if d.channel(dir, ch).is_none() {
        return ptr::null_mut();
    }
    match dir {
        SOAPY_SDR_RX => strings_out(&RX_ANTENNAS, length),
        _ => strings_out(&TX_ANTENNAS, length),
    }
}

unsafe extern "C" fn mock_set_antenna(
    dev: *mut SoapySDRDevice,
    dir: c_int,
    ch: size_t,
    name: *const c_char,
) -> c_int {
    begin();
    let Some(name) = input_str(name) else {
        return -1;
    };
    let Some(mut d) = lock(dev) else {
        return -1;
    };
    let Some(c) = d.channel(dir, ch) else {
        return -1;
    };
    let known: &[&str] = if dir == SOAPY_SDR_RX { &RX_ANTENNAS } else { &TX_ANTENNAS };
    if !known.contains(&name) {
        fail(format!("unknown antenna {name}"));
        return -1;
    }
    c.antenna = name.to_string();
    0
}

unsafe extern "C" fn mock_get_antenna(dev: *const SoapySDRDevice, dir: c_int, ch: size_t) -> *mut c_char {
    begin();
    let Some(mut d) = lock(dev) else {
        return ptr::null_mut();
    };
    match d.channel(dir, ch) {
        Some(c) => dup(&c.antenna),
        None => ptr::null_mut(),
    }
}

// ---- gains ----

unsafe extern "C" fn mock_list_gains(
    dev: *const SoapySDRDevice,
    dir: c_int,
    ch: size_t,
    length: *mut size_t,
) -> *mut *mut c_char {
    begin();
    *length = 0;
    let Some(mut d) = lock(dev) else {
        return ptr::null_mut();
    };
    if d.channel(dir, ch).is_none() {
        return ptr::null_mut();
    }
    strings_out(&GAINS, length)
}

unsafe extern "C" fn mock_set_gain(dev: *mut SoapySDRDevice, dir: c_int, ch: size_t, value: c_double) -> c_int {
    begin();
    let Some(mut d) = lock(dev) else {
        return -1;
    };
    let Some(c) = d.channel(dir, ch) else {
        return -1;
    };
    if !GAIN_RANGE.contains(value) {
        fail(format!("gain {value} dB outside {GAIN_RANGE}"));
        return -1;
    }
    c.gain = value;
    0
}

unsafe extern "C" fn mock_get_gain(dev: *const SoapySDRDevice, dir: c_int, ch: size_t) -> c_double {
    begin();
    lock(dev).and_then(|mut d| d.channel(dir, ch).map(|c| c.gain)).unwrap_or(0.0)
}

unsafe extern "C" fn mock_get_gain_range(dev: *const SoapySDRDevice, dir: c_int, ch: size_t) -> SoapySDRRange {
    begin();
    match lock(dev).and_then(|mut d| d.channel(dir, ch).map(|_| ())) {
        Some(()) => record::range_to_foreign(&GAIN_RANGE),
        None => SoapySDRRange::default(),
    }
}

// ---- frequency ----

unsafe extern "C" fn mock_set_frequency(
    dev: *mut SoapySDRDevice,
    dir: c_int,
    ch: size_t,
    frequency: c_double,
    args: *const SoapySDRKwargs,
) -> c_int {
    begin();
    let offset = input_kwargs(args)
        .get("OFFSET")
        .and_then(|o| o.parse::<f64>().ok())
        .unwrap_or(0.0);
    let Some(mut d) = lock(dev) else {
        return -1;
    };
    let Some(c) = d.channel(dir, ch) else {
        return -1;
    };
    let tuned = frequency + offset;
    if !FREQUENCY_RANGE.contains(tuned) {
        fail(format!("frequency {tuned} Hz outside {FREQUENCY_RANGE}"));
        return -1;
    }
    c.frequency = tuned;
    0
}

unsafe extern "C" fn mock_get_frequency(dev: *const SoapySDRDevice, dir: c_int, ch: size_t) -> c_double {
    begin();
    lock(dev).and_then(|mut d| d.channel(dir, ch).map(|c| c.frequency)).unwrap_or(0.0)
}

unsafe extern "C" fn mock_get_frequency_range(
    dev: *const SoapySDRDevice,
    dir: c_int,
    ch: size_t,
    length: *mut size_t,
) -> *mut SoapySDRRange {
    begin();
    *length = 0;
    let Some(mut d) = lock(dev) else {
        return ptr::null_mut();
    };
    if d.channel(dir, ch).is_none() {
        return ptr::null_mut();
    }
    ranges_out(&[FREQUENCY_RANGE], length)
}

// ---- sample rate ----

unsafe extern "C" fn mock_set_sample_rate(dev: *mut SoapySDRDevice, dir: c_int, ch: size_t, rate: c_double) -> c_int {
    begin();
    let Some(mut d) = lock(dev) else {
        return -1;
    };
    let Some(c) = d.channel(dir, ch) else {
        return -1;
    };
    if !RATE_RANGES.iter().any(|r| r.contains(rate)) {
        fail(format!("unsupported sample rate {rate}"));
        return -1;
    }
    c.sample_rate = rate;
    0
}

unsafe extern "C" fn mock_get_sample_rate(dev: *const SoapySDRDevice, dir: c_int, ch: size_t) -> c_double {
    begin();
    lock(dev).and_then(|mut d| d.channel(dir, ch).map(|c| c.sample_rate)).unwrap_or(0.0)
}

unsafe extern "C" fn mock_get_sample_rate_range(
    dev: *const SoapySDRDevice,
    dir: c_int,
    ch: size_t,
    length: *mut size_t,
) -> *mut SoapySDRRange {
    begin();
    *length = 0;
    let Some(mut d) = lock(dev) else {
        return ptr::null_mut();
    };
    if d.channel(dir, ch).is_none() {
        return ptr::null_mut();
    }
    ranges_out(&RATE_RANGES, length)
}

// ---- settings ----

fn setting_info() -> Vec<ArgInfo> {
    vec![
        ArgInfo {
            key: "loopback".into(),
            value: "false".into(),
            name: "Loopback".into(),
            description: "Route TX samples to RX".into(),
            units: String::new(),
            arg_type: ArgType::Bool,
            range: Range::default(),
            options: vec![],
            option_names: vec![],
        },
        ArgInfo {
            key: "mode".into(),
            value: "normal".into(),
            name: "Mode".into(),
            description: "Sample source".into(),
            units: String::new(),
            arg_type: ArgType::String,
            range: Range::default(),
            options: vec!["normal".into(), "test".into()],
            option_names: vec!["Normal".into(), "Test pattern".into()],
        },
    ]
}

unsafe extern "C" fn mock_get_setting_info(dev: *const SoapySDRDevice, length: *mut size_t) -> *mut SoapySDRArgInfo {
    begin();
    *length = 0;
    if lock(dev).is_none() {
        return ptr::null_mut();
    }
    arg_info_list_out(&setting_info(), length)
}

unsafe extern "C" fn mock_write_setting(dev: *mut SoapySDRDevice, key: *const c_char, value: *const c_char) -> c_int {
    begin();
    let (Some(key), Some(value)) = (input_str(key), input_str(value)) else {
        return -1;
    };
    let Some(mut d) = lock(dev) else {
        return -1;
    };
    if key == "fault" {
        match value.parse::<c_int>() {
            Ok(0) => d.fault = None,
            Ok(code) => d.fault = Some(code),
            Err(_) => {
                fail(format!("fault expects a status code, got {value}"));
                return -1;
            }
        }
        return 0;
    }
    d.settings.insert(key, value);
    0
}

unsafe extern "C" fn mock_read_setting(dev: *const SoapySDRDevice, key: *const c_char) -> *mut c_char {
    begin();
    let Some(key) = input_str(key) else {
        return ptr::null_mut();
    };
    let Some(d) = lock(dev) else {
        return ptr::null_mut();
    };
    let value = match d.settings.get(key) {
        Some(v) => v.to_string(),
        None => setting_info()
            .into_iter()
            .find(|i| i.key == key)
            .map(|i| i.value)
            .unwrap_or_default(),
    };
    dup(&value)
}

// ---- sensors ----

fn sensors() -> Vec<(ArgInfo, &'static str)> {
    vec![
        (
            ArgInfo {
                key: "temperature".into(),
                value: "36.6".into(),
                name: "Board temperature".into(),
                description: String::new(),
                units: "C".into(),
                arg_type: ArgType::Float,
                range: Range::new(-40.0, 125.0, 0.0),
                options: vec![],
                option_names: vec![],
            },
            "36.6",
        ),
        (
            ArgInfo {
                key: "lo_locked".into(),
                value: "true".into(),
                name: "LO locked".into(),
                description: String::new(),
                units: String::new(),
                arg_type: ArgType::Bool,
                range: Range::default(),
                options: vec![],
                option_names: vec![],
            },
            "true",
        ),
    ]
}

unsafe extern "C" fn mock_list_sensors(dev: *const SoapySDRDevice, length: *mut size_t) -> *mut *mut c_char {
    begin();
    *length = 0;
    if lock(dev).is_none() {
        return ptr::null_mut();
    }
    let keys: Vec<String> = sensors().into_iter().map(|(i, _)| i.key).collect();
    strings_out(&keys, length)
}

unsafe extern "C" fn mock_get_sensor_info(dev: *const SoapySDRDevice, key: *const c_char) -> SoapySDRArgInfo {
    begin();
    let Some(key) = input_str(key) else {
        return SoapySDRArgInfo::empty();
    };
    if lock(dev).is_none() {
        return SoapySDRArgInfo::empty();
    }
    match sensors().into_iter().find(|(i, _)| i.key == key) {
        Some((info, _)) => arg_info_out(&info),
        None => {
            fail(format!("unknown sensor {key}"));
            SoapySDRArgInfo::empty()
        }
    }
}

unsafe extern "C" fn mock_read_sensor(dev: *const SoapySDRDevice, key: *const c_char) -> *mut c_char {
    begin();
    let Some(key) = input_str(key) else {
        return ptr::null_mut();
    };
    if lock(dev).is_none() {
        return ptr::null_mut();
    }
    match sensors().into_iter().find(|(i, _)| i.key == key) {
        Some((_, reading)) => dup(reading),
        None => {
            fail(format!("unknown sensor {key}"));
            ptr::null_mut()
        }
    }
}

static ABI: Abi = Abi {
    name: "mock",
    free: mock_free,
    strings_clear: mock_strings_clear,
    kwargs_clear: mock_kwargs_clear,
    kwargs_list_clear: mock_kwargs_list_clear,
    arg_info_clear: mock_arg_info_clear,
    arg_info_list_clear: mock_arg_info_list_clear,
    last_error: mock_last_error,
    last_status: mock_last_status,
    enumerate: mock_enumerate,
    make: mock_make,
    unmake: mock_unmake,
    make_list: mock_make_list,
    unmake_list: mock_unmake_list,
    get_driver_key: mock_get_driver_key,
    get_hardware_key: mock_get_hardware_key,
    get_hardware_info: mock_get_hardware_info,
    get_num_channels: mock_get_num_channels,
    get_channel_info: mock_get_channel_info,
    get_full_duplex: mock_get_full_duplex,
    get_stream_formats: mock_get_stream_formats,
    get_native_stream_format: mock_get_native_stream_format,
    get_stream_args_info: mock_get_stream_args_info,
    setup_stream: mock_setup_stream,
    close_stream: mock_close_stream,
    get_stream_mtu: mock_get_stream_mtu,
    activate_stream: mock_activate_stream,
    deactivate_stream: mock_deactivate_stream,
    read_stream: mock_read_stream,
    write_stream: mock_write_stream,
    read_stream_status: mock_read_stream_status,
    get_num_direct_access_buffers: mock_get_num_direct_access_buffers,
    acquire_read_buffer: mock_acquire_read_buffer,
    release_read_buffer: mock_release_read_buffer,
    acquire_write_buffer: mock_acquire_write_buffer,
    release_write_buffer: mock_release_write_buffer,
    list_antennas: mock_list_antennas,
    set_antenna: mock_set_antenna,
    get_antenna: mock_get_antenna,
    list_gains: mock_list_gains,
    set_gain: mock_set_gain,
    get_gain: mock_get_gain,
    get_gain_range: mock_get_gain_range,
    set_frequency: mock_set_frequency,
    get_frequency: mock_get_frequency,
    get_frequency_range: mock_get_frequency_range,
    set_sample_rate: mock_set_sample_rate,
    get_sample_rate: mock_get_sample_rate,
    get_sample_rate_range: mock_get_sample_rate_range,
    get_setting_info: mock_get_setting_info,
    write_setting: mock_write_setting,
    read_setting: mock_read_setting,
    list_sensors: mock_list_sensors,
    get_sensor_info: mock_get_sensor_info,
    read_sensor: mock_read_sensor,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn make_and_unmake_are_counted() {
        let before = live_allocations();
        let dev = unsafe { mock_make(ptr::null()) };
        assert!(!dev.is_null());
        assert_eq!(live_allocations(), before + 1);
        assert_eq!(unsafe { mock_unmake(dev) }, 0);
        assert_eq!(live_allocations(), before);
    }

    #[test]
    fn unknown_driver_sets_last_error() {
        let mut args = crate::array::kwargs_to_foreign(&Kwargs::new().with("driver", "nope")).unwrap();
        let dev = unsafe { mock_make(args.as_mut_ptr()) };
        assert!(dev.is_null());
        assert_eq!(ABI.last_error(), "no match for driver=nope");
        assert_eq!(ABI.last_status(), -1);
        // the next call clears it
        unsafe { mock_get_num_channels(ptr::null(), SOAPY_SDR_RX) };
        assert_eq!(ABI.last_error(), "null device handle");
    }

    #[test]
    fn arg_info_clear_releases_everything() {
        let before = live_allocations();
        let mut info = unsafe { arg_info_out(&setting_info()[1]) };
        assert!(live_allocations() > before);
        unsafe { mock_arg_info_clear(&mut info) };
        assert_eq!(live_allocations(), before);
        assert!(info.key.is_null());
    }

    #[test]
    fn burst_runs_out() {
        let dev = unsafe { mock_make(ptr::null()) };
        let chans = [0usize];
        let strm = unsafe {
            mock_setup_stream(dev, SOAPY_SDR_RX, c"CS8".as_ptr(), chans.as_ptr(), 1, ptr::null())
        };
        assert!(!strm.is_null());
        assert_eq!(unsafe { mock_activate_stream(dev, strm, 0, 0, 100) }, 0);
        let mut buf = vec![0u8; 2 * 100];
        let ptrs = [buf.as_mut_ptr() as *mut c_void];
        let (mut flags, mut t) = (0, 0);
        let n = unsafe { mock_read_stream(dev, strm, ptrs.as_ptr(), 100, &mut flags, &mut t, 0) };
        assert_eq!(n, 100);
        assert_ne!(flags & StreamFlags::END_BURST.bits(), 0);
        let n = unsafe { mock_read_stream(dev, strm, ptrs.as_ptr(), 100, &mut flags, &mut t, 0) };
        assert_eq!(n, ErrorKind::TIMEOUT);
        unsafe {
            mock_close_stream(dev, strm);
            mock_unmake(dev);
        }
    }
}
