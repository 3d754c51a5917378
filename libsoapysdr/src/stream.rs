//! Sample streams.
//!
//! A [`Stream`] is set up on one direction and an ordered set of channels,
//! and is bound for life to the element format of its sample type `S`. It
//! moves between [`StreamState::Configured`] and [`StreamState::Active`]
//! until it is closed. Transfers are only accepted while active.
//!
//! Each stream keeps one pointer table per transfer direction, sized to the
//! channel count at setup. Every transfer overwrites the entries with the
//! caller's buffer addresses; the tables themselves are never reallocated.

use std::ffi::CStr;
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ops::{BitOr, BitOrAssign};
use std::ptr::NonNull;
use std::str::FromStr;
use std::time::Duration;

use libc::{c_int, c_long, c_void, size_t};
use num_complex::Complex;
use tracing::{debug, trace, warn};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::array;
use crate::device::Device;
use crate::error::{Error, ErrorKind, Fault, Result};
use crate::ffi::SoapySDRStream;
use crate::types::{Direction, Kwargs};

/// Stream element formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Format {
    /// Complex unsigned 8-bit.
    CU8,
    /// Complex signed 8-bit.
    CS8,
    /// Complex unsigned 16-bit.
    CU16,
    /// Complex signed 16-bit.
    CS16,
    /// Complex 32-bit float.
    CF32,
    /// Complex 64-bit float.
    CF64,
}

impl Format {
    pub const ALL: [Format; 6] = [
        Format::CU8,
        Format::CS8,
        Format::CU16,
        Format::CS16,
        Format::CF32,
        Format::CF64,
    ];

    /// The format string used by the driver layer.
    pub fn as_str(self) -> &'static str {
        match self {
            Format::CU8 => "CU8",
            Format::CS8 => "CS8",
            Format::CU16 => "CU16",
            Format::CS16 => "CS16",
            Format::CF32 => "CF32",
            Format::CF64 => "CF64",
        }
    }

    fn as_cstr(self) -> &'static CStr {
        match self {
            Format::CU8 => c"CU8",
            Format::CS8 => c"CS8",
            Format::CU16 => c"CU16",
            Format::CS16 => c"CS16",
            Format::CF32 => c"CF32",
            Format::CF64 => c"CF64",
        }
    }

    /// Bytes per complex element.
    pub const fn element_size(self) -> usize {
        match self {
            Format::CU8 | Format::CS8 => 2,
            Format::CU16 | Format::CS16 => 4,
            Format::CF32 => 8,
            Format::CF64 => 16,
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Format::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| format!("unknown stream format {s}"))
    }
}

mod sealed {
    pub trait Sealed {}
}

/// A host element type with a matching stream format.
pub trait Sample: Copy + Default + Send + 'static + sealed::Sealed {
    const FORMAT: Format;
}

macro_rules! sample {
    ($t:ty, $fmt:expr) => {
        impl sealed::Sealed for Complex<$t> {}
        impl Sample for Complex<$t> {
            const FORMAT: Format = $fmt;
        }
        const _: () = assert!(mem::size_of::<Complex<$t>>() == $fmt.element_size());
    };
}

sample!(u8, Format::CU8);
sample!(i8, Format::CS8);
sample!(u16, Format::CU16);
sample!(i16, Format::CS16);
sample!(f32, Format::CF32);
sample!(f64, Format::CF64);

/// Flag word exchanged with stream calls.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StreamFlags(c_int);

impl StreamFlags {
    pub const NONE: StreamFlags = StreamFlags(0);
    /// The buffer ends a burst.
    pub const END_BURST: StreamFlags = StreamFlags(1 << 1);
    /// The time argument is valid.
    pub const HAS_TIME: StreamFlags = StreamFlags(1 << 2);
    /// A burst ended before its requested length.
    pub const END_ABRUPT: StreamFlags = StreamFlags(1 << 3);
    /// Transfer at most one packet.
    pub const ONE_PACKET: StreamFlags = StreamFlags(1 << 4);
    /// More fragments of the same packet follow.
    pub const MORE_FRAGMENTS: StreamFlags = StreamFlags(1 << 5);
    /// Start on an external trigger.
    pub const WAIT_TRIGGER: StreamFlags = StreamFlags(1 << 6);

    const NAMES: [(StreamFlags, &'static str); 6] = [
        (Self::END_BURST, "END_BURST"),
        (Self::HAS_TIME, "HAS_TIME"),
        (Self::END_ABRUPT, "END_ABRUPT"),
        (Self::ONE_PACKET, "ONE_PACKET"),
        (Self::MORE_FRAGMENTS, "MORE_FRAGMENTS"),
        (Self::WAIT_TRIGGER, "WAIT_TRIGGER"),
    ];

    /// Unknown bits are kept.
    pub const fn from_bits(bits: c_int) -> Self {
        StreamFlags(bits)
    }

    pub const fn bits(self) -> c_int {
        self.0
    }

    pub const fn contains(self, other: StreamFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for StreamFlags {
    type Output = StreamFlags;

    fn bitor(self, rhs: StreamFlags) -> StreamFlags {
        StreamFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for StreamFlags {
    fn bitor_assign(&mut self, rhs: StreamFlags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for StreamFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut rest = self.0;
        let mut first = true;
        f.write_str("StreamFlags(")?;
        for (flag, name) in Self::NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str(" | ")?;
                }
                f.write_str(name)?;
                rest &= !flag.0;
                first = false;
            }
        }
        if rest != 0 {
            if !first {
                f.write_str(" | ")?;
            }
            write!(f, "{rest:#x}")?;
        }
        f.write_str(")")
    }
}

/// Lifecycle state of a [`Stream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamState {
    Configured,
    Active,
    Closed,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamState::Configured => write!(f, "configured"),
            StreamState::Active => write!(f, "active"),
            StreamState::Closed => write!(f, "closed"),
        }
    }
}

/// Outcome of one read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transfer {
    /// Elements transferred per channel.
    pub elements: usize,
    /// The stream-level flag word returned by the driver.
    pub flags: StreamFlags,
    /// Timestamp of the first element in nanoseconds. For writes this is the
    /// time that was passed in.
    pub time_ns: i64,
}

/// An asynchronous event reported by [`Stream::read_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamStatus {
    /// Bit `i` set means channel index `i` of the device is concerned.
    pub channel_mask: usize,
    pub flags: StreamFlags,
    pub time_ns: i64,
}

fn timeout_us(timeout: Duration) -> c_long {
    timeout.as_micros().min(c_long::MAX as u128) as c_long
}

/// Map a negative transfer return to its status kind.
fn transfer_error(ret: c_int) -> Error {
    Error::Status(ErrorKind::from_code(ret).unwrap_or(ErrorKind::Unknown(ret)))
}

/// An open stream on `channels` of one direction.
pub struct Stream<'a, S: Sample> {
    device: &'a Device,
    raw: NonNull<SoapySDRStream>,
    direction: Direction,
    channels: Vec<usize>,
    state: StreamState,
    read_table: Box<[*mut c_void]>,
    write_table: Box<[*const c_void]>,
    _sample: PhantomData<S>,
}

// Only one transfer may be in flight; `&mut self` on every transfer enforces it.
unsafe impl<S: Sample> Send for Stream<'_, S> {}

impl Device {
    /// Set up a stream of `S` samples. See [`Stream::setup`].
    pub fn setup_stream<S: Sample>(
        &self,
        direction: Direction,
        channels: &[usize],
        args: &Kwargs,
    ) -> Result<Stream<'_, S>> {
        Stream::setup(self, direction, channels, args)
    }
}

impl<'a, S: Sample> Stream<'a, S> {
    /// Set up a stream in the [`StreamState::Configured`] state.
    ///
    /// A driver failure is returned as [`Error::Driver`] with the driver's
    /// last error message.
    pub fn setup(
        device: &'a Device,
        direction: Direction,
        channels: &[usize],
        args: &Kwargs,
    ) -> Result<Self> {
        if channels.is_empty() {
            return Err(Fault::EmptyChannels.into());
        }
        let abi = device.abi();
        let chans = array::sizes_to_foreign(channels)?;
        let foreign_args = array::kwargs_to_foreign(args)?;
        let raw = unsafe {
            (abi.setup_stream)(
                device.raw(),
                direction.raw(),
                S::FORMAT.as_cstr().as_ptr(),
                chans.as_ptr(),
                channels.len(),
                foreign_args.as_ptr(),
            )
        };
        let Some(raw) = NonNull::new(raw) else {
            let msg = abi.last_error();
            debug!(%direction, format = %S::FORMAT, ?channels, error = %msg, "stream setup failed");
            return Err(Error::Driver(msg));
        };
        debug!(%direction, format = %S::FORMAT, ?channels, "stream set up");
        Ok(Stream {
            device,
            raw,
            direction,
            channels: channels.to_vec(),
            state: StreamState::Configured,
            read_table: vec![std::ptr::null_mut(); channels.len()].into_boxed_slice(),
            write_table: vec![std::ptr::null(); channels.len()].into_boxed_slice(),
            _sample: PhantomData,
        })
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn format(&self) -> Format {
        S::FORMAT
    }

    /// Device channel indices, in buffer order.
    pub fn channels(&self) -> &[usize] {
        &self.channels
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn device(&self) -> &'a Device {
        self.device
    }

    fn require(&self, op: &'static str, allowed: &[StreamState]) -> Result<()> {
        if allowed.contains(&self.state) {
            return Ok(());
        }
        Err(Fault::InvalidState {
            op,
            state: self.state,
        }
        .into())
    }

    fn dev(&self) -> *mut crate::ffi::SoapySDRDevice {
        self.device.raw()
    }

    /// Largest number of elements one transfer can move.
    pub fn mtu(&self) -> Result<usize> {
        self.require("mtu", &[StreamState::Configured, StreamState::Active])?;
        Ok(unsafe { (self.device.abi().get_stream_mtu)(self.dev(), self.raw.as_ptr()) })
    }

    /// Start streaming.
    ///
    /// `time_ns` is used only when `flags` contains [`StreamFlags::HAS_TIME`].
    /// A non-zero `num_elems` requests a burst of that many elements;
    /// zero streams continuously. Activating an active stream does nothing.
    pub fn activate(&mut self, flags: StreamFlags, time_ns: i64, num_elems: usize) -> Result<()> {
        self.require("activate", &[StreamState::Configured, StreamState::Active])?;
        if self.state == StreamState::Active {
            return Ok(());
        }
        let ret = unsafe {
            (self.device.abi().activate_stream)(self.dev(), self.raw.as_ptr(), flags.bits(), time_ns, num_elems)
        };
        if ret != 0 {
            return Err(transfer_error(ret));
        }
        debug!(?flags, time_ns, num_elems, "stream activated");
        self.state = StreamState::Active;
        Ok(())
    }

    /// Stop streaming. Deactivating a configured stream does nothing.
    pub fn deactivate(&mut self, flags: StreamFlags, time_ns: i64) -> Result<()> {
        self.require("deactivate", &[StreamState::Configured, StreamState::Active])?;
        if self.state == StreamState::Configured {
            return Ok(());
        }
        let ret = unsafe {
            (self.device.abi().deactivate_stream)(self.dev(), self.raw.as_ptr(), flags.bits(), time_ns)
        };
        if ret != 0 {
            return Err(transfer_error(ret));
        }
        debug!(?flags, time_ns, "stream deactivated");
        self.state = StreamState::Configured;
        Ok(())
    }

    /// Close the stream. It must be deactivated first.
    ///
    /// The stream is closed even when the driver reports an error.
    pub fn close(&mut self) -> Result<()> {
        self.require("close", &[StreamState::Configured])?;
        let ret = unsafe { (self.device.abi().close_stream)(self.dev(), self.raw.as_ptr()) };
        self.state = StreamState::Closed;
        self.read_table = Box::new([]);
        self.write_table = Box::new([]);
        debug!(ret, "stream closed");
        if ret != 0 {
            return Err(transfer_error(ret));
        }
        Ok(())
    }

    fn check_shape(&self, buffers: usize, flags: usize) -> Result<()> {
        let expected = self.channels.len();
        if buffers != expected {
            return Err(Fault::ChannelCount {
                expected,
                actual: buffers,
            }
            .into());
        }
        if flags != expected {
            return Err(Fault::FlagCount {
                expected,
                actual: flags,
            }
            .into());
        }
        Ok(())
    }

    /// Read up to `num_elems` elements into each channel buffer.
    ///
    /// `buffers` and `flags` need one entry per channel. The driver's flag
    /// word is written to every entry of `flags`.
    pub fn read<B: AsMut<[S]>>(
        &mut self,
        buffers: &mut [B],
        num_elems: usize,
        flags: &mut [StreamFlags],
        timeout: Duration,
    ) -> Result<Transfer> {
        self.require("read", &[StreamState::Active])?;
        self.check_shape(buffers.len(), flags.len())?;
        for (channel, (slot, buf)) in self.read_table.iter_mut().zip(buffers.iter_mut()).enumerate() {
            let buf = buf.as_mut();
            if buf.len() < num_elems {
                return Err(Fault::BufferTooShort {
                    channel,
                    len: buf.len(),
                    needed: num_elems,
                }
                .into());
            }
            *slot = buf.as_mut_ptr() as *mut c_void;
        }

        let mut time_ns = 0;
        let ret = unsafe {
            (self.device.abi().read_stream)(
                self.dev(),
                self.raw.as_ptr(),
                self.read_table.as_ptr(),
                num_elems,
                flags.as_mut_ptr() as *mut c_int,
                &mut time_ns,
                timeout_us(timeout),
            )
        };
        if ret < 0 {
            let err = transfer_error(ret);
            warn!(code = ret, %err, "read failed");
            return Err(err);
        }
        let word = flags[0];
        flags.fill(word);
        trace!(elements = ret, ?word, time_ns, "read");
        Ok(Transfer {
            elements: ret as usize,
            flags: word,
            time_ns,
        })
    }

    /// Write up to `num_elems` elements from each channel buffer.
    ///
    /// `flags[0]` is passed to the driver as the flag word; combine
    /// [`StreamFlags::HAS_TIME`] with `time_ns` for a timed transmission and
    /// [`StreamFlags::END_BURST`] on the last buffer of a burst. The word
    /// returned by the driver is written to every entry of `flags`.
    pub fn write<B: AsRef<[S]>>(
        &mut self,
        buffers: &[B],
        num_elems: usize,
        flags: &mut [StreamFlags],
        time_ns: i64,
        timeout: Duration,
    ) -> Result<Transfer> {
        self.require("write", &[StreamState::Active])?;
        self.check_shape(buffers.len(), flags.len())?;
        for (channel, (slot, buf)) in self.write_table.iter_mut().zip(buffers).enumerate() {
            let buf = buf.as_ref();
            if buf.len() < num_elems {
                return Err(Fault::BufferTooShort {
                    channel,
                    len: buf.len(),
                    needed: num_elems,
                }
                .into());
            }
            *slot = buf.as_ptr() as *const c_void;
        }

        let ret = unsafe {
            (self.device.abi().write_stream)(
                self.dev(),
                self.raw.as_ptr(),
                self.write_table.as_ptr(),
                num_elems,
                flags.as_mut_ptr() as *mut c_int,
                time_ns,
                timeout_us(timeout),
            )
        };
        if ret < 0 {
            let err = transfer_error(ret);
            warn!(code = ret, %err, "write failed");
            return Err(err);
        }
        let word = flags[0];
        flags.fill(word);
        trace!(elements = ret, ?word, time_ns, "write");
        Ok(Transfer {
            elements: ret as usize,
            flags: word,
            time_ns,
        })
    }

    /// Wait for an asynchronous event such as an end of burst or an
    /// underflow on a transmit stream.
    pub fn read_status(&mut self, timeout: Duration) -> Result<StreamStatus> {
        self.require("read_status", &[StreamState::Configured, StreamState::Active])?;
        let mut mask: size_t = 0;
        let mut flags: c_int = 0;
        let mut time_ns = 0;
        let ret = unsafe {
            (self.device.abi().read_stream_status)(
                self.dev(),
                self.raw.as_ptr(),
                &mut mask,
                &mut flags,
                &mut time_ns,
                timeout_us(timeout),
            )
        };
        if ret != 0 {
            return Err(transfer_error(ret));
        }
        Ok(StreamStatus {
            channel_mask: mask,
            flags: StreamFlags::from_bits(flags),
            time_ns,
        })
    }

    /// Number of driver buffers available for direct access.
    pub fn num_direct_access_buffers(&self) -> Result<usize> {
        self.require(
            "num_direct_access_buffers",
            &[StreamState::Configured, StreamState::Active],
        )?;
        Ok(unsafe { (self.device.abi().get_num_direct_access_buffers)(self.dev(), self.raw.as_ptr()) })
    }

    /// Borrow the next filled receive buffer in place.
    ///
    /// The buffer goes back to the driver when the guard is dropped.
    pub fn acquire_read_buffer(&mut self, timeout: Duration) -> Result<ReadBuffer<'_, 'a, S>> {
        self.require("acquire_read_buffer", &[StreamState::Active])?;
        let mut handle: size_t = 0;
        let mut flags: c_int = 0;
        let mut time_ns = 0;
        let ret = unsafe {
            (self.device.abi().acquire_read_buffer)(
                self.dev(),
                self.raw.as_ptr(),
                &mut handle,
                self.read_table.as_mut_ptr() as *mut *const c_void,
                &mut flags,
                &mut time_ns,
                timeout_us(timeout),
            )
        };
        if ret < 0 {
            return Err(transfer_error(ret));
        }
        Ok(ReadBuffer {
            stream: self,
            handle,
            len: ret as usize,
            flags: StreamFlags::from_bits(flags),
            time_ns,
        })
    }

    /// Borrow the next free transmit buffer in place.
    ///
    /// Fill it and call [`WriteBuffer::commit`]. Dropping the guard without
    /// committing hands the buffer back with no elements.
    pub fn acquire_write_buffer(&mut self, timeout: Duration) -> Result<WriteBuffer<'_, 'a, S>> {
        self.require("acquire_write_buffer", &[StreamState::Active])?;
        let mut handle: size_t = 0;
        let ret = unsafe {
            (self.device.abi().acquire_write_buffer)(
                self.dev(),
                self.raw.as_ptr(),
                &mut handle,
                self.write_table.as_mut_ptr() as *mut *mut c_void,
                timeout_us(timeout),
            )
        };
        if ret < 0 {
            return Err(transfer_error(ret));
        }
        Ok(WriteBuffer {
            stream: self,
            handle,
            len: ret as usize,
            released: false,
        })
    }
}

impl<S: Sample> Drop for Stream<'_, S> {
    fn drop(&mut self) {
        if self.state == StreamState::Active {
            if let Err(err) = self.deactivate(StreamFlags::NONE, 0) {
                warn!(%err, "deactivate on drop failed");
                self.state = StreamState::Configured;
            }
        }
        if self.state == StreamState::Configured {
            if let Err(err) = self.close() {
                warn!(%err, "close on drop failed");
            }
        }
    }
}

impl<S: Sample> fmt::Debug for Stream<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("direction", &self.direction)
            .field("format", &S::FORMAT)
            .field("channels", &self.channels)
            .field("state", &self.state)
            .finish()
    }
}

/// A driver receive buffer held in place.
pub struct ReadBuffer<'s, 'a, S: Sample> {
    stream: &'s mut Stream<'a, S>,
    handle: usize,
    len: usize,
    flags: StreamFlags,
    time_ns: i64,
}

impl<S: Sample> ReadBuffer<'_, '_, S> {
    /// Elements available per channel.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn flags(&self) -> StreamFlags {
        self.flags
    }

    pub fn time_ns(&self) -> i64 {
        self.time_ns
    }

    /// Samples of the `i`-th stream channel.
    pub fn channel(&self, i: usize) -> Option<&[S]> {
        let ptr = *self.stream.read_table.get(i)? as *const S;
        if ptr.is_null() {
            return None;
        }
        Some(unsafe { std::slice::from_raw_parts(ptr, self.len) })
    }
}

impl<S: Sample> Drop for ReadBuffer<'_, '_, S> {
    fn drop(&mut self) {
        let s = &*self.stream;
        unsafe { (s.device.abi().release_read_buffer)(s.dev(), s.raw.as_ptr(), self.handle) };
    }
}

/// A driver transmit buffer held in place.
pub struct WriteBuffer<'s, 'a, S: Sample> {
    stream: &'s mut Stream<'a, S>,
    handle: usize,
    len: usize,
    released: bool,
}

impl<S: Sample> WriteBuffer<'_, '_, S> {
    /// Capacity per channel, in elements.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Writable samples of the `i`-th stream channel.
    pub fn channel_mut(&mut self, i: usize) -> Option<&mut [S]> {
        let ptr = *self.stream.write_table.get(i)? as *mut S;
        if ptr.is_null() {
            return None;
        }
        Some(unsafe { std::slice::from_raw_parts_mut(ptr, self.len) })
    }

    /// Hand `num_elems` elements to the driver for transmission.
    pub fn commit(mut self, num_elems: usize, flags: StreamFlags, time_ns: i64) -> Result<StreamFlags> {
        if num_elems > self.len {
            return Err(Fault::BufferTooShort {
                channel: 0,
                len: self.len,
                needed: num_elems,
            }
            .into());
        }
        let flags = self.release(num_elems, flags, time_ns);
        trace!(elements = num_elems, ?flags, "direct write committed");
        Ok(flags)
    }

    fn release(&mut self, num_elems: usize, flags: StreamFlags, time_ns: i64) -> StreamFlags {
        let mut word = flags.bits();
        let s = &*self.stream;
        unsafe {
            (s.device.abi().release_write_buffer)(
                s.dev(),
                s.raw.as_ptr(),
                self.handle,
                num_elems,
                &mut word,
                time_ns,
            )
        };
        self.released = true;
        StreamFlags::from_bits(word)
    }
}

impl<S: Sample> Drop for WriteBuffer<'_, '_, S> {
    fn drop(&mut self) {
        if !self.released {
            self.release(0, StreamFlags::NONE, 0);
        }
    }
}
